//! C ABI for embedding the node in a C++ host plugin.
//!
//! The host owns an opaque pointer from [`create_tracking_node`] and must
//! release it with [`delete_tracking_node`]. Host status (acquisition,
//! recording, clocks) is pushed in through setters; status messages are
//! delivered through an optional callback.
//!
//! Functions returning `i32` use [`error_code`]: zero on success, negative
//! on failure.

use crate::config::{load_config, save_config, NodeConfig};
use crate::error::Error;
use crate::processing::events::{
    CollectedEvents, TrackingEvent, DESC_ADDRESS, DESC_COLOR, DESC_NAME, DESC_PORT,
};
use crate::processing::tracker::{TrackerColor, TrackerParameter, TrackerSettings};
use crate::processing::{HostServices, TrackingNode};

use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_void};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

pub type StatusCallback = extern "C" fn(message: *const c_char);

// -----------------------------------------------------------------------------
// HOST STATE
// -----------------------------------------------------------------------------

/// Host status as last reported by the C++ side.
#[derive(Default)]
pub struct FfiHost {
    acquisition: AtomicBool,
    recording: AtomicBool,
    global_timestamp: AtomicI64,
    software_timestamp: AtomicI64,
    status_callback: Mutex<Option<StatusCallback>>,
}

impl HostServices for FfiHost {
    fn is_acquisition_active(&self) -> bool {
        self.acquisition.load(Ordering::Acquire)
    }

    fn is_recording_active(&self) -> bool {
        self.recording.load(Ordering::Acquire)
    }

    fn global_timestamp(&self) -> i64 {
        self.global_timestamp.load(Ordering::Acquire)
    }

    fn software_timestamp(&self) -> i64 {
        self.software_timestamp.load(Ordering::Acquire)
    }

    fn send_status_message(&self, message: &str) {
        log::info!("{}", message);
        let callback = *self
            .status_callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let (Some(callback), Ok(message)) = (callback, CString::new(message)) {
            callback(message.as_ptr());
        }
    }
}

pub struct TrackingNodeFFI {
    host: Arc<FfiHost>,
    node: TrackingNode,
}

impl TrackingNodeFFI {
    pub fn new(config: NodeConfig) -> Self {
        let host = Arc::new(FfiHost::default());
        let node = TrackingNode::new(config, host.clone());
        Self { host, node }
    }
}

// -----------------------------------------------------------------------------
// EVENT LAYOUT
// -----------------------------------------------------------------------------

/// Event as written into the host's buffer. Strings are NUL-terminated and
/// truncated to fit.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct TrackingEventFFI {
    pub channel: u16,
    pub sample_number: i64,
    pub timestamp: i64,
    /// x, y, height, width
    pub position: [f32; 4],
    pub name: [c_char; DESC_NAME.length],
    pub port: [c_char; DESC_PORT.length],
    pub address: [c_char; DESC_ADDRESS.length],
    pub color: [c_char; DESC_COLOR.length],
}

fn fill_c_string<const N: usize>(value: &str) -> [c_char; N] {
    let mut out = [0 as c_char; N];
    for (slot, byte) in out.iter_mut().zip(value.bytes().take(N.saturating_sub(1))) {
        *slot = byte as c_char;
    }
    out
}

impl From<&TrackingEvent> for TrackingEventFFI {
    fn from(event: &TrackingEvent) -> Self {
        Self {
            channel: event.channel.0,
            sample_number: event.sample_number,
            timestamp: event.timestamp,
            position: event.metadata.position,
            name: fill_c_string(&event.metadata.name),
            port: fill_c_string(&event.metadata.port),
            address: fill_c_string(&event.metadata.address),
            color: fill_c_string(&event.metadata.color),
        }
    }
}

// -----------------------------------------------------------------------------
// HELPERS
// -----------------------------------------------------------------------------

pub fn error_code(error: &Error) -> i32 {
    match error {
        Error::Io(_) => -1,
        Error::Yaml(_) => -2,
        Error::Csv(_) => -3,
        Error::Decode(_) => -4,
        Error::Bind { .. } => -5,
        Error::JoinTimeout { .. } => -6,
        Error::TrackerNotFound(_) => -7,
        Error::DuplicateTracker(_) => -8,
        Error::PortInUse(_) => -9,
        Error::TooManyTrackers(_) => -10,
        Error::InvalidParameter(_) => -11,
    }
}

/// Null pointer passed where a node or string was required.
pub const ERROR_NULL_ARGUMENT: i32 = -100;

fn to_code(result: crate::error::Result<()>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(e) => {
            log::error!("{}", e);
            error_code(&e)
        }
    }
}

/// Borrow a C string. Returns `None` for null or non-UTF-8 input.
unsafe fn read_str<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok()
}

unsafe fn node_ref<'a>(node_ptr: *mut c_void) -> Option<&'a TrackingNodeFFI> {
    (node_ptr as *const TrackingNodeFFI).as_ref()
}

// -----------------------------------------------------------------------------
// LIFECYCLE
// -----------------------------------------------------------------------------

#[no_mangle]
pub extern "C" fn create_tracking_node(
    verbose: bool,
    queue_capacity: usize,
    max_trackers: usize,
) -> *mut c_void {
    let defaults = NodeConfig::default();
    let config = NodeConfig {
        verbose,
        queue_capacity: if queue_capacity == 0 {
            defaults.queue_capacity
        } else {
            queue_capacity
        },
        max_trackers: if max_trackers == 0 {
            defaults.max_trackers
        } else {
            max_trackers
        },
        ..defaults
    };
    let boxed_node = Box::new(TrackingNodeFFI::new(config));
    Box::into_raw(boxed_node) as *mut c_void
}

#[no_mangle]
pub extern "C" fn delete_tracking_node(node_ptr: *mut c_void) {
    if !node_ptr.is_null() {
        unsafe {
            drop(Box::from_raw(node_ptr as *mut TrackingNodeFFI));
        }
    }
}

#[no_mangle]
pub extern "C" fn set_status_callback(node_ptr: *mut c_void, callback: Option<StatusCallback>) {
    if let Some(ffi) = unsafe { node_ref(node_ptr) } {
        *ffi.host
            .status_callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = callback;
    }
}

// -----------------------------------------------------------------------------
// HOST STATUS
// -----------------------------------------------------------------------------

#[no_mangle]
pub extern "C" fn set_acquisition_active(node_ptr: *mut c_void, active: bool) {
    if let Some(ffi) = unsafe { node_ref(node_ptr) } {
        ffi.host.acquisition.store(active, Ordering::Release);
    }
}

#[no_mangle]
pub extern "C" fn set_recording_active(node_ptr: *mut c_void, active: bool) {
    if let Some(ffi) = unsafe { node_ref(node_ptr) } {
        ffi.host.recording.store(active, Ordering::Release);
    }
}

#[no_mangle]
pub extern "C" fn set_timestamps(node_ptr: *mut c_void, global: i64, software: i64) {
    if let Some(ffi) = unsafe { node_ref(node_ptr) } {
        ffi.host.global_timestamp.store(global, Ordering::Release);
        ffi.host.software_timestamp.store(software, Ordering::Release);
    }
}

#[no_mangle]
pub extern "C" fn start_acquisition(node_ptr: *mut c_void) {
    if let Some(ffi) = unsafe { node_ref(node_ptr) } {
        ffi.node.start_acquisition();
    }
}

#[no_mangle]
pub extern "C" fn stop_acquisition(node_ptr: *mut c_void) {
    if let Some(ffi) = unsafe { node_ref(node_ptr) } {
        ffi.node.stop_acquisition();
    }
}

// -----------------------------------------------------------------------------
// TRACKERS
// -----------------------------------------------------------------------------

/// Add a tracker with default settings. `name` may be null.
#[no_mangle]
pub extern "C" fn add_tracker(node_ptr: *mut c_void, name: *const c_char) -> i32 {
    let Some(ffi) = (unsafe { node_ref(node_ptr) }) else {
        return ERROR_NULL_ARGUMENT;
    };
    let name = unsafe { read_str(name) };
    to_code(ffi.node.add_tracker(name).map(|_| ()))
}

#[no_mangle]
pub extern "C" fn add_tracker_with_settings(
    node_ptr: *mut c_void,
    name: *const c_char,
    port: u16,
    address: *const c_char,
    color: *const c_char,
) -> i32 {
    let Some(ffi) = (unsafe { node_ref(node_ptr) }) else {
        return ERROR_NULL_ARGUMENT;
    };
    let (Some(name), Some(address), Some(color)) =
        (unsafe { (read_str(name), read_str(address), read_str(color)) })
    else {
        return ERROR_NULL_ARGUMENT;
    };
    let color = match color.parse::<TrackerColor>() {
        Ok(color) => color,
        Err(e) => return to_code(Err(e)),
    };
    to_code(
        ffi.node
            .add_tracker_with(TrackerSettings::new(name, port, address, color)),
    )
}

#[no_mangle]
pub extern "C" fn remove_tracker(node_ptr: *mut c_void, name: *const c_char) -> i32 {
    let Some(ffi) = (unsafe { node_ref(node_ptr) }) else {
        return ERROR_NULL_ARGUMENT;
    };
    let Some(name) = (unsafe { read_str(name) }) else {
        return ERROR_NULL_ARGUMENT;
    };
    to_code(ffi.node.remove_tracker(name))
}

/// Update one tracker field by host parameter name ("source", "port",
/// "address" or "color").
#[no_mangle]
pub extern "C" fn update_tracker(
    node_ptr: *mut c_void,
    name: *const c_char,
    parameter: *const c_char,
    value: *const c_char,
) -> i32 {
    let Some(ffi) = (unsafe { node_ref(node_ptr) }) else {
        return ERROR_NULL_ARGUMENT;
    };
    let (Some(name), Some(parameter), Some(value)) =
        (unsafe { (read_str(name), read_str(parameter), read_str(value)) })
    else {
        return ERROR_NULL_ARGUMENT;
    };
    to_code(
        TrackerParameter::parse(parameter, value)
            .and_then(|parameter| ffi.node.update_tracker(name, parameter)),
    )
}

#[no_mangle]
pub extern "C" fn n_sources(node_ptr: *mut c_void) -> usize {
    unsafe { node_ref(node_ptr) }.map_or(0, |ffi| ffi.node.n_sources())
}

#[no_mangle]
pub extern "C" fn is_port_used(node_ptr: *mut c_void, port: u16) -> bool {
    unsafe { node_ref(node_ptr) }.is_some_and(|ffi| ffi.node.is_port_used(port))
}

// -----------------------------------------------------------------------------
// PROCESSING
// -----------------------------------------------------------------------------

/// Run one processing cycle, writing at most `capacity` events to `out`.
///
/// Returns the number of events written. `capacity` should be at least the
/// number of trackers; events beyond it are dropped.
#[no_mangle]
pub extern "C" fn process_events(
    node_ptr: *mut c_void,
    first_sample_number: i64,
    out: *mut TrackingEventFFI,
    capacity: usize,
) -> usize {
    let Some(ffi) = (unsafe { node_ref(node_ptr) }) else {
        return 0;
    };
    if out.is_null() || capacity == 0 {
        return 0;
    }

    let mut events = CollectedEvents::new(first_sample_number);
    ffi.node.process(&mut events);
    if events.events.len() > capacity {
        log::warn!(
            "Event buffer holds {} events, dropping {}",
            capacity,
            events.events.len() - capacity
        );
    }

    let out = unsafe { std::slice::from_raw_parts_mut(out, capacity) };
    let mut written = 0;
    for (slot, event) in out.iter_mut().zip(events.events.iter()) {
        *slot = TrackingEventFFI::from(event);
        written += 1;
    }
    written
}

// -----------------------------------------------------------------------------
// PERSISTENCE
// -----------------------------------------------------------------------------

#[no_mangle]
pub extern "C" fn save_settings(node_ptr: *mut c_void, path: *const c_char) -> i32 {
    let Some(ffi) = (unsafe { node_ref(node_ptr) }) else {
        return ERROR_NULL_ARGUMENT;
    };
    let Some(path) = (unsafe { read_str(path) }) else {
        return ERROR_NULL_ARGUMENT;
    };
    to_code(save_config(&ffi.node.to_config(), Path::new(path)))
}

/// Replace the node's trackers with those in a saved config file.
#[no_mangle]
pub extern "C" fn load_settings(node_ptr: *mut c_void, path: *const c_char) -> i32 {
    let Some(ffi) = (unsafe { node_ref(node_ptr) }) else {
        return ERROR_NULL_ARGUMENT;
    };
    let Some(path) = (unsafe { read_str(path) }) else {
        return ERROR_NULL_ARGUMENT;
    };
    to_code(load_config(Path::new(path)).and_then(|config| ffi.node.load_settings(&config.trackers)))
}
