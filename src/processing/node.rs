use super::events::TrackingEvent;
use super::listener::ListenerConfig;
use super::queue::PositionSample;
use super::tracker::{
    EventChannelId, Tracker, TrackerColor, TrackerParameter, TrackerSettings, TrackerStatus,
    TransitionLog, DEFAULT_ADDRESS, DEFAULT_PORT,
};
use super::{EventSink, HostProcessor, HostServices, MessageSink};
use crate::config::{NodeConfig, TrackingConfig};
use crate::error::{Error, Result};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

// -----------------------------------------------------------------------------
// RUST CORE LOGIC
// -----------------------------------------------------------------------------

// NODE COMPONENT --------------------------------------------------------------

/// Processing node owning every tracker of one host instance.
///
/// Listener threads call into the node through [`MessageSink`]; the host
/// thread calls [`TrackingNode::process`] once per cycle. Both paths take
/// the same node lock.
pub struct TrackingNode {
    shared: Arc<NodeShared>,
}

struct NodeShared {
    config: NodeConfig,
    listener_config: ListenerConfig,
    host: Arc<dyn HostServices>,
    state: Mutex<NodeState>,
    position_updated: AtomicBool,
}

#[derive(Default)]
struct NodeState {
    trackers: Vec<Tracker>,
    received_msg: u64,
    // Node-wide recording edge; resets `received_msg` once per start
    recording: TransitionLog,
    next_channel: u16,
}

impl NodeState {
    fn find(&self, name: &str) -> Option<usize> {
        self.trackers.iter().position(|t| t.settings.name == name)
    }

    fn next_port(&self) -> u16 {
        self.trackers
            .iter()
            .map(|t| t.settings.port)
            .max()
            .map_or(DEFAULT_PORT, |port| port.saturating_add(1))
    }

    fn port_owner(&self, port: u16) -> Option<&Tracker> {
        self.trackers.iter().find(|t| t.settings.port == port)
    }
}

impl NodeShared {
    fn lock(&self) -> MutexGuard<'_, NodeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TrackingNode {
    pub fn new(config: NodeConfig, host: Arc<dyn HostServices>) -> Self {
        let listener_config = ListenerConfig::from(&config);
        Self {
            shared: Arc::new(NodeShared {
                config,
                listener_config,
                host,
                state: Mutex::new(NodeState::default()),
                position_updated: AtomicBool::new(false),
            }),
        }
    }

    /// Build a node and start every tracker listed in the config.
    pub fn from_config(config: TrackingConfig, host: Arc<dyn HostServices>) -> Result<Self> {
        let node = Self::new(config.node, host);
        node.load_settings(&config.trackers)?;
        Ok(node)
    }

    pub fn config(&self) -> &NodeConfig {
        &self.shared.config
    }

    pub fn to_config(&self) -> TrackingConfig {
        TrackingConfig {
            node: self.shared.config.clone(),
            trackers: self.save_settings(),
        }
    }

    fn sink(&self) -> Arc<dyn MessageSink> {
        self.shared.clone()
    }

    // REGISTRY --------------------------------------------------------------

    /// Add a tracker with default settings.
    ///
    /// The name defaults to "Tracking source N"; the port is the default
    /// port for the first tracker, then one past the highest port in use.
    pub fn add_tracker(&self, name: Option<&str>) -> Result<TrackerSettings> {
        let settings = {
            let state = self.shared.lock();
            let name = match name {
                Some(name) => name.to_string(),
                None => format!("Tracking source {}", state.trackers.len() + 1),
            };
            TrackerSettings::new(
                &name,
                state.next_port(),
                DEFAULT_ADDRESS,
                TrackerColor::default(),
            )
        };
        self.add_tracker_with(settings.clone())?;
        Ok(settings)
    }

    /// Add a tracker with explicit settings and start its listener.
    pub fn add_tracker_with(&self, settings: TrackerSettings) -> Result<()> {
        settings.validate()?;

        let mut state = self.shared.lock();
        if state.trackers.len() >= self.shared.config.max_trackers {
            return Err(Error::TooManyTrackers(self.shared.config.max_trackers));
        }
        if state.find(&settings.name).is_some() {
            return Err(Error::DuplicateTracker(settings.name));
        }
        if state.port_owner(settings.port).is_some() {
            return Err(Error::PortInUse(settings.port));
        }

        let channel = EventChannelId(state.next_channel);
        let mut tracker = Tracker::new(settings, channel, self.shared.config.queue_capacity);
        let listener = tracker.start_listener(
            &self.shared.listener_config,
            Arc::clone(&self.shared.host),
        )?;
        listener.add_processor(Arc::downgrade(&self.sink()));

        log::info!("Added tracker {}", tracker.settings);
        state.next_channel = state.next_channel.wrapping_add(1);
        state.trackers.push(tracker);
        Ok(())
    }

    /// Remove a tracker, stopping and joining its listener.
    pub fn remove_tracker(&self, name: &str) -> Result<()> {
        let tracker = {
            let mut state = self.shared.lock();
            let index = state
                .find(name)
                .ok_or_else(|| Error::TrackerNotFound(name.to_string()))?;
            state.trackers.remove(index)
        };
        // Joined outside the lock; the listener may be waiting on it
        drop(tracker);
        log::info!("Removed tracker {}", name);
        Ok(())
    }

    /// Apply one field update to a tracker.
    ///
    /// Port and address changes restart the listener on the new endpoint
    /// and discard any queued samples. If the new endpoint cannot be bound
    /// the previous settings are restored and their listener restarted.
    pub fn update_tracker(&self, name: &str, parameter: TrackerParameter) -> Result<()> {
        let (old_listener, previous) = {
            let mut state = self.shared.lock();
            let index = state
                .find(name)
                .ok_or_else(|| Error::TrackerNotFound(name.to_string()))?;

            match &parameter {
                TrackerParameter::Name(new_name) => {
                    if new_name != name && state.find(new_name).is_some() {
                        return Err(Error::DuplicateTracker(new_name.clone()));
                    }
                }
                TrackerParameter::Port(port) => {
                    if let Some(owner) = state.port_owner(*port) {
                        if owner.settings.name != name {
                            return Err(Error::PortInUse(*port));
                        }
                    }
                }
                _ => {}
            }

            let tracker = &mut state.trackers[index];
            let mut updated = tracker.settings.clone();
            parameter.apply(&mut updated);
            updated.validate()?;

            // An unchanged endpoint still needs a listener if the last bind failed
            if updated == tracker.settings && tracker.listener().is_some() {
                return Ok(());
            }
            let previous = std::mem::replace(&mut tracker.settings, updated);
            log::info!("Updated tracker {}", tracker.settings);

            if !parameter.changes_endpoint() {
                return Ok(());
            }
            tracker.queue.clear();
            (tracker.take_listener(), previous)
        };

        // The port must be free before it can be bound again
        drop(old_listener);

        let mut state = self.shared.lock();
        let index = state
            .find(name)
            .ok_or_else(|| Error::TrackerNotFound(name.to_string()))?;
        let tracker = &mut state.trackers[index];
        if tracker.listener().is_some() {
            return Ok(());
        }

        let sink = Arc::downgrade(&self.sink());
        let started = tracker
            .start_listener(&self.shared.listener_config, Arc::clone(&self.shared.host))
            .map(|listener| listener.add_processor(sink.clone()));
        let Err(e) = started else {
            return Ok(());
        };

        log::error!("Could not move tracker {}: {}", tracker.settings, e);
        tracker.settings = previous;
        match tracker.start_listener(&self.shared.listener_config, Arc::clone(&self.shared.host)) {
            Ok(listener) => {
                listener.add_processor(sink);
                log::info!("Restored tracker {}", tracker.settings);
            }
            Err(restore) => {
                log::error!("Tracker {} has no listener: {}", tracker.settings, restore);
            }
        }
        Err(e)
    }

    pub fn tracker_names(&self) -> Vec<String> {
        self.shared
            .lock()
            .trackers
            .iter()
            .map(|t| t.settings.name.clone())
            .collect()
    }

    pub fn tracker_status(&self, name: &str) -> Result<TrackerStatus> {
        let state = self.shared.lock();
        state
            .find(name)
            .map(|index| state.trackers[index].status())
            .ok_or_else(|| Error::TrackerNotFound(name.to_string()))
    }

    pub fn n_sources(&self) -> usize {
        self.shared.lock().trackers.len()
    }

    pub fn is_port_used(&self, port: u16) -> bool {
        self.shared.lock().port_owner(port).is_some()
    }

    /// Port the next default tracker would be given.
    pub fn next_port(&self) -> u16 {
        self.shared.lock().next_port()
    }

    /// Messages queued since the last recording start.
    pub fn received_message_count(&self) -> u64 {
        self.shared.lock().received_msg
    }

    // ACQUISITION -----------------------------------------------------------

    pub fn start_acquisition(&self) {
        let mut state = self.shared.lock();
        for tracker in state.trackers.iter_mut() {
            tracker.acquisition.reset();
            tracker.recording.reset();
        }
        state.recording.reset();
        self.shared.position_updated.store(false, Ordering::Release);
        log::debug!("Acquisition started with {} trackers", state.trackers.len());
    }

    pub fn stop_acquisition(&self) {
        let mut state = self.shared.lock();
        for tracker in state.trackers.iter_mut() {
            tracker.acquisition.reset();
            tracker.recording.reset();
        }
        state.recording.reset();
        self.shared.position_updated.store(false, Ordering::Release);
        log::debug!(
            "Acquisition stopped after {} messages",
            state.received_msg
        );
    }

    // INTAKE AND EMISSION ---------------------------------------------------

    /// Queue a decoded sample for the tracker listening on `port` and
    /// `address`. Listener threads call this for every matching datagram.
    pub fn receive_message(&self, port: u16, address: &str, sample: PositionSample) {
        self.shared.receive_message(port, address, sample);
    }

    /// Emit the most recent sample of every tracker with new data.
    ///
    /// Returns the number of events emitted. Nothing is emitted unless a
    /// sample was queued since the previous call.
    pub fn process(&self, events: &mut dyn EventSink) -> usize {
        if !self.shared.position_updated.load(Ordering::Acquire) {
            return 0;
        }

        let mut state = self.shared.lock();
        let mut emitted = 0;
        for tracker in state.trackers.iter_mut() {
            let Some(sample) = tracker.queue.pop_latest() else {
                continue;
            };
            let sample_number = events.first_sample_number(tracker.channel);
            events.emit(TrackingEvent::new(
                &tracker.settings,
                tracker.channel,
                &sample,
                sample_number,
            ));
            emitted += 1;
        }
        self.shared.position_updated.store(false, Ordering::Release);
        emitted
    }

    // PERSISTENCE -----------------------------------------------------------

    /// One record per tracker, in creation order.
    pub fn save_settings(&self) -> Vec<TrackerSettings> {
        self.shared
            .lock()
            .trackers
            .iter()
            .map(|t| t.settings.clone())
            .collect()
    }

    /// Replace all trackers with the given records.
    ///
    /// Every record goes through [`TrackingNode::add_tracker_with`]; a bad
    /// record is logged and skipped, and the first error is returned once
    /// the rest have been loaded.
    pub fn load_settings(&self, records: &[TrackerSettings]) -> Result<()> {
        self.clear_trackers();

        let mut first_error = None;
        for record in records {
            if let Err(e) = self.add_tracker_with(record.clone()) {
                log::error!("Could not restore tracker {}: {}", record, e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn clear_trackers(&self) {
        let trackers = std::mem::take(&mut self.shared.lock().trackers);
        drop(trackers);
    }
}

impl Drop for TrackingNode {
    fn drop(&mut self) {
        self.clear_trackers();
    }
}

impl MessageSink for NodeShared {
    fn receive_message(&self, port: u16, address: &str, sample: PositionSample) {
        let recording = self.host.is_recording_active();
        let acquisition = self.host.is_acquisition_active();
        let mut status = Vec::new();

        {
            let mut guard = self.lock();
            let state = &mut *guard;
            let Some(tracker) = state.trackers.iter_mut().find(|t| t.matches(port, address))
            else {
                log::trace!("No tracker for {} on port {}", address, port);
                return;
            };

            if state.recording.observe(recording) {
                state.received_msg = 0;
            }
            if tracker.recording.observe(recording) {
                tracker.queue.clear();
                status.push("Clearing queue before start recording");
            }

            if !acquisition {
                tracker.acquisition.observe(false);
                log::trace!("Dropping {} on port {}: acquisition inactive", address, port);
                return;
            }
            if tracker.acquisition.observe(true) {
                tracker.queue.clear();
                status.push("Clearing queue before start acquisition");
            }

            tracker
                .queue
                .push(sample.with_timestamp(self.host.software_timestamp()));
            self.position_updated.store(true, Ordering::Release);
            state.received_msg += 1;
        }

        for message in status {
            self.host.send_status_message(message);
        }
    }
}

impl HostProcessor for TrackingNode {
    fn on_config_changed(&self, tracker: &str, parameter: TrackerParameter) -> Result<()> {
        self.update_tracker(tracker, parameter)
    }

    fn on_process_cycle(&self, events: &mut dyn EventSink) -> usize {
        self.process(events)
    }

    fn on_acquisition_started(&self) {
        self.start_acquisition();
    }

    fn on_acquisition_stopped(&self) {
        self.stop_acquisition();
    }

    fn serialize_settings(&self) -> Vec<TrackerSettings> {
        self.save_settings()
    }

    fn deserialize_settings(&self, records: &[TrackerSettings]) -> Result<()> {
        self.load_settings(records)
    }
}
