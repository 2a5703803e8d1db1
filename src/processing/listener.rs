//! UDP listener thread for one tracking source.
//!
//! Each listener owns one socket bound to `(bind_address, port)` and one
//! background thread running a blocking receive loop. Decoded positions
//! whose address pattern matches the listener's pattern are stamped with the
//! host's global timestamp and forwarded to every registered processor.
//!
//! # Lifecycle
//!
//! ```text
//! Idle -> ThreadStarted -> Listening -> StopRequested -> Stopped
//! ```
//!
//! The socket is bound before the thread is spawned, so a bind failure is
//! returned from [`NetworkListener::start`]. Stopping sets a flag and sends
//! an empty datagram to the socket to break the blocking receive; the read
//! timeout is a backstop. The thread is then joined with a bounded wait.

use super::decoder::{decode_positions, DecodedPosition};
use super::{HostServices, MessageSink};
use crate::config::NodeConfig;
use crate::error::{Error, Result};

use crossbeam_channel::{Receiver, RecvTimeoutError};

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Maximum UDP datagram size.
const MAX_DATAGRAM_SIZE: usize = 65536;

type ProcessorList = Arc<Mutex<Vec<Weak<dyn MessageSink>>>>;

/// Socket and thread settings for a listener.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub bind_address: String,
    pub startup_delay: Duration,
    pub read_timeout: Duration,
    pub join_timeout: Duration,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self::from(&NodeConfig::default())
    }
}

impl From<&NodeConfig> for ListenerConfig {
    fn from(config: &NodeConfig) -> Self {
        Self {
            bind_address: config.bind_address.clone(),
            startup_delay: Duration::from_millis(config.startup_delay_ms),
            // A zero read timeout is rejected by the OS
            read_timeout: Duration::from_millis(config.read_timeout_ms.max(1)),
            join_timeout: Duration::from_millis(config.join_timeout_ms),
        }
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Idle = 0,
    ThreadStarted = 1,
    Listening = 2,
    StopRequested = 3,
    Stopped = 4,
}

impl ListenerState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ListenerState::ThreadStarted,
            2 => ListenerState::Listening,
            3 => ListenerState::StopRequested,
            4 => ListenerState::Stopped,
            _ => ListenerState::Idle,
        }
    }
}

#[derive(Debug, Clone)]
struct StateCell(Arc<AtomicU8>);

impl StateCell {
    fn new(state: ListenerState) -> Self {
        Self(Arc::new(AtomicU8::new(state as u8)))
    }

    fn load(&self) -> ListenerState {
        ListenerState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn store(&self, state: ListenerState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

// -----------------------------------------------------------------------------
// LISTENER HANDLE
// -----------------------------------------------------------------------------

pub struct NetworkListener {
    port: u16,
    address: String,
    local_addr: SocketAddr,
    state: StateCell,
    stop_requested: Arc<AtomicBool>,
    processors: ProcessorList,
    handle: Option<JoinHandle<()>>,
    done_rx: Option<Receiver<()>>,
    join_timeout: Duration,
}

impl NetworkListener {
    /// Bind the socket and start the receive thread.
    pub fn start(
        port: u16,
        address: &str,
        config: &ListenerConfig,
        host: Arc<dyn HostServices>,
    ) -> Result<Self> {
        let socket = UdpSocket::bind((config.bind_address.as_str(), port)).map_err(|source| {
            Error::Bind {
                address: config.bind_address.clone(),
                port,
                source,
            }
        })?;
        socket.set_read_timeout(Some(config.read_timeout))?;
        let local_addr = socket.local_addr()?;

        let state = StateCell::new(ListenerState::Idle);
        let stop_requested = Arc::new(AtomicBool::new(false));
        let processors: ProcessorList = Arc::new(Mutex::new(Vec::new()));
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);

        let worker = Worker {
            socket,
            port,
            address: address.to_string(),
            state: state.clone(),
            stop_requested: Arc::clone(&stop_requested),
            processors: Arc::clone(&processors),
            host,
            startup_delay: config.startup_delay,
            poll_interval: config.read_timeout,
        };

        state.store(ListenerState::ThreadStarted);
        let handle = thread::Builder::new()
            .name(format!("osc-listener-{}", port))
            .spawn(move || {
                worker.run();
                let _ = done_tx.send(());
            })
            .map_err(|e| {
                state.store(ListenerState::Stopped);
                Error::Io(e)
            })?;

        log::debug!("Listener thread spawned for {} on {}", address, local_addr);

        Ok(Self {
            port,
            address: address.to_string(),
            local_addr,
            state,
            stop_requested,
            processors,
            handle: Some(handle),
            done_rx: Some(done_rx),
            join_timeout: config.join_timeout,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> ListenerState {
        self.state.load()
    }

    pub fn add_processor(&self, processor: Weak<dyn MessageSink>) {
        self.processors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(processor);
    }

    pub fn remove_processor(&self, processor: &Weak<dyn MessageSink>) {
        self.processors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|p| !Weak::ptr_eq(p, processor));
    }

    pub fn processor_count(&self) -> usize {
        self.processors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Request the thread to exit and join it with a bounded wait.
    ///
    /// On timeout the thread is detached and `Error::JoinTimeout` returned;
    /// it keeps its clone of the socket until it finally exits.
    pub fn stop(&mut self) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };

        self.state.store(ListenerState::StopRequested);
        self.stop_requested.store(true, Ordering::Release);
        self.wake();

        let outcome = match self.done_rx.take() {
            Some(done_rx) => done_rx.recv_timeout(self.join_timeout),
            None => Err(RecvTimeoutError::Disconnected),
        };

        match outcome {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if handle.join().is_err() {
                    log::error!("Listener thread for port {} panicked", self.port);
                }
                log::debug!("Listener on port {} joined", self.port);
                Ok(())
            }
            Err(RecvTimeoutError::Timeout) => Err(Error::JoinTimeout {
                port: self.port,
                timeout_ms: self.join_timeout.as_millis() as u64,
            }),
        }
    }

    /// Break the blocking receive with an empty datagram.
    fn wake(&self) {
        let target = match self.local_addr.ip() {
            IpAddr::V4(ip) if ip.is_unspecified() => {
                SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), self.local_addr.port())
            }
            IpAddr::V6(ip) if ip.is_unspecified() => {
                SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), self.local_addr.port())
            }
            _ => self.local_addr,
        };
        let bind_any: SocketAddr = if target.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };

        let sent = UdpSocket::bind(bind_any).and_then(|waker| waker.send_to(&[], target));
        if let Err(e) = sent {
            log::debug!(
                "Could not wake listener on port {} ({}), waiting for read timeout",
                self.port,
                e
            );
        }
    }
}

impl Drop for NetworkListener {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::error!("{}; the listener thread is leaked", e);
        }
    }
}

// -----------------------------------------------------------------------------
// RECEIVE THREAD
// -----------------------------------------------------------------------------

struct Worker {
    socket: UdpSocket,
    port: u16,
    address: String,
    state: StateCell,
    stop_requested: Arc<AtomicBool>,
    processors: ProcessorList,
    host: Arc<dyn HostServices>,
    startup_delay: Duration,
    poll_interval: Duration,
}

impl Worker {
    fn should_stop(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    fn run(self) {
        self.wait_startup_delay();
        if self.should_stop() {
            self.state.store(ListenerState::Stopped);
            return;
        }

        self.state.store(ListenerState::Listening);
        log::info!(
            "Listening for {} on port {}",
            self.address,
            self.port
        );

        let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];

        while !self.should_stop() {
            let len = match self.socket.recv_from(&mut buffer) {
                Ok((len, _src)) => len,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                Err(e) => {
                    log::error!("UDP recv error on port {}: {}", self.port, e);
                    continue;
                }
            };

            if self.should_stop() {
                break;
            }
            if len == 0 {
                continue;
            }

            self.dispatch(&buffer[..len]);
        }

        self.state.store(ListenerState::Stopped);
        log::info!("Listener on port {} stopped", self.port);
    }

    fn wait_startup_delay(&self) {
        let deadline = Instant::now() + self.startup_delay;
        loop {
            let now = Instant::now();
            if now >= deadline || self.should_stop() {
                return;
            }
            thread::sleep((deadline - now).min(self.poll_interval));
        }
    }

    fn dispatch(&self, datagram: &[u8]) {
        for DecodedPosition { address, sample } in decode_positions(datagram) {
            if address != self.address {
                log::trace!(
                    "Port {} ignoring {} (expecting {})",
                    self.port,
                    address,
                    self.address
                );
                continue;
            }

            let sample = sample.with_timestamp(self.host.global_timestamp());

            // Upgrade outside the sink calls so the list lock is never held
            // while a processor takes its own lock
            let processors: Vec<Arc<dyn MessageSink>> = self
                .processors
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .filter_map(Weak::upgrade)
                .collect();

            for processor in processors {
                processor.receive_message(self.port, &self.address, sample);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::host::LocalHost;
    use crate::processing::decoder::encode_position;
    use crate::processing::queue::PositionSample;

    #[derive(Default)]
    struct Recorder {
        received: Mutex<Vec<(u16, String, PositionSample)>>,
    }

    impl MessageSink for Recorder {
        fn receive_message(&self, port: u16, address: &str, sample: PositionSample) {
            self.received
                .lock()
                .unwrap()
                .push((port, address.to_string(), sample));
        }
    }

    fn wait_for<F: Fn() -> bool>(condition: F) -> bool {
        let deadline = Instant::now() + Duration::from_secs(3);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    fn start(port: u16, address: &str) -> (NetworkListener, Arc<Recorder>) {
        let host: Arc<dyn HostServices> = Arc::new(LocalHost::new());
        let listener =
            NetworkListener::start(port, address, &ListenerConfig::default(), host).unwrap();
        let recorder = Arc::new(Recorder::default());
        let sink: Arc<dyn MessageSink> = recorder.clone();
        listener.add_processor(Arc::downgrade(&sink));
        assert!(wait_for(|| listener.state() == ListenerState::Listening));
        (listener, recorder)
    }

    fn send(port: u16, bytes: &[u8]) {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket.send_to(bytes, ("127.0.0.1", port)).unwrap();
    }

    #[test]
    fn test_forwards_matching_address() {
        let (listener, recorder) = start(47101, "/red");

        send(47101, &encode_position("/blue", 9.0, 9.0, 9.0, 9.0).unwrap());
        send(47101, &encode_position("/red", 1.0, 2.0, 3.0, 4.0).unwrap());

        assert!(wait_for(|| recorder.received.lock().unwrap().len() == 1));
        let (port, address, sample) = recorder.received.lock().unwrap()[0].clone();
        assert_eq!(port, 47101);
        assert_eq!(address, "/red");
        assert_eq!(sample.width, 3.0);
        assert_eq!(sample.height, 4.0);
        drop(listener);
    }

    #[test]
    fn test_malformed_datagram_keeps_listening() {
        let (listener, recorder) = start(47102, "/red");

        send(47102, b"not osc at all");
        send(47102, &[0xff; 3]);
        send(47102, &encode_position("/red", 5.0, 6.0, 7.0, 8.0).unwrap());

        assert!(wait_for(|| recorder.received.lock().unwrap().len() == 1));
        assert_eq!(listener.state(), ListenerState::Listening);
    }

    #[test]
    fn test_stop_joins_thread() {
        let (mut listener, _recorder) = start(47103, "/red");
        listener.stop().unwrap();
        assert_eq!(listener.state(), ListenerState::Stopped);

        // Port is free again once the thread has exited
        let rebound = UdpSocket::bind(("127.0.0.1", 47103));
        assert!(rebound.is_ok());

        // Second stop is a no-op
        listener.stop().unwrap();
    }

    #[test]
    fn test_bind_failure_is_reported() {
        let _holder = UdpSocket::bind(("127.0.0.1", 47104)).unwrap();
        let host: Arc<dyn HostServices> = Arc::new(LocalHost::new());
        let result = NetworkListener::start(47104, "/red", &ListenerConfig::default(), host);
        assert!(matches!(result, Err(Error::Bind { port: 47104, .. })));
    }

    #[test]
    fn test_remove_processor() {
        let (listener, recorder) = start(47105, "/red");
        let sink: Arc<dyn MessageSink> = recorder.clone();
        let weak = Arc::downgrade(&sink);
        listener.add_processor(weak.clone());
        assert_eq!(listener.processor_count(), 2);

        listener.remove_processor(&weak);
        assert_eq!(listener.processor_count(), 0);
    }

    /// Holds the receive thread inside `receive_message` until released.
    struct BlockingSink {
        entered: crossbeam_channel::Sender<()>,
        release: Receiver<()>,
    }

    impl MessageSink for BlockingSink {
        fn receive_message(&self, _port: u16, _address: &str, _sample: PositionSample) {
            let _ = self.entered.send(());
            let _ = self.release.recv();
        }
    }

    #[test]
    fn test_stop_times_out_on_busy_thread() {
        let config = ListenerConfig {
            join_timeout: Duration::from_millis(50),
            ..ListenerConfig::default()
        };
        let host: Arc<dyn HostServices> = Arc::new(LocalHost::new());
        let mut listener = NetworkListener::start(47106, "/red", &config, host).unwrap();

        let (entered_tx, entered_rx) = crossbeam_channel::bounded(1);
        let (release_tx, release_rx) = crossbeam_channel::bounded(1);
        let sink: Arc<dyn MessageSink> = Arc::new(BlockingSink {
            entered: entered_tx,
            release: release_rx,
        });
        listener.add_processor(Arc::downgrade(&sink));
        assert!(wait_for(|| listener.state() == ListenerState::Listening));

        send(47106, &encode_position("/red", 1.0, 2.0, 3.0, 4.0).unwrap());
        entered_rx.recv_timeout(Duration::from_secs(3)).unwrap();

        let result = listener.stop();
        assert!(matches!(
            result,
            Err(Error::JoinTimeout {
                port: 47106,
                timeout_ms: 50
            })
        ));
        assert_eq!(listener.state(), ListenerState::StopRequested);

        // The detached thread exits once the sink returns
        release_tx.send(()).unwrap();
        drop(listener);
        assert!(wait_for(|| UdpSocket::bind(("127.0.0.1", 47106)).is_ok()));
    }
}
