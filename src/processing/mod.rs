pub mod decoder;
pub mod events;
pub mod listener;
pub mod node;
pub mod queue;
pub mod tracker;

pub use events::{CollectedEvents, TrackingEvent, TrackingMetadata};
pub use listener::{ListenerConfig, ListenerState, NetworkListener};
pub use node::TrackingNode;
pub use queue::{MessageQueue, PositionSample};
pub use tracker::{EventChannelId, TrackerColor, TrackerParameter, TrackerSettings, TrackerStatus};

use crate::error::Result;

// -----------------------------------------------------------------------------
// HOST CAPABILITIES
// -----------------------------------------------------------------------------

/// Services the embedding host provides to the node.
///
/// Called from listener threads as well as the host's processing thread.
pub trait HostServices: Send + Sync {
    fn is_acquisition_active(&self) -> bool;

    fn is_recording_active(&self) -> bool;

    /// Monotonic timestamp stamped on samples as they leave the socket.
    fn global_timestamp(&self) -> i64;

    /// Timestamp stamped on samples as they enter a tracker queue.
    fn software_timestamp(&self) -> i64;

    /// Informational status channel (queue clears, transitions).
    fn send_status_message(&self, message: &str);
}

/// Receiver of decoded samples from a listener thread.
pub trait MessageSink: Send + Sync {
    fn receive_message(&self, port: u16, address: &str, sample: PositionSample);
}

/// Host event-emission API used during a processing cycle.
pub trait EventSink {
    /// First sample number of the current processing block for a channel.
    fn first_sample_number(&self, channel: EventChannelId) -> i64;

    fn emit(&mut self, event: TrackingEvent);
}

/// Callback surface a host adapter drives.
pub trait HostProcessor {
    fn on_config_changed(&self, tracker: &str, parameter: TrackerParameter) -> Result<()>;

    fn on_process_cycle(&self, events: &mut dyn EventSink) -> usize;

    fn on_acquisition_started(&self);

    fn on_acquisition_stopped(&self);

    fn serialize_settings(&self) -> Vec<TrackerSettings>;

    fn deserialize_settings(&self, records: &[TrackerSettings]) -> Result<()>;
}
