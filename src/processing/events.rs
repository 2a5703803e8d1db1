use super::queue::PositionSample;
use super::tracker::{EventChannelId, TrackerSettings};

use serde::Serialize;

// METADATA DESCRIPTORS --------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataType {
    Char,
    Float,
}

/// Describes one metadata field attached to every tracking event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetadataDescriptor {
    pub kind: MetadataType,
    pub length: usize,
    pub name: &'static str,
    pub description: &'static str,
    pub identifier: &'static str,
}

pub const DESC_NAME: MetadataDescriptor = MetadataDescriptor {
    kind: MetadataType::Char,
    length: 64,
    name: "Source name",
    description: "Tracking source name",
    identifier: "external.tracking.name",
};

pub const DESC_PORT: MetadataDescriptor = MetadataDescriptor {
    kind: MetadataType::Char,
    length: 16,
    name: "Source port",
    description: "Tracking source port",
    identifier: "external.tracking.port",
};

pub const DESC_ADDRESS: MetadataDescriptor = MetadataDescriptor {
    kind: MetadataType::Char,
    length: 16,
    name: "Source address",
    description: "Tracking source address",
    identifier: "external.tracking.address",
};

pub const DESC_COLOR: MetadataDescriptor = MetadataDescriptor {
    kind: MetadataType::Char,
    length: 16,
    name: "Source color",
    description: "Tracking source color",
    identifier: "external.tracking.color",
};

pub const DESC_POSITION: MetadataDescriptor = MetadataDescriptor {
    kind: MetadataType::Float,
    length: 4,
    name: "Source position",
    description: "Tracking position: x, y, height, width",
    identifier: "external.tracking.position",
};

/// Field order used when metadata is attached to an event.
pub const EVENT_METADATA: [MetadataDescriptor; 5] =
    [DESC_NAME, DESC_PORT, DESC_ADDRESS, DESC_COLOR, DESC_POSITION];

// EVENT -----------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackingMetadata {
    pub name: String,
    pub port: String,
    pub address: String,
    pub color: String,
    /// x, y, height, width
    pub position: [f32; 4],
}

/// Discrete event emitted once per tracker per cycle with new data.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackingEvent {
    #[serde(skip)]
    pub channel: EventChannelId,
    /// First sample number of the processing block.
    pub sample_number: i64,
    /// Software timestamp the sample was queued with.
    pub timestamp: i64,
    pub metadata: TrackingMetadata,
}

impl TrackingEvent {
    pub fn new(
        settings: &TrackerSettings,
        channel: EventChannelId,
        sample: &PositionSample,
        sample_number: i64,
    ) -> Self {
        Self {
            channel,
            sample_number,
            timestamp: sample.timestamp,
            metadata: TrackingMetadata {
                name: settings.name.clone(),
                port: settings.port.to_string(),
                address: settings.address.clone(),
                color: settings.color.to_string(),
                position: sample.emission_payload(),
            },
        }
    }

    pub fn x(&self) -> f32 {
        self.metadata.position[0]
    }

    pub fn y(&self) -> f32 {
        self.metadata.position[1]
    }

    pub fn height(&self) -> f32 {
        self.metadata.position[2]
    }

    pub fn width(&self) -> f32 {
        self.metadata.position[3]
    }

    /// Row for CSV event logs, matching [`TrackingEvent::csv_headers`].
    pub fn csv_row(&self) -> Vec<String> {
        vec![
            self.sample_number.to_string(),
            self.timestamp.to_string(),
            self.metadata.name.clone(),
            self.metadata.port.clone(),
            self.metadata.address.clone(),
            self.metadata.color.clone(),
            self.x().to_string(),
            self.y().to_string(),
            self.height().to_string(),
            self.width().to_string(),
        ]
    }

    pub fn csv_headers() -> &'static [&'static str] {
        &[
            "sample_number",
            "timestamp",
            "name",
            "port",
            "address",
            "color",
            "x",
            "y",
            "height",
            "width",
        ]
    }
}

/// Event sink that collects events, using one block start for every channel.
#[derive(Debug, Default)]
pub struct CollectedEvents {
    pub first_sample_number: i64,
    pub events: Vec<TrackingEvent>,
}

impl CollectedEvents {
    pub fn new(first_sample_number: i64) -> Self {
        Self {
            first_sample_number,
            events: Vec::new(),
        }
    }
}

impl super::EventSink for CollectedEvents {
    fn first_sample_number(&self, _channel: EventChannelId) -> i64 {
        self.first_sample_number
    }

    fn emit(&mut self, event: TrackingEvent) {
        self.events.push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::tracker::TrackerColor;

    #[test]
    fn test_event_metadata() {
        let settings = TrackerSettings::new("T1", 27021, "/blue", TrackerColor::Blue);
        let sample = PositionSample::new(1.0, 2.0, 5.0, 6.0).with_timestamp(42);
        let event = TrackingEvent::new(&settings, EventChannelId(3), &sample, 1000);

        assert_eq!(event.sample_number, 1000);
        assert_eq!(event.timestamp, 42);
        assert_eq!(event.metadata.port, "27021");
        assert_eq!(event.metadata.color, "blue");
        assert_eq!(event.metadata.position, [1.0, 2.0, 6.0, 5.0]);
        assert_eq!(event.height(), 6.0);
        assert_eq!(event.width(), 5.0);
        assert_eq!(event.csv_row().len(), TrackingEvent::csv_headers().len());
    }

    #[test]
    fn test_descriptor_lengths_fit_defaults() {
        assert_eq!(EVENT_METADATA.len(), 5);
        assert_eq!(DESC_POSITION.length, 4);
        assert!("/red".len() < DESC_ADDRESS.length);
        assert!("27020".len() < DESC_PORT.length);
    }
}
