use super::listener::{ListenerConfig, ListenerState, NetworkListener};
use super::queue::MessageQueue;
use super::HostServices;
use crate::error::{Error, Result};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

pub const DEFAULT_PORT: u16 = 27020;
pub const DEFAULT_ADDRESS: &str = "/red";
pub const MAX_SOURCES: usize = 10;

// COLOR COMPONENT -------------------------------------------------------------

/// Display colour of a tracking source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackerColor {
    #[default]
    Red,
    Green,
    Blue,
    Magenta,
    Cyan,
    Orange,
    Pink,
    Grey,
    Violet,
    Yellow,
}

impl TrackerColor {
    pub const ALL: [TrackerColor; 10] = [
        TrackerColor::Red,
        TrackerColor::Green,
        TrackerColor::Blue,
        TrackerColor::Magenta,
        TrackerColor::Cyan,
        TrackerColor::Orange,
        TrackerColor::Pink,
        TrackerColor::Grey,
        TrackerColor::Violet,
        TrackerColor::Yellow,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TrackerColor::Red => "red",
            TrackerColor::Green => "green",
            TrackerColor::Blue => "blue",
            TrackerColor::Magenta => "magenta",
            TrackerColor::Cyan => "cyan",
            TrackerColor::Orange => "orange",
            TrackerColor::Pink => "pink",
            TrackerColor::Grey => "grey",
            TrackerColor::Violet => "violet",
            TrackerColor::Yellow => "yellow",
        }
    }
}

impl fmt::Display for TrackerColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrackerColor {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        TrackerColor::ALL
            .into_iter()
            .find(|color| color.as_str() == wanted)
            .ok_or_else(|| Error::InvalidParameter(format!("unknown color '{}'", s)))
    }
}

// SETTINGS COMPONENT ----------------------------------------------------------

/// User-facing configuration of one tracking source.
///
/// This is also the persisted record written for each tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerSettings {
    pub name: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_address")]
    pub address: String,
    #[serde(default)]
    pub color: TrackerColor,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_address() -> String {
    DEFAULT_ADDRESS.to_string()
}

impl TrackerSettings {
    pub fn new(name: &str, port: u16, address: &str, color: TrackerColor) -> Self {
        Self {
            name: name.to_string(),
            port,
            address: address.to_string(),
            color,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidParameter("tracker name is empty".to_string()));
        }
        if self.port == 0 {
            return Err(Error::InvalidParameter("port must be non-zero".to_string()));
        }
        if !self.address.starts_with('/') {
            return Err(Error::InvalidParameter(format!(
                "address '{}' must start with '/'",
                self.address
            )));
        }
        Ok(())
    }
}

impl fmt::Display for TrackerSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} on port {}, {})",
            self.name, self.address, self.port, self.color
        )
    }
}

/// A single tracker field update, dispatched from the host adapter.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackerParameter {
    Name(String),
    Port(u16),
    Address(String),
    Color(TrackerColor),
}

impl TrackerParameter {
    /// Map a host parameter name and string value to a typed update.
    pub fn parse(name: &str, value: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "source" | "name" => Ok(TrackerParameter::Name(value.to_string())),
            "port" => value
                .trim()
                .parse()
                .map(TrackerParameter::Port)
                .map_err(|_| Error::InvalidParameter(format!("invalid port '{}'", value))),
            "address" => Ok(TrackerParameter::Address(value.to_string())),
            "color" => value.parse().map(TrackerParameter::Color),
            other => Err(Error::InvalidParameter(format!(
                "unknown parameter '{}'",
                other
            ))),
        }
    }

    /// Whether applying this update requires a new listener.
    pub fn changes_endpoint(&self) -> bool {
        matches!(self, TrackerParameter::Port(_) | TrackerParameter::Address(_))
    }

    pub fn apply(&self, settings: &mut TrackerSettings) {
        match self {
            TrackerParameter::Name(name) => settings.name = name.clone(),
            TrackerParameter::Port(port) => settings.port = *port,
            TrackerParameter::Address(address) => settings.address = address.clone(),
            TrackerParameter::Color(color) => settings.color = *color,
        }
    }
}

/// Host-managed output channel a tracker emits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventChannelId(pub u16);

// TRANSITION COMPONENT --------------------------------------------------------

/// Rising-edge detector for the host's acquisition or recording status.
#[derive(Debug, Clone, Default)]
pub struct TransitionLog {
    logged: bool,
    started_at_ms: Option<i64>,
}

impl TransitionLog {
    /// Returns true on the inactive -> active edge.
    pub fn observe(&mut self, active: bool) -> bool {
        if !active {
            self.logged = false;
            return false;
        }
        if self.logged {
            return false;
        }
        self.logged = true;
        self.started_at_ms = Some(chrono::Utc::now().timestamp_millis());
        true
    }

    pub fn reset(&mut self) {
        self.logged = false;
    }

    pub fn is_logged(&self) -> bool {
        self.logged
    }

    pub fn started_at_ms(&self) -> Option<i64> {
        self.started_at_ms
    }
}

// TRACKER COMPONENT -----------------------------------------------------------

/// One tracking source: settings, its sample queue and its UDP listener.
///
/// Dropping a tracker stops and joins its listener.
pub struct Tracker {
    pub settings: TrackerSettings,
    pub channel: EventChannelId,
    pub queue: MessageQueue,
    pub recording: TransitionLog,
    pub acquisition: TransitionLog,
    listener: Option<NetworkListener>,
}

impl Tracker {
    pub fn new(settings: TrackerSettings, channel: EventChannelId, queue_capacity: usize) -> Self {
        Self {
            settings,
            channel,
            queue: MessageQueue::new(queue_capacity),
            recording: TransitionLog::default(),
            acquisition: TransitionLog::default(),
            listener: None,
        }
    }

    /// Start listening on the tracker's endpoint.
    pub fn start_listener(
        &mut self,
        config: &ListenerConfig,
        host: Arc<dyn HostServices>,
    ) -> Result<&NetworkListener> {
        let listener =
            NetworkListener::start(self.settings.port, &self.settings.address, config, host)?;
        Ok(self.listener.insert(listener))
    }

    /// Detach the listener so it can be dropped outside the node lock.
    pub fn take_listener(&mut self) -> Option<NetworkListener> {
        self.listener.take()
    }

    pub fn listener(&self) -> Option<&NetworkListener> {
        self.listener.as_ref()
    }

    pub fn matches(&self, port: u16, address: &str) -> bool {
        self.settings.port == port && self.settings.address == address
    }

    pub fn status(&self) -> TrackerStatus {
        TrackerStatus {
            settings: self.settings.clone(),
            channel: self.channel,
            queued: self.queue.count(),
            listener: self
                .listener
                .as_ref()
                .map(NetworkListener::state)
                .unwrap_or(ListenerState::Idle),
            recording_started_at_ms: self.recording.started_at_ms(),
            acquisition_started_at_ms: self.acquisition.started_at_ms(),
        }
    }
}

/// Diagnostic snapshot of a tracker.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerStatus {
    pub settings: TrackerSettings,
    pub channel: EventChannelId,
    pub queued: usize,
    pub listener: ListenerState,
    pub recording_started_at_ms: Option<i64>,
    pub acquisition_started_at_ms: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_parse() {
        assert_eq!("Blue".parse::<TrackerColor>().unwrap(), TrackerColor::Blue);
        assert_eq!(" grey ".parse::<TrackerColor>().unwrap(), TrackerColor::Grey);
        assert!("purple".parse::<TrackerColor>().is_err());
        assert_eq!(TrackerColor::default().to_string(), "red");
    }

    #[test]
    fn test_parameter_parse_and_apply() {
        let mut settings = TrackerSettings::new("T1", DEFAULT_PORT, DEFAULT_ADDRESS, TrackerColor::Red);

        let port = TrackerParameter::parse("Port", "27021").unwrap();
        assert!(port.changes_endpoint());
        port.apply(&mut settings);
        assert_eq!(settings.port, 27021);

        let color = TrackerParameter::parse("color", "cyan").unwrap();
        assert!(!color.changes_endpoint());
        color.apply(&mut settings);
        assert_eq!(settings.color, TrackerColor::Cyan);

        TrackerParameter::parse("source", "Rat").unwrap().apply(&mut settings);
        assert_eq!(settings.name, "Rat");

        assert!(TrackerParameter::parse("port", "not a port").is_err());
        assert!(TrackerParameter::parse("gain", "1").is_err());
    }

    #[test]
    fn test_settings_validation() {
        assert!(TrackerSettings::new("T1", 27020, "/red", TrackerColor::Red)
            .validate()
            .is_ok());
        assert!(TrackerSettings::new("", 27020, "/red", TrackerColor::Red)
            .validate()
            .is_err());
        assert!(TrackerSettings::new("T1", 0, "/red", TrackerColor::Red)
            .validate()
            .is_err());
        assert!(TrackerSettings::new("T1", 27020, "red", TrackerColor::Red)
            .validate()
            .is_err());
    }

    #[test]
    fn test_transition_log_rising_edge() {
        let mut log = TransitionLog::default();
        assert!(!log.observe(false));
        assert!(log.observe(true));
        assert!(log.started_at_ms().is_some());
        assert!(!log.observe(true));
        assert!(!log.observe(false));
        assert!(!log.is_logged());
        assert!(log.observe(true));
    }

    #[test]
    fn test_new_tracker_has_no_listener() {
        let tracker = Tracker::new(
            TrackerSettings::new("T1", 27020, "/red", TrackerColor::Red),
            EventChannelId(0),
            16,
        );
        let status = tracker.status();
        assert_eq!(status.listener, ListenerState::Idle);
        assert_eq!(status.queued, 0);
        assert!(tracker.matches(27020, "/red"));
        assert!(!tracker.matches(27020, "/blue"));
    }
}
