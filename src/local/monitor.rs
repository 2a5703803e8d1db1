use colored::{Color, Colorize};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use super::host::LocalHost;
use crate::config::{load_config, TrackingConfig};
use crate::error::Result;
use crate::processing::events::TrackingEvent;
use crate::processing::tracker::{EventChannelId, TrackerColor};
use crate::processing::{EventSink, TrackingNode};
use crate::utils::log::{init_logging, log_csv};

const CYCLE_TIME: u64 = 10;

fn console_color(color: TrackerColor) -> Color {
    match color {
        TrackerColor::Red => Color::Red,
        TrackerColor::Green => Color::Green,
        TrackerColor::Blue => Color::Blue,
        TrackerColor::Magenta => Color::Magenta,
        TrackerColor::Cyan => Color::Cyan,
        TrackerColor::Orange => Color::TrueColor { r: 255, g: 165, b: 0 },
        TrackerColor::Pink => Color::TrueColor { r: 255, g: 105, b: 180 },
        TrackerColor::Grey => Color::BrightBlack,
        TrackerColor::Violet => Color::TrueColor { r: 143, g: 0, b: 255 },
        TrackerColor::Yellow => Color::Yellow,
    }
}

pub fn format_event(event: &TrackingEvent) -> String {
    let color = event
        .metadata
        .color
        .parse::<TrackerColor>()
        .map(console_color)
        .unwrap_or(Color::White);
    format!(
        "{:>10} {} {}:{} x={:.3} y={:.3} w={:.3} h={:.3}",
        event.sample_number,
        event.metadata.name.color(color).bold(),
        event.metadata.port,
        event.metadata.address,
        event.x(),
        event.y(),
        event.width(),
        event.height()
    )
}

// -----------------------------------------------------------------------------
// CONSOLE EVENT SINK
// -----------------------------------------------------------------------------

/// Prints each emitted event and optionally appends it to a CSV log.
pub struct ConsoleEvents {
    block_start: i64,
    csv_file: Option<String>,
    pub emitted: usize,
}

impl ConsoleEvents {
    pub fn new(csv_file: Option<String>) -> Self {
        Self {
            block_start: 0,
            csv_file,
            emitted: 0,
        }
    }

    pub fn begin_block(&mut self, first_sample_number: i64) {
        self.block_start = first_sample_number;
    }
}

impl EventSink for ConsoleEvents {
    fn first_sample_number(&self, _channel: EventChannelId) -> i64 {
        self.block_start
    }

    fn emit(&mut self, event: TrackingEvent) {
        println!("{}", format_event(&event));
        if let Some(csv_file) = &self.csv_file {
            if let Err(e) = log_csv(csv_file, TrackingEvent::csv_headers(), &event.csv_row()) {
                log::warn!("Could not log event to {}: {}", csv_file, e);
            }
        }
        self.emitted += 1;
    }
}

// -----------------------------------------------------------------------------
// RUN CODE
// -----------------------------------------------------------------------------

pub struct Monitor {
    pub host: Arc<LocalHost>,
    pub node: TrackingNode,
    pub events: ConsoleEvents,
}

impl Monitor {
    /// Start every configured tracker, adding a default one when the config
    /// lists none.
    pub fn new(config: TrackingConfig, csv_file: Option<String>) -> Result<Self> {
        let host = Arc::new(LocalHost::new().with_echo(true));
        let node = TrackingNode::from_config(config, host.clone())?;
        if node.n_sources() == 0 {
            node.add_tracker(None)?;
        }
        Ok(Self {
            host,
            node,
            events: ConsoleEvents::new(csv_file),
        })
    }

    /// One host processing cycle.
    pub fn cycle(&mut self) -> usize {
        self.events.begin_block(self.host.sample_number());
        self.node.process(&mut self.events)
    }
}

pub fn run(config_path: Option<&str>, csv_file: Option<&str>) -> Result<()> {
    let config = match config_path {
        Some(path) => load_config(path)?,
        None => TrackingConfig::default(),
    };
    init_logging(config.node.verbose);

    let mut monitor = Monitor::new(config, csv_file.map(str::to_string))?;
    for name in monitor.node.tracker_names() {
        let status = monitor.node.tracker_status(&name)?;
        println!("{} {}", "Tracking".green(), status.settings);
    }

    monitor.node.start_acquisition();
    monitor.host.set_acquisition(true);
    loop {
        monitor.cycle();
        thread::sleep(Duration::from_millis(CYCLE_TIME));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::queue::PositionSample;
    use crate::processing::tracker::TrackerSettings;

    #[test]
    fn test_monitor_cycle_emits() {
        let config = TrackingConfig {
            trackers: vec![TrackerSettings::new(
                "Rat",
                47270,
                "/green",
                TrackerColor::Green,
            )],
            ..TrackingConfig::default()
        };
        let mut monitor = Monitor::new(config, None).unwrap();
        assert_eq!(monitor.node.n_sources(), 1);

        monitor.host.set_acquisition(true);
        monitor
            .node
            .receive_message(47270, "/green", PositionSample::new(0.1, 0.2, 0.3, 0.4));
        assert_eq!(monitor.cycle(), 1);
        assert_eq!(monitor.cycle(), 0);
        assert_eq!(monitor.events.emitted, 1);
    }

    #[test]
    fn test_format_event() {
        let settings = TrackerSettings::new("Rat", 27021, "/blue", TrackerColor::Orange);
        let sample = PositionSample::new(1.0, 2.0, 5.0, 6.0);
        let event = TrackingEvent::new(&settings, EventChannelId(0), &sample, 7);
        let line = format_event(&event);
        assert!(line.contains("27021:/blue"));
        assert!(line.contains("w=5.000 h=6.000"));
    }
}
