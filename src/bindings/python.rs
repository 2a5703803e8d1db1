use crate::config::{load_config, save_config, NodeConfig};
use crate::error::Error;
use crate::local::host::LocalHost;
use crate::processing::events::{CollectedEvents, TrackingEvent};
use crate::processing::tracker::{TrackerColor, TrackerParameter, TrackerSettings};
use crate::processing::TrackingNode;

use pyo3::exceptions::{PyKeyError, PyOSError, PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use std::sync::Arc;

impl From<Error> for PyErr {
    fn from(error: Error) -> Self {
        let message = error.to_string();
        match error {
            Error::Io(_) | Error::Bind { .. } => PyOSError::new_err(message),
            Error::TrackerNotFound(_) => PyKeyError::new_err(message),
            Error::InvalidParameter(_)
            | Error::DuplicateTracker(_)
            | Error::PortInUse(_)
            | Error::TooManyTrackers(_)
            | Error::Decode(_) => PyValueError::new_err(message),
            _ => PyRuntimeError::new_err(message),
        }
    }
}

#[pyclass]
#[derive(Clone)]
pub struct PyTrackingEvent {
    #[pyo3(get)]
    pub name: String,
    #[pyo3(get)]
    pub port: String,
    #[pyo3(get)]
    pub address: String,
    #[pyo3(get)]
    pub color: String,
    #[pyo3(get)]
    pub x: f32,
    #[pyo3(get)]
    pub y: f32,
    #[pyo3(get)]
    pub height: f32,
    #[pyo3(get)]
    pub width: f32,
    #[pyo3(get)]
    pub sample_number: i64,
    #[pyo3(get)]
    pub timestamp: i64,
}

impl From<TrackingEvent> for PyTrackingEvent {
    fn from(event: TrackingEvent) -> Self {
        let [x, y, height, width] = event.metadata.position;
        Self {
            name: event.metadata.name,
            port: event.metadata.port,
            address: event.metadata.address,
            color: event.metadata.color,
            x,
            y,
            height,
            width,
            sample_number: event.sample_number,
            timestamp: event.timestamp,
        }
    }
}

#[pymethods]
impl PyTrackingEvent {
    fn __repr__(&self) -> String {
        format!(
            "TrackingEvent(name={:?}, port={}, address={:?}, x={}, y={}, height={}, width={})",
            self.name, self.port, self.address, self.x, self.y, self.height, self.width
        )
    }
}

#[pyclass]
pub struct PyTrackingNode {
    host: Arc<LocalHost>,
    node: TrackingNode,
}

#[pymethods]
impl PyTrackingNode {
    #[new]
    #[pyo3(signature = (verbose = false, max_trackers = None))]
    pub fn new(verbose: bool, max_trackers: Option<usize>) -> Self {
        let defaults = NodeConfig::default();
        let config = NodeConfig {
            verbose,
            max_trackers: max_trackers.unwrap_or(defaults.max_trackers),
            ..defaults
        };
        let host = Arc::new(LocalHost::new());
        PyTrackingNode {
            node: TrackingNode::new(config, host.clone()),
            host,
        }
    }

    /// Returns the (name, port) the tracker was created with.
    #[pyo3(signature = (name = None))]
    pub fn add_tracker(&self, name: Option<&str>) -> PyResult<(String, u16)> {
        let settings = self.node.add_tracker(name)?;
        Ok((settings.name, settings.port))
    }

    #[pyo3(signature = (name, port, address = "/red", color = "red"))]
    pub fn add_tracker_with(&self, name: &str, port: u16, address: &str, color: &str) -> PyResult<()> {
        let color: TrackerColor = color.parse()?;
        self.node
            .add_tracker_with(TrackerSettings::new(name, port, address, color))?;
        Ok(())
    }

    pub fn remove_tracker(&self, name: &str) -> PyResult<()> {
        Ok(self.node.remove_tracker(name)?)
    }

    pub fn update_tracker(&self, name: &str, parameter: &str, value: &str) -> PyResult<()> {
        let parameter = TrackerParameter::parse(parameter, value)?;
        Ok(self.node.update_tracker(name, parameter)?)
    }

    pub fn tracker_names(&self) -> Vec<String> {
        self.node.tracker_names()
    }

    pub fn n_sources(&self) -> usize {
        self.node.n_sources()
    }

    pub fn set_acquisition(&self, active: bool) {
        self.host.set_acquisition(active);
    }

    pub fn set_recording(&self, active: bool) {
        self.host.set_recording(active);
    }

    pub fn start_acquisition(&self) {
        self.node.start_acquisition();
        self.host.set_acquisition(true);
    }

    pub fn stop_acquisition(&self) {
        self.host.set_acquisition(false);
        self.node.stop_acquisition();
    }

    pub fn status_messages(&self) -> Vec<String> {
        self.host.status_messages()
    }

    pub fn process(&self, first_sample_number: i64) -> Vec<PyTrackingEvent> {
        let mut events = CollectedEvents::new(first_sample_number);
        self.node.process(&mut events);
        events.events.into_iter().map(PyTrackingEvent::from).collect()
    }

    pub fn save(&self, path: &str) -> PyResult<()> {
        Ok(save_config(&self.node.to_config(), path)?)
    }

    pub fn load(&self, path: &str) -> PyResult<()> {
        let config = load_config(path)?;
        Ok(self.node.load_settings(&config.trackers)?)
    }
}

/// A Python module implemented in Rust.
#[pymodule]
pub fn tracking_node(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyTrackingNode>()?;
    m.add_class::<PyTrackingEvent>()?;
    Ok(())
}
