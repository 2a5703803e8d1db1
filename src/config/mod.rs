use crate::error::Result;
use crate::processing::queue::DEFAULT_QUEUE_CAPACITY;
use crate::processing::tracker::{TrackerSettings, MAX_SOURCES};

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct TrackingConfig {
    #[serde(default)]
    pub node: NodeConfig,
    /// Persisted tracker records, one per source.
    #[serde(default)]
    pub trackers: Vec<TrackerSettings>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct NodeConfig {
    pub verbose: bool,
    pub bind_address: String,
    pub queue_capacity: usize,
    pub max_trackers: usize,
    pub startup_delay_ms: u64,
    pub read_timeout_ms: u64,
    pub join_timeout_ms: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            bind_address: "127.0.0.1".to_string(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_trackers: MAX_SOURCES,
            startup_delay_ms: 0,
            read_timeout_ms: 100,
            join_timeout_ms: 2000,
        }
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<TrackingConfig> {
    let config_str = fs::read_to_string(path)?;
    Ok(serde_yaml::from_str(&config_str)?)
}

pub fn save_config<P: AsRef<Path>>(config: &TrackingConfig, path: P) -> Result<()> {
    let yaml = serde_yaml::to_string(config)?;
    fs::write(path, yaml)?;
    Ok(())
}
