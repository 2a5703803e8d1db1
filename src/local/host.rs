use colored::Colorize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use crate::processing::HostServices;
use crate::utils::log::append_entry;

/// Sample rate the global clock ticks at.
pub const DEFAULT_SAMPLE_RATE: f64 = 30000.0;

// -----------------------------------------------------------------------------
// IN-PROCESS HOST
// -----------------------------------------------------------------------------

/// Stand-alone host used by the binary and tests.
///
/// Acquisition and recording are plain switches; the global timestamp is a
/// sample count derived from the time since construction.
pub struct LocalHost {
    acquisition: AtomicBool,
    recording: AtomicBool,
    started: Instant,
    sample_rate: f64,
    echo: bool,
    log_file: Option<PathBuf>,
    status: Mutex<Vec<String>>,
}

impl LocalHost {
    pub fn new() -> Self {
        Self {
            acquisition: AtomicBool::new(false),
            recording: AtomicBool::new(false),
            started: Instant::now(),
            sample_rate: DEFAULT_SAMPLE_RATE,
            echo: false,
            log_file: None,
            status: Mutex::new(Vec::new()),
        }
    }

    /// Print status messages to the console.
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    /// Mirror status messages to a file.
    pub fn with_log_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.log_file = Some(path.into());
        self
    }

    pub fn set_acquisition(&self, active: bool) {
        self.acquisition.store(active, Ordering::Release);
    }

    pub fn set_recording(&self, active: bool) {
        self.recording.store(active, Ordering::Release);
    }

    pub fn status_messages(&self) -> Vec<String> {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Sample number at the current instant.
    pub fn sample_number(&self) -> i64 {
        (self.started.elapsed().as_secs_f64() * self.sample_rate) as i64
    }
}

impl Default for LocalHost {
    fn default() -> Self {
        Self::new()
    }
}

impl HostServices for LocalHost {
    fn is_acquisition_active(&self) -> bool {
        self.acquisition.load(Ordering::Acquire)
    }

    fn is_recording_active(&self) -> bool {
        self.recording.load(Ordering::Acquire)
    }

    fn global_timestamp(&self) -> i64 {
        self.sample_number()
    }

    fn software_timestamp(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    fn send_status_message(&self, message: &str) {
        log::info!("{}", message);
        if self.echo {
            println!("{} {}", "[status]".yellow(), message);
        }
        if let Some(path) = &self.log_file {
            if let Err(e) = append_entry(path, message) {
                log::warn!("Could not write status to {}: {}", path.display(), e);
            }
        }
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_switches_and_status() {
        let host = LocalHost::new();
        assert!(!host.is_acquisition_active());
        host.set_acquisition(true);
        host.set_recording(true);
        assert!(host.is_acquisition_active());
        assert!(host.is_recording_active());

        host.send_status_message("hello");
        assert_eq!(host.status_messages(), vec!["hello".to_string()]);
    }

    #[test]
    fn test_global_timestamp_is_monotonic() {
        let host = LocalHost::new();
        let first = host.global_timestamp();
        std::thread::sleep(std::time::Duration::from_millis(2));
        assert!(host.global_timestamp() > first);
    }
}
