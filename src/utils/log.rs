use chrono::Local;
use env_logger::{Builder, Env};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Directory all file logs are written under.
pub const LOG_DIR: &str = "logs";

/// Initialise the `log` backend. `RUST_LOG` overrides the default filter.
pub fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    let _ = Builder::from_env(Env::default().default_filter_or(default_filter))
        .format_timestamp_millis()
        .try_init();
}

fn log_path(filename: &str) -> io::Result<PathBuf> {
    let log_dir = Path::new(LOG_DIR);
    if !log_dir.exists() {
        fs::create_dir_all(log_dir)?;
    }
    Ok(log_dir.join(filename))
}

/// Logs a message to a file under `logs/` with a timestamp header
///
/// # Arguments
///
/// * `filename` - The name of the log file
/// * `message` - The message to log
pub fn log_to_file(filename: &str, message: &str) -> io::Result<()> {
    append_entry(&log_path(filename)?, message)
}

/// Appends a timestamped entry to the file at `path`.
pub fn append_entry(path: &Path, message: &str) -> io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;

    let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
    writeln!(file, "[{}] {}", timestamp, message)?;
    file.flush()
}

/// Appends a row to a CSV file under `logs/`, creating headers if the file
/// is new
///
/// # Arguments
///
/// * `filename` - The name of the CSV file
/// * `headers` - Column headers (only written if file is new)
/// * `data` - Row of data to append
pub fn log_csv<S: AsRef<str>>(filename: &str, headers: &[&str], data: &[S]) -> Result<()> {
    append_csv(&log_path(filename)?, headers, data)
}

/// Appends a row to the CSV file at `path`.
pub fn append_csv<S: AsRef<str>>(path: &Path, headers: &[&str], data: &[S]) -> Result<()> {
    let file_exists = path.exists();
    let file = OpenOptions::new().create(true).append(true).open(path)?;

    let mut writer = csv::Writer::from_writer(file);
    if !file_exists && !headers.is_empty() {
        writer.write_record(headers)?;
    }
    let row: Vec<&str> = data.iter().map(|field| field.as_ref()).collect();
    writer.write_record(&row)?;
    writer.flush()?;
    Ok(())
}
