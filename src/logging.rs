//! Tracing subscriber setup
//!
//! Log lines go to stderr and, when `logging.files` is configured, are also
//! appended to `{path}/{name}.log`. `RUST_LOG` takes precedence over
//! `logging.level`.

use crate::config::{LogFilesConfig, LoggingConfig};
use std::fs::{File, OpenOptions};
use std::path::PathBuf;
use std::sync::Mutex;
use thiserror::Error;
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Failed to open log file {path}: {source}")]
    OpenFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to install tracing subscriber: {0}")]
    Init(String),
}

/// Install the global subscriber
///
/// Returns the log file path when file logging is enabled.
pub fn init(config: &LoggingConfig) -> Result<Option<PathBuf>, LoggingError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.to_lowercase()));

    let file = config.files.as_ref().map(open_log_file).transpose()?;
    let log_path = file.as_ref().map(|(_, path)| path.clone());

    // ANSI colors only make sense when stderr is the sole destination
    let ansi = file.is_none() && config.to_stderr;

    let writer = match (config.to_stderr, file) {
        (true, Some((file, _))) => BoxMakeWriter::new(std::io::stderr.and(Mutex::new(file))),
        (false, Some((file, _))) => BoxMakeWriter::new(Mutex::new(file)),
        (true, None) => BoxMakeWriter::new(std::io::stderr),
        (false, None) => BoxMakeWriter::new(std::io::sink),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(ansi)
        .try_init()
        .map_err(|e| LoggingError::Init(e.to_string()))?;

    Ok(log_path)
}

/// Create the log directory if needed and open the log file for appending
pub fn open_log_file(files: &LogFilesConfig) -> Result<(File, PathBuf), LoggingError> {
    let path = files.file_path();
    let open_err = |source| LoggingError::OpenFile {
        path: path.clone(),
        source,
    };

    std::fs::create_dir_all(&files.path).map_err(open_err)?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(open_err)?;

    Ok((file, path))
}
