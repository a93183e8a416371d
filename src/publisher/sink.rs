//! Outputs events can be written to
//!
//! Production code uses [`FileSink`] (NDJSON with size-based rotation) or
//! [`ConsoleSink`] (stdout). Tests use `CollectingSink`, which keeps events in
//! memory for assertions.

use super::Event;
use crate::config::{ConsoleOutputConfig, FileOutputConfig, Output};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter, Stdout};
use tracing::info;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("output I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
}

#[async_trait]
pub trait EventSink: Send {
    async fn write(&mut self, event: &Event) -> Result<(), SinkError>;

    async fn flush(&mut self) -> Result<(), SinkError>;

    fn name(&self) -> &'static str;
}

/// Open the sink for the configured output
pub async fn build_sink(output: &Output) -> Result<Box<dyn EventSink>, SinkError> {
    match output {
        Output::File(config) => Ok(Box::new(FileSink::open(config.clone()).await?)),
        Output::Console(config) => Ok(Box::new(ConsoleSink::new(config))),
    }
}

/// Appends events as JSON lines to `{path}/{filename}.ndjson`
///
/// Once the active file would grow past `rotate_every_kb`, it becomes
/// `.ndjson.1`, older files shift up by one and at most `number_of_files`
/// files (active one included) are kept.
pub struct FileSink {
    config: FileOutputConfig,
    active: PathBuf,
    writer: BufWriter<File>,
    size: u64,
}

impl FileSink {
    pub async fn open(config: FileOutputConfig) -> Result<Self, SinkError> {
        tokio::fs::create_dir_all(&config.path).await?;
        let active = config.active_file();
        let (writer, size) = open_append(&active).await?;

        info!(path = %active.display(), "File output opened");
        Ok(Self {
            config,
            active,
            writer,
            size,
        })
    }

    fn max_size(&self) -> u64 {
        self.config.rotate_every_kb.saturating_mul(1024)
    }

    fn backup_path(&self, index: u32) -> PathBuf {
        let mut name = self.active.clone().into_os_string();
        name.push(format!(".{}", index));
        PathBuf::from(name)
    }

    async fn rotate(&mut self) -> Result<(), SinkError> {
        self.writer.flush().await?;

        let backups = self.config.number_of_files.saturating_sub(1);
        if backups == 0 {
            tokio::fs::remove_file(&self.active).await?;
        } else {
            let oldest = self.backup_path(backups);
            if tokio::fs::try_exists(&oldest).await? {
                tokio::fs::remove_file(&oldest).await?;
            }
            for index in (1..backups).rev() {
                let from = self.backup_path(index);
                if tokio::fs::try_exists(&from).await? {
                    tokio::fs::rename(&from, self.backup_path(index + 1)).await?;
                }
            }
            tokio::fs::rename(&self.active, self.backup_path(1)).await?;
        }

        let (writer, size) = open_append(&self.active).await?;
        self.writer = writer;
        self.size = size;
        info!(path = %self.active.display(), "Rotated file output");
        Ok(())
    }
}

async fn open_append(path: &Path) -> Result<(BufWriter<File>, u64), SinkError> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    let size = file.metadata().await?.len();
    Ok((BufWriter::new(file), size))
}

#[async_trait]
impl EventSink for FileSink {
    async fn write(&mut self, event: &Event) -> Result<(), SinkError> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');
        let len = line.len() as u64;

        if self.size > 0 && self.size + len > self.max_size() {
            self.rotate().await?;
        }

        self.writer.write_all(&line).await?;
        self.size += len;
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), SinkError> {
        self.writer.flush().await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

/// Writes one JSON document per event to stdout
pub struct ConsoleSink {
    pretty: bool,
    stdout: Stdout,
}

impl ConsoleSink {
    pub fn new(config: &ConsoleOutputConfig) -> Self {
        Self {
            pretty: config.pretty,
            stdout: tokio::io::stdout(),
        }
    }
}

#[async_trait]
impl EventSink for ConsoleSink {
    async fn write(&mut self, event: &Event) -> Result<(), SinkError> {
        let mut line = if self.pretty {
            serde_json::to_vec_pretty(event)?
        } else {
            serde_json::to_vec(event)?
        };
        line.push(b'\n');
        self.stdout.write_all(&line).await?;
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), SinkError> {
        self.stdout.flush().await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "console"
    }
}

/// In-memory sink for tests
#[cfg(test)]
#[derive(Clone, Default)]
pub struct CollectingSink {
    events: std::sync::Arc<std::sync::Mutex<Vec<Event>>>,
    fail_writes: bool,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose writes always fail
    pub fn failing() -> Self {
        Self {
            fail_writes: true,
            ..Self::default()
        }
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
#[async_trait]
impl EventSink for CollectingSink {
    async fn write(&mut self, event: &Event) -> Result<(), SinkError> {
        if self.fail_writes {
            return Err(SinkError::Io(std::io::Error::other("write refused")));
        }
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "collecting"
    }
}
