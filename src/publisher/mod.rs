//! Event publishing pipeline
//!
//! The harvester hands events to a [`Publisher`], which queues them on a bounded
//! channel. A background task drains the channel into the configured
//! [`EventSink`], flushing whenever the queue runs empty. [`Publisher::close`]
//! waits until every accepted event has been written.

pub mod sink;

use crate::server::SharedMetrics;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{Map, Value};
use std::sync::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

pub use sink::{build_sink, ConsoleSink, EventSink, FileSink, SinkError};

/// A single beat event
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    pub fields: Map<String, Value>,
}

impl Event {
    pub fn new(timestamp: DateTime<Utc>, fields: Map<String, Value>) -> Self {
        Self { timestamp, fields }
    }
}

/// Serialized with `@timestamp` first, then the fields
impl Serialize for Event {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let extra = usize::from(!self.fields.contains_key("@timestamp"));
        let mut map = serializer.serialize_map(Some(self.fields.len() + extra))?;
        map.serialize_entry(
            "@timestamp",
            &self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
        )?;
        for (key, value) in &self.fields {
            if key != "@timestamp" {
                map.serialize_entry(key, value)?;
            }
        }
        map.end()
    }
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("publisher is closed")]
    Closed,

    #[error("output failed: {0}")]
    Sink(#[from] SinkError),

    #[error("publisher worker failed: {0}")]
    Worker(String),
}

/// Totals reported when the publisher closes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishStats {
    pub published: u64,
    pub dropped: u64,
}

pub struct Publisher {
    sender: Mutex<Option<mpsc::Sender<Event>>>,
    worker: tokio::sync::Mutex<Option<JoinHandle<Result<PublishStats, SinkError>>>>,
}

impl Publisher {
    /// Start the drain task for `sink` with a queue of `queue_size` events
    pub fn connect(
        sink: Box<dyn EventSink>,
        queue_size: usize,
        metrics: Option<SharedMetrics>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(queue_size.max(1));
        let worker = tokio::spawn(drain(receiver, sink, metrics));

        Self {
            sender: Mutex::new(Some(sender)),
            worker: tokio::sync::Mutex::new(Some(worker)),
        }
    }

    /// Queue an event, waiting for capacity when the queue is full
    pub async fn publish(&self, event: Event) -> Result<(), PublishError> {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
            .ok_or(PublishError::Closed)?;

        sender
            .send(event)
            .await
            .map_err(|_| PublishError::Closed)
    }

    /// Stop accepting events and wait until the queue is written out
    ///
    /// Calling it again after the first close returns empty stats.
    pub async fn close(&self) -> Result<PublishStats, PublishError> {
        self.sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();

        let Some(worker) = self.worker.lock().await.take() else {
            return Ok(PublishStats::default());
        };

        let stats = worker
            .await
            .map_err(|e| PublishError::Worker(e.to_string()))??;
        debug!(
            published = stats.published,
            dropped = stats.dropped,
            "Publisher closed"
        );
        Ok(stats)
    }
}

async fn drain(
    mut receiver: mpsc::Receiver<Event>,
    mut sink: Box<dyn EventSink>,
    metrics: Option<SharedMetrics>,
) -> Result<PublishStats, SinkError> {
    let mut stats = PublishStats::default();

    while let Some(event) = receiver.recv().await {
        write_one(sink.as_mut(), &event, &mut stats, metrics.as_deref()).await;
        while let Ok(event) = receiver.try_recv() {
            write_one(sink.as_mut(), &event, &mut stats, metrics.as_deref()).await;
        }
        if let Err(e) = sink.flush().await {
            error!(output = sink.name(), error = %e, "Failed to flush output");
        }
    }

    sink.flush().await?;
    Ok(stats)
}

async fn write_one(
    sink: &mut dyn EventSink,
    event: &Event,
    stats: &mut PublishStats,
    metrics: Option<&crate::server::BeatMetrics>,
) {
    match sink.write(event).await {
        Ok(()) => {
            stats.published += 1;
            if let Some(metrics) = metrics {
                metrics.record_published();
            }
        }
        Err(e) => {
            stats.dropped += 1;
            error!(output = sink.name(), error = %e, "Dropping event, output write failed");
            if let Some(metrics) = metrics {
                metrics.record_dropped();
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[path = "publisher_test.rs"]
mod tests;
