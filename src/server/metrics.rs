//! Prometheus metrics for the beat
//!
//! - `oktabeat_fetch_total{result}` - fetch cycles by outcome (`success`/`error`)
//! - `oktabeat_fetch_duration_seconds` - duration of each fetch cycle
//! - `oktabeat_events_published_total` - events written to the output
//! - `oktabeat_events_dropped_total` - events the output failed to write
//! - `oktabeat_events_skipped_total` - Okta records that could not be decoded

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

pub type SharedMetrics = Arc<BeatMetrics>;

pub struct BeatMetrics {
    registry: Registry,
    fetch_total: IntCounterVec,
    fetch_duration: Histogram,
    events_published: IntCounter,
    events_dropped: IntCounter,
    events_skipped: IntCounter,
}

impl BeatMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let fetch_total = IntCounterVec::new(
            Opts::new("oktabeat_fetch_total", "Okta fetch cycles by result"),
            &["result"],
        )?;
        let fetch_duration = Histogram::with_opts(
            HistogramOpts::new(
                "oktabeat_fetch_duration_seconds",
                "Duration of Okta fetch cycles",
            )
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        )?;
        let events_published = IntCounter::new(
            "oktabeat_events_published_total",
            "Events written to the output",
        )?;
        let events_dropped = IntCounter::new(
            "oktabeat_events_dropped_total",
            "Events the output failed to write",
        )?;
        let events_skipped = IntCounter::new(
            "oktabeat_events_skipped_total",
            "Okta log records that could not be decoded",
        )?;

        registry.register(Box::new(fetch_total.clone()))?;
        registry.register(Box::new(fetch_duration.clone()))?;
        registry.register(Box::new(events_published.clone()))?;
        registry.register(Box::new(events_dropped.clone()))?;
        registry.register(Box::new(events_skipped.clone()))?;

        Ok(Self {
            registry,
            fetch_total,
            fetch_duration,
            events_published,
            events_dropped,
            events_skipped,
        })
    }

    pub fn record_fetch(&self, success: bool, duration_secs: f64) {
        let result = if success { "success" } else { "error" };
        self.fetch_total.with_label_values(&[result]).inc();
        self.fetch_duration.observe(duration_secs);
    }

    pub fn record_published(&self) {
        self.events_published.inc();
    }

    pub fn record_dropped(&self) {
        self.events_dropped.inc();
    }

    pub fn record_skipped(&self, count: usize) {
        self.events_skipped.inc_by(count as u64);
    }

    /// Render the registry in Prometheus text format
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

pub fn create_metrics() -> Result<SharedMetrics, prometheus::Error> {
    Ok(Arc::new(BeatMetrics::new()?))
}
