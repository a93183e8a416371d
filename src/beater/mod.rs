//! The oktabeat beater
//!
//! Owns the lifecycle of the agent: once built it logs the readiness marker,
//! polls Okta every `period`, and on shutdown closes the publisher so queued
//! events reach the output before the process exits.

pub mod lifecycle;

use crate::clock::{Clock, SystemClock};
use crate::config::{BeatConfig, Config, ConfigError, DEFAULT_PAGE_LIMIT};
use crate::input::okta::{HarvestError, Harvester, HarvesterSettings, HttpOktaClient, LogSource};
use crate::publisher::{build_sink, EventSink, PublishError, PublishStats, Publisher, SinkError};
use crate::server::{SharedMetrics, ShutdownSignal};
use lifecycle::{Lifecycle, LifecycleError, LifecycleState};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

/// Name stamped into the `type` field of every event
pub const BEAT_NAME: &str = "oktabeat";

/// Readiness marker written once the beat is running
pub const READY_MESSAGE: &str = "oktabeat is running! Hit CTRL-C to stop it.";

#[derive(Debug, Error)]
pub enum BeatError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to open output: {0}")]
    Output(#[from] SinkError),

    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    #[error("Failed to drain publisher: {0}")]
    Publish(#[from] PublishError),
}

pub struct Oktabeat {
    period: Duration,
    harvester: Harvester,
    publisher: Publisher,
    lifecycle: Lifecycle,
    metrics: Option<SharedMetrics>,
}

impl Oktabeat {
    /// Build the Okta client and open the configured output
    pub async fn new(
        config: &Config,
        lifecycle: Lifecycle,
        metrics: Option<SharedMetrics>,
    ) -> Result<Self, BeatError> {
        let beat = &config.oktabeat;
        let base_url = beat.base_url();
        info!(base_url = %base_url, "Okta domain configured");

        let source = HttpOktaClient::new(base_url, beat.api_key.clone(), beat.request_timeout);
        let sink = build_sink(&config.output()?).await?;
        info!(output = sink.name(), "Output configured");

        Ok(Self::with_parts(
            beat,
            Arc::new(source),
            sink,
            Arc::new(SystemClock),
            lifecycle,
            metrics,
        ))
    }

    /// Assemble a beat from already-built parts
    pub fn with_parts(
        beat: &BeatConfig,
        source: Arc<dyn LogSource>,
        sink: Box<dyn EventSink>,
        clock: Arc<dyn Clock>,
        lifecycle: Lifecycle,
        metrics: Option<SharedMetrics>,
    ) -> Self {
        let harvester = Harvester::new(
            source,
            clock,
            HarvesterSettings {
                beat_name: BEAT_NAME.to_string(),
                period: beat.period,
                page_limit: DEFAULT_PAGE_LIMIT,
                max_pages: beat.max_pages,
            },
        );
        let publisher = Publisher::connect(sink, beat.queue_size, metrics.clone());

        Self {
            period: beat.period,
            harvester,
            publisher,
            lifecycle,
            metrics,
        }
    }

    /// Run until `shutdown` fires, then drain and stop
    ///
    /// The first fetch happens one `period` after start. A fetch that is in
    /// progress when shutdown arrives is allowed to finish.
    pub async fn run(mut self, mut shutdown: ShutdownSignal) -> Result<PublishStats, BeatError> {
        if let Err(e) = self.lifecycle.transition(LifecycleState::Running) {
            self.publisher.close().await?;
            return Err(e.into());
        }
        info!(harvester = %self.harvester.id(), "{}", READY_MESSAGE);

        let start = tokio::time::Instant::now() + self.period;
        let mut ticker = tokio::time::interval_at(start, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                reason = shutdown.wait() => {
                    info!(reason = %reason, "Shutdown requested");
                    break;
                }
                _ = ticker.tick() => {}
            }
            self.harvest_once().await;
        }

        self.stop().await
    }

    async fn harvest_once(&mut self) {
        let started = Instant::now();
        let result = self.harvester.run(&self.publisher).await;
        let elapsed = started.elapsed().as_secs_f64();

        if let Some(metrics) = &self.metrics {
            metrics.record_fetch(result.is_ok(), elapsed);
            if let Ok(report) = &result {
                metrics.record_skipped(report.skipped);
            }
        }

        match result {
            Ok(report) if report.skipped > 0 => {
                warn!(
                    skipped = report.skipped,
                    "Some Okta log records could not be converted and were skipped"
                );
            }
            Ok(_) => {}
            Err(HarvestError::Okta(e)) if e.is_retryable() => {
                warn!(error = %e, "Okta fetch failed, will retry next period");
            }
            Err(e) => {
                error!(error = %e, "Okta fetch cycle failed");
            }
        }
    }

    async fn stop(self) -> Result<PublishStats, BeatError> {
        self.lifecycle.transition(LifecycleState::Stopping)?;
        info!("Stopping oktabeat");

        let stats = self.publisher.close().await?;
        self.lifecycle.transition(LifecycleState::Terminated)?;
        info!(
            published = stats.published,
            dropped = stats.dropped,
            "oktabeat stopped"
        );
        Ok(stats)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[path = "beater_test.rs"]
mod tests;
