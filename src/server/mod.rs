//! Process plumbing around the beat
//!
//! Signal handling and the shutdown broadcast, plus the optional monitoring
//! server with liveness/readiness probes and Prometheus metrics.

mod health;
pub mod metrics;
pub mod shutdown;

pub use health::run_health_server;
pub use metrics::{create_metrics, BeatMetrics, SharedMetrics};
pub use shutdown::{
    shutdown_channel, ShutdownController, ShutdownReason, ShutdownSignal, Signal, SignalListener,
};

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[path = "health_test.rs"]
mod health_tests;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[path = "shutdown_test.rs"]
mod shutdown_tests;
