//! oktabeat: ships Okta System Log events to a local output.
//!
//! The binary in `main.rs` wires these modules together:
//! - [`config`] loads the YAML configuration
//! - [`logging`] installs the tracing subscriber
//! - [`beater`] owns the lifecycle and the polling loop
//! - [`input::okta`] talks to the Okta API
//! - [`publisher`] queues events to the configured output
//! - [`server`] handles signals, health probes and metrics

pub mod beater;
pub mod clock;
pub mod config;
pub mod input;
pub mod logging;
pub mod publisher;
pub mod server;
