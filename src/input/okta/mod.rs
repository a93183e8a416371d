//! Okta System Log input
//!
//! - [`client`] fetches pages from `GET /api/v1/logs`
//! - [`event`] decodes log records
//! - [`harvester`] runs one fetch cycle and publishes new events

pub mod client;
pub mod event;
pub mod harvester;

pub use client::{HttpOktaClient, LogPage, LogSource, OktaError, PageRequest};
pub use event::LogEvent;
pub use harvester::{HarvestError, HarvestReport, Harvester, HarvesterSettings};

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[path = "client_test.rs"]
mod client_tests;
