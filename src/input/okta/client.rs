//! Okta System Log API client
//!
//! Production code uses [`HttpOktaClient`], which calls `GET {base}/logs` with
//! SSWS token auth. Tests use `MockLogSource`, which replays queued pages.

use super::event::LogEvent;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::header::{ACCEPT, AUTHORIZATION, LINK};
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum OktaError {
    #[error("Okta HTTP error: {0}")]
    Http(String),

    #[error("Okta request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Okta API returned {status}, retry later")]
    Retryable { status: u16 },

    #[error("Okta API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Failed to parse Okta response: {0}")]
    Parse(String),

    #[error("Refusing to follow next link outside the Okta origin: {0}")]
    ForeignLink(String),
}

impl OktaError {
    /// Rate limiting and server-side failures; the next cycle may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, OktaError::Retryable { .. } | OktaError::Timeout(_))
    }
}

/// Which page to fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageRequest {
    /// First page of a cycle, starting at `since`
    First { since: DateTime<Utc>, limit: u32 },
    /// Absolute URL taken from a `Link: <...>; rel="next"` header
    Next(String),
}

/// One page of the System Log
#[derive(Debug, Default)]
pub struct LogPage {
    pub events: Vec<LogEvent>,
    /// Records that were not valid log events
    pub skipped: usize,
    pub next: Option<String>,
}

#[async_trait]
pub trait LogSource: Send + Sync {
    async fn fetch_page(&self, request: &PageRequest) -> Result<LogPage, OktaError>;
}

pub struct HttpOktaClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    timeout: Duration,
}

impl HttpOktaClient {
    pub fn new(base_url: String, api_key: String, timeout: Duration) -> Self {
        let client = match reqwest::Client::builder().timeout(timeout).build() {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "Failed to build Okta HTTP client, using default");
                reqwest::Client::new()
            }
        };
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            timeout,
        }
    }

    pub fn logs_url(&self) -> String {
        format!("{}/logs", self.base_url)
    }

    /// Whether `url` shares scheme, host and port with the configured base
    fn same_origin(&self, url: &str) -> bool {
        match (reqwest::Url::parse(&self.base_url), reqwest::Url::parse(url)) {
            (Ok(base), Ok(other)) => base.origin() == other.origin(),
            _ => false,
        }
    }
}

#[async_trait]
impl LogSource for HttpOktaClient {
    async fn fetch_page(&self, request: &PageRequest) -> Result<LogPage, OktaError> {
        let builder = match request {
            PageRequest::First { since, limit } => self.client.get(self.logs_url()).query(&[
                ("since", since.to_rfc3339_opts(SecondsFormat::Secs, true)),
                ("limit", limit.to_string()),
            ]),
            PageRequest::Next(url) => {
                // The API token only goes to the configured Okta origin
                if !self.same_origin(url) {
                    return Err(OktaError::ForeignLink(url.clone()));
                }
                self.client.get(url)
            }
        };

        let response = builder
            .header(AUTHORIZATION, format!("SSWS {}", self.api_key))
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    OktaError::Timeout(self.timeout)
                } else {
                    OktaError::Http(e.to_string())
                }
            })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(OktaError::Retryable {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OktaError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let next = response
            .headers()
            .get_all(LINK)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .find_map(parse_next_link);

        let records: Vec<Value> = response
            .json()
            .await
            .map_err(|e| OktaError::Parse(e.to_string()))?;

        let page = decode_records(records, next);
        debug!(
            events = page.events.len(),
            skipped = page.skipped,
            has_next = page.next.is_some(),
            "Fetched Okta log page"
        );
        Ok(page)
    }
}

/// Split raw records into decoded events and a count of rejects
pub fn decode_records(records: Vec<Value>, next: Option<String>) -> LogPage {
    let mut page = LogPage {
        next,
        ..LogPage::default()
    };
    for record in records {
        match LogEvent::from_value(record) {
            Ok(event) => page.events.push(event),
            Err(e) => {
                warn!(error = %e, "Could not convert Okta log record into an event");
                page.skipped += 1;
            }
        }
    }
    page
}

/// Extract the `rel="next"` target from a `Link` header value
///
/// `<https://x/api/v1/logs?after=1>; rel="self", <https://x/api/v1/logs?after=2>; rel="next"`
pub fn parse_next_link(header: &str) -> Option<String> {
    header.split(',').find_map(|link| {
        let mut parts = link.split(';');
        let target = parts.next()?.trim();
        let url = target.strip_prefix('<')?.strip_suffix('>')?;

        let is_next = parts.any(|param| {
            let param = param.trim();
            param
                .strip_prefix("rel=")
                .map(|rel| rel.trim_matches('"').split_whitespace().any(|r| r == "next"))
                .unwrap_or(false)
        });
        is_next.then(|| url.to_string())
    })
}

/// Replays queued pages and records every request
#[cfg(test)]
#[derive(Default)]
pub struct MockLogSource {
    pages: std::sync::Mutex<std::collections::VecDeque<Result<LogPage, OktaError>>>,
    requests: std::sync::Mutex<Vec<PageRequest>>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
impl MockLogSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_page(&self, page: Result<LogPage, OktaError>) {
        self.pages.lock().unwrap().push_back(page);
    }

    pub fn requests(&self) -> Vec<PageRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
#[async_trait]
impl LogSource for MockLogSource {
    /// Returns an empty page once the queue is exhausted
    async fn fetch_page(&self, request: &PageRequest) -> Result<LogPage, OktaError> {
        self.requests.lock().unwrap().push(request.clone());
        self.pages
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(LogPage::default()))
    }
}
