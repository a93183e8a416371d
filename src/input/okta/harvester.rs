//! One fetch cycle against the System Log
//!
//! Each cycle starts at a `since` cursor, follows `rel="next"` links until a
//! page comes back empty or `max_pages` is reached, and publishes every event
//! it has not shipped before.
//!
//! `since` is inclusive, so the newest events of the previous cycle are
//! returned again. The harvester remembers the uuids sharing the newest
//! `published` timestamp and drops those, along with anything older than the
//! cursor.

use super::client::{LogPage, LogSource, OktaError, PageRequest};
use super::event::LogEvent;
use crate::clock::Clock;
use crate::publisher::{Event, PublishError, Publisher};
use chrono::{DateTime, Utc};
use futures::stream::{self, Stream, TryStreamExt};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Okta fetch failed: {0}")]
    Okta(#[from] OktaError),

    #[error("Publishing failed: {0}")]
    Publish(#[from] PublishError),
}

/// What one cycle did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HarvestReport {
    pub pages: u32,
    pub published: usize,
    pub duplicates: usize,
    pub skipped: usize,
}

pub struct HarvesterSettings {
    pub beat_name: String,
    pub period: Duration,
    pub page_limit: u32,
    pub max_pages: u32,
}

pub struct Harvester {
    id: Uuid,
    source: Arc<dyn LogSource>,
    clock: Arc<dyn Clock>,
    settings: HarvesterSettings,
    cursor: Option<DateTime<Utc>>,
    seen_at_cursor: HashSet<String>,
}

impl Harvester {
    pub fn new(
        source: Arc<dyn LogSource>,
        clock: Arc<dyn Clock>,
        settings: HarvesterSettings,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            source,
            clock,
            settings,
            cursor: None,
            seen_at_cursor: HashSet::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// `published` of the newest event shipped so far
    pub fn cursor(&self) -> Option<DateTime<Utc>> {
        self.cursor
    }

    /// Start of the next query window
    fn since(&self) -> DateTime<Utc> {
        self.cursor.unwrap_or_else(|| {
            let lookback = chrono::Duration::from_std(self.settings.period)
                .unwrap_or_else(|_| chrono::Duration::seconds(60));
            self.clock.now() - lookback
        })
    }

    /// Move the cursor to a freshly published event
    fn advance(&mut self, published: DateTime<Utc>, uuid: String) {
        match self.cursor {
            Some(cursor) if published < cursor => {}
            Some(cursor) if published == cursor => {
                self.seen_at_cursor.insert(uuid);
            }
            _ => {
                self.cursor = Some(published);
                self.seen_at_cursor.clear();
                self.seen_at_cursor.insert(uuid);
            }
        }
    }

    /// Pages for one cycle, ending at an empty page, a page without a
    /// next link, or `max_pages`
    fn pages(&self) -> impl Stream<Item = Result<LogPage, OktaError>> + Send + 'static {
        let first = PageRequest::First {
            since: self.since(),
            limit: self.settings.page_limit,
        };
        let source = Arc::clone(&self.source);
        let max_pages = self.settings.max_pages;

        stream::try_unfold(
            (Some(first), 0u32),
            move |(request, fetched)| {
                let source = Arc::clone(&source);
                async move {
                    let Some(request) = request else {
                        return Ok(None);
                    };
                    if fetched >= max_pages {
                        return Ok(None);
                    }
                    let page = source.fetch_page(&request).await?;
                    let next = match &page.next {
                        Some(url) if !page.events.is_empty() => Some(PageRequest::Next(url.clone())),
                        _ => None,
                    };
                    Ok::<_, OktaError>(Some((page, (next, fetched + 1))))
                }
            },
        )
    }

    /// Run one cycle, publishing new events in API order
    ///
    /// The cursor advances after every event handed to the publisher, so a
    /// cycle that fails part way resumes after the last event it shipped.
    pub async fn run(&mut self, publisher: &Publisher) -> Result<HarvestReport, HarvestError> {
        debug!(harvester = %self.id, since = %self.since(), "Starting Okta fetch cycle");

        let mut report = HarvestReport::default();
        let start = self.cursor;
        let seen_at_start = self.seen_at_cursor.clone();

        let mut pages = Box::pin(self.pages());
        while let Some(page) = pages.try_next().await? {
            report.pages += 1;
            report.skipped += page.skipped;

            for event in page.events {
                let shipped_before = match start {
                    Some(cursor) if event.published < cursor => true,
                    Some(cursor) if event.published == cursor => {
                        seen_at_start.contains(&event.uuid)
                    }
                    _ => false,
                };
                if shipped_before || self.seen_at_cursor.contains(&event.uuid) {
                    debug!(
                        uuid = %event.uuid,
                        event_type = event.event_type().unwrap_or_default(),
                        "Skipping already shipped event"
                    );
                    report.duplicates += 1;
                    continue;
                }

                let published = event.published;
                let uuid = event.uuid.clone();
                publisher.publish(self.to_beat_event(event)).await?;
                report.published += 1;
                self.advance(published, uuid);
            }
        }

        info!(
            harvester = %self.id,
            pages = report.pages,
            published = report.published,
            duplicates = report.duplicates,
            skipped = report.skipped,
            "Okta fetch cycle finished"
        );
        Ok(report)
    }

    fn to_beat_event(&self, event: LogEvent) -> Event {
        let mut fields = event.into_fields();
        fields.insert(
            "type".to_string(),
            Value::String(self.settings.beat_name.clone()),
        );
        Event::new(self.clock.now(), fields)
    }
}
