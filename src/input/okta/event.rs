//! Okta System Log event model

use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::Deserialize;
use serde_json::{Map, Value};

/// One record from `GET /api/v1/logs`
///
/// The record is kept exactly as received and shipped unchanged. `uuid` and
/// `published` are read out of it for the harvester's cursor.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEvent {
    pub uuid: String,
    pub published: DateTime<Utc>,
    record: Map<String, Value>,
}

/// The fields the harvester needs to order and dedup records
#[derive(Deserialize)]
struct CursorFields {
    uuid: String,
    published: DateTime<Utc>,
}

impl LogEvent {
    /// Decode one element of the API response array
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        let CursorFields { uuid, published } = CursorFields::deserialize(&value)?;
        let Value::Object(record) = value else {
            return Err(serde_json::Error::custom("log record is not a JSON object"));
        };
        Ok(Self {
            uuid,
            published,
            record,
        })
    }

    /// `eventType`, when the record carries one
    pub fn event_type(&self) -> Option<&str> {
        self.record.get("eventType").and_then(Value::as_str)
    }

    /// The record as received, shipped as event fields
    pub fn into_fields(self) -> Map<String, Value> {
        self.record
    }
}
