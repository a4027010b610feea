pub mod filters;
pub mod reader;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};

/// One decoded eve log entry.
///
/// An unordered mapping of field name to JSON value with no enforced schema.
/// The only field inspected structurally is `timestamp`, used for ordering
/// and retention. Filters mutate the event in place.
#[derive(Debug, Clone, PartialEq)]
pub struct EveEvent(pub Map<String, Value>);

impl EveEvent {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn set(&mut self, key: &str, value: Value) {
        self.0.insert(key.to_string(), value);
    }

    /// Event type (eve `event_type` field), if present.
    pub fn event_type(&self) -> Option<&str> {
        self.0.get("event_type").and_then(Value::as_str)
    }

    /// Parse the `timestamp` field.
    ///
    /// Suricata writes timestamps like `2024-01-02T03:04:05.123456+0000`;
    /// RFC 3339 offsets with a colon are accepted as well.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        let raw = self.0.get("timestamp")?.as_str()?;
        parse_timestamp(raw)
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Some(dt.with_timezone(&Utc));
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Canonical timestamp encoding for the event store.
///
/// Fixed-width UTC so stored timestamps compare correctly as text.
pub fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}
