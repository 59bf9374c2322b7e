//! Events managed by the durable queue.
//!
//! An event is immutable once published. Its serialized form is exactly the
//! record written to the persistence log, one JSON object per line.

use std::cmp::Ordering;

use chrono::{DateTime, TimeZone, Utc};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Priority assigned when the publisher does not pick one.
pub const DEFAULT_PRIORITY: i64 = 5;

/// A unit of work carried by the event queue.
///
/// Lower `priority` values are more urgent. Ties are broken by
/// `timestamp`, then by insertion order inside the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Opaque identifier chosen by the publisher; scalar ids are stringified
    #[serde(deserialize_with = "scalar_id")]
    pub event_id: String,

    /// Opaque payload
    pub data: serde_json::Value,

    /// Lower value = more urgent
    #[serde(default = "default_priority")]
    pub priority: i64,

    /// Enqueue time, seconds since the Unix epoch
    #[serde(default = "now_seconds", deserialize_with = "timestamp_or_now")]
    pub timestamp: f64,
}

fn scalar_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        serde_json::Value::Bool(b) => Ok(b.to_string()),
        other => Err(de::Error::custom(format!("event_id must be a scalar, got {}", other))),
    }
}

/// A null timestamp is restamped with the current time
fn timestamp_or_now<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or_else(now_seconds))
}

fn default_priority() -> i64 {
    DEFAULT_PRIORITY
}

/// Current wall-clock time as fractional epoch seconds
pub fn now_seconds() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

impl Event {
    /// Create an event stamped with the current time and default priority
    pub fn new(event_id: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event_id: event_id.into(),
            data,
            priority: DEFAULT_PRIORITY,
            timestamp: now_seconds(),
        }
    }

    /// Create an event with a generated UUID identifier
    pub fn with_generated_id(data: serde_json::Value) -> Self {
        Self::new(Uuid::new_v4().to_string(), data)
    }

    /// Set the priority
    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    /// Override the enqueue timestamp (used by recovery and tests)
    pub fn with_timestamp(mut self, timestamp: f64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Structural validity: a non-empty id, a non-null payload and a finite timestamp
    pub fn is_valid(&self) -> bool {
        !self.event_id.trim().is_empty() && !self.data.is_null() && self.timestamp.is_finite()
    }

    /// Enqueue time as a UTC datetime, if representable
    pub fn enqueued_at(&self) -> Option<DateTime<Utc>> {
        let secs = self.timestamp.floor();
        let nanos = ((self.timestamp - secs) * 1_000_000_000.0).round() as u32;
        Utc.timestamp_opt(secs as i64, nanos.min(999_999_999)).single()
    }

    /// Compare by the queue ordering key `(priority, timestamp)`
    pub fn order_key_cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| self.timestamp.total_cmp(&other.timestamp))
    }
}
