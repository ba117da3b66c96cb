//! Environment events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::Context;

const ANY: &str = "*";

/// Type tag of an environment event, e.g. `component_changed`
///
/// The tag `*` acts as a wildcard when used as a filter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventType(String);

impl EventType {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    /// Wildcard filter accepting every event
    pub fn any() -> Self {
        Self(ANY.to_string())
    }

    pub fn is_any(&self) -> bool {
        self.0 == ANY
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether an event tagged `other` passes this filter
    pub fn accepts(&self, other: &EventType) -> bool {
        self.is_any() || self == other
    }
}

impl From<&str> for EventType {
    fn from(tag: &str) -> Self {
        Self(tag.to_string())
    }
}

impl From<String> for EventType {
    fn from(tag: String) -> Self {
        Self(tag)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One event from the environment event source
///
/// The payload is whatever snapshot the source attaches: the foreground
/// component, the battery state, a notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_type: EventType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,

    pub fired_at: DateTime<Utc>,

    pub context: Context,
}

impl Event {
    /// Event stamped with the current time and no payload
    pub fn new(event_type: impl Into<EventType>, context: Context) -> Self {
        Self {
            event_type: event_type.into(),
            payload: None,
            fired_at: Utc::now(),
            context,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Top-level field of the payload
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.payload.as_ref()?.get(name)
    }
}
