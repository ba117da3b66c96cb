//! Dispatch origin of events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Identifies the dispatch an event or batch belongs to
///
/// A resumed run observes two batches; the dispatcher reports such a run
/// under the resuming batch's context with `caused_by` naming the batch the
/// run started on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Context {
    /// ULID, so ids sort by creation time
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caused_by: Option<String>,
}

impl Context {
    /// Context with a fresh ULID
    pub fn new() -> Self {
        Self {
            id: Ulid::new().to_string(),
            caused_by: None,
        }
    }

    /// Context with a fixed id, e.g. one restored from a log
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            caused_by: None,
        }
    }

    /// This context, marked as continuing the work started under `origin`
    pub fn linked_to(mut self, origin: &Context) -> Self {
        self.caused_by = Some(origin.id.clone());
        self
    }

    /// Creation time encoded in the id; `None` for ids that are not ULIDs
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        Ulid::from_string(&self.id)
            .ok()
            .map(|ulid| DateTime::<Utc>::from(ulid.datetime()))
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}
