//! Suspension points

use std::fmt;
use std::sync::Arc;

use tasker_core::{Event, EventType};

type EventFilter = dyn Fn(&Event) -> bool + Send + Sync;

/// Which future event releases a suspended runtime
#[derive(Clone)]
pub struct WaitForSpec {
    event_type: EventType,
    filter: Option<Arc<EventFilter>>,
}

impl WaitForSpec {
    /// Wait for the next event of `event_type`
    pub fn new(event_type: impl Into<EventType>) -> Self {
        Self {
            event_type: event_type.into(),
            filter: None,
        }
    }

    /// Additionally require `filter` to accept the event
    pub fn with_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&Event) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self
    }

    /// Event type released by this wait
    pub fn event_type(&self) -> &EventType {
        &self.event_type
    }

    /// Whether `event` releases this wait
    pub fn accepts(&self, event: &Event) -> bool {
        self.event_type.accepts(&event.event_type)
            && self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// First qualifying event of a batch
    pub fn find<'a>(&self, events: &'a [Event]) -> Option<&'a Event> {
        events.iter().find(|event| self.accepts(event))
    }
}

impl fmt::Debug for WaitForSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitForSpec")
            .field("event_type", &self.event_type)
            .field("filtered", &self.filter.is_some())
            .finish()
    }
}
