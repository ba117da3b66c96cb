//! Event batches delivered to the dispatcher

use std::sync::Arc;

use crate::{Context, Event};

/// An ordered, finite batch of events plus the index of the event that
/// actually triggered the dispatch (the "hit" event)
#[derive(Debug, Clone)]
pub struct EventBatch {
    events: Arc<[Event]>,
    hit: usize,
    context: Context,
}

impl EventBatch {
    /// Create a batch whose hit event is the first one
    ///
    /// Returns `None` for an empty batch since there is nothing to hit.
    pub fn new(events: Vec<Event>) -> Option<Self> {
        Self::with_hit(events, 0)
    }

    /// Create a batch with an explicit hit index
    pub fn with_hit(events: Vec<Event>, hit: usize) -> Option<Self> {
        if hit >= events.len() {
            return None;
        }
        Some(Self {
            events: events.into(),
            hit,
            context: Context::new(),
        })
    }

    /// Single-event batch
    pub fn single(event: Event) -> Self {
        Self {
            events: Arc::from(vec![event]),
            hit: 0,
            context: Context::new(),
        }
    }

    /// All events in the batch, in arrival order
    pub fn events(&self) -> &Arc<[Event]> {
        &self.events
    }

    /// The event that triggered the batch
    pub fn hit_event(&self) -> &Event {
        &self.events[self.hit]
    }

    /// Index of the hit event
    pub fn hit_index(&self) -> usize {
        self.hit
    }

    /// Dispatch context of this batch
    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_out_of_range_rejected() {
        let events = vec![Event::new("a", Context::new())];
        assert!(EventBatch::with_hit(events.clone(), 1).is_none());
        assert!(EventBatch::new(Vec::new()).is_none());

        let batch = EventBatch::with_hit(events, 0).unwrap();
        assert_eq!(batch.hit_event().event_type.as_str(), "a");
        assert_eq!(batch.len(), 1);
    }
}
