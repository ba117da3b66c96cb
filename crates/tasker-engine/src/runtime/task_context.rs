//! Per-batch evaluation context

use dashmap::DashMap;
use std::any::Any;
use std::sync::Arc;

use tasker_core::{Event, EventBatch};

use crate::applet::AppletId;
use crate::error::{EngineError, EngineResult};
use crate::task::Task;

/// Container shared by every applet visited while one task evaluates one
/// event batch
pub struct TaskContext {
    task: Arc<Task>,
    events: Arc<[Event]>,
    hit: usize,
    /// Helpers shared by applets with the same id, e.g. a compiled regex
    arguments: DashMap<AppletId, Arc<dyn Any + Send + Sync>>,
}

impl TaskContext {
    /// Context for evaluating `task` against `batch`
    pub fn new(task: Arc<Task>, batch: &EventBatch) -> Self {
        Self {
            task,
            events: batch.events().clone(),
            hit: batch.hit_index(),
            arguments: DashMap::new(),
        }
    }

    /// The task being evaluated
    pub fn task(&self) -> &Arc<Task> {
        &self.task
    }

    /// Events of the batch, in arrival order
    pub fn events(&self) -> &Arc<[Event]> {
        &self.events
    }

    /// The event that triggered the batch
    pub fn hit_event(&self) -> &Event {
        &self.events[self.hit]
    }

    /// Index of the hit event within [`TaskContext::events`]
    pub fn hit_index(&self) -> usize {
        self.hit
    }

    /// Get the helper cached for `id`, constructing it on first use
    pub fn get_or_put_argument<T, F>(&self, id: AppletId, init: F) -> EngineResult<Arc<T>>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> T,
    {
        let argument = self
            .arguments
            .entry(id)
            .or_insert_with(|| Arc::new(init()) as Arc<dyn Any + Send + Sync>)
            .value()
            .clone();
        argument
            .downcast::<T>()
            .map_err(|_| EngineError::ArgumentTypeMismatch(id))
    }
}

impl std::fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskContext")
            .field("task", &self.task.metadata().title)
            .field("events", &self.events.len())
            .field("hit", &self.hit)
            .finish()
    }
}
