//! Error types for the dispatcher

use thiserror::Error;

use crate::dispatcher::TaskKey;
use tasker_engine::EngineError;

/// Errors raised while registering or removing tasks
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Task not registered: {0}")]
    TaskNotFound(TaskKey),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),
}

/// Result type for dispatcher operations
pub type DispatchResult<T> = Result<T, DispatchError>;
