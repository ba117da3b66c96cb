//! Error types for the execution runtime

use thiserror::Error;

use crate::applet::AppletId;

/// Errors that abort a runtime walk
///
/// Match failures and executor errors are not represented here: they are
/// ordinary [`AppletResult`](crate::AppletResult)s and only steer branching.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Runtime cancelled")]
    Cancelled,

    #[error("Global value not found: {0:#x}")]
    GlobalMissing(u64),

    #[error("Global value {0:#x} has a different type")]
    GlobalTypeMismatch(u64),

    #[error("Cached argument for applet {0} has a different type")]
    ArgumentTypeMismatch(AppletId),

    #[error("Invalid applet tree: {0}")]
    InvalidTree(String),

    #[error("Target is not set")]
    NoTarget,
}

impl EngineError {
    /// Whether this error is a cooperative cancellation rather than a fault
    pub fn is_cancelled(&self) -> bool {
        matches!(self, EngineError::Cancelled)
    }
}

/// Result type for runtime operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Failure raised by a condition or action executor
///
/// Converted into [`AppletResult::error`](crate::AppletResult::error) so the
/// walk continues and the cause stays available for diagnostics.
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("Target unavailable: {0}")]
    TargetUnavailable(String),

    #[error("Invalid argument in slot {slot}: {reason}")]
    InvalidArgument { slot: usize, reason: String },

    #[error("Platform call failed: {0}")]
    Platform(String),
}
