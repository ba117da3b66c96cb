//! Evaluation outcomes
//!
//! Results are produced for every visited applet, so their bodies are
//! pooled. The zero-payload success and failure are constants and never
//! touch the pool. A result is consumed by [`AppletResult::recycle`] (or by
//! dropping it), which makes reading it afterwards impossible.

use once_cell::sync::Lazy;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use super::referent::Referent;
use crate::error::ApplyError;
use crate::pool::{Pool, Pooled, Recycle};

const DEFAULT_POOL_CAPACITY: usize = 20;

static POOL: Lazy<Pool<ResultBody>> = Lazy::new(|| Pool::new(DEFAULT_POOL_CAPACITY));

pub(crate) fn configure_pool(capacity: usize) {
    POOL.set_capacity(capacity);
}

#[derive(Default)]
pub(crate) struct ResultBody {
    successful: bool,
    returned: Option<Arc<dyn Referent>>,
    actual: Option<Value>,
    cause: Option<ApplyError>,
}

impl Recycle for ResultBody {
    fn reset(&mut self) {
        self.successful = false;
        self.returned = None;
        self.actual = None;
        self.cause = None;
    }
}

enum Repr {
    Empty(bool),
    Pooled(Pooled<ResultBody>),
}

/// Outcome of evaluating one applet
pub struct AppletResult {
    repr: Repr,
}

impl AppletResult {
    /// Succeeded with nothing to report
    pub const EMPTY_SUCCESS: AppletResult = AppletResult {
        repr: Repr::Empty(true),
    };

    /// Failed with nothing to report
    pub const EMPTY_FAILURE: AppletResult = AppletResult {
        repr: Repr::Empty(false),
    };

    /// Result without payload; never touches the pool
    pub fn empty(successful: bool) -> Self {
        if successful {
            Self::EMPTY_SUCCESS
        } else {
            Self::EMPTY_FAILURE
        }
    }

    fn obtain(
        successful: bool,
        returned: Option<Arc<dyn Referent>>,
        actual: Option<Value>,
        cause: Option<ApplyError>,
    ) -> Self {
        let mut body = POOL.acquire();
        body.successful = successful;
        body.returned = returned;
        body.actual = actual;
        body.cause = cause;
        Self {
            repr: Repr::Pooled(body),
        }
    }

    /// Success publishing `returned`; a null value yields [`Self::EMPTY_SUCCESS`]
    pub fn succeeded(returned: Value) -> Self {
        if returned.is_null() {
            Self::EMPTY_SUCCESS
        } else {
            Self::obtain(true, Some(Arc::new(returned)), None, None)
        }
    }

    /// Success publishing an aggregate that backs several referents
    pub fn succeeded_with(returned: Arc<dyn Referent>) -> Self {
        Self::obtain(true, Some(returned), None, None)
    }

    /// Match failure carrying the mismatching value
    pub fn failed(actual: Value) -> Self {
        if actual.is_null() {
            Self::EMPTY_FAILURE
        } else {
            Self::obtain(false, None, Some(actual), None)
        }
    }

    /// Execution error; counts as a failure for branching
    pub fn error(cause: ApplyError) -> Self {
        Self::obtain(false, None, None, Some(cause))
    }

    /// Whether the applet succeeded
    pub fn is_successful(&self) -> bool {
        match &self.repr {
            Repr::Empty(successful) => *successful,
            Repr::Pooled(body) => body.successful,
        }
    }

    /// The payload published to referents on success
    pub fn returned(&self) -> Option<&Arc<dyn Referent>> {
        match &self.repr {
            Repr::Empty(_) => None,
            Repr::Pooled(body) => body.returned.as_ref(),
        }
    }

    /// Slot 0 of the returned payload
    pub fn returned_value(&self) -> Option<Value> {
        self.returned().and_then(|r| r.referred_value(0))
    }

    /// The mismatching value of a failed match
    pub fn actual(&self) -> Option<&Value> {
        match &self.repr {
            Repr::Empty(_) => None,
            Repr::Pooled(body) => body.actual.as_ref(),
        }
    }

    /// Executor error behind a failed result
    pub fn failure_cause(&self) -> Option<&ApplyError> {
        match &self.repr {
            Repr::Empty(_) => None,
            Repr::Pooled(body) => body.cause.as_ref(),
        }
    }

    /// Whether this is one of the zero-payload constants
    pub fn is_empty(&self) -> bool {
        matches!(self.repr, Repr::Empty(_))
    }

    /// Return the body to the pool
    pub fn recycle(self) {
        drop(self);
    }

    /// Drop every idle result body
    pub fn drain_pool() -> usize {
        POOL.drain()
    }
}

impl fmt::Debug for AppletResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppletResult")
            .field("successful", &self.is_successful())
            .field("returned", &self.returned())
            .field("actual", &self.actual())
            .field("cause", &self.failure_cause())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_null_payloads_use_constants() {
        assert!(AppletResult::succeeded(Value::Null).is_empty());
        assert!(AppletResult::failed(Value::Null).is_empty());
        assert!(AppletResult::empty(true).is_successful());
        assert!(!AppletResult::empty(false).is_successful());
    }

    #[test]
    fn test_succeeded_returns_value() {
        let result = AppletResult::succeeded(json!(15));
        assert!(result.is_successful());
        assert!(!result.is_empty());
        assert_eq!(result.returned_value(), Some(json!(15)));
        assert!(result.actual().is_none());
        result.recycle();
    }

    #[test]
    fn test_failed_keeps_actual() {
        let result = AppletResult::failed(json!("com.other"));
        assert!(!result.is_successful());
        assert_eq!(result.actual(), Some(&json!("com.other")));
        assert!(result.returned().is_none());
    }

    #[test]
    fn test_error_keeps_cause() {
        let result = AppletResult::error(ApplyError::Platform("binder died".into()));
        assert!(!result.is_successful());
        assert!(matches!(
            result.failure_cause(),
            Some(ApplyError::Platform(msg)) if msg == "binder died"
        ));
    }

    #[test]
    fn test_recycled_body_is_clean() {
        let first = AppletResult::error(ApplyError::Platform("x".into()));
        first.recycle();
        // Whatever body the pool hands out next must not leak the cause
        let next = AppletResult::succeeded(json!(1));
        assert!(next.failure_cause().is_none());
        assert!(next.actual().is_none());
    }
}
