//! Action executors

use async_trait::async_trait;
use serde_json::Value;

use super::Applet;
use crate::error::ApplyError;
use crate::runtime::TaskContext;

/// Inputs handed to an action
pub struct ActionInput<'a> {
    /// The applet being evaluated
    pub applet: &'a Applet,
    /// Resolved argument slots; `None` for unset or unresolved references
    pub args: &'a [Option<Value>],
    /// Literal value of the applet
    pub value: Option<&'a Value>,
    /// Current target object
    pub target: Option<&'a Value>,
    /// Batch-level context
    pub context: &'a TaskContext,
}

impl ActionInput<'_> {
    /// Argument `slot`, falling back to the literal value for slot 0
    pub fn arg(&self, slot: usize) -> Option<&Value> {
        match self.args.get(slot).and_then(Option::as_ref) {
            Some(value) => Some(value),
            None if slot == 0 => self.value,
            None => None,
        }
    }

    /// Argument `slot`, or an [`ApplyError::InvalidArgument`] when unresolved
    pub fn require_arg(&self, slot: usize) -> Result<&Value, ApplyError> {
        self.arg(slot).ok_or_else(|| ApplyError::InvalidArgument {
            slot,
            reason: "unresolved".to_string(),
        })
    }
}

/// Side-effect executor plugged into action applets
///
/// The returned value is published to the applet's referents; return
/// `Value::Null` when there is nothing to publish.
#[async_trait]
pub trait Action: Send + Sync {
    async fn execute(&self, input: ActionInput<'_>) -> Result<Value, ApplyError>;
}

type ActionFn = dyn Fn(&ActionInput<'_>) -> Result<Value, ApplyError> + Send + Sync;

/// Action backed by a synchronous closure
pub struct FnAction {
    perform: Box<ActionFn>,
}

impl FnAction {
    /// Action running `perform` on every evaluation
    pub fn new<F>(perform: F) -> Self
    where
        F: Fn(&ActionInput<'_>) -> Result<Value, ApplyError> + Send + Sync + 'static,
    {
        Self {
            perform: Box::new(perform),
        }
    }
}

#[async_trait]
impl Action for FnAction {
    async fn execute(&self, input: ActionInput<'_>) -> Result<Value, ApplyError> {
        (self.perform)(&input)
    }
}
