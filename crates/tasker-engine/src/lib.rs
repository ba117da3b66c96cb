//! Task Execution Runtime
//!
//! This crate evaluates compiled automation tasks against batches of
//! environment events. A task is an immutable tree of applets: leaf criteria
//! and actions grouped by flows that carry control-flow semantics.
//!
//! # Architecture
//!
//! ```text
//! EventBatch → TaskContext ─┐
//!                           ├─→ TaskRuntime walks Task.flow → AppletResult
//! EventScope (shared) ──────┘
//! ```
//!
//! - **Applets** are shared read-only across any number of runtimes.
//! - **TaskRuntime** holds all per-run state: position, referents,
//!   fingerprint, pending wait. Its buffers are pooled and reset on recycle.
//! - **AppletResult** bodies are pooled as well; the zero-payload outcomes
//!   are constants.
//!
//! # Key Types
//!
//! - [`Applet`] / [`Flow`] - the compiled tree
//! - [`TaskRuntime`] - the mutable execution frame
//! - [`EventScope`] - globals shared by runtimes of one dispatch session
//! - [`TaskContext`] - per-batch container with an argument cache

pub mod applet;
pub mod error;
pub mod eval;
pub mod pool;
pub mod runtime;
pub mod task;

pub use applet::{
    Action, ActionInput, Applet, AppletId, AppletKind, AppletResult, Checked, Criterion,
    CriterionInput, FieldReferent, Flow, FlowKind, FnAction, FnCriterion, HitEventPayload,
    PatternCriterion, PropertyCriterion, Referent, TargetSelector, WaitForSpec,
};
pub use error::{ApplyError, EngineError, EngineResult};
pub use eval::{evaluate, Outcome};
pub use runtime::{
    AppletIndexer, CancelHandle, EventScope, Observer, TaskContext, TaskRuntime, WaitFor,
};
pub use task::{Task, TaskMetadata};

/// Apply pool capacities, typically from the engine configuration
pub fn configure_pools(result_capacity: usize, runtime_capacity: usize) {
    applet::result::configure_pool(result_capacity);
    runtime::task_runtime::configure_pool(runtime_capacity);
}

/// Release every pooled object held for reuse, returning how many were dropped
pub fn drain_pools() -> usize {
    let results = AppletResult::drain_pool();
    let runtimes = TaskRuntime::drain_pool();
    tracing::debug!(results, runtimes, "Drained pools");
    results + runtimes
}
