//! Per-run execution state and the registries it consults

pub mod cancel;
pub mod event_scope;
pub mod indexer;
pub mod observer;
pub mod task_context;
pub mod task_runtime;

pub use cancel::CancelHandle;
pub use event_scope::EventScope;
pub use indexer::AppletIndexer;
pub use observer::Observer;
pub use task_context::TaskContext;
pub use task_runtime::{TaskRuntime, WaitFor};
