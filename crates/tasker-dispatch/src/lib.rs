//! Reference dispatcher for the task execution runtime
//!
//! The dispatcher owns every [`TaskRuntime`](tasker_engine::TaskRuntime)
//! from acquisition to recycle. For each event batch it either resumes a
//! parked runtime whose wait the batch satisfies or starts a fresh run, one
//! tokio task per compiled task, and collects the outcomes into a
//! [`DispatchReport`].

pub mod dispatcher;
pub mod error;

pub use dispatcher::{DispatchReport, Dispatcher, RunStatus, TaskKey, TaskRun};
pub use error::{DispatchError, DispatchResult};
