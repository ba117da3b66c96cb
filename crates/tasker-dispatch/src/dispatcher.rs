//! Batch dispatch and runtime parking

use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::{Id, JoinSet};
use tracing::{debug, error, info, trace, warn};

use tasker_config::EngineConfig;
use tasker_core::{Context, EventBatch};
use tasker_engine::{
    Applet, CancelHandle, EngineError, EngineResult, EventScope, Observer, Outcome, Task,
    TaskContext, TaskMetadata, TaskRuntime,
};

use crate::error::{DispatchError, DispatchResult};

/// Handle of a registered task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TaskKey(u64);

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// How one run ended within a dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Walked to the end; the root result decided `successful`
    Completed { successful: bool },
    /// Waiting for a later batch
    Parked,
    /// Suspended but the parking limit was reached
    Dropped,
    /// Halted before finishing
    Cancelled,
    /// Aborted by an engine error or a panicking executor
    Failed,
}

/// One run within a dispatch
#[derive(Debug, Clone, Serialize)]
pub struct TaskRun {
    pub key: TaskKey,
    pub title: String,
    pub status: RunStatus,
    pub fingerprint: u32,
    /// Same fingerprint as the previous completed run of this task
    pub duplicate: bool,
    pub resumed: bool,
    /// Context of the dispatched batch; a resumed run links the batch its
    /// walk started on through `caused_by`
    pub context: Context,
}

/// Outcome of dispatching one batch
#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatchReport {
    pub runs: Vec<TaskRun>,
    /// Parked runtimes the batch did not release
    pub still_parked: usize,
}

impl DispatchReport {
    /// Run of `key`, if the batch started or resumed one
    pub fn run_of(&self, key: TaskKey) -> Option<&TaskRun> {
        self.runs.iter().find(|run| run.key == key)
    }

    /// Runs that walked to the end
    pub fn completed(&self) -> impl Iterator<Item = &TaskRun> {
        self.runs
            .iter()
            .filter(|run| matches!(run.status, RunStatus::Completed { .. }))
    }
}

enum Job {
    Run,
    Resume,
}

/// What the dispatcher remembers about a spawned run
struct Spawned {
    key: TaskKey,
    title: String,
    resumed: bool,
    context: Context,
}

/// Drives the runtimes of every registered task
pub struct Dispatcher {
    tasks: DashMap<TaskKey, Arc<Task>>,
    next_key: AtomicU64,
    scope: Arc<EventScope>,
    parked: DashMap<TaskKey, TaskRuntime>,
    in_flight: DashMap<TaskKey, CancelHandle>,
    fingerprints: DashMap<TaskKey, u32>,
    observer: Option<Arc<dyn Observer>>,
    max_parked: usize,
    /// Held for a whole dispatch so batches are applied one at a time
    gate: Mutex<()>,
}

impl Dispatcher {
    /// Create a dispatcher and apply the configured pool capacities
    pub fn new(config: &EngineConfig) -> Self {
        tasker_engine::configure_pools(config.result_pool_capacity, config.runtime_pool_capacity);
        Self {
            tasks: DashMap::new(),
            next_key: AtomicU64::new(0),
            scope: Arc::new(EventScope::new()),
            parked: DashMap::new(),
            in_flight: DashMap::new(),
            fingerprints: DashMap::new(),
            observer: None,
            max_parked: config.max_parked_runtimes,
            gate: Mutex::new(()),
        }
    }

    /// Attach `observer` to every runtime started from now on
    pub fn with_observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Globals shared by every runtime of this dispatcher
    pub fn scope(&self) -> &Arc<EventScope> {
        &self.scope
    }

    /// Register an already validated task
    pub fn register(&self, task: Task) -> TaskKey {
        let key = TaskKey(self.next_key.fetch_add(1, Ordering::Relaxed));
        info!(%key, title = %task.title(), "Registered task");
        self.tasks.insert(key, Arc::new(task));
        key
    }

    /// Compile-time validation plus registration
    pub fn register_tree(&self, metadata: TaskMetadata, root: Applet) -> DispatchResult<TaskKey> {
        let task = Task::new(metadata, root)?;
        Ok(self.register(task))
    }

    /// Remove a task, abandoning its parked runtime if any
    pub fn unregister(&self, key: TaskKey) -> DispatchResult<()> {
        self.tasks
            .remove(&key)
            .ok_or(DispatchError::TaskNotFound(key))?;
        if let Some((_, runtime)) = self.parked.remove(&key) {
            debug!(%key, "Abandoning parked runtime");
            runtime.halt();
            runtime.recycle();
        }
        self.fingerprints.remove(&key);
        Ok(())
    }

    /// Number of registered tasks
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Number of suspended runtimes waiting for a later batch
    pub fn parked_count(&self) -> usize {
        self.parked.len()
    }

    /// Whether `key` has a suspended runtime
    pub fn is_parked(&self, key: TaskKey) -> bool {
        self.parked.contains_key(&key)
    }

    /// Number of runs currently executing
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Fingerprint of the last completed run of `key`
    pub fn last_fingerprint(&self, key: TaskKey) -> Option<u32> {
        self.fingerprints.get(&key).map(|entry| *entry)
    }

    /// Whether `fingerprint` repeats the last completed run of `key`
    pub fn is_duplicate(&self, key: TaskKey, fingerprint: u32) -> bool {
        self.last_fingerprint(key) == Some(fingerprint)
    }

    /// Evaluate every enabled task against `batch`
    ///
    /// A task with a parked runtime is resumed when the batch satisfies its
    /// wait and left parked otherwise; it never starts a second run.
    /// Concurrent calls are serialized. A run whose executor panics is
    /// reported as [`RunStatus::Failed`] without disturbing the others.
    pub async fn dispatch(&self, batch: &EventBatch) -> DispatchReport {
        let _turn = self.gate.lock().await;
        let mut report = DispatchReport::default();
        let mut jobs = JoinSet::new();
        let mut spawned: HashMap<Id, Spawned> = HashMap::new();

        let tasks: Vec<(TaskKey, Arc<Task>)> = self
            .tasks
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        for (key, task) in tasks {
            if !task.is_enabled() {
                trace!(%key, "Task disabled, skipping");
                continue;
            }

            let (runtime, job) = match self.parked.remove(&key) {
                Some((_, runtime)) => {
                    let qualifies = runtime
                        .waiting_for()
                        .map_or(false, |wait| wait.qualifies(batch.events()));
                    if !qualifies {
                        self.parked.insert(key, runtime);
                        report.still_parked += 1;
                        continue;
                    }
                    (runtime, Job::Resume)
                }
                None => {
                    let mut runtime = TaskRuntime::obtain(
                        task.clone(),
                        self.scope.clone(),
                        CancelHandle::new(),
                        batch,
                    );
                    runtime.set_observer(self.observer.clone());
                    (runtime, Job::Run)
                }
            };

            let context = match job {
                Job::Run => batch.context().clone(),
                Job::Resume => {
                    let origin = runtime.origin();
                    let waited_ms = origin
                        .created_at()
                        .map(|since| (chrono::Utc::now() - since).num_milliseconds());
                    debug!(%key, origin = %origin.id, ?waited_ms, "Resuming parked runtime");
                    batch.context().clone().linked_to(origin)
                }
            };

            self.in_flight.insert(key, runtime.handle().clone());
            let run = Spawned {
                key,
                title: task.title().to_string(),
                resumed: matches!(job, Job::Resume),
                context,
            };
            let batch = batch.clone();
            let handle = jobs.spawn(async move {
                let mut runtime = runtime;
                let result = drive(&mut runtime, task, &batch, job).await;
                (runtime, result)
            });
            spawned.insert(handle.id(), run);
        }

        while let Some(joined) = jobs.join_next_with_id().await {
            let (id, finished) = match joined {
                Ok((id, finished)) => (id, Ok(finished)),
                Err(err) => (err.id(), Err(err)),
            };
            let Some(run) = spawned.remove(&id) else {
                continue;
            };
            self.in_flight.remove(&run.key);
            report.runs.push(match finished {
                Ok((runtime, result)) => self.settle(run, runtime, result),
                Err(err) => {
                    error!(key = %run.key, error = %err, "Run aborted");
                    TaskRun {
                        key: run.key,
                        title: run.title,
                        status: RunStatus::Failed,
                        fingerprint: 0,
                        duplicate: false,
                        resumed: run.resumed,
                        context: run.context,
                    }
                }
            });
        }
        report.runs.sort_by_key(|run| run.key);
        report
    }

    fn settle(&self, run: Spawned, runtime: TaskRuntime, result: EngineResult<Outcome>) -> TaskRun {
        let Spawned {
            key,
            title,
            resumed,
            context,
        } = run;
        let fingerprint = runtime.fingerprint();
        let mut duplicate = false;

        let status = match result {
            Ok(Outcome::Completed) => {
                let successful = runtime.is_successful();
                duplicate = self.fingerprints.insert(key, fingerprint) == Some(fingerprint);
                debug!(%key, successful, fingerprint, duplicate, "Run completed");
                runtime.recycle();
                RunStatus::Completed { successful }
            }
            Ok(Outcome::Suspended) if self.parked.len() < self.max_parked => {
                debug!(%key, "Parking suspended runtime");
                self.parked.insert(key, runtime);
                RunStatus::Parked
            }
            Ok(Outcome::Suspended) => {
                warn!(%key, limit = self.max_parked, "Parking limit reached, dropping runtime");
                runtime.halt();
                runtime.recycle();
                RunStatus::Dropped
            }
            Err(EngineError::Cancelled) => {
                debug!(%key, "Run cancelled");
                runtime.recycle();
                RunStatus::Cancelled
            }
            Err(err) => {
                warn!(%key, error = %err, "Run failed");
                runtime.recycle();
                RunStatus::Failed
            }
        };

        TaskRun {
            key,
            title,
            status,
            fingerprint,
            duplicate,
            resumed,
            context,
        }
    }

    /// Cancel in-flight runs and abandon every parked runtime
    ///
    /// Returns the number of parked runtimes released.
    pub fn halt_all(&self) -> usize {
        for entry in self.in_flight.iter() {
            entry.value().cancel();
        }

        let keys: Vec<TaskKey> = self.parked.iter().map(|entry| *entry.key()).collect();
        let mut released = 0;
        for key in keys {
            if let Some((_, runtime)) = self.parked.remove(&key) {
                runtime.halt();
                runtime.recycle();
                released += 1;
            }
        }
        if released > 0 {
            info!(released, "Released parked runtimes");
        }
        released
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.halt_all();
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("tasks", &self.tasks.len())
            .field("parked", &self.parked.len())
            .field("in_flight", &self.in_flight.len())
            .field("max_parked", &self.max_parked)
            .finish()
    }
}

/// Run or resume one runtime until it ends, suspends or is halted
async fn drive(
    runtime: &mut TaskRuntime,
    task: Arc<Task>,
    batch: &EventBatch,
    job: Job,
) -> EngineResult<Outcome> {
    let ctx = TaskContext::new(task, batch);
    let handle = runtime.handle().clone();
    let walk = async {
        match job {
            Job::Run => runtime.run(&ctx).await,
            // Qualification was checked before spawning
            Job::Resume => Ok(runtime
                .trigger_wait_for(&ctx)
                .await?
                .unwrap_or(Outcome::Suspended)),
        }
    };

    tokio::select! {
        outcome = walk => outcome,
        _ = handle.cancelled() => Err(EngineError::Cancelled),
    }
}
