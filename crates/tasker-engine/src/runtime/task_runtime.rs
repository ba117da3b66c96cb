//! The mutable execution frame of one task run

use once_cell::sync::Lazy;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::Arc;
use tracing::trace;

use tasker_core::{Context, Event, EventBatch};

use super::cancel::CancelHandle;
use super::event_scope::EventScope;
use super::indexer::AppletIndexer;
use super::observer::Observer;
use crate::applet::{Applet, AppletKind, AppletResult, Referent, WaitForSpec};
use crate::error::{EngineError, EngineResult};
use crate::pool::{Pool, Pooled, Recycle};
use crate::task::Task;

const DEFAULT_POOL_CAPACITY: usize = 10;

static POOL: Lazy<Pool<RuntimeFrame>> = Lazy::new(|| Pool::new(DEFAULT_POOL_CAPACITY));

pub(crate) fn configure_pool(capacity: usize) {
    POOL.set_capacity(capacity);
}

/// A published payload plus the slot to read from it
#[derive(Debug, Clone)]
struct IndexedReferent {
    which: usize,
    referent: Arc<dyn Referent>,
}

impl IndexedReferent {
    fn value(&self) -> Option<Value> {
        self.referent.referred_value(self.which)
    }
}

/// Pending suspension of a runtime
#[derive(Debug, Clone)]
pub struct WaitFor {
    applet: Arc<Applet>,
}

impl WaitFor {
    /// Wait on the `WaitFor` applet the walk stopped at
    pub fn new(applet: Arc<Applet>) -> Self {
        Self { applet }
    }

    /// The wait applet the walk stopped at
    pub fn applet(&self) -> &Arc<Applet> {
        &self.applet
    }

    /// Event filter of the wait applet
    pub fn spec(&self) -> Option<&WaitForSpec> {
        match self.applet.kind() {
            AppletKind::WaitFor(spec) => Some(spec),
            _ => None,
        }
    }

    /// Whether `events` contain an event that releases this wait
    pub fn qualifies(&self, events: &[Event]) -> bool {
        self.spec().map_or(false, |spec| spec.find(events).is_some())
    }
}

/// Pooled part of a runtime: everything that must be reset between runs
pub(crate) struct RuntimeFrame {
    tracker: AppletIndexer,
    referents: HashMap<String, IndexedReferent>,
    crc: crc32fast::Hasher,
    suspending: bool,
    waiting_for: Option<WaitFor>,
    observer: Option<Arc<dyn Observer>>,
    successful: bool,
    result: Option<AppletResult>,
    target: Option<Arc<Value>>,
    current_applet: Option<Arc<Applet>>,
    current_flow: Option<Arc<Applet>>,
}

impl Default for RuntimeFrame {
    fn default() -> Self {
        Self {
            tracker: AppletIndexer::default(),
            referents: HashMap::new(),
            crc: crc32fast::Hasher::new(),
            suspending: false,
            waiting_for: None,
            observer: None,
            successful: true,
            result: None,
            target: None,
            current_applet: None,
            current_flow: None,
        }
    }
}

impl Recycle for RuntimeFrame {
    fn reset(&mut self) {
        self.tracker.reset();
        self.referents.clear();
        self.crc.reset();
        self.suspending = false;
        self.waiting_for = None;
        self.observer = None;
        self.successful = true;
        self.result = None;
        self.target = None;
        self.current_applet = None;
        self.current_flow = None;
    }
}

/// Closes every value folded into the fingerprint
const VALUE_TERMINATOR: u8 = 0xff;

/// Feeds serialized bytes straight into the checksum
struct CrcWriter<'a>(&'a mut crc32fast::Hasher);

impl io::Write for CrcWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Execution frame for one (task, event batch) pair
///
/// Obtained from a pool with [`TaskRuntime::obtain`] and given back with
/// [`TaskRuntime::recycle`]. Dropping a runtime recycles it as well, so a
/// cancelled walk never leaks its frame.
pub struct TaskRuntime {
    task: Arc<Task>,
    /// Context of the batch the run started on
    origin: Context,
    events: Arc<[Event]>,
    hit: usize,
    event_scope: Arc<EventScope>,
    handle: CancelHandle,
    frame: Pooled<RuntimeFrame>,
}

impl TaskRuntime {
    /// Fresh runtime for `task` evaluating `batch`
    pub fn obtain(
        task: Arc<Task>,
        event_scope: Arc<EventScope>,
        handle: CancelHandle,
        batch: &EventBatch,
    ) -> Self {
        Self {
            task,
            origin: batch.context().clone(),
            events: batch.events().clone(),
            hit: batch.hit_index(),
            event_scope,
            handle,
            frame: POOL.acquire(),
        }
    }

    /// Reset every per-run field and return the frame to the pool
    pub fn recycle(self) {
        trace!(task = %self.task.title(), "Recycling runtime");
        drop(self);
    }

    /// Drop every idle runtime frame
    pub fn drain_pool() -> usize {
        POOL.drain()
    }

    /// The task being evaluated
    pub fn task(&self) -> &Arc<Task> {
        &self.task
    }

    /// Context of the batch the run started on; kept across resumes
    pub fn origin(&self) -> &Context {
        &self.origin
    }

    /// Globals shared with every other runtime of the same scope
    pub fn event_scope(&self) -> &Arc<EventScope> {
        &self.event_scope
    }

    /// Cancellation handle shared with the owner of the run
    pub fn handle(&self) -> &CancelHandle {
        &self.handle
    }

    // Liveness

    /// `false` once the run was halted
    pub fn is_active(&self) -> bool {
        !self.handle.is_cancelled()
    }

    /// Fail with [`EngineError::Cancelled`] once the owner halted the run
    pub fn ensure_active(&self) -> EngineResult<()> {
        if self.handle.is_cancelled() {
            Err(EngineError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Request cancellation; the walk stops at the next applet boundary
    pub fn halt(&self) {
        self.handle.cancel();
    }

    // Events

    /// Events of the batch currently evaluated
    pub fn events(&self) -> &Arc<[Event]> {
        &self.events
    }

    /// The event that triggered the current batch
    pub fn hit_event(&self) -> &Event {
        &self.events[self.hit]
    }

    /// Swap in the batch a suspended run resumes with
    pub fn replace_events(&mut self, events: Arc<[Event]>, hit: usize) {
        self.events = events;
        self.hit = hit;
    }

    // Fingerprint

    /// Checksum over every value consumed so far, in order
    pub fn fingerprint(&self) -> u32 {
        self.frame.crc.clone().finalize()
    }

    /// Folds `value` into the checksum
    ///
    /// Each value is terminated by [`VALUE_TERMINATOR`], a byte that never
    /// occurs in UTF-8 JSON, so `[1, 23]` and `[12, 3]` stay distinct.
    pub fn update_fingerprint(&mut self, value: &Value) {
        // Writing into the checksum never fails and a `Value` always serializes
        let _ = serde_json::to_writer(CrcWriter(&mut self.frame.crc), value);
        self.frame.crc.update(&[VALUE_TERMINATOR]);
    }

    // Globals

    /// Global stored under `key`, shared by every runtime of the scope
    pub fn get_global<V>(&self, key: u64) -> EngineResult<Arc<V>>
    where
        V: Send + Sync + 'static,
    {
        self.event_scope.get(key)
    }

    /// Global under `key`, created with `init` when absent
    pub fn get_or_init_global<V, F>(&self, key: u64, init: F) -> EngineResult<Arc<V>>
    where
        V: Send + Sync + 'static,
        F: FnOnce() -> V,
    {
        self.event_scope.get_or_init(key, init)
    }

    // References

    /// Resolve the reference `applet` declares for slot `which`
    ///
    /// `None` when the slot declares no reference or nothing was published
    /// under its name during this run.
    pub fn get_referent_of(&self, applet: &Applet, which: usize) -> Option<Value> {
        let name = applet.references().get(&which)?;
        self.frame.referents.get(name)?.value()
    }

    /// Resolve every argument slot of `applet`
    pub fn get_all_referents_of(&self, applet: &Applet) -> Vec<Option<Value>> {
        (0..applet.arity())
            .map(|slot| self.get_referent_of(applet, slot))
            .collect()
    }

    /// Publish `referent` under every name `applet` declares; later
    /// registrations under the same name win
    pub fn register_referent(&mut self, applet: &Applet, referent: Arc<dyn Referent>) {
        for (which, name) in applet.referents() {
            trace!(referent = %name, slot = which, "Registering referent");
            self.frame.referents.insert(
                name.clone(),
                IndexedReferent {
                    which: *which,
                    referent: referent.clone(),
                },
            );
        }
    }

    /// Record the outcome of `applet`, publishing its payload on success
    pub fn register_result(&mut self, applet: &Applet, result: AppletResult) {
        self.frame.successful = result.is_successful();
        if let Some(returned) = result.returned().filter(|_| result.is_successful()) {
            let returned = returned.clone();
            self.register_referent(applet, returned);
        }
        self.frame.result = Some(result);
    }

    /// Result of the most recently evaluated applet
    pub fn result(&self) -> Option<&AppletResult> {
        self.frame.result.as_ref()
    }

    /// Move the result slot out, leaving it empty
    pub fn take_result(&mut self) -> Option<AppletResult> {
        self.frame.result.take()
    }

    /// Whether the most recently registered result succeeded
    pub fn is_successful(&self) -> bool {
        self.frame.successful
    }

    // Target

    /// Object the current flow's criteria and actions operate on
    pub fn target(&self) -> Option<&Arc<Value>> {
        self.frame.target.as_ref()
    }

    /// Current target or [`EngineError::NoTarget`]
    pub fn require_target(&self) -> EngineResult<&Arc<Value>> {
        self.frame.target.as_ref().ok_or(EngineError::NoTarget)
    }

    /// Replace the current target
    pub fn set_target(&mut self, target: Option<Arc<Value>>) {
        self.frame.target = target;
    }

    /// Set the target, returning the previous one
    pub fn replace_target(&mut self, target: Option<Arc<Value>>) -> Option<Arc<Value>> {
        std::mem::replace(&mut self.frame.target, target)
    }

    // Suspension

    /// Pending wait of a suspended run
    pub fn waiting_for(&self) -> Option<&WaitFor> {
        self.frame.waiting_for.as_ref()
    }

    /// Set the pending wait, replacing any previous one
    pub fn set_waiting_for(&mut self, waiting_for: Option<WaitFor>) {
        self.frame.waiting_for = waiting_for;
    }

    /// Set while a suspension unwinds the walk
    pub fn is_suspending(&self) -> bool {
        self.frame.suspending
    }

    pub(crate) fn set_suspending(&mut self, suspending: bool) {
        self.frame.suspending = suspending;
    }

    // Instrumentation

    /// Observer notified of applet starts, ends and skips
    pub fn observer(&self) -> Option<&Arc<dyn Observer>> {
        self.frame.observer.as_ref()
    }

    /// Attach or detach the observer
    pub fn set_observer(&mut self, observer: Option<Arc<dyn Observer>>) {
        self.frame.observer = observer;
    }

    // Position

    /// Per-flow cursors of the walk
    pub fn tracker(&self) -> &AppletIndexer {
        &self.frame.tracker
    }

    pub(crate) fn tracker_mut(&mut self) -> &mut AppletIndexer {
        &mut self.frame.tracker
    }

    /// Applet most recently entered
    pub fn current_applet(&self) -> Option<&Arc<Applet>> {
        self.frame.current_applet.as_ref()
    }

    pub(crate) fn set_current_applet(&mut self, applet: &Arc<Applet>) {
        self.frame.current_applet = Some(applet.clone());
    }

    /// Flow whose child is being evaluated
    pub fn current_flow(&self) -> Option<&Arc<Applet>> {
        self.frame.current_flow.as_ref()
    }

    pub(crate) fn set_current_flow(&mut self, flow: &Arc<Applet>) {
        self.frame.current_flow = Some(flow.clone());
    }
}

impl fmt::Debug for TaskRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRuntime")
            .field("task", &self.task.title())
            .field("events", &self.events.len())
            .field("position", &self.frame.tracker.position())
            .field("referents", &self.frame.referents.len())
            .field("fingerprint", &format_args!("{:#010x}", self.fingerprint()))
            .field("suspending", &self.frame.suspending)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::applet::{AppletId, FieldReferent, Flow, FnAction};
    use crate::task::TaskMetadata;
    use serde_json::json;
    use tasker_core::Context;

    fn runtime() -> TaskRuntime {
        let task = Task::new(TaskMetadata::new("runtime"), Applet::flow(Flow::root(vec![]))).unwrap();
        let batch = EventBatch::single(Event::new("battery_changed", Context::new()));
        TaskRuntime::obtain(
            Arc::new(task),
            Arc::new(EventScope::new()),
            CancelHandle::new(),
            &batch,
        )
    }

    fn leaf() -> Applet {
        Applet::action(AppletId::new(0x50, 1), FnAction::new(|_| Ok(Value::Null)))
    }

    #[test]
    fn test_reference_round_trip() {
        let mut runtime = runtime();
        let producer = leaf().publishes(0, "x");
        let consumer = leaf().refers(0, "x");
        let stranger = leaf().refers(0, "y");

        runtime.register_result(&producer, AppletResult::succeeded(json!(42)));

        assert_eq!(runtime.get_referent_of(&consumer, 0), Some(json!(42)));
        assert_eq!(runtime.get_referent_of(&stranger, 0), None);
        assert_eq!(runtime.get_referent_of(&consumer, 1), None);
    }

    #[test]
    fn test_failed_result_publishes_nothing() {
        let mut runtime = runtime();
        let producer = leaf().publishes(0, "x");
        runtime.register_result(&producer, AppletResult::failed(json!(3)));

        assert!(!runtime.is_successful());
        assert_eq!(runtime.get_referent_of(&leaf().refers(0, "x"), 0), None);
    }

    #[test]
    fn test_most_recent_producer_wins() {
        let mut runtime = runtime();
        let producer = leaf().publishes(0, "x");
        runtime.register_result(&producer, AppletResult::succeeded(json!(1)));
        runtime.register_result(&producer, AppletResult::succeeded(json!(2)));

        assert_eq!(runtime.get_referent_of(&leaf().refers(0, "x"), 0), Some(json!(2)));
    }

    #[test]
    fn test_aggregate_backs_several_referents() {
        let mut runtime = runtime();
        let producer = leaf().publishes(0, "package").publishes(1, "activity");
        let source = Arc::new(json!({"package": "com.example", "activity": ".Main"}));
        let fields: Arc<[String]> = vec!["package".to_string(), "activity".to_string()].into();
        runtime.register_referent(&producer, Arc::new(FieldReferent::new(source, fields)));

        let consumer = leaf().refers(0, "activity").refers(1, "package");
        assert_eq!(
            runtime.get_all_referents_of(&consumer),
            vec![Some(json!(".Main")), Some(json!("com.example"))]
        );
    }

    #[test]
    fn test_fingerprint_is_order_sensitive() {
        let mut a = runtime();
        let mut b = runtime();
        let mut c = runtime();
        for value in [json!(15), json!("com.example")] {
            a.update_fingerprint(&value);
            b.update_fingerprint(&value);
        }
        c.update_fingerprint(&json!("com.example"));
        c.update_fingerprint(&json!(15));

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert_ne!(a.fingerprint(), runtime().fingerprint());
    }

    #[test]
    fn test_origin_survives_event_swap() {
        let task = Task::new(TaskMetadata::new("runtime"), Applet::flow(Flow::root(vec![]))).unwrap();
        let first = EventBatch::single(Event::new("battery_changed", Context::new()));
        let second = EventBatch::single(Event::new("new_window", Context::new()));
        let mut runtime = TaskRuntime::obtain(
            Arc::new(task),
            Arc::new(EventScope::new()),
            CancelHandle::new(),
            &first,
        );

        runtime.replace_events(second.events().clone(), second.hit_index());
        assert_eq!(runtime.origin(), first.context());
        assert_eq!(runtime.hit_event().event_type.as_str(), "new_window");
    }

    #[test]
    fn test_fingerprint_separates_values() {
        let mut split_late = runtime();
        split_late.update_fingerprint(&json!(1));
        split_late.update_fingerprint(&json!(23));

        let mut split_early = runtime();
        split_early.update_fingerprint(&json!(12));
        split_early.update_fingerprint(&json!(3));

        let mut joined = runtime();
        joined.update_fingerprint(&json!(123));

        assert_ne!(split_late.fingerprint(), split_early.fingerprint());
        assert_ne!(split_late.fingerprint(), joined.fingerprint());

        let mut strings = runtime();
        strings.update_fingerprint(&json!("a"));
        strings.update_fingerprint(&json!("bc"));
        let mut shifted = runtime();
        shifted.update_fingerprint(&json!("ab"));
        shifted.update_fingerprint(&json!("c"));
        assert_ne!(strings.fingerprint(), shifted.fingerprint());
    }

    #[test]
    fn test_recycle_clears_frame() {
        struct Silent;
        impl Observer for Silent {}

        let mut frame = RuntimeFrame::default();
        frame.referents.insert(
            "x".to_string(),
            IndexedReferent {
                which: 0,
                referent: Arc::new(json!(1)),
            },
        );
        frame.crc.update(b"stale");
        frame.suspending = true;
        frame.observer = Some(Arc::new(Silent));
        frame.successful = false;
        frame.result = Some(AppletResult::succeeded(json!(1)));
        frame.target = Some(Arc::new(json!({})));
        frame.tracker.enter();

        frame.reset();

        assert!(frame.referents.is_empty());
        assert_eq!(frame.crc.clone().finalize(), crc32fast::Hasher::new().finalize());
        assert!(!frame.suspending);
        assert!(frame.observer.is_none());
        assert!(frame.successful);
        assert!(frame.result.is_none());
        assert!(frame.target.is_none());
        assert!(frame.tracker.is_empty());
    }

    #[test]
    fn test_halt_is_observed() {
        let runtime = runtime();
        assert!(runtime.ensure_active().is_ok());
        runtime.halt();
        assert!(!runtime.is_active());
        assert!(matches!(runtime.ensure_active(), Err(EngineError::Cancelled)));
    }

    #[test]
    fn test_globals_delegate_to_scope() {
        let runtime = runtime();
        let first = runtime.get_or_init_global(9, || 3u8).unwrap();
        assert_eq!(*runtime.get_global::<u8>(9).unwrap(), 3);
        assert!(Arc::ptr_eq(&first, &runtime.get_global::<u8>(9).unwrap()));
        assert!(runtime.get_global::<u8>(10).is_err());
    }
}
