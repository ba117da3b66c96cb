//! Integration tests for tree evaluation, references, suspension and pooling

use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;

use tasker_core::{events, Context, Event, EventBatch};
use tasker_engine::{
    Applet, AppletId, AppletResult, ApplyError, CancelHandle, Checked, Criterion, CriterionInput,
    EngineError, EventScope, Flow, FlowKind, FnAction, FnCriterion, HitEventPayload, Observer,
    Outcome, Task, TaskContext, TaskMetadata, TaskRuntime, WaitForSpec,
};

const FIXED: AppletId = AppletId::new(0x20, 0x0001);
const BATTERY_BELOW: AppletId = AppletId::new(0x20, 0x0101);
const PACKAGE_IS: AppletId = AppletId::new(0x10, 0x0001);
const RECORD: AppletId = AppletId::new(0x50, 0x0001);
const SHOW_TOAST: AppletId = AppletId::new(0x50, 0x0002);
const WAIT_COMPONENT: AppletId = AppletId::new(0x60, 0x0001);

// ============================================================================
// Fixtures
// ============================================================================

type Log = Arc<Mutex<Vec<String>>>;

/// Criterion with a fixed outcome that needs no target
struct Fixed(bool);

impl Criterion for Fixed {
    fn check(&self, _input: &CriterionInput<'_>) -> Result<Checked, ApplyError> {
        Ok(Checked {
            matched: self.0,
            actual: Value::Bool(self.0),
        })
    }
}

#[derive(Default)]
struct Recorder {
    calls: Mutex<Vec<String>>,
}

impl Recorder {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn saw(&self, call: &str) -> bool {
        self.calls.lock().iter().any(|c| c == call)
    }

    fn count(&self, call: &str) -> usize {
        self.calls.lock().iter().filter(|c| *c == call).count()
    }
}

impl Observer for Recorder {
    fn on_applet_started(&self, victim: &Applet, _runtime: &TaskRuntime) {
        self.calls.lock().push(format!("start {}", victim.display_name()));
    }

    fn on_applet_terminated(&self, victim: &Applet, _runtime: &TaskRuntime) {
        self.calls.lock().push(format!("end {}", victim.display_name()));
    }

    fn on_applet_skipped(&self, victim: &Applet, _runtime: &TaskRuntime) {
        self.calls.lock().push(format!("skip {}", victim.display_name()));
    }
}

fn pass(title: &str) -> Applet {
    Applet::criterion(FIXED, Fixed(true)).with_title(title)
}

fn fail(title: &str) -> Applet {
    Applet::criterion(FIXED, Fixed(false)).with_title(title)
}

fn flow(kind: FlowKind, title: &str, children: Vec<Applet>) -> Applet {
    Applet::flow_of(kind, children).with_title(title)
}

/// Action logging `title:[args]` and returning `returned`
fn record(title: &'static str, log: &Log, returned: Value) -> Applet {
    let log = log.clone();
    Applet::action(
        RECORD,
        FnAction::new(move |input| {
            let args = serde_json::to_string(input.args).unwrap();
            log.lock().push(format!("{title}:{args}"));
            Ok(returned.clone())
        }),
    )
    .with_title(title)
}

fn battery_below() -> Applet {
    Applet::criterion(
        BATTERY_BELOW,
        FnCriterion::field("level", |actual, expected| {
            matches!((actual.as_i64(), expected.as_i64()), (Some(a), Some(e)) if a < e)
        }),
    )
    .with_title("battery below")
}

fn batch(event_type: &str, payload: Option<Value>) -> EventBatch {
    let event = Event::new(event_type, Context::new());
    EventBatch::single(match payload {
        Some(payload) => event.with_payload(payload),
        None => event,
    })
}

fn prepare(
    children: Vec<Applet>,
    batch: &EventBatch,
    observer: Option<Arc<Recorder>>,
) -> (TaskRuntime, TaskContext) {
    let root = Applet::flow(Flow::root(children)).with_title("root");
    let task = Arc::new(Task::new(TaskMetadata::new("test"), root).unwrap());
    let mut runtime = TaskRuntime::obtain(
        task.clone(),
        Arc::new(EventScope::new()),
        CancelHandle::new(),
        batch,
    );
    runtime.set_observer(observer.map(|o| o as Arc<dyn Observer>));
    let ctx = TaskContext::new(task, batch);
    (runtime, ctx)
}

fn successful(runtime: &TaskRuntime) -> bool {
    runtime.result().map_or(false, AppletResult::is_successful)
}

// ============================================================================
// Control flow
// ============================================================================

#[tokio::test]
async fn test_branch_exclusivity() {
    let log = Log::default();
    let recorder = Arc::new(Recorder::default());
    let children = vec![
        flow(FlowKind::If, "g1", vec![fail("c1")]),
        flow(FlowKind::Do, "d1", vec![record("a1", &log, Value::Null)]),
        flow(FlowKind::ElseIf, "g2", vec![pass("c2")]),
        flow(FlowKind::Do, "d2", vec![record("a2", &log, Value::Null)]),
        flow(FlowKind::ElseIf, "g3", vec![pass("c3")]),
        flow(FlowKind::Do, "d3", vec![record("a3", &log, Value::Null)]),
        flow(FlowKind::Else, "e", vec![]),
        flow(FlowKind::Do, "d4", vec![record("a4", &log, Value::Null)]),
    ];
    let batch = batch(events::NEW_WINDOW, None);
    let (mut runtime, ctx) = prepare(children, &batch, Some(recorder.clone()));

    assert_eq!(runtime.run(&ctx).await.unwrap(), Outcome::Completed);
    assert!(successful(&runtime));
    assert_eq!(*log.lock(), vec!["a2:[]".to_string()]);

    assert!(recorder.saw("start g1"));
    assert!(recorder.saw("skip d1"));
    assert!(recorder.saw("start g2"));
    assert!(recorder.saw("end d2"));
    for skipped in ["g3", "d3", "e", "d4"] {
        assert!(recorder.saw(&format!("skip {skipped}")), "{skipped} not skipped");
        assert!(!recorder.saw(&format!("start {skipped}")), "{skipped} started");
    }
    // Children of skipped flows are never visited
    assert!(!recorder.saw("start c3"));
    assert!(!recorder.saw("skip c3"));
}

#[tokio::test]
async fn test_else_runs_when_nothing_matched() {
    let log = Log::default();
    let children = vec![
        flow(FlowKind::When, "g1", vec![fail("c1")]),
        flow(FlowKind::Do, "d1", vec![record("a1", &log, Value::Null)]),
        flow(FlowKind::Else, "e", vec![]),
        flow(FlowKind::Do, "d2", vec![record("a2", &log, Value::Null)]),
    ];
    let batch = batch(events::NEW_WINDOW, None);
    let (mut runtime, ctx) = prepare(children, &batch, None);

    runtime.run(&ctx).await.unwrap();
    assert_eq!(*log.lock(), vec!["a2:[]".to_string()]);
    assert!(successful(&runtime));
}

#[tokio::test]
async fn test_else_is_unconditional() {
    let log = Log::default();
    let recorder = Arc::new(Recorder::default());
    let children = vec![
        flow(FlowKind::If, "g1", vec![fail("c1")]),
        flow(FlowKind::Do, "d1", vec![]),
        flow(FlowKind::Else, "e", vec![fail("c2"), pass("c3")]),
        flow(FlowKind::Do, "d2", vec![record("else-do", &log, Value::Null)]),
    ];
    let batch = batch(events::NEW_WINDOW, None);
    let (mut runtime, ctx) = prepare(children, &batch, Some(recorder.clone()));

    runtime.run(&ctx).await.unwrap();
    assert_eq!(*log.lock(), vec!["else-do:[]".to_string()]);
    // Else children are not a conjunction
    assert!(recorder.saw("end c3"));
    assert!(successful(&runtime));
}

#[tokio::test]
async fn test_unmatched_chain_reports_failure() {
    let log = Log::default();
    let children = vec![
        flow(FlowKind::If, "g1", vec![fail("c1")]),
        flow(FlowKind::Do, "d1", vec![record("a1", &log, Value::Null)]),
    ];
    let batch = batch(events::NEW_WINDOW, None);
    let (mut runtime, ctx) = prepare(children, &batch, None);

    runtime.run(&ctx).await.unwrap();
    assert!(log.lock().is_empty());
    assert!(!successful(&runtime));
}

#[tokio::test]
async fn test_failing_do_does_not_fall_through() {
    let log = Log::default();
    let children = vec![
        flow(FlowKind::If, "g1", vec![pass("c1")]),
        flow(FlowKind::Do, "d1", vec![fail("c2")]),
        flow(FlowKind::Else, "e", vec![]),
        flow(FlowKind::Do, "d2", vec![record("a2", &log, Value::Null)]),
    ];
    let batch = batch(events::NEW_WINDOW, None);
    let (mut runtime, ctx) = prepare(children, &batch, None);

    runtime.run(&ctx).await.unwrap();
    assert!(log.lock().is_empty());
    assert!(!successful(&runtime));
}

#[tokio::test]
async fn test_guard_short_circuits() {
    let log = Log::default();
    let recorder = Arc::new(Recorder::default());
    let children = vec![
        flow(FlowKind::If, "g", vec![pass("c1"), fail("c2"), pass("c3")]),
        flow(FlowKind::Do, "d", vec![record("a", &log, Value::Null)]),
    ];
    let batch = batch(events::NEW_WINDOW, None);
    let (mut runtime, ctx) = prepare(children, &batch, Some(recorder.clone()));

    runtime.run(&ctx).await.unwrap();

    assert_eq!(
        recorder.calls(),
        vec![
            "start root", "start g", "start c1", "end c1", "start c2", "end c2", "skip c3",
            "end g", "skip d", "end root",
        ]
    );
    assert!(log.lock().is_empty());
    assert!(!successful(&runtime));
}

#[tokio::test]
async fn test_container_inherits_guard_mode() {
    let recorder = Arc::new(Recorder::default());
    let children = vec![flow(
        FlowKind::If,
        "g",
        vec![flow(FlowKind::Container, "group", vec![fail("c1"), pass("c2")])],
    )];
    let batch = batch(events::NEW_WINDOW, None);
    let (mut runtime, ctx) = prepare(children, &batch, Some(recorder.clone()));

    runtime.run(&ctx).await.unwrap();
    assert!(recorder.saw("skip c2"));
    assert!(!successful(&runtime));
}

#[tokio::test]
async fn test_root_continues_past_failure() {
    let recorder = Arc::new(Recorder::default());
    let batch = batch(events::NEW_WINDOW, None);
    let (mut runtime, ctx) = prepare(vec![fail("c1"), pass("c2")], &batch, Some(recorder.clone()));

    runtime.run(&ctx).await.unwrap();
    assert!(recorder.saw("end c1"));
    assert!(recorder.saw("end c2"));
    assert!(successful(&runtime));
}

#[tokio::test]
async fn test_orphan_do_is_skipped() {
    let log = Log::default();
    let recorder = Arc::new(Recorder::default());
    let children = vec![flow(FlowKind::Do, "d", vec![record("a", &log, Value::Null)])];
    let batch = batch(events::NEW_WINDOW, None);
    let (mut runtime, ctx) = prepare(children, &batch, Some(recorder.clone()));

    runtime.run(&ctx).await.unwrap();
    assert!(recorder.saw("skip d"));
    assert!(log.lock().is_empty());
    // Nothing evaluated: an empty root succeeds
    assert!(successful(&runtime));
}

#[tokio::test]
async fn test_inverted_criterion() {
    let batch = batch(events::NEW_WINDOW, None);
    let (mut runtime, ctx) = prepare(vec![fail("c").inverted()], &batch, None);

    runtime.run(&ctx).await.unwrap();
    assert!(successful(&runtime));
}

// ============================================================================
// References
// ============================================================================

#[tokio::test]
async fn test_reference_round_trip_through_tree() {
    let log = Log::default();
    let children = vec![
        record("produce", &log, json!("com.example")).publishes(0, "pkg"),
        record("consume", &log, Value::Null).refers(0, "pkg"),
        record("missing", &log, Value::Null).refers(0, "nope"),
    ];
    let batch = batch(events::NEW_WINDOW, None);
    let (mut runtime, ctx) = prepare(children, &batch, None);

    runtime.run(&ctx).await.unwrap();
    assert_eq!(
        *log.lock(),
        vec![
            "produce:[]".to_string(),
            r#"consume:["com.example"]"#.to_string(),
            "missing:[null]".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_unresolved_criterion_reference_fails() {
    let criterion = Applet::criterion(
        PACKAGE_IS,
        FnCriterion::field("package", |actual, expected| actual == expected),
    )
    .refers(0, "nope");
    let batch = batch(events::NEW_WINDOW, Some(json!({"package": "com.example"})));
    let container = Applet::flow(Flow::container(vec![criterion]).with_target(HitEventPayload));
    let (mut runtime, ctx) = prepare(vec![container], &batch, None);

    runtime.run(&ctx).await.unwrap();
    assert!(!successful(&runtime));
}

#[tokio::test]
async fn test_container_target_and_field_referents() {
    let log = Log::default();
    let criterion = Applet::criterion(
        PACKAGE_IS,
        FnCriterion::field("package", |actual, expected| actual == expected),
    )
    .with_value(json!("com.example"));
    let container = Applet::flow(
        Flow::container(vec![criterion])
            .with_target(HitEventPayload)
            .with_fields(["package", "activity"]),
    )
    .publishes(0, "pkg")
    .publishes(1, "activity");
    let children = vec![
        container,
        record("use", &log, Value::Null)
            .refers(0, "activity")
            .refers(1, "pkg"),
    ];
    let batch = batch(
        events::COMPONENT_CHANGED,
        Some(json!({"package": "com.example", "activity": ".Main"})),
    );
    let (mut runtime, ctx) = prepare(children, &batch, None);

    runtime.run(&ctx).await.unwrap();
    assert_eq!(*log.lock(), vec![r#"use:[".Main","com.example"]"#.to_string()]);
    // The container restores the outer target on exit
    assert!(runtime.target().is_none());
}

#[tokio::test]
async fn test_missing_target_skips_container() {
    let recorder = Arc::new(Recorder::default());
    let container = Applet::flow(Flow::container(vec![pass("c")]).with_target(HitEventPayload))
        .with_title("group");
    let batch = batch(events::NEW_WINDOW, None);
    let (mut runtime, ctx) = prepare(vec![container], &batch, Some(recorder.clone()));

    runtime.run(&ctx).await.unwrap();
    assert!(recorder.saw("skip c"));
    assert!(recorder.saw("end group"));
    assert!(!successful(&runtime));
}

// ============================================================================
// Battery example and fingerprints
// ============================================================================

fn battery_task(toasts: &Log) -> Vec<Applet> {
    let toasts = toasts.clone();
    let toast = Applet::action(
        SHOW_TOAST,
        FnAction::new(move |input| {
            let level = input.require_arg(0)?;
            toasts.lock().push(format!("Battery at {level}%"));
            Ok(Value::Null)
        }),
    )
    .refers(0, "battery_level");

    let guard = flow(
        FlowKind::If,
        "low battery",
        vec![battery_below()
            .with_value(json!(20))
            .publishes(0, "battery_level")],
    );
    let body = flow(FlowKind::Do, "notify", vec![toast]);
    vec![Applet::flow(
        Flow::container(vec![guard, body]).with_target(HitEventPayload),
    )]
}

#[tokio::test]
async fn test_battery_example() {
    let toasts = Log::default();
    let batch = batch(events::BATTERY_CHANGED, Some(json!({"level": 15})));
    let (mut runtime, ctx) = prepare(battery_task(&toasts), &batch, None);

    assert_eq!(runtime.run(&ctx).await.unwrap(), Outcome::Completed);
    assert!(successful(&runtime));
    assert_eq!(*toasts.lock(), vec!["Battery at 15%".to_string()]);

    // Target, declared value, matched value, then the action argument
    let (mut expected, _) = prepare(vec![], &batch, None);
    for value in [json!({"level": 15}), json!(20), json!(15), json!(15)] {
        expected.update_fingerprint(&value);
    }
    assert_eq!(runtime.fingerprint(), expected.fingerprint());
}

#[tokio::test]
async fn test_fingerprint_determinism() {
    async fn fingerprint_of(level: i64) -> u32 {
        let toasts = Log::default();
        let batch = batch(events::BATTERY_CHANGED, Some(json!({"level": level})));
        let (mut runtime, ctx) = prepare(battery_task(&toasts), &batch, None);
        runtime.run(&ctx).await.unwrap();
        runtime.fingerprint()
    }

    assert_eq!(fingerprint_of(15).await, fingerprint_of(15).await);
    assert_ne!(fingerprint_of(15).await, fingerprint_of(12).await);
}

// ============================================================================
// Suspension
// ============================================================================

fn waiting_task(log: &Log) -> Vec<Applet> {
    let wait = Applet::wait_for(
        WAIT_COMPONENT,
        WaitForSpec::new(events::COMPONENT_CHANGED)
            .with_filter(|e| e.field("package") == Some(&json!("com.target"))),
    )
    .with_title("wait")
    .publishes(0, "window");
    vec![
        record("produce", log, json!("com.a")).publishes(0, "pkg"),
        flow(
            FlowKind::Container,
            "group",
            vec![
                wait,
                record("after", log, Value::Null)
                    .refers(0, "pkg")
                    .refers(1, "window"),
            ],
        ),
    ]
}

#[tokio::test]
async fn test_suspend_and_resume_preserve_state() {
    let log = Log::default();
    let recorder = Arc::new(Recorder::default());
    let first = batch(events::NEW_WINDOW, None);
    let (mut runtime, ctx) = prepare(waiting_task(&log), &first, Some(recorder.clone()));

    assert_eq!(runtime.run(&ctx).await.unwrap(), Outcome::Suspended);
    assert!(runtime.is_suspending());
    assert!(runtime.waiting_for().is_some());
    assert_eq!(runtime.tracker().position(), vec![1, 0]);
    assert_eq!(*log.lock(), vec!["produce:[]".to_string()]);

    // A batch the wait does not accept leaves the runtime parked
    let other = batch(events::COMPONENT_CHANGED, Some(json!({"package": "com.other"})));
    let other_ctx = TaskContext::new(runtime.task().clone(), &other);
    assert!(runtime.trigger_wait_for(&other_ctx).await.unwrap().is_none());
    assert!(runtime.is_suspending());
    assert_eq!(runtime.tracker().position(), vec![1, 0]);

    let second = batch(events::COMPONENT_CHANGED, Some(json!({"package": "com.target"})));
    let second_ctx = TaskContext::new(runtime.task().clone(), &second);
    assert_eq!(
        runtime.trigger_wait_for(&second_ctx).await.unwrap(),
        Some(Outcome::Completed)
    );

    assert!(!runtime.is_suspending());
    assert!(runtime.waiting_for().is_none());
    assert_eq!(runtime.hit_event().event_type.as_str(), events::COMPONENT_CHANGED);
    assert_eq!(
        *log.lock(),
        vec![
            "produce:[]".to_string(),
            r#"after:["com.a",{"package":"com.target"}]"#.to_string(),
        ]
    );
    assert_eq!(recorder.count("start root"), 1);
    assert_eq!(recorder.count("start group"), 1);
    assert_eq!(recorder.count("start wait"), 1);
    assert_eq!(recorder.count("end wait"), 1);
    assert_eq!(recorder.count("end root"), 1);
    assert!(successful(&runtime));
}

#[tokio::test]
async fn test_wait_satisfied_by_current_batch() {
    let log = Log::default();
    let batch = batch(events::COMPONENT_CHANGED, Some(json!({"package": "com.target"})));
    let (mut runtime, ctx) = prepare(waiting_task(&log), &batch, None);

    assert_eq!(runtime.run(&ctx).await.unwrap(), Outcome::Completed);
    assert_eq!(log.lock().len(), 2);
}

#[tokio::test]
async fn test_trigger_without_pending_wait() {
    let batch = batch(events::NEW_WINDOW, None);
    let (mut runtime, ctx) = prepare(vec![pass("c")], &batch, None);
    assert!(runtime.trigger_wait_for(&ctx).await.unwrap().is_none());
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn test_cancelled_before_run() {
    let batch = batch(events::NEW_WINDOW, None);
    let (mut runtime, ctx) = prepare(vec![pass("c")], &batch, None);
    runtime.halt();

    let err = runtime.run(&ctx).await.unwrap_err();
    assert!(err.is_cancelled());
    runtime.recycle();
}

#[tokio::test]
async fn test_cancelled_between_children() {
    let log = Log::default();
    let handle = CancelHandle::new();
    let halting = handle.clone();
    let halt = Applet::action(
        RECORD,
        FnAction::new(move |_| {
            halting.cancel();
            Ok(Value::Null)
        }),
    );
    let root = Applet::flow(Flow::root(vec![halt, record("after", &log, Value::Null)]));
    let task = Arc::new(Task::new(TaskMetadata::new("halt"), root).unwrap());
    let batch = batch(events::NEW_WINDOW, None);
    let mut runtime =
        TaskRuntime::obtain(task.clone(), Arc::new(EventScope::new()), handle, &batch);
    let ctx = TaskContext::new(task, &batch);

    let err = runtime.run(&ctx).await.unwrap_err();
    assert!(matches!(err, EngineError::Cancelled));
    assert!(log.lock().is_empty());
    runtime.recycle();
}

#[tokio::test]
async fn test_cancelled_before_resume() {
    let log = Log::default();
    let first = batch(events::NEW_WINDOW, None);
    let (mut runtime, ctx) = prepare(waiting_task(&log), &first, None);
    assert_eq!(runtime.run(&ctx).await.unwrap(), Outcome::Suspended);

    runtime.halt();
    let second = batch(events::COMPONENT_CHANGED, Some(json!({"package": "com.target"})));
    let second_ctx = TaskContext::new(runtime.task().clone(), &second);
    assert!(matches!(
        runtime.trigger_wait_for(&second_ctx).await,
        Err(EngineError::Cancelled)
    ));
    assert_eq!(log.lock().len(), 1);
}

// ============================================================================
// Pooling and concurrency
// ============================================================================

#[tokio::test]
async fn test_recycle_hygiene() {
    let toasts = Log::default();
    let recorder = Arc::new(Recorder::default());
    let batch = batch(events::BATTERY_CHANGED, Some(json!({"level": 15})));
    let (mut runtime, ctx) = prepare(battery_task(&toasts), &batch, Some(recorder));
    runtime.run(&ctx).await.unwrap();
    assert!(runtime.result().is_some());
    runtime.recycle();

    let (fresh, _) = prepare(vec![], &batch, None);
    let consumer = Applet::action(SHOW_TOAST, FnAction::new(|_| Ok(Value::Null)))
        .refers(0, "battery_level");
    assert!(fresh.result().is_none());
    assert_eq!(fresh.fingerprint(), 0);
    assert!(fresh.observer().is_none());
    assert!(fresh.waiting_for().is_none());
    assert!(fresh.target().is_none());
    assert!(fresh.tracker().is_empty());
    assert!(fresh.is_successful());
    assert_eq!(fresh.get_referent_of(&consumer, 0), None);
}

#[tokio::test]
async fn test_concurrent_runtimes_share_tree() {
    let toasts = Log::default();
    let root = Applet::flow(Flow::root(battery_task(&toasts)));
    let task = Arc::new(Task::new(TaskMetadata::new("battery"), root).unwrap());
    let scope = Arc::new(EventScope::new());

    let mut handles = Vec::new();
    for level in 10..18 {
        let task = task.clone();
        let scope = scope.clone();
        handles.push(tokio::spawn(async move {
            let batch = batch(events::BATTERY_CHANGED, Some(json!({"level": level})));
            let mut runtime = TaskRuntime::obtain(task.clone(), scope, CancelHandle::new(), &batch);
            let ctx = TaskContext::new(task, &batch);
            let outcome = runtime.run(&ctx).await.unwrap();
            let fingerprint = runtime.fingerprint();
            runtime.recycle();
            (outcome, fingerprint)
        }));
    }

    let mut fingerprints = Vec::new();
    for handle in handles {
        let (outcome, fingerprint) = handle.await.unwrap();
        assert_eq!(outcome, Outcome::Completed);
        fingerprints.push(fingerprint);
    }
    fingerprints.sort_unstable();
    fingerprints.dedup();
    assert_eq!(fingerprints.len(), 8);
    assert_eq!(toasts.lock().len(), 8);
}
