//! Tree walking
//!
//! Flows evaluate their children depth-first. Branch chains are laid out as
//! siblings (`If, Do, ElseIf, Do, Else, Do`) and tracked per flow by the
//! runtime's indexer, which also lets a suspended walk resume at the wait
//! applet it stopped at.

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::applet::{
    Action, ActionInput, Applet, AppletKind, AppletResult, Criterion, CriterionInput,
    FieldReferent, Flow, FlowKind, Referent, WaitForSpec,
};
use crate::error::EngineResult;
use crate::runtime::indexer::Chain;
use crate::runtime::{TaskContext, TaskRuntime, WaitFor};

/// How a walk ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The applet terminated; its result is the runtime's current result
    Completed,
    /// A wait applet is pending; the runtime must be parked, not recycled
    Suspended,
}

/// How a flow treats a failing child
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Keep going; the flow reports its last child
    Aggregate,
    /// Stop at the first failure
    Guard,
}

enum Step {
    Done(AppletResult),
    Suspended,
}

/// Evaluate `applet` and register its result with `runtime`
///
/// A suspended walk keeps its position; call
/// [`TaskRuntime::trigger_wait_for`] with a later batch to continue it.
pub async fn evaluate(
    applet: &Arc<Applet>,
    runtime: &mut TaskRuntime,
    ctx: &TaskContext,
) -> EngineResult<Outcome> {
    visit(applet, runtime, ctx, Mode::Aggregate).await
}

impl TaskRuntime {
    /// Walk the task's root flow against the runtime's batch
    pub async fn run(&mut self, ctx: &TaskContext) -> EngineResult<Outcome> {
        self.ensure_active()?;
        let root = self.task().flow().clone();
        debug!(task = %self.task().title(), events = self.events().len(), "Running task");

        let outcome = visit(&root, self, ctx, Mode::Aggregate).await?;
        log_outcome(self, outcome);
        Ok(outcome)
    }

    /// Resume a suspended walk with the batch of `ctx`
    ///
    /// Returns `None`, leaving the runtime untouched, when nothing is pending
    /// or the batch holds no event the pending wait accepts.
    pub async fn trigger_wait_for(&mut self, ctx: &TaskContext) -> EngineResult<Option<Outcome>> {
        let qualifies = match self.waiting_for() {
            Some(waiting_for) => waiting_for.qualifies(ctx.events()),
            None => return Ok(None),
        };
        if !qualifies {
            return Ok(None);
        }
        self.ensure_active()?;

        debug!(
            task = %self.task().title(),
            position = ?self.tracker().position(),
            "Resuming task"
        );
        self.replace_events(ctx.events().clone(), ctx.hit_index());
        self.set_suspending(false);
        self.tracker_mut().begin_resume();

        let root = self.task().flow().clone();
        let outcome = visit(&root, self, ctx, Mode::Aggregate).await?;
        log_outcome(self, outcome);
        Ok(Some(outcome))
    }
}

fn log_outcome(runtime: &TaskRuntime, outcome: Outcome) {
    match outcome {
        Outcome::Completed => debug!(
            task = %runtime.task().title(),
            successful = runtime.is_successful(),
            fingerprint = runtime.fingerprint(),
            "Task completed"
        ),
        Outcome::Suspended => debug!(
            task = %runtime.task().title(),
            position = ?runtime.tracker().position(),
            "Task suspended"
        ),
    }
}

fn notify_started(applet: &Applet, runtime: &TaskRuntime) {
    if let Some(observer) = runtime.observer() {
        observer.on_applet_started(applet, runtime);
    }
}

fn notify_terminated(applet: &Applet, runtime: &TaskRuntime) {
    if let Some(observer) = runtime.observer() {
        observer.on_applet_terminated(applet, runtime);
    }
}

fn notify_skipped(applet: &Applet, runtime: &TaskRuntime) {
    if let Some(observer) = runtime.observer() {
        observer.on_applet_skipped(applet, runtime);
    }
}

fn visit<'a>(
    applet: &'a Arc<Applet>,
    runtime: &'a mut TaskRuntime,
    ctx: &'a TaskContext,
    mode: Mode,
) -> BoxFuture<'a, EngineResult<Outcome>> {
    async move {
        // Applets on the resume path already fired `on_applet_started`
        if !runtime.tracker().is_resuming() {
            runtime.set_current_applet(applet);
            notify_started(applet, runtime);
        }

        let step = match applet.kind() {
            AppletKind::Flow(flow) => evaluate_flow(applet, flow, runtime, ctx, mode).await?,
            AppletKind::Criterion(criterion) => {
                enter_leaf(applet, runtime);
                Step::Done(evaluate_criterion(applet, criterion.as_ref(), runtime, ctx))
            }
            AppletKind::Action(action) => {
                enter_leaf(applet, runtime);
                Step::Done(evaluate_action(applet, action.as_ref(), runtime, ctx).await)
            }
            AppletKind::WaitFor(spec) => {
                enter_leaf(applet, runtime);
                evaluate_wait_for(applet, spec, runtime)
            }
        };

        match step {
            Step::Done(result) => {
                trace!(
                    applet = %applet.display_name(),
                    successful = result.is_successful(),
                    "Applet terminated"
                );
                runtime.register_result(applet, result);
                notify_terminated(applet, runtime);
                Ok(Outcome::Completed)
            }
            Step::Suspended => Ok(Outcome::Suspended),
        }
    }
    .boxed()
}

/// A leaf ends the resume path
fn enter_leaf(applet: &Arc<Applet>, runtime: &mut TaskRuntime) {
    runtime.tracker_mut().take_resuming();
    runtime.set_current_applet(applet);
}

fn evaluate_criterion(
    applet: &Applet,
    criterion: &dyn Criterion,
    runtime: &mut TaskRuntime,
    ctx: &TaskContext,
) -> AppletResult {
    let resolved;
    let expected = if applet.references().contains_key(&0) {
        match runtime.get_referent_of(applet, 0) {
            Some(value) => {
                resolved = value;
                Some(&resolved)
            }
            None => {
                trace!(applet = %applet.display_name(), "Unresolved reference");
                return AppletResult::EMPTY_FAILURE;
            }
        }
    } else {
        applet.value()
    };
    if let Some(expected) = expected {
        runtime.update_fingerprint(expected);
    }

    let target = runtime.target().cloned();
    let input = CriterionInput {
        applet,
        target: target.as_deref(),
        expected,
        context: ctx,
    };
    match criterion.check(&input) {
        Ok(checked) => {
            runtime.update_fingerprint(&checked.actual);
            if checked.matched != applet.is_inverted() {
                AppletResult::succeeded(checked.actual)
            } else {
                AppletResult::failed(checked.actual)
            }
        }
        Err(cause) => {
            debug!(applet = %applet.display_name(), error = %cause, "Criterion failed");
            AppletResult::error(cause)
        }
    }
}

async fn evaluate_action(
    applet: &Applet,
    action: &dyn Action,
    runtime: &mut TaskRuntime,
    ctx: &TaskContext,
) -> AppletResult {
    let args = runtime.get_all_referents_of(applet);
    for arg in args.iter().flatten() {
        runtime.update_fingerprint(arg);
    }

    let target = runtime.target().cloned();
    let input = ActionInput {
        applet,
        args: &args,
        value: applet.value(),
        target: target.as_deref(),
        context: ctx,
    };
    match action.execute(input).await {
        Ok(returned) => AppletResult::succeeded(returned),
        Err(cause) => {
            debug!(applet = %applet.display_name(), error = %cause, "Action failed");
            AppletResult::error(cause)
        }
    }
}

fn evaluate_wait_for(applet: &Arc<Applet>, spec: &WaitForSpec, runtime: &mut TaskRuntime) -> Step {
    let events = runtime.events().clone();
    match spec.find(&events) {
        Some(event) => {
            runtime.set_waiting_for(None);
            runtime.set_suspending(false);
            let payload = event.payload.clone().unwrap_or(Value::Null);
            runtime.update_fingerprint(&payload);
            Step::Done(AppletResult::succeeded(payload))
        }
        None => {
            debug!(
                applet = %applet.display_name(),
                event_type = %spec.event_type(),
                "Waiting for event"
            );
            runtime.set_waiting_for(Some(WaitFor::new(applet.clone())));
            runtime.set_suspending(true);
            Step::Suspended
        }
    }
}

/// What to do with the next child of a flow
enum Visit {
    Evaluate,
    Skip,
    Orphan,
}

fn plan(kind: Option<FlowKind>, chain: Chain) -> Visit {
    match kind {
        Some(kind) if kind.continues_chain() && chain == Chain::Idle => Visit::Orphan,
        Some(FlowKind::ElseIf | FlowKind::Else) if chain != Chain::Unmatched => Visit::Skip,
        Some(FlowKind::Do) if chain != Chain::Matched => Visit::Skip,
        _ => Visit::Evaluate,
    }
}

fn advance(kind: Option<FlowKind>, successful: bool) -> Chain {
    match kind {
        Some(kind) if kind.is_guard() => {
            if successful {
                Chain::Matched
            } else {
                Chain::Unmatched
            }
        }
        Some(FlowKind::Else) => Chain::Matched,
        Some(FlowKind::Do) => Chain::Done,
        _ => Chain::Idle,
    }
}

fn skip_remaining(children: &[Arc<Applet>], from: usize, runtime: &TaskRuntime) {
    for child in children.iter().skip(from) {
        notify_skipped(child, runtime);
    }
}

async fn evaluate_flow(
    applet: &Arc<Applet>,
    flow: &Flow,
    runtime: &mut TaskRuntime,
    ctx: &TaskContext,
    mode: Mode,
) -> EngineResult<Step> {
    let mode = match flow.kind() {
        kind if kind.is_guard() => Mode::Guard,
        kind if kind.is_transparent() => mode,
        _ => Mode::Aggregate,
    };
    let children = flow.children();
    let (level, reused) = runtime.tracker_mut().enter();

    if !reused {
        if let Some(selector) = flow.target() {
            match selector.select(ctx) {
                Some(target) => {
                    runtime.update_fingerprint(&target);
                    let saved = runtime.replace_target(Some(Arc::new(target)));
                    runtime.tracker_mut().frame_mut(level).saved_target = Some(saved);
                }
                None => {
                    debug!(flow = %applet.display_name(), "Target unavailable, skipping flow");
                    skip_remaining(children, 0, runtime);
                    runtime.tracker_mut().exit(level);
                    return Ok(Step::Done(AppletResult::EMPTY_FAILURE));
                }
            }
        }
    }

    loop {
        let index = runtime.tracker().frame(level).index;
        let Some(child) = children.get(index) else {
            break;
        };
        runtime.ensure_active()?;

        let kind = child.flow_kind();
        let chain = runtime.tracker().frame(level).chain;
        let resuming = runtime.tracker().is_resuming();
        let visit_plan = if resuming {
            Visit::Evaluate
        } else {
            plan(kind, chain)
        };

        match visit_plan {
            Visit::Evaluate => {}
            Visit::Skip => {
                notify_skipped(child, runtime);
                runtime.tracker_mut().frame_mut(level).index += 1;
                continue;
            }
            Visit::Orphan => {
                warn!(
                    flow = %applet.display_name(),
                    index,
                    kind = ?kind,
                    "Chain member without an open chain, skipping"
                );
                notify_skipped(child, runtime);
                let frame = runtime.tracker_mut().frame_mut(level);
                frame.index += 1;
                frame.chain = Chain::Idle;
                continue;
            }
        }

        runtime.set_current_flow(applet);
        if visit(child, runtime, ctx, mode).await? == Outcome::Suspended {
            runtime.tracker_mut().unwind(level);
            return Ok(Step::Suspended);
        }

        let result = runtime.take_result().unwrap_or(AppletResult::EMPTY_SUCCESS);
        let successful = result.is_successful();
        let frame = runtime.tracker_mut().frame_mut(level);
        frame.last = Some(result);
        frame.chain = advance(kind, successful);
        frame.index += 1;

        // A failing chain guard only steers its chain
        let steers_chain = kind.map_or(false, FlowKind::steers_chain);
        if mode == Mode::Guard && !successful && !steers_chain {
            trace!(flow = %applet.display_name(), index, "Guard short-circuited");
            skip_remaining(children, index + 1, runtime);
            break;
        }
    }

    let mut frame = runtime.tracker_mut().exit(level);
    let last = frame.last.take();
    let Some(saved) = frame.saved_target.take() else {
        return Ok(Step::Done(last.unwrap_or(AppletResult::EMPTY_SUCCESS)));
    };

    let selected = runtime.replace_target(saved);
    let successful = last.as_ref().map_or(true, AppletResult::is_successful);
    match selected {
        Some(target) if successful => {
            drop(last);
            let published: Arc<dyn Referent> = match flow.fields() {
                Some(fields) => Arc::new(FieldReferent::new(target, fields.clone())),
                None => target,
            };
            Ok(Step::Done(AppletResult::succeeded_with(published)))
        }
        _ => Ok(Step::Done(last.unwrap_or(AppletResult::EMPTY_SUCCESS))),
    }
}
