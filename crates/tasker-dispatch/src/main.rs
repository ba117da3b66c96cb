//! Tasker demo binary
//!
//! Registers a couple of sample tasks and feeds them a scripted stream of
//! environment events. Pass a YAML engine configuration as the first
//! argument to override the defaults.

use anyhow::Result;
use serde_json::{json, Value};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use tasker_config::{load_config, EngineConfig};
use tasker_core::{events, Context, Event, EventBatch};
use tasker_dispatch::Dispatcher;
use tasker_engine::{
    Applet, AppletId, Flow, FlowKind, FnAction, FnCriterion, HitEventPayload, TaskMetadata,
    WaitForSpec,
};

const BATTERY_BELOW: AppletId = AppletId::new(0x20, 0x0101);
const PACKAGE_IS: AppletId = AppletId::new(0x10, 0x0001);
const SHOW_TOAST: AppletId = AppletId::new(0x50, 0x0001);
const WAIT_WINDOW: AppletId = AppletId::new(0x60, 0x0001);

fn low_battery() -> Applet {
    let check = Applet::criterion(
        BATTERY_BELOW,
        FnCriterion::field("level", |actual, expected| {
            matches!((actual.as_i64(), expected.as_i64()), (Some(a), Some(e)) if a < e)
        }),
    )
    .with_title("battery below")
    .with_value(json!(20))
    .publishes(0, "battery_level");

    let toast = Applet::action(
        SHOW_TOAST,
        FnAction::new(|input| {
            let level = input.require_arg(0)?;
            info!("Toast: battery at {level}%");
            Ok(Value::Null)
        }),
    )
    .with_title("show toast")
    .refers(0, "battery_level");

    Applet::flow(Flow::root(vec![Applet::flow(
        Flow::container(vec![
            Applet::flow_of(FlowKind::If, vec![check]),
            Applet::flow_of(FlowKind::Do, vec![toast]),
        ])
        .with_target(HitEventPayload),
    )]))
}

fn launcher_then_window() -> Applet {
    let in_launcher = Applet::criterion(
        PACKAGE_IS,
        FnCriterion::field("package", |actual, expected| actual == expected),
    )
    .with_title("package is")
    .with_value(json!("com.example.launcher"));

    let wait = Applet::wait_for(WAIT_WINDOW, WaitForSpec::new(events::NEW_WINDOW))
        .with_title("wait for window")
        .publishes(0, "window");

    let announce = Applet::action(
        SHOW_TOAST,
        FnAction::new(|input| {
            let window = input.require_arg(0)?;
            info!("Toast: window opened {window}");
            Ok(Value::Null)
        }),
    )
    .with_title("announce window")
    .refers(0, "window");

    Applet::flow(Flow::root(vec![
        Applet::flow_of(
            FlowKind::When,
            vec![Applet::flow(
                Flow::container(vec![in_launcher]).with_target(HitEventPayload),
            )],
        ),
        Applet::flow_of(FlowKind::Do, vec![wait, announce]),
    ]))
}

fn event(event_type: &str, payload: Value) -> EventBatch {
    EventBatch::single(Event::new(event_type, Context::new()).with_payload(payload))
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => load_config(path)?,
        None => EngineConfig::default(),
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting tasker");

    let dispatcher = Dispatcher::new(&config);
    dispatcher.register_tree(TaskMetadata::new("Low battery"), low_battery())?;
    dispatcher.register_tree(TaskMetadata::new("Launcher window"), launcher_then_window())?;

    let script = [
        event(events::BATTERY_CHANGED, json!({"level": 40})),
        event(events::BATTERY_CHANGED, json!({"level": 15})),
        event(events::BATTERY_CHANGED, json!({"level": 15})),
        event(
            events::COMPONENT_CHANGED,
            json!({"package": "com.example.launcher", "activity": ".Home"}),
        ),
        event(events::NEW_WINDOW, json!({"title": "Settings"})),
    ];

    for batch in &script {
        let report = dispatcher.dispatch(batch).await;
        info!(
            event = %batch.hit_event().event_type,
            report = %serde_json::to_string(&report)?,
            "Dispatched"
        );
    }

    let released = dispatcher.halt_all();
    let drained = tasker_engine::drain_pools();
    info!(released, drained, "Shutting down");

    Ok(())
}
