//! Core types for the tasker engine
//!
//! This crate provides the event model shared by the engine and its
//! dispatcher: Event, EventType, EventBatch and Context.

mod batch;
mod context;
mod event;

pub use batch::EventBatch;
pub use context::Context;
pub use event::{Event, EventType};

/// Well-known event types produced by the environment event source
pub mod events {
    /// The foreground component (package/activity) changed
    pub const COMPONENT_CHANGED: &str = "component_changed";

    /// Content of the current window changed
    pub const CONTENT_CHANGED: &str = "content_changed";

    /// A new window appeared
    pub const NEW_WINDOW: &str = "new_window";

    /// A notification was posted
    pub const NOTIFICATION_RECEIVED: &str = "notification_received";

    /// The primary clip changed
    pub const PRIMARY_CLIP_CHANGED: &str = "primary_clip_changed";

    /// Battery level or charging state changed
    pub const BATTERY_CHANGED: &str = "battery_changed";

    /// Periodic clock tick
    pub const TIME_CHANGED: &str = "time_changed";
}
