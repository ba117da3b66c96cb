//! Target selection for container flows

use serde_json::Value;

use crate::runtime::TaskContext;

/// Derives the object a container's children evaluate against
pub trait TargetSelector: Send + Sync {
    /// `None` means the target is unavailable for this batch
    fn select(&self, ctx: &TaskContext) -> Option<Value>;
}

/// Selects the payload of the batch's hit event
#[derive(Debug, Clone, Copy, Default)]
pub struct HitEventPayload;

impl TargetSelector for HitEventPayload {
    fn select(&self, ctx: &TaskContext) -> Option<Value> {
        ctx.hit_event().payload.clone()
    }
}

impl<F> TargetSelector for F
where
    F: Fn(&TaskContext) -> Option<Value> + Send + Sync,
{
    fn select(&self, ctx: &TaskContext) -> Option<Value> {
        self(ctx)
    }
}
