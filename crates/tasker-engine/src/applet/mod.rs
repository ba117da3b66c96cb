//! Applet tree
//!
//! An applet is one evaluable node of a compiled task. Leaves are criteria,
//! actions and waits; flows group children under control-flow semantics.
//! Applets hold no run state, so one tree can be walked by many runtimes at
//! the same time.

pub mod action;
pub mod criterion;
pub mod flow;
pub mod referent;
pub mod result;
pub mod target;
pub mod wait_for;

pub use action::{Action, ActionInput, FnAction};
pub use criterion::{
    Checked, Criterion, CriterionInput, FnCriterion, PatternCriterion, PropertyCriterion,
};
pub use flow::{Flow, FlowKind};
pub use referent::{FieldReferent, Referent};
pub use result::AppletResult;
pub use target::{HitEventPayload, TargetSelector};
pub use wait_for::WaitForSpec;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Stable numeric identity of an applet
///
/// The high 16 bits name the option registry the applet came from, the low
/// 16 bits its category inside that registry. Applets built from the same
/// option share an id, and with it their cached arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AppletId(u32);

impl AppletId {
    /// Id used by flows that do not come from an option registry
    pub const NONE: AppletId = AppletId(u32::MAX);

    /// Id of `category` within option registry `registry`
    pub const fn new(registry: u16, category: u16) -> Self {
        Self(((registry as u32) << 16) | category as u32)
    }

    /// Id from its packed form
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Packed form: registry in the high 16 bits
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Option registry the applet belongs to
    pub const fn registry_id(self) -> u16 {
        (self.0 >> 16) as u16
    }

    /// Applet category within its registry
    pub const fn category(self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }
}

impl fmt::Display for AppletId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}:{:#06x}", self.registry_id(), self.category())
    }
}

/// What an applet does when evaluated
#[derive(Clone)]
pub enum AppletKind {
    /// Checks the current target against a declared value
    Criterion(Arc<dyn Criterion>),

    /// Performs a side effect
    Action(Arc<dyn Action>),

    /// Holds the runtime open until a qualifying event arrives
    WaitFor(WaitForSpec),

    /// Groups children under control-flow semantics
    Flow(Flow),
}

impl fmt::Debug for AppletKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppletKind::Criterion(_) => f.write_str("Criterion"),
            AppletKind::Action(_) => f.write_str("Action"),
            AppletKind::WaitFor(spec) => f.debug_tuple("WaitFor").field(spec).finish(),
            AppletKind::Flow(flow) => fmt::Debug::fmt(flow, f),
        }
    }
}

/// A single node of a compiled task
#[derive(Debug, Clone)]
pub struct Applet {
    id: AppletId,
    title: Option<String>,
    value: Option<Value>,
    /// Argument slot → referent name this applet consumes
    references: BTreeMap<usize, String>,
    /// Result slot → referent name this applet publishes on success
    referents: BTreeMap<usize, String>,
    inverted: bool,
    kind: AppletKind,
}

impl Applet {
    fn with_kind(id: AppletId, kind: AppletKind) -> Self {
        Self {
            id,
            title: None,
            value: None,
            references: BTreeMap::new(),
            referents: BTreeMap::new(),
            inverted: false,
            kind,
        }
    }

    /// Create a criterion leaf
    pub fn criterion(id: AppletId, criterion: impl Criterion + 'static) -> Self {
        Self::with_kind(id, AppletKind::Criterion(Arc::new(criterion)))
    }

    /// Create an action leaf
    pub fn action(id: AppletId, action: impl Action + 'static) -> Self {
        Self::with_kind(id, AppletKind::Action(Arc::new(action)))
    }

    /// Create a wait leaf
    pub fn wait_for(id: AppletId, spec: WaitForSpec) -> Self {
        Self::with_kind(id, AppletKind::WaitFor(spec))
    }

    /// Create a flow node
    pub fn flow(flow: Flow) -> Self {
        Self::with_kind(AppletId::NONE, AppletKind::Flow(flow))
    }

    /// Shorthand for a flow of `kind` over `children`
    pub fn flow_of(kind: FlowKind, children: Vec<Applet>) -> Self {
        Self::flow(Flow::new(kind, children))
    }

    /// Set the id (flows default to [`AppletId::NONE`])
    pub fn with_id(mut self, id: AppletId) -> Self {
        self.id = id;
        self
    }

    /// Human readable title used in traces
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Set the literal value
    pub fn with_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }

    /// Consume the referent `name` in argument slot `slot`
    pub fn refers(mut self, slot: usize, name: impl Into<String>) -> Self {
        self.references.insert(slot, name.into());
        self
    }

    /// Publish result slot `slot` under `name`
    pub fn publishes(mut self, slot: usize, name: impl Into<String>) -> Self {
        self.referents.insert(slot, name.into());
        self
    }

    /// Negate the match outcome of a criterion
    pub fn inverted(mut self) -> Self {
        self.inverted = true;
        self
    }

    /// Registry and category of this applet
    pub fn id(&self) -> AppletId {
        self.id
    }

    /// Human readable label, if any
    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    /// Declared literal value
    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    /// Argument slots resolved from referents, by slot
    pub fn references(&self) -> &BTreeMap<usize, String> {
        &self.references
    }

    /// Names this applet publishes its result under, by slot
    pub fn referents(&self) -> &BTreeMap<usize, String> {
        &self.referents
    }

    /// Whether a criterion outcome is negated
    pub fn is_inverted(&self) -> bool {
        self.inverted
    }

    /// Executor or flow behind this applet
    pub fn kind(&self) -> &AppletKind {
        &self.kind
    }

    /// The flow, if this applet is one
    pub fn as_flow(&self) -> Option<&Flow> {
        match &self.kind {
            AppletKind::Flow(flow) => Some(flow),
            _ => None,
        }
    }

    /// Control-flow kind, if this applet is a flow
    pub fn flow_kind(&self) -> Option<FlowKind> {
        self.as_flow().map(Flow::kind)
    }

    /// Number of argument slots, covering every declared reference
    pub fn arity(&self) -> usize {
        self.references
            .keys()
            .next_back()
            .map(|last| last + 1)
            .unwrap_or(0)
    }

    /// Title if set, otherwise the id
    pub fn display_name(&self) -> String {
        match &self.title {
            Some(title) => title.clone(),
            None => self.id.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_applet_id_layout() {
        let id = AppletId::new(0x13, 0x0011);
        assert_eq!(id.registry_id(), 0x13);
        assert_eq!(id.category(), 0x0011);
        assert_eq!(id.raw(), 0x0013_0011);
        assert_eq!(AppletId::from_raw(0x0013_0011), id);
    }

    #[test]
    fn test_arity_covers_highest_slot() {
        let applet = Applet::action(AppletId::new(0x50, 1), FnAction::new(|_| Ok(Value::Null)))
            .refers(0, "text")
            .refers(2, "delay");
        assert_eq!(applet.arity(), 3);
    }
}
