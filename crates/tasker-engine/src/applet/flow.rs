//! Composite applets

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use super::target::TargetSelector;
use super::Applet;

/// Control-flow kind of a [`Flow`]
///
/// Branch chains are laid out as siblings inside their parent:
/// `If, Do, ElseIf, Do, Else, Do`, with `When` usable in place of `If`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowKind {
    /// Top-level sequential container
    Root,
    /// Sequential grouping of applets sharing a target
    Container,
    /// Opens a chain; evaluated exactly like `If`, kept as a separate tag
    /// for trigger-style tasks
    When,
    /// Opens a chain; children form a short-circuit conjunction
    If,
    /// Continues an unmatched chain with another guard
    ElseIf,
    /// Catch-all of an unmatched chain: its `Do` runs whatever the
    /// children return
    Else,
    /// Block run when the preceding guard matched
    Do,
    /// Category placeholder, evaluated like a container
    Phantom,
}

impl FlowKind {
    /// Guards run their children as a short-circuit conjunction
    pub fn is_guard(self) -> bool {
        matches!(self, FlowKind::When | FlowKind::If | FlowKind::ElseIf)
    }

    /// Decides which `Do` of a chain runs
    pub fn steers_chain(self) -> bool {
        self.is_guard() || self == FlowKind::Else
    }

    /// Only meaningful right after another chain member
    pub fn continues_chain(self) -> bool {
        matches!(self, FlowKind::ElseIf | FlowKind::Else | FlowKind::Do)
    }

    /// Evaluated in the mode of the enclosing flow
    pub fn is_transparent(self) -> bool {
        matches!(self, FlowKind::Container | FlowKind::Phantom)
    }
}

impl fmt::Display for FlowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FlowKind::Root => "root",
            FlowKind::Container => "container",
            FlowKind::When => "when",
            FlowKind::If => "if",
            FlowKind::ElseIf => "else_if",
            FlowKind::Else => "else",
            FlowKind::Do => "do",
            FlowKind::Phantom => "phantom",
        };
        f.write_str(name)
    }
}

/// An ordered list of child applets plus a control-flow kind
#[derive(Clone)]
pub struct Flow {
    kind: FlowKind,
    children: Vec<Arc<Applet>>,
    target: Option<Arc<dyn TargetSelector>>,
    /// Field names exposed by index when the selected target is published
    fields: Option<Arc<[String]>>,
}

impl Flow {
    /// Flow of `kind` owning `children`
    pub fn new(kind: FlowKind, children: Vec<Applet>) -> Self {
        Self {
            kind,
            children: children.into_iter().map(Arc::new).collect(),
            target: None,
            fields: None,
        }
    }

    /// Top-level flow of a task
    pub fn root(children: Vec<Applet>) -> Self {
        Self::new(FlowKind::Root, children)
    }

    /// Plain sequential grouping
    pub fn container(children: Vec<Applet>) -> Self {
        Self::new(FlowKind::Container, children)
    }

    /// Derive the target of the children from the task context
    pub fn with_target(mut self, selector: impl TargetSelector + 'static) -> Self {
        self.target = Some(Arc::new(selector));
        self
    }

    /// Publish the selected target field by field: slot `i` of the flow's
    /// result is the target's `fields[i]`
    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Control-flow kind
    pub fn kind(&self) -> FlowKind {
        self.kind
    }

    /// Children in evaluation order
    pub fn children(&self) -> &[Arc<Applet>] {
        &self.children
    }

    /// Selector deriving the children's target, if any
    pub fn target(&self) -> Option<&Arc<dyn TargetSelector>> {
        self.target.as_ref()
    }

    /// Field names published by index, see [`Flow::with_fields`]
    pub fn fields(&self) -> Option<&Arc<[String]>> {
        self.fields.as_ref()
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

impl fmt::Debug for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Flow")
            .field("kind", &self.kind)
            .field("children", &self.children)
            .field("has_target", &self.target.is_some())
            .finish()
    }
}
