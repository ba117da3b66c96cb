//! Compiled tasks

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::applet::{Applet, FlowKind};
use crate::error::{EngineError, EngineResult};

fn default_enabled() -> bool {
    true
}

/// Descriptive data carried alongside a compiled tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMetadata {
    pub title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Checksum of the persisted description the tree was compiled from
    #[serde(default)]
    pub checksum: u32,

    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl TaskMetadata {
    /// Enabled task titled `title`
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: None,
            checksum: 0,
            enabled: true,
        }
    }

    /// Attach a free-form description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Record the checksum of the task source
    pub fn with_checksum(mut self, checksum: u32) -> Self {
        self.checksum = checksum;
        self
    }

    /// Mark the task as disabled
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// An immutable applet tree ready to be evaluated
#[derive(Debug)]
pub struct Task {
    metadata: TaskMetadata,
    flow: Arc<Applet>,
}

impl Task {
    /// Wrap a compiled tree; the top applet must be the only root flow
    pub fn new(metadata: TaskMetadata, root: Applet) -> EngineResult<Self> {
        match root.flow_kind() {
            Some(FlowKind::Root) => {}
            Some(kind) => {
                return Err(EngineError::InvalidTree(format!(
                    "top-level flow is `{kind}`, expected `root`"
                )))
            }
            None => {
                return Err(EngineError::InvalidTree(
                    "top-level applet is not a flow".to_string(),
                ))
            }
        }
        if let Some(flow) = root.as_flow() {
            for child in flow.children() {
                reject_nested_root(child)?;
            }
        }
        Ok(Self {
            metadata,
            flow: Arc::new(root),
        })
    }

    /// Title, checksum and enabled flag
    pub fn metadata(&self) -> &TaskMetadata {
        &self.metadata
    }

    /// Title from the metadata
    pub fn title(&self) -> &str {
        &self.metadata.title
    }

    /// Whether dispatchers should run this task
    pub fn is_enabled(&self) -> bool {
        self.metadata.enabled
    }

    /// The root flow
    pub fn flow(&self) -> &Arc<Applet> {
        &self.flow
    }
}

fn reject_nested_root(applet: &Applet) -> EngineResult<()> {
    let Some(flow) = applet.as_flow() else {
        return Ok(());
    };
    if flow.kind() == FlowKind::Root {
        return Err(EngineError::InvalidTree(
            "root flow nested below the top level".to_string(),
        ));
    }
    flow.children()
        .iter()
        .try_for_each(|child| reject_nested_root(child))
}
