//! Position tracking through the applet tree
//!
//! Every flow being evaluated owns one frame: the index of the child it is
//! on, the state of the branch chain among its children and the last child
//! result. Frames survive suspension so a resumed walk continues where it
//! stopped instead of re-evaluating finished siblings.

use serde_json::Value;
use std::sync::Arc;

use crate::applet::AppletResult;

/// State of the `If/When → ElseIf → Else → Do` chain among siblings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Chain {
    /// No chain open
    #[default]
    Idle,
    /// Every guard so far failed
    Unmatched,
    /// A guard matched; its `Do` is pending
    Matched,
    /// The matched `Do` ran; remaining members are skipped
    Done,
}

#[derive(Debug, Default)]
pub(crate) struct Frame {
    pub index: usize,
    pub chain: Chain,
    pub last: Option<AppletResult>,
    /// Target to restore on exit, when this flow selected its own
    pub saved_target: Option<Option<Arc<Value>>>,
}

/// Resumable cursor of one runtime
#[derive(Debug, Default)]
pub struct AppletIndexer {
    frames: Vec<Frame>,
    depth: usize,
    resuming: bool,
}

impl AppletIndexer {
    /// Enter a flow; returns its level and whether a saved frame was reused
    pub(crate) fn enter(&mut self) -> (usize, bool) {
        let level = self.depth;
        self.depth += 1;
        if self.resuming && level < self.frames.len() {
            return (level, true);
        }
        self.resuming = false;
        self.frames.truncate(level);
        self.frames.push(Frame::default());
        (level, false)
    }

    /// Leave a finished flow, dropping its frame
    pub(crate) fn exit(&mut self, level: usize) -> Frame {
        let frame = self.frames.drain(level..).next().unwrap_or_default();
        self.depth = level;
        frame
    }

    /// Leave a flow whose walk suspended, keeping its frame
    pub(crate) fn unwind(&mut self, level: usize) {
        self.depth = level;
    }

    pub(crate) fn frame(&self, level: usize) -> &Frame {
        &self.frames[level]
    }

    pub(crate) fn frame_mut(&mut self, level: usize) -> &mut Frame {
        &mut self.frames[level]
    }

    /// Prepare to walk the saved frames again from the root
    pub(crate) fn begin_resume(&mut self) {
        self.depth = 0;
        self.resuming = !self.frames.is_empty();
    }

    /// Consume the resuming flag; true for the leaf the walk stopped at
    pub(crate) fn take_resuming(&mut self) -> bool {
        std::mem::take(&mut self.resuming)
    }

    /// Set while a resumed walk re-enters its saved frames
    pub fn is_resuming(&self) -> bool {
        self.resuming
    }

    /// Child index per ancestor flow, outermost first
    pub fn position(&self) -> Vec<usize> {
        self.frames.iter().map(|frame| frame.index).collect()
    }

    /// Number of saved frames
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Forget every frame
    pub fn reset(&mut self) {
        self.frames.clear();
        self.depth = 0;
        self.resuming = false;
    }
}
