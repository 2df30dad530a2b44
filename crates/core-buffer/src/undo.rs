//! Undo versioning: snapshots, the per-buffer stacks, and the
//! line-version slot.
//!
//! A snapshot captures the complete restorable state of a buffer — a
//! duplicate of its text store plus the counters — together with the
//! offset of every mark alive in the buffer at capture time. The ledger
//! keeps two most-recent-last stacks (undo, redo) and at most one
//! line-version snapshot, taken at the first edit to a line and replaced
//! whenever editing moves to a different line. Stack traversal and
//! restoration live on `BufferStore`, which owns the mark registry the
//! restore step needs.

use core_text::TextStore;
use tracing::trace;

use crate::mark::MarkId;

/// The complete restorable state of a buffer at a point in time.
#[derive(Clone)]
pub struct BufferState {
    pub text: TextStore,
    pub lines: usize,
    pub chars: usize,
    pub changes: u64,
    pub change_pos: usize,
}

/// An immutable undo version.
pub struct Snapshot {
    pub state: BufferState,
    /// (mark, offset) for every mark that lived in the buffer at capture
    /// time. Restored exactly on travel, overriding delta adjustment.
    pub marks: Vec<(MarkId, usize)>,
}

/// Per-buffer undo bookkeeping.
pub struct UndoLedger {
    /// Undo stack, most recent last.
    pub(crate) undo: Vec<Snapshot>,
    /// Redo stack, most recent last.
    pub(crate) redo: Vec<Snapshot>,
    /// Snapshot taken at the first edit to the current line.
    pub(crate) line_version: Option<Snapshot>,
    /// Line the line version belongs to; `None` until a commit records one.
    pub(crate) line_no: Option<usize>,
    /// Primed to snapshot before the next mutation.
    pub(crate) armed: bool,
    /// Event stamp of the last arming, for per-event idempotence.
    pub(crate) arm_event: Option<u64>,
    /// Cursor offset to restore when traveling back to the next snapshot.
    pub(crate) cursor_restore: usize,
}

impl UndoLedger {
    pub fn new() -> Self {
        Self {
            undo: Vec::new(),
            redo: Vec::new(),
            line_version: None,
            line_no: None,
            armed: false,
            arm_event: None,
            cursor_restore: 0,
        }
    }

    pub fn undo_depth(&self) -> usize {
        self.undo.len()
    }

    pub fn redo_depth(&self) -> usize {
        self.redo.len()
    }

    pub fn has_line_version(&self) -> bool {
        self.line_version.is_some()
    }

    /// Drop the oldest undo entries until the stack is within `cap`
    /// (effective minimum 1). Returns how many snapshots were dropped.
    pub(crate) fn trim(&mut self, cap: usize) -> usize {
        let keep = cap.max(1);
        let mut dropped = 0;
        while self.undo.len() > keep {
            self.undo.remove(0);
            dropped += 1;
        }
        if dropped > 0 {
            trace!(target: "buffer.undo", dropped, keep, "undo_stack_trimmed");
        }
        dropped
    }

    /// Drop every redo entry. Returns how many snapshots were dropped.
    pub(crate) fn wipe_redo(&mut self) -> usize {
        let dropped = self.redo.len();
        self.redo.clear();
        if dropped > 0 {
            trace!(target: "buffer.undo", dropped, "redo_stack_cleared");
        }
        dropped
    }

    /// Drop everything (buffer teardown). Returns how many snapshots were
    /// dropped.
    pub(crate) fn clear(&mut self) -> usize {
        let mut dropped = self.undo.len() + self.redo.len();
        self.undo.clear();
        self.redo.clear();
        if self.line_version.take().is_some() {
            dropped += 1;
        }
        self.line_no = None;
        dropped
    }
}

impl Default for UndoLedger {
    fn default() -> Self {
        Self::new()
    }
}
