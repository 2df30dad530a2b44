//! The buffer store: directory, lifecycle, edits, and undo traversal.
//!
//! A `BufferStore` owns every buffer, the central mark arena, and the
//! notification sink. Buffers are addressed by generational `BufferId`
//! handles; the name-ordered directory is a `BTreeMap` over those handles.
//! One reserved buffer holds the process-wide default option values; it is
//! created with the store and can never be freed.
//!
//! Every mutating entry point funnels through the same sequence: commit a
//! pending undo snapshot if the buffer is armed, apply the low-level
//! mutation, update the line/char/change counters, adjust the affected
//! buffer's marks by the net char delta, and set the modified flag.

use std::collections::BTreeMap;

use core_text::TextStore;
use slab::Slab;
use tracing::{info, trace};

use crate::config::Config;
use crate::mark::{self, MarkArena, MarkId};
use crate::notify::{BufferEvents, NoopBufferEvents};
use crate::options::BufferOptions;
use crate::undo::{BufferState, Snapshot, UndoLedger};

/// Name of the reserved default-options buffer.
pub const DEFAULT_BUF: &str = "(default options)";

/// Conventional name of the cut buffer holding register `c`.
pub fn cut_buffer_name(c: char) -> String {
    format!("(cut buffer {c})")
}

/// Generational handle to a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId {
    idx: u32,
    generation: u32,
}

impl BufferId {
    pub(crate) fn new(idx: u32, generation: u32) -> Self {
        Self { idx, generation }
    }
}

/// A buffer/offset pair: the value-type addressing unit for edits. A
/// `Spot` is a momentary position; for a reference that survives edits,
/// allocate a mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Spot {
    pub buffer: BufferId,
    pub offset: usize,
}

impl Spot {
    pub fn new(buffer: BufferId, offset: usize) -> Self {
        Self { buffer, offset }
    }
}

/// Outcome of a lifecycle operation that may refuse to act.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreeOutcome {
    Freed,
    Retained,
}

/// One in-memory document plus its metadata and state history.
pub struct Buffer {
    pub(crate) generation: u32,
    pub(crate) text: TextStore,
    pub(crate) opts: BufferOptions,
    /// Monotonic per-buffer mutation counter.
    pub(crate) changes: u64,
    /// Offset recorded at the most recent snapshot commit.
    pub(crate) change_pos: usize,
    /// External viewers currently displaying this buffer.
    pub(crate) viewers: u32,
    /// Marks currently anchored in this buffer.
    pub(crate) marks: Vec<MarkId>,
    pub(crate) ledger: UndoLedger,
}

impl Buffer {
    pub fn name(&self) -> &str {
        &self.opts.bufname
    }
    pub fn options(&self) -> &BufferOptions {
        &self.opts
    }
    pub fn text(&self) -> &TextStore {
        &self.text
    }
    pub fn chars(&self) -> usize {
        self.opts.bufchars
    }
    pub fn lines(&self) -> usize {
        self.opts.buflines
    }
    pub fn changes(&self) -> u64 {
        self.changes
    }
    pub fn change_pos(&self) -> usize {
        self.change_pos
    }
    pub fn viewer_count(&self) -> u32 {
        self.viewers
    }
    pub fn is_internal(&self) -> bool {
        self.opts.internal
    }
    pub fn is_modified(&self) -> bool {
        self.opts.modified
    }
    pub fn undo_depth(&self) -> usize {
        self.ledger.undo_depth()
    }
    pub fn redo_depth(&self) -> usize {
        self.ledger.redo_depth()
    }
    pub fn has_line_version(&self) -> bool {
        self.ledger.has_line_version()
    }
    pub fn mark_ids(&self) -> &[MarkId] {
        &self.marks
    }
    /// Offset the cursor should return to when traveling to the next
    /// snapshot.
    pub fn cursor_restore(&self) -> usize {
        self.ledger.cursor_restore
    }
}

pub struct BufferStore {
    buffers: Slab<Buffer>,
    by_name: BTreeMap<String, BufferId>,
    marks: MarkArena,
    events: Box<dyn BufferEvents>,
    default_opts: Option<BufferId>,
    active: Option<BufferId>,
    event_counter: u64,
    next_bufid: i64,
    /// Negative-going counter naming internal untitled buffers.
    next_internal: i64,
    next_buf_gen: u32,
    /// Live snapshot count, cross-checked by `snapshot_accounting`.
    live_snapshots: u64,
}

impl BufferStore {
    pub fn new() -> Self {
        Self::with_events(Box::new(NoopBufferEvents))
    }

    pub fn with_events(events: Box<dyn BufferEvents>) -> Self {
        let mut store = Self {
            buffers: Slab::new(),
            by_name: BTreeMap::new(),
            marks: MarkArena::default(),
            events,
            default_opts: None,
            active: None,
            event_counter: 0,
            next_bufid: 1,
            next_internal: -1,
            next_buf_gen: 1,
            live_snapshots: 0,
        };
        let id = store.alloc(Some(DEFAULT_BUF), None, true);
        store.default_opts = Some(id);
        store
    }

    /// Fold a parsed defaults file into the default-options buffer, from
    /// which every subsequently created buffer inherits.
    pub fn apply_config(&mut self, cfg: &Config) {
        let d = self.default_buffer();
        cfg.apply_to(&mut self.buf_mut(d).opts);
    }

    /// The reserved default-options buffer.
    pub fn default_buffer(&self) -> BufferId {
        self.default_opts.expect("store is initialized")
    }

    fn buf(&self, id: BufferId) -> &Buffer {
        let b = self.buffers.get(id.idx as usize).expect("stale buffer id");
        assert_eq!(b.generation, id.generation, "stale buffer id");
        b
    }

    fn buf_mut(&mut self, id: BufferId) -> &mut Buffer {
        let b = self
            .buffers
            .get_mut(id.idx as usize)
            .expect("stale buffer id");
        assert_eq!(b.generation, id.generation, "stale buffer id");
        b
    }

    pub fn buffer(&self, id: BufferId) -> &Buffer {
        self.buf(id)
    }

    pub fn get(&self, id: BufferId) -> Option<&Buffer> {
        self.buffers
            .get(id.idx as usize)
            .filter(|b| b.generation == id.generation)
    }

    /// Mutable access to a buffer's option values. Counters are options
    /// too, but they are maintained by the edit path; host layers should
    /// only touch flags and identity here.
    pub fn options_mut(&mut self, id: BufferId) -> &mut BufferOptions {
        &mut self.buf_mut(id).opts
    }

    /// Number of buffers, the default-options buffer included.
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Buffers in name order.
    pub fn iter(&self) -> impl Iterator<Item = (BufferId, &Buffer)> {
        self.by_name.values().map(|&id| (id, self.buf(id)))
    }

    pub fn events(&self) -> &dyn BufferEvents {
        self.events.as_ref()
    }

    /// Advance the external event counter. Arming is idempotent within
    /// one event.
    pub fn begin_event(&mut self) -> u64 {
        self.event_counter += 1;
        self.event_counter
    }

    // ------------------------------------------------------------------
    // Directory
    // ------------------------------------------------------------------

    /// Create a buffer, or return the existing one with that name.
    ///
    /// With no name, a unique untitled name is synthesized (a separate,
    /// negative-going counter names internal buffers). A supplied
    /// `TextStore` is adopted as-is — used when restoring a pre-existing
    /// store — otherwise a fresh empty store is created. New buffers
    /// inherit default option values and, unless internal, get a fresh
    /// numeric id and a creation notification.
    pub fn alloc(&mut self, name: Option<&str>, text: Option<TextStore>, internal: bool) -> BufferId {
        let synth;
        let name: &str = match name {
            Some(n) => n,
            None => {
                let n = if internal {
                    let v = self.next_internal;
                    self.next_internal -= 1;
                    v
                } else {
                    // the untitled name reuses the id the buffer is about
                    // to be assigned
                    self.next_bufid
                };
                synth = format!("untitled #{n}");
                &synth
            }
        };

        if let Some(existing) = self.find(name) {
            return existing;
        }

        let mut opts = BufferOptions::default();
        if let Some(d) = self.default_opts {
            opts.inherit_from(&self.buf(d).opts);
        }
        opts.bufname = name.to_string();
        opts.internal = internal;
        if !internal {
            opts.bufid = self.next_bufid;
            self.next_bufid += 1;
        }
        let text = text.unwrap_or_else(|| TextStore::new(name));
        opts.bufchars = text.len_chars();
        opts.buflines = text.newline_count();

        self.next_buf_gen += 1;
        let generation = self.next_buf_gen;
        let entry = self.buffers.vacant_entry();
        let id = BufferId::new(entry.key() as u32, generation);
        entry.insert(Buffer {
            generation,
            text,
            opts,
            changes: 0,
            change_pos: 0,
            viewers: 0,
            marks: Vec::new(),
            ledger: UndoLedger::new(),
        });
        self.by_name.insert(name.to_string(), id);
        if !internal {
            self.events.on_create(id, name);
        }
        info!(target: "buffer.store", name, internal, "buffer created");
        id
    }

    /// Locate a buffer by name. On an exact miss, falls back in order to:
    /// the single-character cut-buffer convention, word-initials matching,
    /// numeric id lookup (`#n`), and absolute-path resolution of the name.
    pub fn find(&self, name: &str) -> Option<BufferId> {
        if let Some(&id) = self.by_name.get(name) {
            return Some(id);
        }

        let mut it = name.chars();
        if it.next() == Some('"') {
            // a quote plus exactly one char names a cut buffer
            if let Some(c) = it.next() {
                if it.next().is_none() {
                    if let Some(&id) = self.by_name.get(&cut_buffer_name(c)) {
                        return Some(id);
                    }
                }
            }
            // otherwise try the quoted text as word initials
            let pattern = &name[1..];
            for (bufname, &id) in &self.by_name {
                if initials_match(bufname, pattern) {
                    return Some(id);
                }
            }
        }

        if let Some(digits) = name.strip_prefix('#') {
            if let Ok(n) = digits.parse::<i64>() {
                for (name, &id) in &self.by_name {
                    let buf = self.buf(id);
                    debug_assert_eq!(buf.opts.bufname, *name);
                    if !buf.opts.internal && buf.opts.bufid == n {
                        return Some(id);
                    }
                }
            }
        }

        // a relative pathname may name a buffer by its absolute path
        if let Ok(abs) = std::path::absolute(name) {
            let abs = abs.to_string_lossy();
            if abs != name {
                if let Some(&id) = self.by_name.get(abs.as_ref()) {
                    return Some(id);
                }
            }
        }

        None
    }

    /// Change a buffer's name. Fails silently if the name is taken;
    /// otherwise the low-level store is retitled, the directory rekeyed,
    /// and title-displaying views renotified.
    pub fn rename(&mut self, id: BufferId, new_name: &str) {
        if self.find(new_name).is_some() {
            return;
        }
        let old = self.buf(id).opts.bufname.clone();
        {
            let buf = self.buf_mut(id);
            buf.text.retitle(new_name);
            buf.opts.bufname = new_name.to_string();
        }
        self.by_name.remove(&old);
        self.by_name.insert(new_name.to_string(), id);
        self.events.on_retitle(id, new_name);
        info!(target: "buffer.store", old = %old, new = new_name, "buffer renamed");
    }

    /// Destroy a buffer. Refused while any viewer still references it.
    /// Marks are re-anchored at offset 0 in the default-options buffer so
    /// dangling collaborators stay valid but harmless; every retained
    /// snapshot is freed.
    pub fn free(&mut self, id: BufferId) -> FreeOutcome {
        assert_ne!(
            Some(id),
            self.default_opts,
            "cannot free the default-options buffer"
        );
        if self.buf(id).viewers > 0 {
            trace!(target: "buffer.store", buffer = ?id, "free refused: viewed");
            return FreeOutcome::Retained;
        }
        let name = self.buf(id).opts.bufname.clone();
        if !self.buf(id).opts.internal {
            self.events.on_unload(id, &name);
            self.events.on_delete(id, &name);
        }

        let moved: Vec<MarkId> = self.buf_mut(id).marks.drain(..).collect();
        let dflt = self.default_buffer();
        for &m in &moved {
            let slot = self.marks.get_mut(m).expect("buffer mark list entry is live");
            slot.buffer = dflt;
            slot.offset = 0;
        }
        self.buf_mut(dflt).marks.extend(moved);

        let dropped = self.buf_mut(id).ledger.clear();
        self.live_snapshots -= dropped as u64;

        if self.active == Some(id) {
            self.active = None;
        }
        self.by_name.remove(&name);
        self.buffers.remove(id.idx as usize);
        info!(target: "buffer.store", name = %name, "buffer freed");
        FreeOutcome::Freed
    }

    /// Establish which buffer's option values the command layer sees.
    /// Idempotent; emits leave/enter notifications around a real switch.
    pub fn set_active(&mut self, id: BufferId) {
        if self.active == Some(id) {
            return;
        }
        if let Some(prev) = self.active {
            self.events.on_leave(prev);
        }
        self.active = Some(id);
        self.events.on_enter(id);
    }

    pub fn active(&self) -> Option<BufferId> {
        self.active
    }

    pub fn add_viewer(&mut self, id: BufferId) {
        self.buf_mut(id).viewers += 1;
    }

    pub fn remove_viewer(&mut self, id: BufferId) {
        let buf = self.buf_mut(id);
        assert!(buf.viewers > 0, "viewer count underflow");
        buf.viewers -= 1;
    }

    // ------------------------------------------------------------------
    // Marks
    // ------------------------------------------------------------------

    pub fn mark_alloc(&mut self, id: BufferId, offset: usize) -> MarkId {
        let _ = self.buf(id);
        let m = self.marks.insert(id, offset);
        self.buf_mut(id).marks.push(m);
        m
    }

    pub fn mark_free(&mut self, mark: MarkId) {
        if let Some(slot) = self.marks.remove(mark) {
            self.buf_mut(slot.buffer).marks.retain(|&m| m != mark);
        }
    }

    pub fn mark_offset(&self, mark: MarkId) -> Option<usize> {
        self.marks.get(mark).map(|s| s.offset)
    }

    pub fn mark_buffer(&self, mark: MarkId) -> Option<BufferId> {
        self.marks.get(mark).map(|s| s.buffer)
    }

    pub fn spot_of(&self, mark: MarkId) -> Option<Spot> {
        self.marks.get(mark).map(|s| Spot::new(s.buffer, s.offset))
    }

    pub fn mark_set_offset(&mut self, mark: MarkId, offset: usize) {
        self.marks.get_mut(mark).expect("stale mark id").offset = offset;
    }

    /// Move a mark to another buffer. The offset resets to 0; callers
    /// must re-set it after the move.
    pub fn mark_set_buffer(&mut self, mark: MarkId, to: BufferId) {
        let _ = self.buf(to);
        let from = self.marks.get(mark).expect("stale mark id").buffer;
        if from == to {
            return;
        }
        self.buf_mut(from).marks.retain(|&m| m != mark);
        {
            let slot = self.marks.get_mut(mark).expect("stale mark id");
            slot.buffer = to;
            slot.offset = 0;
        }
        self.buf_mut(to).marks.push(mark);
    }

    /// Number of live marks across all buffers.
    pub fn mark_count(&self) -> usize {
        self.marks.len()
    }

    fn adjust_marks(&mut self, id: BufferId, from: usize, to: usize, delta: isize) {
        let buf = self.buffers.get(id.idx as usize).expect("stale buffer id");
        mark::adjust(&mut self.marks, &buf.marks, from, to, delta);
    }

    // ------------------------------------------------------------------
    // Undo
    // ------------------------------------------------------------------

    /// Prime the buffer to snapshot before its next mutation, and record
    /// the cursor-restore point. Arming is suppressed within the event
    /// that already armed this buffer; the cursor is recorded regardless.
    pub fn arm(&mut self, at: Spot) {
        let ev = self.event_counter;
        let buf = self.buf_mut(at.buffer);
        if buf.ledger.arm_event != Some(ev) {
            buf.ledger.armed = true;
            buf.ledger.arm_event = Some(ev);
        }
        buf.ledger.cursor_restore = at.offset;
    }

    /// Record the cursor-restore point without arming.
    pub fn set_cursor(&mut self, at: Spot) {
        self.buf_mut(at.buffer).ledger.cursor_restore = at.offset;
    }

    pub fn is_armed(&self, id: BufferId) -> bool {
        self.buf(id).ledger.armed
    }

    /// Capture the buffer's current state plus its live mark offsets.
    /// Also records the cursor-restore point as the buffer's change
    /// position.
    fn take_snapshot(&mut self, id: BufferId) -> Snapshot {
        let cursor = self.buf(id).ledger.cursor_restore;
        self.buf_mut(id).change_pos = cursor;
        let buf = self.buf(id);
        let marks: Vec<(MarkId, usize)> = buf
            .marks
            .iter()
            .map(|&m| {
                let slot = self.marks.get(m).expect("buffer mark list entry is live");
                (m, slot.offset)
            })
            .collect();
        let snap = Snapshot {
            state: BufferState {
                text: buf.text.clone(),
                lines: buf.opts.buflines,
                chars: buf.opts.bufchars,
                changes: buf.changes,
                change_pos: cursor,
            },
            marks,
        };
        self.live_snapshots += 1;
        snap
    }

    /// Push an undo version of the buffer's current state. Refreshes the
    /// line version when the change moved to a different line, optionally
    /// wipes the redo stack, then trims to the retention cap. Internal
    /// buffers never accumulate history.
    fn commit(&mut self, id: BufferId, wipe: bool) {
        if self.buf(id).opts.internal {
            return;
        }
        let snap = self.take_snapshot(id);
        let line = self.buf(id).text.line_of(snap.state.change_pos);
        self.buf_mut(id).ledger.undo.push(snap);

        if self.buf(id).ledger.line_no != Some(line) {
            let fresh = self.take_snapshot(id);
            let replaced = {
                let l = &mut self.buf_mut(id).ledger;
                l.line_no = Some(line);
                l.line_version.replace(fresh).is_some()
            };
            if replaced {
                self.live_snapshots -= 1;
            }
        }

        if wipe {
            let dropped = self.buf_mut(id).ledger.wipe_redo();
            self.live_snapshots -= dropped as u64;
        }
        let cap = self.buf(id).opts.undolevels;
        let dropped = self.buf_mut(id).ledger.trim(cap);
        self.live_snapshots -= dropped as u64;

        let buf = self.buf(id);
        trace!(
            target: "buffer.undo",
            buffer = ?id,
            undo_depth = buf.ledger.undo_depth(),
            redo_depth = buf.ledger.redo_depth(),
            wipe,
            "push_snapshot"
        );
    }

    /// If the buffer is armed, snapshot it and push onto the undo stack.
    /// Called immediately before any mutation; `wipe` is true on ordinary
    /// edits and false when the commit is part of an undo/redo traversal.
    pub fn commit_if_armed(&mut self, id: BufferId, wipe: bool) {
        if self.buf(id).ledger.armed {
            self.buf_mut(id).ledger.armed = false;
            self.commit(id, wipe);
        }
    }

    /// Travel the undo history. `steps > 0` undoes that many versions
    /// back (1 = most recent); `steps < 0` redoes forward; `steps == 0`
    /// reverts to the line version. With retention configured as 0 the
    /// traversal oscillates between the single stored undo and redo entry
    /// regardless of the requested distance. Returns the restored change
    /// position clamped into the buffer, or `None` if the requested
    /// version does not exist.
    pub fn travel(&mut self, id: BufferId, steps: isize) -> Option<usize> {
        #[derive(Clone, Copy, PartialEq)]
        enum Dir {
            Undo(usize),
            Redo(usize),
            Line,
        }

        let dir = {
            let buf = self.buf(id);
            let l = &buf.ledger;
            if steps == 0 {
                if !l.has_line_version() {
                    return None;
                }
                Dir::Line
            } else if buf.opts.undolevels == 0 {
                // oscillate between the previous version and this one;
                // undo and redo both do exactly the same thing
                if l.redo_depth() > 0 {
                    Dir::Redo(1)
                } else if l.undo_depth() > 0 {
                    Dir::Undo(1)
                } else {
                    return None;
                }
            } else if steps > 0 {
                let depth = steps as usize;
                if l.undo_depth() < depth {
                    return None;
                }
                Dir::Undo(depth)
            } else {
                let depth = (-steps) as usize;
                if l.redo_depth() < depth {
                    return None;
                }
                Dir::Redo(depth)
            }
        };

        let target_pos = {
            let l = &self.buf(id).ledger;
            match dir {
                Dir::Undo(d) => l.undo[l.undo.len() - d].state.change_pos,
                Dir::Redo(d) => l.redo[l.redo.len() - d].state.change_pos,
                Dir::Line => l.line_version.as_ref().expect("checked").state.change_pos,
            }
        };

        // detach the line version before committing, so the commit's own
        // line-version refresh cannot clobber the travel target
        let line_target = if dir == Dir::Line {
            let l = &mut self.buf_mut(id).ledger;
            l.line_no = None;
            l.line_version.take()
        } else {
            None
        };

        // raise retention so the version about to become history isn't
        // evicted by the commit's trim
        let orig_cap = self.buf(id).opts.undolevels;
        self.buf_mut(id).opts.undolevels = (orig_cap + 1).max(2);

        self.set_cursor(Spot::new(id, target_pos));
        self.commit(id, false);

        if dir == Dir::Line {
            // line-undo consumes the slot entirely; drop the refresh the
            // commit just installed
            let took = {
                let l = &mut self.buf_mut(id).ledger;
                l.line_no = None;
                l.line_version.take().is_some()
            };
            if took {
                self.live_snapshots -= 1;
            }
        }

        let target = match dir {
            Dir::Undo(d) => {
                let l = &mut self.buf_mut(id).ledger;
                for _ in 0..d {
                    let v = l.undo.pop().expect("depth checked");
                    l.redo.push(v);
                }
                l.undo.pop().expect("depth checked")
            }
            Dir::Redo(d) => {
                let l = &mut self.buf_mut(id).ledger;
                for _ in 0..d - 1 {
                    let v = l.redo.pop().expect("depth checked");
                    l.undo.push(v);
                }
                l.redo.pop().expect("depth checked")
            }
            Dir::Line => line_target.expect("presence checked"),
        };

        let Snapshot {
            state:
                BufferState {
                    text,
                    lines,
                    chars,
                    changes: _,
                    change_pos,
                },
            marks: saved_marks,
        } = target;

        let delta = {
            let buf = self.buf_mut(id);
            let delta = chars as isize - buf.opts.bufchars as isize;
            buf.text = text;
            buf.opts.buflines = lines;
            buf.opts.bufchars = chars;
            buf.change_pos = change_pos;
            buf.changes += 1;
            delta
        };
        self.live_snapshots -= 1; // target consumed
        self.did_modify(id);

        if delta < 0 {
            self.adjust_marks(id, change_pos, change_pos + (-delta) as usize, delta);
        } else {
            self.adjust_marks(id, change_pos, change_pos, delta);
        }
        // marks captured in the snapshot are restored exactly, overriding
        // the delta adjustment
        for (m, off) in saved_marks {
            if let Some(slot) = self.marks.get_mut(m) {
                if slot.buffer == id {
                    slot.offset = off;
                }
            }
        }

        self.buf_mut(id).opts.undolevels = orig_cap;
        let dropped = self.buf_mut(id).ledger.trim(orig_cap);
        self.live_snapshots -= dropped as u64;

        let result = {
            let buf = self.buf_mut(id);
            if buf.opts.bufchars == 0 {
                buf.change_pos = 0;
            } else if buf.change_pos >= buf.opts.bufchars {
                buf.change_pos = buf.opts.bufchars - 1;
            }
            buf.change_pos
        };
        trace!(target: "buffer.undo", buffer = ?id, steps, cursor = result, "travel");
        Some(result)
    }

    /// Count every snapshot reachable through buffer ledgers and compare
    /// with the live counter. Used by tests to prove no snapshot is
    /// leaked or double-freed.
    pub fn snapshot_accounting(&self) -> (u64, u64) {
        let mut counted = 0u64;
        for (_, buf) in self.buffers.iter() {
            counted += (buf.ledger.undo_depth() + buf.ledger.redo_depth()) as u64;
            if buf.ledger.has_line_version() {
                counted += 1;
            }
        }
        (counted, self.live_snapshots)
    }

    // ------------------------------------------------------------------
    // Edits
    // ------------------------------------------------------------------

    fn did_modify(&mut self, id: BufferId) {
        let buf = self.buf_mut(id);
        if buf.opts.internal || buf.opts.modified {
            return;
        }
        buf.opts.modified = true;
        trace!(target: "buffer.store", buffer = ?id, "modified");
    }

    /// Replace the range `[from, to)` with `new_text`. Pure insertion
    /// when the range is empty, pure deletion when the text is empty; a
    /// no-op call (empty range, empty text) changes nothing — no
    /// snapshot, no counters, no notifications.
    pub fn replace(&mut self, from: Spot, to: Spot, new_text: &str) {
        assert_eq!(
            from.buffer, to.buffer,
            "replace endpoints in different buffers"
        );
        assert!(from.offset <= to.offset, "inverted replace range");
        assert!(
            to.offset <= self.buf(from.buffer).opts.bufchars,
            "replace range past end of buffer"
        );
        if from.offset == to.offset && new_text.is_empty() {
            return;
        }

        self.commit_if_armed(from.buffer, true);

        let new_chars = new_text.chars().count();
        let chg = new_chars as isize - (to.offset - from.offset) as isize;
        let lines_delta = {
            let buf = self.buf_mut(from.buffer);
            let ld = if from.offset == to.offset {
                buf.text.insert(from.offset, new_text)
            } else if new_text.is_empty() {
                buf.text.delete(from.offset, to.offset)
            } else {
                buf.text.replace(from.offset, to.offset, new_text)
            };
            buf.opts.buflines = (buf.opts.buflines as isize + ld) as usize;
            buf.opts.bufchars = (buf.opts.bufchars as isize + chg) as usize;
            buf.changes += 1;
            ld
        };

        self.adjust_marks(from.buffer, from.offset, to.offset, chg);
        self.did_modify(from.buffer);
        trace!(
            target: "buffer.edit",
            buffer = ?from.buffer,
            from = from.offset,
            to = to.offset,
            delta = chg,
            lines_delta,
            "replace"
        );
    }

    /// Append text at end-of-buffer.
    pub fn append(&mut self, id: BufferId, text: &str) {
        let end = Spot::new(id, self.buf(id).opts.bufchars);
        self.replace(end, end, text);
    }

    /// Copy `[from, to)` of one buffer into another (or the same) buffer
    /// at `dst`. Only the destination's counters and marks are updated.
    pub fn paste(&mut self, dst: Spot, from: Spot, to: Spot) {
        assert_eq!(
            from.buffer, to.buffer,
            "paste source endpoints in different buffers"
        );
        assert!(from.offset <= to.offset, "inverted paste source range");
        assert!(
            dst.offset <= self.buf(dst.buffer).opts.bufchars,
            "paste destination past end of buffer"
        );

        self.commit_if_armed(dst.buffer, true);

        // freeze the source view first: the clone is cheap and keeps the
        // source offsets stable when a buffer is pasted into itself
        let src = self.buf(from.buffer).text.clone();
        let chg = (to.offset - from.offset) as isize;
        let lines_delta = {
            let buf = self.buf_mut(dst.buffer);
            let ld = buf.text.paste(dst.offset, &src, from.offset, to.offset);
            buf.opts.buflines = (buf.opts.buflines as isize + ld) as usize;
            buf.opts.bufchars = (buf.opts.bufchars as isize + chg) as usize;
            buf.changes += 1;
            ld
        };

        self.adjust_marks(dst.buffer, dst.offset, dst.offset, chg);
        self.did_modify(dst.buffer);
        trace!(
            target: "buffer.edit",
            dst_buffer = ?dst.buffer,
            dst = dst.offset,
            chars = chg,
            lines_delta,
            "paste"
        );
    }

    /// Materialize `[from, to)` as an owned string for external consumers
    /// (clipboard, display formatting). Does not mutate the source.
    pub fn copy_range(&self, from: Spot, to: Spot) -> String {
        assert_eq!(
            from.buffer, to.buffer,
            "copy endpoints in different buffers"
        );
        assert!(from.offset <= to.offset, "inverted copy range");
        self.buf(from.buffer).text.slice(from.offset, to.offset)
    }

    /// Best-effort mark restoration after a reload: marks captured by the
    /// newest undo snapshot get their recorded offsets back; marks newer
    /// than the snapshot are clamped to end-of-buffer.
    pub fn restore_marks_from_undo(&mut self, id: BufferId) {
        let saved: Vec<(MarkId, usize)> = match self.buf(id).ledger.undo.last() {
            Some(s) => s.marks.clone(),
            None => return,
        };
        for (m, off) in saved {
            if let Some(slot) = self.marks.get_mut(m) {
                if slot.buffer == id {
                    slot.offset = off;
                }
            }
        }
        let chars = self.buf(id).opts.bufchars;
        let list: Vec<MarkId> = self.buf(id).marks.clone();
        for m in list {
            let slot = self.marks.get_mut(m).expect("buffer mark list entry is live");
            if slot.offset > chars {
                slot.offset = chars;
            }
        }
    }
}

impl Default for BufferStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Word-initials match: the pattern's first char matches the name's first
/// char, and each later pattern char matches the initial of the next
/// space-separated word. Every word must be covered.
fn initials_match(bufname: &str, pattern: &str) -> bool {
    let mut pat = pattern.chars();
    for word in bufname.split(' ').filter(|w| !w.is_empty()) {
        let initial = word.chars().next().expect("filtered empty words");
        match pat.next() {
            Some(c) if c == initial => {}
            _ => return false,
        }
    }
    pat.next().is_none()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    fn content(store: &BufferStore, id: BufferId) -> String {
        let b = store.buffer(id);
        b.text().slice(0, b.chars())
    }

    fn armed_edit(store: &mut BufferStore, id: BufferId, from: usize, to: usize, text: &str) {
        store.begin_event();
        store.arm(Spot::new(id, from));
        store.replace(Spot::new(id, from), Spot::new(id, to), text);
    }

    #[test]
    fn alloc_is_idempotent_by_name() {
        let mut store = BufferStore::new();
        let a = store.alloc(Some("doc"), None, false);
        let before = store.len();
        let b = store.alloc(Some("doc"), None, false);
        assert_eq!(a, b);
        assert_eq!(store.len(), before);
    }

    #[test]
    fn untitled_names_are_unique_and_ids_monotonic() {
        let mut store = BufferStore::new();
        let a = store.alloc(None, None, false);
        let b = store.alloc(None, None, false);
        assert_ne!(store.buffer(a).name(), store.buffer(b).name());
        assert!(store.buffer(a).options().bufid < store.buffer(b).options().bufid);
        let i = store.alloc(None, None, true);
        assert!(store.buffer(i).name().contains("-1"));
        assert_eq!(store.buffer(i).options().bufid, 0);
    }

    #[test]
    fn directory_iterates_in_name_order() {
        let mut store = BufferStore::new();
        store.alloc(Some("zebra"), None, false);
        store.alloc(Some("alpha"), None, false);
        store.alloc(Some("mid"), None, false);
        let names: Vec<&str> = store.iter().map(|(_, b)| b.name()).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
    }

    #[test]
    fn find_falls_back_to_cut_buffer_and_initials_and_id() {
        let mut store = BufferStore::new();
        let cut = store.alloc(Some(&cut_buffer_name('a')), None, true);
        assert_eq!(store.find("\"a"), Some(cut));

        let scratch = store.alloc(Some("my scratch pad"), None, false);
        assert_eq!(store.find("\"msp"), Some(scratch));
        assert_eq!(store.find("\"mx"), None);

        let bufid = store.buffer(scratch).options().bufid;
        assert_eq!(store.find(&format!("#{bufid}")), Some(scratch));
        assert_eq!(store.find("#9999"), None);
    }

    #[test]
    fn find_resolves_relative_path_to_absolute_name() {
        let mut store = BufferStore::new();
        let abs = std::path::absolute("Makefile").unwrap();
        let id = store.alloc(Some(&abs.to_string_lossy()), None, false);
        assert_eq!(store.find("Makefile"), Some(id));
    }

    #[test]
    fn rename_collision_is_silent_noop() {
        let mut store = BufferStore::new();
        let a = store.alloc(Some("one"), None, false);
        store.alloc(Some("two"), None, false);
        store.rename(a, "two");
        assert_eq!(store.buffer(a).name(), "one");
        store.rename(a, "three");
        assert_eq!(store.buffer(a).name(), "three");
        assert_eq!(store.find("one"), None);
        assert_eq!(store.find("three"), Some(a));
        assert_eq!(store.buffer(a).text().title(), "three");
    }

    #[test]
    fn append_and_counters() {
        let mut store = BufferStore::new();
        let doc = store.alloc(Some("doc"), None, false);
        store.append(doc, "ab\ncd\n");
        assert_eq!(store.buffer(doc).chars(), 6);
        assert_eq!(store.buffer(doc).lines(), 2);
        assert!(store.buffer(doc).is_modified());
        assert_eq!(store.buffer(doc).changes(), 1);
    }

    #[test]
    fn noop_replace_changes_nothing() {
        struct Counting(Rc<Cell<u32>>);
        impl BufferEvents for Counting {
            fn on_create(&self, _: BufferId, _: &str) {
                self.0.set(self.0.get() + 1);
            }
        }
        let fired = Rc::new(Cell::new(0));
        let mut store = BufferStore::with_events(Box::new(Counting(fired.clone())));
        let doc = store.alloc(Some("doc"), None, false);
        store.append(doc, "abc");
        let fired_before = fired.get();
        let changes_before = store.buffer(doc).changes();

        store.begin_event();
        store.arm(Spot::new(doc, 1));
        let undo_before = store.buffer(doc).undo_depth();
        store.replace(Spot::new(doc, 1), Spot::new(doc, 1), "");
        assert_eq!(store.buffer(doc).changes(), changes_before);
        assert_eq!(store.buffer(doc).undo_depth(), undo_before);
        assert_eq!(fired.get(), fired_before);
        // the arm is still pending for the next real edit
        assert!(store.is_armed(doc));
    }

    #[test]
    fn mark_adjustment_on_delete_before_mark() {
        let mut store = BufferStore::new();
        let doc = store.alloc(Some("doc"), None, false);
        store.append(doc, "0123456789");
        let m = store.mark_alloc(doc, 5);
        store.replace(Spot::new(doc, 2), Spot::new(doc, 4), "");
        assert_eq!(store.mark_offset(m), Some(3));
    }

    #[test]
    fn mark_adjustment_three_regions() {
        let mut store = BufferStore::new();
        let doc = store.alloc(Some("doc"), None, false);
        store.append(doc, "0123456789");
        let before = store.mark_alloc(doc, 2);
        let inside = store.mark_alloc(doc, 5);
        let after = store.mark_alloc(doc, 8);
        // replace [3, 7) with one char: delta -3
        store.replace(Spot::new(doc, 3), Spot::new(doc, 7), "X");
        assert_eq!(store.mark_offset(before), Some(2));
        assert_eq!(store.mark_offset(inside), Some(3));
        assert_eq!(store.mark_offset(after), Some(5));
    }

    #[test]
    fn undo_scenario_restores_content_and_cursor() {
        let mut store = BufferStore::new();
        let doc = store.alloc(Some("doc"), None, false);
        store.append(doc, "ab\ncd\n");
        assert_eq!(store.buffer(doc).chars(), 6);
        assert_eq!(store.buffer(doc).lines(), 2);

        store.begin_event();
        store.arm(Spot::new(doc, 0));
        store.replace(Spot::new(doc, 0), Spot::new(doc, 2), "XY");
        assert_eq!(content(&store, doc), "XY\ncd\n");
        assert_eq!(store.buffer(doc).chars(), 6);

        let cursor = store.travel(doc, 1);
        assert_eq!(cursor, Some(0));
        assert_eq!(content(&store, doc), "ab\ncd\n");
        assert_eq!(store.buffer(doc).chars(), 6);
    }

    #[test]
    fn undo_redo_round_trip_restores_marks_and_counts() {
        let mut store = BufferStore::new();
        let doc = store.alloc(Some("doc"), None, false);
        store.options_mut(doc).undolevels = 4;
        store.append(doc, "one\ntwo\nthree\n");
        let m = store.mark_alloc(doc, 9);

        armed_edit(&mut store, doc, 4, 8, "");
        let chars_after = store.buffer(doc).chars();
        let lines_after = store.buffer(doc).lines();
        let mark_after = store.mark_offset(m).unwrap();

        assert!(store.travel(doc, 1).is_some());
        assert_eq!(content(&store, doc), "one\ntwo\nthree\n");
        assert_eq!(store.mark_offset(m), Some(9));

        assert!(store.travel(doc, -1).is_some());
        assert_eq!(store.buffer(doc).chars(), chars_after);
        assert_eq!(store.buffer(doc).lines(), lines_after);
        assert_eq!(store.mark_offset(m), Some(mark_after));
    }

    #[test]
    fn undo_stack_never_exceeds_cap() {
        let mut store = BufferStore::new();
        let doc = store.alloc(Some("doc"), None, false);
        store.options_mut(doc).undolevels = 2;
        store.append(doc, "seed ");
        for i in 0..5 {
            let end = store.buffer(doc).chars();
            store.begin_event();
            store.arm(Spot::new(doc, end));
            store.replace(Spot::new(doc, end), Spot::new(doc, end), &format!("{i}"));
            assert!(store.buffer(doc).undo_depth() <= 2);
        }
        assert_eq!(store.buffer(doc).undo_depth(), 2);
        // traveling past the oldest retained version fails
        assert_eq!(store.travel(doc, 3), None);
        assert!(store.travel(doc, 1).is_some());
    }

    #[test]
    fn oscillate_ignores_distance() {
        let mut store = BufferStore::new();
        let doc = store.alloc(Some("doc"), None, false);
        store.options_mut(doc).undolevels = 0;
        store.append(doc, "aaa");
        armed_edit(&mut store, doc, 0, 3, "bbb");
        assert_eq!(content(&store, doc), "bbb");

        // any distance, either direction: strictly alternate
        assert!(store.travel(doc, 5).is_some());
        assert_eq!(content(&store, doc), "aaa");
        assert!(store.travel(doc, 7).is_some());
        assert_eq!(content(&store, doc), "bbb");
        assert!(store.travel(doc, -3).is_some());
        assert_eq!(content(&store, doc), "aaa");
    }

    #[test]
    fn line_version_reverts_without_consuming_undo() {
        let mut store = BufferStore::new();
        let doc = store.alloc(Some("doc"), None, false);
        store.options_mut(doc).undolevels = 8;
        store.append(doc, "one\ntwo\n");

        // two armed edits on line 1
        armed_edit(&mut store, doc, 4, 4, "x");
        armed_edit(&mut store, doc, 5, 5, "y");
        assert_eq!(content(&store, doc), "one\nxytwo\n");
        let undo_depth = store.buffer(doc).undo_depth();
        assert!(store.buffer(doc).has_line_version());

        // line undo reverts to the state at the first edit of that line
        assert!(store.travel(doc, 0).is_some());
        assert_eq!(content(&store, doc), "one\ntwo\n");
        assert!(!store.buffer(doc).has_line_version());
        // the regular history gained the pre-revert state instead of
        // losing anything
        assert_eq!(store.buffer(doc).undo_depth(), undo_depth + 1);
    }

    #[test]
    fn travel_restores_captured_marks_exactly() {
        let mut store = BufferStore::new();
        let doc = store.alloc(Some("doc"), None, false);
        store.options_mut(doc).undolevels = 4;
        store.append(doc, "0123456789");
        let m = store.mark_alloc(doc, 7);

        // delete in front of the mark, then move the mark somewhere else
        armed_edit(&mut store, doc, 0, 4, "");
        store.mark_set_offset(m, 1);

        // undo: the captured offset (7) wins over delta adjustment
        assert!(store.travel(doc, 1).is_some());
        assert_eq!(store.mark_offset(m), Some(7));
    }

    #[test]
    fn free_refused_while_viewed_then_allowed() {
        let mut store = BufferStore::new();
        let doc = store.alloc(Some("doc"), None, false);
        store.add_viewer(doc);
        assert_eq!(store.free(doc), FreeOutcome::Retained);
        assert_eq!(store.find("doc"), Some(doc));
        store.remove_viewer(doc);
        assert_eq!(store.free(doc), FreeOutcome::Freed);
        assert_eq!(store.find("doc"), None);
    }

    #[test]
    fn free_reanchors_marks_on_default_buffer() {
        let mut store = BufferStore::new();
        let doc = store.alloc(Some("doc"), None, false);
        store.append(doc, "hello");
        let m = store.mark_alloc(doc, 3);
        assert_eq!(store.free(doc), FreeOutcome::Freed);
        assert_eq!(store.mark_buffer(m), Some(store.default_buffer()));
        assert_eq!(store.mark_offset(m), Some(0));
    }

    #[test]
    fn mark_set_buffer_resets_offset() {
        let mut store = BufferStore::new();
        let a = store.alloc(Some("a"), None, false);
        let b = store.alloc(Some("b"), None, false);
        store.append(a, "aaaa");
        let m = store.mark_alloc(a, 4);
        store.mark_set_buffer(m, b);
        assert_eq!(store.mark_buffer(m), Some(b));
        assert_eq!(store.mark_offset(m), Some(0));
        // the old buffer no longer adjusts it
        store.append(a, "more");
        assert_eq!(store.mark_offset(m), Some(0));
    }

    #[test]
    fn internal_buffers_record_no_history() {
        let mut store = BufferStore::new();
        let scratch = store.alloc(Some("(scratch)"), None, true);
        store.begin_event();
        store.arm(Spot::new(scratch, 0));
        store.append(scratch, "text");
        assert_eq!(store.buffer(scratch).undo_depth(), 0);
        assert!(!store.buffer(scratch).is_modified());
        assert_eq!(store.travel(scratch, 1), None);
    }

    #[test]
    fn paste_between_buffers_updates_destination_only() {
        let mut store = BufferStore::new();
        let src = store.alloc(Some("src"), None, false);
        let dst = store.alloc(Some("dst"), None, false);
        store.append(src, "one\ntwo\n");
        store.append(dst, "DST");
        let src_changes = store.buffer(src).changes();

        store.paste(Spot::new(dst, 1), Spot::new(src, 0), Spot::new(src, 4));
        assert_eq!(content(&store, dst), "Done\nST");
        assert_eq!(store.buffer(dst).chars(), 7);
        assert_eq!(store.buffer(dst).lines(), 1);
        assert_eq!(store.buffer(src).changes(), src_changes);
    }

    #[test]
    fn paste_buffer_into_itself() {
        let mut store = BufferStore::new();
        let doc = store.alloc(Some("doc"), None, false);
        store.append(doc, "abc");
        store.paste(Spot::new(doc, 1), Spot::new(doc, 0), Spot::new(doc, 3));
        assert_eq!(content(&store, doc), "aabcbc");
    }

    #[test]
    fn copy_range_does_not_mutate() {
        let mut store = BufferStore::new();
        let doc = store.alloc(Some("doc"), None, false);
        store.append(doc, "hello world");
        let changes = store.buffer(doc).changes();
        assert_eq!(store.copy_range(Spot::new(doc, 6), Spot::new(doc, 11)), "world");
        assert_eq!(store.buffer(doc).changes(), changes);
    }

    #[test]
    fn arm_is_idempotent_within_an_event() {
        let mut store = BufferStore::new();
        let doc = store.alloc(Some("doc"), None, false);
        store.append(doc, "abc");

        store.begin_event();
        store.arm(Spot::new(doc, 0));
        store.replace(Spot::new(doc, 0), Spot::new(doc, 1), "X");
        assert_eq!(store.buffer(doc).undo_depth(), 1);
        // re-arming within the same event is suppressed
        store.arm(Spot::new(doc, 1));
        assert!(!store.is_armed(doc));
        store.replace(Spot::new(doc, 1), Spot::new(doc, 2), "Y");
        assert_eq!(store.buffer(doc).undo_depth(), 1);
        // a new event arms again
        store.begin_event();
        store.arm(Spot::new(doc, 0));
        assert!(store.is_armed(doc));
    }

    #[test]
    fn snapshot_accounting_balances() {
        let mut store = BufferStore::new();
        let doc = store.alloc(Some("doc"), None, false);
        store.options_mut(doc).undolevels = 2;
        store.append(doc, "seed\n");
        for i in 0..6 {
            armed_edit(&mut store, doc, 0, 0, &format!("{i}\n"));
            let (counted, live) = store.snapshot_accounting();
            assert_eq!(counted, live);
        }
        store.travel(doc, 1);
        store.travel(doc, -1);
        store.travel(doc, 0);
        let (counted, live) = store.snapshot_accounting();
        assert_eq!(counted, live);

        store.free(doc);
        let (counted, live) = store.snapshot_accounting();
        assert_eq!(counted, live);
        assert_eq!(counted, 0);
    }

    #[test]
    fn set_active_is_idempotent_and_notifies() {
        struct EnterCount(Rc<Cell<u32>>);
        impl BufferEvents for EnterCount {
            fn on_enter(&self, _: BufferId) {
                self.0.set(self.0.get() + 1);
            }
        }
        let entered = Rc::new(Cell::new(0));
        let mut store = BufferStore::with_events(Box::new(EnterCount(entered.clone())));
        let a = store.alloc(Some("a"), None, false);
        store.set_active(a);
        store.set_active(a);
        assert_eq!(entered.get(), 1);
        assert_eq!(store.active(), Some(a));
    }

    #[test]
    fn config_defaults_flow_into_new_buffers() {
        let mut store = BufferStore::new();
        let cfg = Config {
            raw: None,
            file: toml::from_str("[options]\nundolevels = 30\ntabstop = 2\n").unwrap(),
        };
        store.apply_config(&cfg);
        let doc = store.alloc(Some("doc"), None, false);
        assert_eq!(store.buffer(doc).options().undolevels, 30);
        assert_eq!(store.buffer(doc).options().tabstop, 2);
    }

    #[test]
    fn initials_matching() {
        assert!(initials_match("my scratch pad", "msp"));
        assert!(!initials_match("my scratch pad", "ms"));
        assert!(!initials_match("my scratch pad", "mspx"));
        assert!(initials_match("single", "s"));
    }
}
