//! Live position references.
//!
//! A mark is a stable handle to a char offset inside one buffer. Marks are
//! stored in a central generational arena; each buffer keeps the list of
//! handles currently anchored in it so that edit-time adjustment touches
//! only the affected buffer's marks. Handles are never dangling: a stale
//! handle simply fails to resolve.

use slab::Slab;
use tracing::trace;

use crate::store::BufferId;

/// Generational handle to a live mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MarkId {
    idx: u32,
    generation: u32,
}

pub(crate) struct MarkSlot {
    pub generation: u32,
    pub buffer: BufferId,
    pub offset: usize,
}

/// Central arena of mark slots. Slab keys are recycled; the generation
/// stamp distinguishes a recycled slot from the handle that used to own it.
#[derive(Default)]
pub(crate) struct MarkArena {
    slots: Slab<MarkSlot>,
    next_gen: u32,
}

impl MarkArena {
    pub fn insert(&mut self, buffer: BufferId, offset: usize) -> MarkId {
        self.next_gen += 1;
        let generation = self.next_gen;
        let idx = self.slots.insert(MarkSlot {
            generation,
            buffer,
            offset,
        }) as u32;
        MarkId { idx, generation }
    }

    pub fn remove(&mut self, id: MarkId) -> Option<MarkSlot> {
        let live = self
            .slots
            .get(id.idx as usize)
            .is_some_and(|slot| slot.generation == id.generation);
        if live {
            Some(self.slots.remove(id.idx as usize))
        } else {
            None
        }
    }

    pub fn get(&self, id: MarkId) -> Option<&MarkSlot> {
        self.slots
            .get(id.idx as usize)
            .filter(|slot| slot.generation == id.generation)
    }

    pub fn get_mut(&mut self, id: MarkId) -> Option<&mut MarkSlot> {
        self.slots
            .get_mut(id.idx as usize)
            .filter(|slot| slot.generation == id.generation)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }
}

/// Rewrite the offsets of the given marks for an edit of `[from, to)`
/// whose net char-count change is `delta`.
///
/// Marks at or after `to` shift by `delta`; marks strictly inside
/// `(from, to)` collapse to `from`; marks at or before `from` are
/// untouched. Runs in time proportional to `list.len()`.
pub(crate) fn adjust(
    arena: &mut MarkArena,
    list: &[MarkId],
    from: usize,
    to: usize,
    delta: isize,
) {
    let mut moved = 0usize;
    for &id in list {
        let slot = arena.get_mut(id).expect("buffer mark list entry is live");
        if slot.offset >= to {
            slot.offset = (slot.offset as isize + delta) as usize;
            moved += 1;
        } else if slot.offset > from {
            slot.offset = from;
            moved += 1;
        }
    }
    trace!(target: "buffer.mark", from, to, delta, moved, "adjust");
}
