use roaring::RoaringBitmap;

use crate::options::EngineOptions;
use crate::primitives::arena::BlockArena;
use crate::storage::catalog::{Operator, RefCounts};
use crate::types::{OpId, RecordId, MAX_DIST};

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub(crate) enum ShadowState {
    #[default]
    Uninit,
    Active,
    /// Resolved, or every referencing query was excluded.
    Retired,
}

/// Per-slot view of an operator during one match.
#[derive(Clone, Debug, Default)]
pub(crate) struct OperatorShadow {
    pub state: ShadowState,
    pub refcnt: u32,
    pub nr_refs: RefCounts,
    pub level: usize,
    pub min_distance: u32,
    pub need_hamming: bool,
    pub dirty: bool,
}

impl OperatorShadow {
    fn seed(&mut self, op: &Operator) {
        *self = OperatorShadow {
            state: ShadowState::Active,
            refcnt: op.refcnt(),
            nr_refs: *op.nr_refs(),
            level: 0,
            min_distance: MAX_DIST + 1,
            need_hamming: false,
            dirty: false,
        };
    }
}

/// Per-slot mutable state reused by every document matched on that slot.
pub(crate) struct Scratch {
    pub ops: Vec<OperatorShadow>,
    pub included_flags: Vec<bool>,
    pub excluded: RoaringBitmap,
    pub touched_ops: Vec<OpId>,
    pub included: Vec<RecordId>,
    pub dirty: Vec<OpId>,
    pub range: Option<(u32, u32)>,
}

impl Scratch {
    fn new() -> Self {
        Self {
            ops: Vec::new(),
            included_flags: Vec::new(),
            excluded: RoaringBitmap::new(),
            touched_ops: Vec::new(),
            included: Vec::new(),
            dirty: Vec::new(),
            range: None,
        }
    }

    /// Grows the shadow tables to cover every live catalogue handle.
    pub fn prepare(&mut self, operator_slots: usize, record_slots: usize) {
        if self.ops.len() < operator_slots {
            self.ops.resize_with(operator_slots, OperatorShadow::default);
        }
        if self.included_flags.len() < record_slots {
            self.included_flags.resize(record_slots, false);
        }
    }

    /// Shadow of `id`, seeded from the live operator on first use.
    pub fn shadow(&mut self, id: OpId, op: &Operator) -> &mut OperatorShadow {
        let shadow = &mut self.ops[id.0 as usize];
        if shadow.state == ShadowState::Uninit {
            shadow.seed(op);
            self.touched_ops.push(id);
        }
        shadow
    }

    pub fn note_excluded(&mut self, qid: u32) {
        self.excluded.insert(qid);
        self.range = Some(match self.range {
            Some((lo, hi)) => (lo.min(qid), hi.max(qid)),
            None => (qid, qid),
        });
    }

    /// Returns every touched entry to its pristine state.
    pub fn reset(&mut self) {
        for id in self.touched_ops.drain(..) {
            self.ops[id.0 as usize] = OperatorShadow::default();
        }
        for rid in self.included.drain(..) {
            self.included_flags[rid.0 as usize] = false;
        }
        self.dirty.clear();
        if let Some((lo, hi)) = self.range.take() {
            self.excluded.remove_range(lo..=hi);
        }
    }

    pub fn is_pristine(&self) -> bool {
        self.touched_ops.is_empty()
            && self.included.is_empty()
            && self.range.is_none()
            && self.excluded.is_empty()
            && self.ops.iter().all(|s| s.state == ShadowState::Uninit)
            && self.included_flags.iter().all(|f| !f)
    }
}

/// Private working state of one concurrency slot.
///
/// Holds the arena that rank-index clones allocate from, operator and query
/// shadows, and the bitmap of queries excluded for the current document.
/// Between documents every piece is reset to empty.
pub struct SlotState {
    slot: usize,
    pub(crate) arena: BlockArena,
    pub(crate) scratch: Scratch,
}

impl SlotState {
    /// Builds the state for slot `slot`.
    pub fn new(slot: usize, options: &EngineOptions) -> Self {
        Self {
            slot,
            arena: BlockArena::with_limit(options.block_size, options.slot_arena_blocks()),
            scratch: Scratch::new(),
        }
    }

    /// Slot index.
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Blocks currently held by a live clone; zero between documents.
    pub fn arena_blocks_in_use(&self) -> usize {
        self.arena.live_blocks()
    }

    /// Returns `true` when no per-document state is left over.
    pub fn is_idle(&self) -> bool {
        self.arena.live_blocks() == 0 && self.scratch.is_pristine()
    }
}

/// Resets the scratch state when a match ends, on success or error.
pub(crate) struct Teardown<'s>(pub &'s mut Scratch);

impl Drop for Teardown<'_> {
    fn drop(&mut self) {
        self.0.reset();
    }
}

impl std::ops::Deref for Teardown<'_> {
    type Target = Scratch;

    fn deref(&self) -> &Scratch {
        self.0
    }
}

impl std::ops::DerefMut for Teardown<'_> {
    fn deref_mut(&mut self) -> &mut Scratch {
        self.0
    }
}
