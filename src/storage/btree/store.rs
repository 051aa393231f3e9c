//! Block storage backends for [`BTree`](super::BTree).
//!
//! [`OwnedStore`] backs long-lived trees: generation 0 forever, blocks
//! are freed directly. [`CowStore`] backs clones: it reads blocks of
//! every ancestor generation through shared borrows and allocates only
//! from its own arena, whose generation tag is the clone's generation.

use crate::primitives::arena::BlockArena;
use crate::types::{BlockId, Result};

/// Allocation and lookup of fixed-size blocks for one tree.
pub trait BlockStore {
    /// Generation new blocks are stamped with.
    fn generation(&self) -> u32;

    /// Size of each block.
    fn block_size(&self) -> usize;

    /// Borrows any block reachable by this tree.
    fn block(&self, id: BlockId) -> &[u8];

    /// Mutably borrows a block owned by this tree's generation.
    fn block_mut(&mut self, id: BlockId) -> &mut [u8];

    /// Mutably borrows two distinct blocks owned by this generation.
    fn block_pair_mut(&mut self, a: BlockId, b: BlockId) -> (&mut [u8], &mut [u8]);

    /// Borrows an owned block mutably alongside any readable block.
    fn block_with_source(&mut self, dst: BlockId, src: BlockId) -> (&mut [u8], &[u8]);

    /// Hands out a zeroed block of this generation.
    fn allocate(&mut self) -> Result<BlockId>;

    /// Frees a block; blocks of older generations are left alone.
    fn release(&mut self, id: BlockId);

    /// Arenas indexed by generation, used to build clones.
    fn layers(&self) -> Vec<&BlockArena>;
}

/// Backend owning every block it references.
#[derive(Debug)]
pub struct OwnedStore {
    arena: BlockArena,
}

impl OwnedStore {
    /// Creates an unbounded owning backend.
    pub fn new(block_size: usize) -> Self {
        Self {
            arena: BlockArena::new(block_size),
        }
    }

    /// Number of blocks in use.
    pub fn live_blocks(&self) -> usize {
        self.arena.live_blocks()
    }
}

impl BlockStore for OwnedStore {
    fn generation(&self) -> u32 {
        0
    }

    fn block_size(&self) -> usize {
        self.arena.block_size()
    }

    fn block(&self, id: BlockId) -> &[u8] {
        self.arena.get(id)
    }

    fn block_mut(&mut self, id: BlockId) -> &mut [u8] {
        self.arena.get_mut(id)
    }

    fn block_pair_mut(&mut self, a: BlockId, b: BlockId) -> (&mut [u8], &mut [u8]) {
        self.arena.pair_mut(a, b)
    }

    fn block_with_source(&mut self, dst: BlockId, src: BlockId) -> (&mut [u8], &[u8]) {
        let (dst, src) = self.arena.pair_mut(dst, src);
        (dst, src)
    }

    fn allocate(&mut self) -> Result<BlockId> {
        self.arena.allocate()
    }

    fn release(&mut self, id: BlockId) {
        self.arena.release(id);
    }

    fn layers(&self) -> Vec<&BlockArena> {
        vec![&self.arena]
    }
}

/// Copy-on-write backend for a clone.
///
/// Dropping the store resets its arena, returning every block the clone
/// allocated.
pub struct CowStore<'a> {
    ancestors: Vec<&'a BlockArena>,
    own: &'a mut BlockArena,
}

impl<'a> CowStore<'a> {
    /// Builds a store one generation above `ancestors`, allocating from `arena`.
    pub fn new(ancestors: Vec<&'a BlockArena>, arena: &'a mut BlockArena) -> Self {
        arena.reset(ancestors.len() as u32);
        Self {
            ancestors,
            own: arena,
        }
    }

    /// Number of blocks this clone allocated and still holds.
    pub fn live_blocks(&self) -> usize {
        self.own.live_blocks()
    }

    fn owns(&self, id: BlockId) -> bool {
        id.generation() == self.own.generation()
    }
}

impl BlockStore for CowStore<'_> {
    fn generation(&self) -> u32 {
        self.own.generation()
    }

    fn block_size(&self) -> usize {
        self.own.block_size()
    }

    fn block(&self, id: BlockId) -> &[u8] {
        if self.owns(id) {
            self.own.get(id)
        } else {
            self.ancestors[id.generation() as usize].get(id)
        }
    }

    fn block_mut(&mut self, id: BlockId) -> &mut [u8] {
        debug_assert!(self.owns(id), "mutating shared block {id}");
        self.own.get_mut(id)
    }

    fn block_pair_mut(&mut self, a: BlockId, b: BlockId) -> (&mut [u8], &mut [u8]) {
        debug_assert!(self.owns(a) && self.owns(b), "mutating shared blocks");
        self.own.pair_mut(a, b)
    }

    fn block_with_source(&mut self, dst: BlockId, src: BlockId) -> (&mut [u8], &[u8]) {
        debug_assert!(self.owns(dst), "mutating shared block {dst}");
        if self.owns(src) {
            let (dst, src) = self.own.pair_mut(dst, src);
            (dst, src)
        } else {
            let shared = self.ancestors[src.generation() as usize];
            (self.own.get_mut(dst), shared.get(src))
        }
    }

    fn allocate(&mut self) -> Result<BlockId> {
        self.own.allocate()
    }

    fn release(&mut self, id: BlockId) {
        if self.owns(id) {
            self.own.release(id);
        }
    }

    fn layers(&self) -> Vec<&BlockArena> {
        let mut layers = self.ancestors.clone();
        layers.push(&*self.own);
        layers
    }
}

impl Drop for CowStore<'_> {
    fn drop(&mut self) {
        let generation = self.own.generation();
        self.own.reset(generation);
    }
}
