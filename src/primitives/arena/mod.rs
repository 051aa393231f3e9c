#![forbid(unsafe_code)]
//! Fixed-size block arenas and handle-based record slabs.
//!
//! A [`BlockArena`] hands out equally sized byte blocks addressed by a
//! `u32` index and recycles released blocks through a free list. Every
//! arena carries the generation tag of the tree that allocates from it,
//! so a block's owner is always explicit in its [`BlockId`].

use crate::types::{BlockId, Result, SifterError};

/// Pool of fixed-size blocks with an optional block-count limit.
#[derive(Debug)]
pub struct BlockArena {
    generation: u32,
    block_size: usize,
    blocks: Vec<Box<[u8]>>,
    free: Vec<u32>,
    limit: Option<usize>,
    live: usize,
}

impl BlockArena {
    /// Creates an unbounded arena.
    pub fn new(block_size: usize) -> Self {
        Self {
            generation: 0,
            block_size,
            blocks: Vec::new(),
            free: Vec::new(),
            limit: None,
            live: 0,
        }
    }

    /// Creates an arena that refuses to grow beyond `max_blocks`.
    pub fn with_limit(block_size: usize, max_blocks: usize) -> Self {
        Self {
            limit: Some(max_blocks),
            blocks: Vec::with_capacity(max_blocks.min(1024)),
            ..Self::new(block_size)
        }
    }

    /// Generation tag stamped into every id this arena hands out.
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Size of every block in bytes.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Number of blocks currently handed out.
    pub fn live_blocks(&self) -> usize {
        self.live
    }

    /// Maximum number of blocks, if bounded.
    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    /// Hands out a zeroed block.
    pub fn allocate(&mut self) -> Result<BlockId> {
        let index = if let Some(index) = self.free.pop() {
            self.blocks[index as usize].fill(0);
            index
        } else {
            if let Some(limit) = self.limit {
                if self.blocks.len() >= limit {
                    return Err(SifterError::ArenaExhausted { capacity: limit });
                }
            }
            let index = u32::try_from(self.blocks.len())
                .map_err(|_| SifterError::Invalid("block arena index overflow"))?;
            self.blocks.push(vec![0u8; self.block_size].into_boxed_slice());
            index
        };
        self.live += 1;
        Ok(BlockId::new(self.generation, index))
    }

    /// Returns a block to the free list.
    pub fn release(&mut self, id: BlockId) {
        debug_assert_eq!(id.generation(), self.generation, "foreign block released");
        debug_assert!(!self.free.contains(&id.index()), "double release of {id}");
        self.free.push(id.index());
        self.live -= 1;
    }

    /// Releases every block and retags the arena for a new owner.
    ///
    /// Memory is kept for reuse.
    pub fn reset(&mut self, generation: u32) {
        self.generation = generation;
        self.free.clear();
        self.free.extend((0..self.blocks.len() as u32).rev());
        self.live = 0;
    }

    /// Borrows a block.
    pub fn get(&self, id: BlockId) -> &[u8] {
        &self.blocks[id.index() as usize]
    }

    /// Mutably borrows a block.
    pub fn get_mut(&mut self, id: BlockId) -> &mut [u8] {
        &mut self.blocks[id.index() as usize]
    }

    /// Mutably borrows two distinct blocks at once.
    pub fn pair_mut(&mut self, a: BlockId, b: BlockId) -> (&mut [u8], &mut [u8]) {
        let (ia, ib) = (a.index() as usize, b.index() as usize);
        assert_ne!(ia, ib, "pair_mut on a single block");
        if ia < ib {
            let (lo, hi) = self.blocks.split_at_mut(ib);
            (&mut lo[ia], &mut hi[0])
        } else {
            let (lo, hi) = self.blocks.split_at_mut(ia);
            (&mut hi[0], &mut lo[ib])
        }
    }
}

/// Vector-backed record storage addressed by stable `u32` handles.
#[derive(Debug)]
pub struct Slab<T> {
    entries: Vec<Option<T>>,
    free: Vec<u32>,
    len: usize,
}

impl<T> Default for Slab<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }
}

impl<T> Slab<T> {
    /// Creates an empty slab.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value`, reusing a released handle when one is available.
    pub fn insert(&mut self, value: T) -> u32 {
        self.len += 1;
        if let Some(handle) = self.free.pop() {
            self.entries[handle as usize] = Some(value);
            handle
        } else {
            self.entries.push(Some(value));
            (self.entries.len() - 1) as u32
        }
    }

    /// Removes and returns the value behind `handle`.
    pub fn remove(&mut self, handle: u32) -> Option<T> {
        let value = self.entries.get_mut(handle as usize)?.take()?;
        self.free.push(handle);
        self.len -= 1;
        Some(value)
    }

    /// Borrows the value behind `handle`.
    pub fn get(&self, handle: u32) -> Option<&T> {
        self.entries.get(handle as usize)?.as_ref()
    }

    /// Mutably borrows the value behind `handle`.
    pub fn get_mut(&mut self, handle: u32) -> Option<&mut T> {
        self.entries.get_mut(handle as usize)?.as_mut()
    }

    /// Number of live values.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the slab holds no values.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// One past the largest handle ever issued.
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Iterates over live `(handle, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &T)> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(idx, entry)| entry.as_ref().map(|v| (idx as u32, v)))
    }
}
