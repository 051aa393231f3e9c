//! Fixed-width block layout shared by leaf and internal nodes.
//!
//! ```text
//! +--------+---------------------------+-------------+--------------------------+
//! | header | key[0] key[1] ... key[n-1] |  free space | payload[n-1] .. payload[0] |
//! +--------+---------------------------+-------------+--------------------------+
//! ```
//!
//! Keys grow from the front, payloads from the back. Leaf payloads are
//! values; internal payloads are child [`BlockId`]s. `key[0]` of an
//! internal node duplicates the smallest key of its leftmost subtree.

use std::cmp::Ordering;
use std::ops::Range;

use crate::primitives::bytes::ord;
use crate::types::{BlockId, Result, SifterError};

/// Bytes reserved for the node header.
pub const HEADER_LEN: usize = 8;
/// Width of an encoded child reference.
pub const CHILD_LEN: usize = 8;

const LEVEL_OFFSET: usize = 0;
const LEN_OFFSET: usize = 2;
const GENERATION_OFFSET: usize = 4;

/// Key comparator used by a tree.
pub type KeyCompare = fn(&[u8], &[u8]) -> Ordering;

/// Plain lexicographic byte order.
pub fn bytewise(a: &[u8], b: &[u8]) -> Ordering {
    a.cmp(b)
}

/// Level of a node; 0 is a leaf.
pub fn level(block: &[u8]) -> u8 {
    block[LEVEL_OFFSET]
}

/// Number of entries stored in a node.
pub fn len(block: &[u8]) -> usize {
    u16::from_le_bytes([block[LEN_OFFSET], block[LEN_OFFSET + 1]]) as usize
}

/// Generation that owns the node.
pub fn generation(block: &[u8]) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&block[GENERATION_OFFSET..GENERATION_OFFSET + 4]);
    u32::from_le_bytes(raw)
}

pub(crate) fn set_len(block: &mut [u8], n: usize) {
    block[LEN_OFFSET..LEN_OFFSET + 2].copy_from_slice(&(n as u16).to_le_bytes());
}

pub(crate) fn set_generation(block: &mut [u8], generation: u32) {
    block[GENERATION_OFFSET..GENERATION_OFFSET + 4].copy_from_slice(&generation.to_le_bytes());
}

/// Writes an empty header.
pub(crate) fn init(block: &mut [u8], level: u8, generation: u32) {
    block[..HEADER_LEN].fill(0);
    block[LEVEL_OFFSET] = level;
    set_generation(block, generation);
}

/// Entry geometry derived once from block, key and value sizes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Layout {
    /// Size of every block in bytes.
    pub block_size: usize,
    /// Width of every key.
    pub key_len: usize,
    /// Width of every leaf value.
    pub value_len: usize,
    max_leaf: usize,
    max_internal: usize,
}

impl Layout {
    /// Validates the sizes and derives node capacities.
    pub fn new(block_size: usize, key_len: usize, value_len: usize) -> Result<Self> {
        if key_len == 0 {
            return Err(SifterError::Invalid("key length must be non-zero"));
        }
        let data = block_size
            .checked_sub(HEADER_LEN)
            .ok_or(SifterError::Invalid("block smaller than node header"))?;
        let max_leaf = data / (key_len + value_len);
        let max_internal = data / (key_len + CHILD_LEN);
        if max_leaf < 4 || max_internal < 4 {
            return Err(SifterError::Invalid("block holds fewer than four entries"));
        }
        if max_leaf > u16::MAX as usize {
            return Err(SifterError::Invalid("block holds too many entries"));
        }
        Ok(Self {
            block_size,
            key_len,
            value_len,
            max_leaf,
            max_internal,
        })
    }

    /// Maximum entries for a node at `level`.
    pub fn max_entries(&self, level: u8) -> usize {
        if level == 0 {
            self.max_leaf
        } else {
            self.max_internal
        }
    }

    /// Minimum occupancy for a non-root node at `level`.
    pub fn min_entries(&self, level: u8) -> usize {
        self.max_entries(level) / 2
    }

    fn payload_len(&self, level: u8) -> usize {
        if level == 0 {
            self.value_len
        } else {
            CHILD_LEN
        }
    }

    /// Node reached capacity and must be adjusted.
    pub fn is_full(&self, block: &[u8]) -> bool {
        len(block) >= self.max_entries(level(block))
    }

    /// Node fell below minimum occupancy.
    pub fn is_underfull(&self, block: &[u8]) -> bool {
        len(block) < self.min_entries(level(block))
    }

    /// Node can take entries from a full sibling and stay below capacity.
    pub fn can_absorb(&self, block: &[u8]) -> bool {
        len(block) + 2 <= self.max_entries(level(block))
    }

    /// Node can hand entries to an underfull sibling and stay above minimum.
    pub fn can_lend(&self, block: &[u8]) -> bool {
        len(block) > self.min_entries(level(block))
    }

    fn key_range(&self, idx: usize, count: usize) -> Range<usize> {
        HEADER_LEN + idx * self.key_len..HEADER_LEN + (idx + count) * self.key_len
    }

    fn payload_range(&self, level: u8, idx: usize, count: usize) -> Range<usize> {
        let width = self.payload_len(level);
        self.block_size - (idx + count) * width..self.block_size - idx * width
    }

    /// Key of entry `idx`.
    pub fn key<'a>(&self, block: &'a [u8], idx: usize) -> &'a [u8] {
        &block[self.key_range(idx, 1)]
    }

    /// Value of leaf entry `idx`.
    pub fn value<'a>(&self, block: &'a [u8], idx: usize) -> &'a [u8] {
        &block[self.payload_range(0, idx, 1)]
    }

    /// Child reference of internal entry `idx`.
    pub fn child(&self, block: &[u8], idx: usize) -> BlockId {
        BlockId(ord::get_u64_be(&block[self.payload_range(1, idx, 1)]))
    }

    pub(crate) fn set_key(&self, block: &mut [u8], idx: usize, key: &[u8]) {
        let range = self.key_range(idx, 1);
        block[range].copy_from_slice(key);
    }

    pub(crate) fn set_value(&self, block: &mut [u8], idx: usize, value: &[u8]) {
        let range = self.payload_range(0, idx, 1);
        block[range].copy_from_slice(value);
    }

    pub(crate) fn set_child(&self, block: &mut [u8], idx: usize, child: BlockId) {
        let range = self.payload_range(1, idx, 1);
        ord::put_u64_be(&mut block[range], child.0);
    }

    /// Largest index whose key is `<= key`, or `None` if `key` sorts first.
    pub fn search(&self, block: &[u8], key: &[u8], compare: KeyCompare) -> Option<usize> {
        let (mut lo, mut hi) = (0usize, len(block));
        while lo < hi {
            let mid = (lo + hi) / 2;
            if compare(self.key(block, mid), key) == Ordering::Greater {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        lo.checked_sub(1)
    }

    /// Moves `count` entries inside one node from `from` to `to`.
    pub(crate) fn shift(&self, block: &mut [u8], from: usize, to: usize, count: usize) {
        if count == 0 || from == to {
            return;
        }
        let lvl = level(block);
        let keys = self.key_range(from, count);
        block.copy_within(keys, self.key_range(to, count).start);
        let payloads = self.payload_range(lvl, from, count);
        block.copy_within(payloads, self.payload_range(lvl, to, count).start);
    }

    /// Copies `count` entries from `src[src_at..]` into `dst[dst_at..]`.
    pub(crate) fn copy_entries(
        &self,
        dst: &mut [u8],
        dst_at: usize,
        src: &[u8],
        src_at: usize,
        count: usize,
    ) {
        let lvl = level(src);
        dst[self.key_range(dst_at, count)].copy_from_slice(&src[self.key_range(src_at, count)]);
        dst[self.payload_range(lvl, dst_at, count)]
            .copy_from_slice(&src[self.payload_range(lvl, src_at, count)]);
    }

    /// Inserts a leaf entry at `pos`, shifting the tail right.
    pub(crate) fn insert_value(&self, block: &mut [u8], pos: usize, key: &[u8], value: &[u8]) {
        let n = len(block);
        self.shift(block, pos, pos + 1, n - pos);
        self.set_key(block, pos, key);
        self.set_value(block, pos, value);
        set_len(block, n + 1);
    }

    /// Inserts an internal entry at `pos`, shifting the tail right.
    pub(crate) fn insert_child(&self, block: &mut [u8], pos: usize, key: &[u8], child: BlockId) {
        let n = len(block);
        self.shift(block, pos, pos + 1, n - pos);
        self.set_key(block, pos, key);
        self.set_child(block, pos, child);
        set_len(block, n + 1);
    }

    /// Removes entry `pos`, shifting the tail left.
    pub(crate) fn remove(&self, block: &mut [u8], pos: usize) {
        let n = len(block);
        self.shift(block, pos + 1, pos, n - pos - 1);
        set_len(block, n - 1);
    }
}
