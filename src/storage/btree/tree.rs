use std::cmp::Ordering;
use std::ops::ControlFlow;

use smallvec::SmallVec;

use super::node::{self, bytewise, KeyCompare, Layout};
use super::stats::{BTreeStats, BTreeStatsSnapshot};
use super::store::{BlockStore, CowStore, OwnedStore};
use crate::primitives::arena::BlockArena;
use crate::types::{BlockId, Result, SifterError};

type KeyBuf = SmallVec<[u8; 32]>;

/// Configuration knobs for a tree.
#[derive(Clone, Debug)]
pub struct BTreeOptions {
    /// Size of each node block in bytes
    pub block_size: usize,
    /// Width of every key
    pub key_len: usize,
    /// Width of every value
    pub value_len: usize,
    /// Ordering of encoded keys
    pub compare: KeyCompare,
}

impl Default for BTreeOptions {
    fn default() -> Self {
        Self {
            block_size: 512,
            key_len: 8,
            value_len: 8,
            compare: bytewise,
        }
    }
}

impl BTreeOptions {
    /// Options for fixed `key_len`/`value_len` entries with default block size.
    pub fn new(key_len: usize, value_len: usize) -> Self {
        Self {
            key_len,
            value_len,
            ..Self::default()
        }
    }

    /// Overrides the node block size.
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    /// Overrides the key comparator.
    pub fn with_compare(mut self, compare: KeyCompare) -> Self {
        self.compare = compare;
        self
    }
}

/// Callbacks for a pre-order walk over a tree.
///
/// Returning [`ControlFlow::Break`] from any callback stops the walk.
pub trait Visitor {
    /// Called for the root and for every child before descending into it.
    fn block(&mut self, _id: BlockId, _level: u8) -> ControlFlow<()> {
        ControlFlow::Continue(())
    }

    /// Called for every key, internal separators included.
    fn key(&mut self, _level: u8, _key: &[u8]) -> ControlFlow<()> {
        ControlFlow::Continue(())
    }

    /// Called for every leaf value, right after its key.
    fn value(&mut self, _value: &[u8]) -> ControlFlow<()> {
        ControlFlow::Continue(())
    }
}

#[derive(Clone, Copy, Debug)]
enum Side {
    /// Pair occupies parent slots `idx - 1` and `idx`.
    Left,
    /// Pair occupies parent slots `idx` and `idx + 1`.
    Right,
}

/// What a recursive step did to the child the parent descended into.
#[derive(Clone, Copy, Debug)]
enum Outcome {
    Unchanged,
    Updated(BlockId),
    Split(BlockId, BlockId),
    Rebalanced {
        side: Side,
        left: BlockId,
        right: BlockId,
    },
    Merged {
        side: Side,
        into: BlockId,
    },
}

#[derive(Clone, Copy, Default)]
struct Siblings {
    left: Option<BlockId>,
    right: Option<BlockId>,
}

/// Ordered map over fixed-width keys and values stored in fixed-size blocks.
pub struct BTree<S: BlockStore = OwnedStore> {
    store: S,
    layout: Layout,
    compare: KeyCompare,
    root: Option<BlockId>,
    height: u8,
    len: u64,
    stats: BTreeStats,
}

impl BTree<OwnedStore> {
    /// Creates an empty tree that owns its blocks.
    pub fn new(options: BTreeOptions) -> Result<Self> {
        let layout = Layout::new(options.block_size, options.key_len, options.value_len)?;
        Ok(Self::with_store(
            OwnedStore::new(options.block_size),
            layout,
            options.compare,
        ))
    }
}

impl<S: BlockStore> BTree<S> {
    fn with_store(store: S, layout: Layout, compare: KeyCompare) -> Self {
        Self {
            store,
            layout,
            compare,
            root: None,
            height: 0,
            len: 0,
            stats: BTreeStats::default(),
        }
    }

    /// Clones the tree in O(1); the clone allocates only from `arena`.
    ///
    /// The source stays borrowed, and therefore frozen, while the clone lives.
    pub fn snapshot<'a>(&'a self, arena: &'a mut BlockArena) -> Result<BTree<CowStore<'a>>> {
        if arena.block_size() != self.layout.block_size {
            return Err(SifterError::Invalid("snapshot arena block size mismatch"));
        }
        let store = CowStore::new(self.store.layers(), arena);
        let mut clone = BTree::with_store(store, self.layout, self.compare);
        clone.root = self.root;
        clone.height = self.height;
        clone.len = self.len;
        Ok(clone)
    }

    /// Entry geometry of this tree.
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Number of stored entries.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Returns `true` if the tree holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Level of the root node; 0 when the root is a leaf or the tree is empty.
    pub fn height(&self) -> u8 {
        self.height
    }

    /// Generation new blocks of this tree are stamped with.
    pub fn generation(&self) -> u32 {
        self.store.generation()
    }

    /// Current root block.
    pub fn root(&self) -> Option<BlockId> {
        self.root
    }

    /// Backend of this tree.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Access the live statistics counters for this tree.
    pub fn stats(&self) -> &BTreeStats {
        &self.stats
    }

    /// Snapshot the current statistics counters.
    pub fn stats_snapshot(&self) -> BTreeStatsSnapshot {
        self.stats.snapshot()
    }

    /// Looks up the value stored under `key`.
    pub fn search(&self, key: &[u8]) -> Option<&[u8]> {
        self.stats.inc_searches();
        if key.len() != self.layout.key_len {
            return None;
        }
        let mut id = self.root?;
        loop {
            let block = self.store.block(id);
            let idx = self.layout.search(block, key, self.compare)?;
            if node::level(block) == 0 {
                let found = (self.compare)(self.layout.key(block, idx), key) == Ordering::Equal;
                return found.then(|| self.layout.value(block, idx));
            }
            id = self.layout.child(block, idx);
        }
    }

    /// Returns `true` if `key` is present.
    pub fn contains(&self, key: &[u8]) -> bool {
        self.search(key).is_some()
    }

    /// Inserts or overwrites `key`. Returns `false` if the identical pair was already stored.
    pub fn insert(&mut self, key: &[u8], value: &[u8]) -> Result<bool> {
        if key.len() != self.layout.key_len {
            return Err(SifterError::Invalid("key width does not match tree"));
        }
        if value.len() != self.layout.value_len {
            return Err(SifterError::Invalid("value width does not match tree"));
        }
        let root = match self.root {
            Some(root) => root,
            None => {
                let root = self.store.allocate()?;
                let generation = self.store.generation();
                node::init(self.store.block_mut(root), 0, generation);
                self.root = Some(root);
                self.height = 0;
                root
            }
        };
        match self.insert_at(root, Siblings::default(), key, value)? {
            Outcome::Unchanged => return Ok(false),
            Outcome::Updated(root) => self.root = Some(root),
            Outcome::Split(left, right) => self.grow_root(left, right)?,
            Outcome::Rebalanced { .. } | Outcome::Merged { .. } => {
                return Err(SifterError::Invariant("root adjusted against a sibling"))
            }
        }
        self.stats.inc_inserts();
        Ok(true)
    }

    /// Removes `key`. Returns `false` if it was absent.
    pub fn delete(&mut self, key: &[u8]) -> Result<bool> {
        if key.len() != self.layout.key_len {
            return Err(SifterError::Invalid("key width does not match tree"));
        }
        let Some(root) = self.root else {
            return Ok(false);
        };
        match self.delete_at(root, Siblings::default(), key, true)? {
            Outcome::Unchanged => return Ok(false),
            Outcome::Updated(root) => self.root = Some(root),
            Outcome::Split(..) | Outcome::Rebalanced { .. } | Outcome::Merged { .. } => {
                return Err(SifterError::Invariant("root adjusted against a sibling"))
            }
        }
        self.shrink_root();
        self.stats.inc_deletes();
        Ok(true)
    }

    /// Smallest entry.
    pub fn first(&self) -> Option<(&[u8], &[u8])> {
        self.edge_entry(false)
    }

    /// Largest entry.
    pub fn last(&self) -> Option<(&[u8], &[u8])> {
        self.edge_entry(true)
    }

    fn edge_entry(&self, rightmost: bool) -> Option<(&[u8], &[u8])> {
        let mut id = self.root?;
        loop {
            let block = self.store.block(id);
            let n = node::len(block);
            if n == 0 {
                return None;
            }
            let idx = if rightmost { n - 1 } else { 0 };
            if node::level(block) == 0 {
                return Some((self.layout.key(block, idx), self.layout.value(block, idx)));
            }
            id = self.layout.child(block, idx);
        }
    }

    /// Pre-order walk; block callbacks fire before descending.
    pub fn visit<V: Visitor + ?Sized>(&self, visitor: &mut V) -> ControlFlow<()> {
        let Some(root) = self.root else {
            return ControlFlow::Continue(());
        };
        visitor.block(root, self.height)?;
        self.visit_node(root, visitor)
    }

    fn visit_node<V: Visitor + ?Sized>(&self, id: BlockId, visitor: &mut V) -> ControlFlow<()> {
        let block = self.store.block(id);
        let level = node::level(block);
        for idx in 0..node::len(block) {
            visitor.key(level, self.layout.key(block, idx))?;
            if level == 0 {
                visitor.value(self.layout.value(block, idx))?;
            } else {
                let child = self.layout.child(block, idx);
                visitor.block(child, level - 1)?;
                self.visit_node(child, visitor)?;
            }
        }
        ControlFlow::Continue(())
    }

    /// Iterates over entries in key order.
    pub fn iter(&self) -> Iter<'_, S> {
        let mut stack = SmallVec::new();
        if let Some(root) = self.root {
            stack.push((root, 0));
        }
        Iter { tree: self, stack }
    }

    /// Checks ordering, occupancy, separator keys, levels and the element count.
    pub fn verify(&self) -> Result<()> {
        let Some(root) = self.root else {
            return if self.len == 0 {
                Ok(())
            } else {
                Err(SifterError::Corruption("empty tree with non-zero length"))
            };
        };
        let mut count = 0u64;
        let mut prev: Option<KeyBuf> = None;
        self.verify_node(root, self.height, true, None, &mut count, &mut prev)?;
        if count != self.len {
            return Err(SifterError::Corruption("element count mismatch"));
        }
        Ok(())
    }

    fn verify_node(
        &self,
        id: BlockId,
        expected_level: u8,
        is_root: bool,
        separator: Option<&[u8]>,
        count: &mut u64,
        prev: &mut Option<KeyBuf>,
    ) -> Result<()> {
        let block = self.store.block(id);
        let level = node::level(block);
        let n = node::len(block);
        if level != expected_level {
            return Err(SifterError::Corruption("node level mismatch"));
        }
        if node::generation(block) != id.generation() {
            return Err(SifterError::Corruption("block generation tag mismatch"));
        }
        if n == 0 || n >= self.layout.max_entries(level) {
            return Err(SifterError::Corruption("node occupancy out of range"));
        }
        if !is_root && n < self.layout.min_entries(level) {
            return Err(SifterError::Corruption("non-root node underfull"));
        }
        if is_root && level > 0 && n < 2 {
            return Err(SifterError::Corruption("internal root with a single child"));
        }
        if let Some(separator) = separator {
            if (self.compare)(self.layout.key(block, 0), separator) != Ordering::Equal {
                return Err(SifterError::Corruption("separator differs from child key"));
            }
        }
        for idx in 1..n {
            let ordered = (self.compare)(self.layout.key(block, idx - 1), self.layout.key(block, idx));
            if ordered != Ordering::Less {
                return Err(SifterError::Corruption("node keys out of order"));
            }
        }
        if level == 0 {
            for idx in 0..n {
                let key = self.layout.key(block, idx);
                if let Some(prev) = prev.as_ref() {
                    if (self.compare)(prev, key) != Ordering::Less {
                        return Err(SifterError::Corruption("leaf keys out of order"));
                    }
                }
                *prev = Some(KeyBuf::from_slice(key));
            }
            *count += n as u64;
            return Ok(());
        }
        for idx in 0..n {
            let child = self.layout.child(block, idx);
            let separator = self.layout.key(block, idx);
            self.verify_node(child, level - 1, false, Some(separator), count, prev)?;
        }
        Ok(())
    }

    fn insert_at(
        &mut self,
        id: BlockId,
        siblings: Siblings,
        key: &[u8],
        value: &[u8],
    ) -> Result<Outcome> {
        let block = self.store.block(id);
        let found = self.layout.search(block, key, self.compare);
        if node::level(block) == 0 {
            let pos = match found {
                Some(idx) if (self.compare)(self.layout.key(block, idx), key) == Ordering::Equal => {
                    if self.layout.value(block, idx) == value {
                        return Ok(Outcome::Unchanged);
                    }
                    let id = self.writable(id)?;
                    self.layout.set_value(self.store.block_mut(id), idx, value);
                    return Ok(Outcome::Updated(id));
                }
                Some(idx) => idx + 1,
                None => 0,
            };
            let id = self.writable(id)?;
            self.layout
                .insert_value(self.store.block_mut(id), pos, key, value);
            self.len += 1;
            return self.adjust_after_insert(id, siblings);
        }

        let idx = found.unwrap_or(0);
        let child = self.layout.child(block, idx);
        let child_siblings = self.siblings_of(block, idx);
        let outcome = self.insert_at(child, child_siblings, key, value)?;
        if let Outcome::Unchanged = outcome {
            return Ok(Outcome::Unchanged);
        }
        let id = self.writable(id)?;
        self.apply(id, idx, outcome)?;
        self.adjust_after_insert(id, siblings)
    }

    fn delete_at(
        &mut self,
        id: BlockId,
        siblings: Siblings,
        key: &[u8],
        is_root: bool,
    ) -> Result<Outcome> {
        let block = self.store.block(id);
        let Some(idx) = self.layout.search(block, key, self.compare) else {
            return Ok(Outcome::Unchanged);
        };
        if node::level(block) == 0 {
            if (self.compare)(self.layout.key(block, idx), key) != Ordering::Equal {
                return Ok(Outcome::Unchanged);
            }
            let id = self.writable(id)?;
            self.layout.remove(self.store.block_mut(id), idx);
            self.len -= 1;
            return self.adjust_after_delete(id, siblings, is_root);
        }

        let child = self.layout.child(block, idx);
        let child_siblings = self.siblings_of(block, idx);
        let outcome = self.delete_at(child, child_siblings, key, false)?;
        if let Outcome::Unchanged = outcome {
            return Ok(Outcome::Unchanged);
        }
        let id = self.writable(id)?;
        self.apply(id, idx, outcome)?;
        self.adjust_after_delete(id, siblings, is_root)
    }

    fn adjust_after_insert(&mut self, id: BlockId, siblings: Siblings) -> Result<Outcome> {
        if !self.layout.is_full(self.store.block(id)) {
            return Ok(Outcome::Updated(id));
        }
        if let Some(left) = siblings.left {
            if self.layout.can_absorb(self.store.block(left)) {
                let (left, right) = self.rebalance(left, id)?;
                return Ok(Outcome::Rebalanced {
                    side: Side::Left,
                    left,
                    right,
                });
            }
        }
        if let Some(right) = siblings.right {
            if self.layout.can_absorb(self.store.block(right)) {
                let (left, right) = self.rebalance(id, right)?;
                return Ok(Outcome::Rebalanced {
                    side: Side::Right,
                    left,
                    right,
                });
            }
        }
        let (left, right) = self.split(id)?;
        Ok(Outcome::Split(left, right))
    }

    fn adjust_after_delete(
        &mut self,
        id: BlockId,
        siblings: Siblings,
        is_root: bool,
    ) -> Result<Outcome> {
        if is_root || !self.layout.is_underfull(self.store.block(id)) {
            return Ok(Outcome::Updated(id));
        }
        if let Some(right) = siblings.right {
            if self.layout.can_lend(self.store.block(right)) {
                let (left, right) = self.rebalance(id, right)?;
                return Ok(Outcome::Rebalanced {
                    side: Side::Right,
                    left,
                    right,
                });
            }
        }
        if let Some(left) = siblings.left {
            if self.layout.can_lend(self.store.block(left)) {
                let (left, right) = self.rebalance(left, id)?;
                return Ok(Outcome::Rebalanced {
                    side: Side::Left,
                    left,
                    right,
                });
            }
        }
        if let Some(left) = siblings.left {
            let into = self.merge(left, id)?;
            return Ok(Outcome::Merged {
                side: Side::Left,
                into,
            });
        }
        if let Some(right) = siblings.right {
            let into = self.merge(id, right)?;
            return Ok(Outcome::Merged {
                side: Side::Right,
                into,
            });
        }
        Err(SifterError::Invariant("underfull node without siblings"))
    }

    /// Writes a child's outcome into parent entry `idx` and its neighbours.
    fn apply(&mut self, parent: BlockId, idx: usize, outcome: Outcome) -> Result<()> {
        match outcome {
            Outcome::Unchanged => {}
            Outcome::Updated(child) => self.set_entry(parent, idx, child)?,
            Outcome::Split(left, right) => {
                self.set_entry(parent, idx, left)?;
                let key = self.first_key(right)?;
                self.layout
                    .insert_child(self.store.block_mut(parent), idx + 1, &key, right);
            }
            Outcome::Rebalanced { side, left, right } => {
                let at = match side {
                    Side::Left => idx
                        .checked_sub(1)
                        .ok_or(SifterError::Invariant("left pair at first slot"))?,
                    Side::Right => idx,
                };
                self.set_entry(parent, at, left)?;
                self.set_entry(parent, at + 1, right)?;
            }
            Outcome::Merged { side, into } => {
                let (at, gone) = match side {
                    Side::Left => (
                        idx.checked_sub(1)
                            .ok_or(SifterError::Invariant("left merge at first slot"))?,
                        idx,
                    ),
                    Side::Right => (idx, idx + 1),
                };
                self.set_entry(parent, at, into)?;
                self.layout.remove(self.store.block_mut(parent), gone);
            }
        }
        Ok(())
    }

    fn set_entry(&mut self, parent: BlockId, idx: usize, child: BlockId) -> Result<()> {
        let key = self.first_key(child)?;
        let block = self.store.block_mut(parent);
        self.layout.set_key(block, idx, &key);
        self.layout.set_child(block, idx, child);
        Ok(())
    }

    fn first_key(&self, id: BlockId) -> Result<KeyBuf> {
        let block = self.store.block(id);
        if node::len(block) == 0 {
            return Err(SifterError::Invariant("empty node referenced by parent"));
        }
        Ok(KeyBuf::from_slice(self.layout.key(block, 0)))
    }

    fn siblings_of(&self, block: &[u8], idx: usize) -> Siblings {
        Siblings {
            left: idx.checked_sub(1).map(|i| self.layout.child(block, i)),
            right: (idx + 1 < node::len(block)).then(|| self.layout.child(block, idx + 1)),
        }
    }

    /// Copy-on-write: returns a block of the current generation holding `id`'s contents.
    fn writable(&mut self, id: BlockId) -> Result<BlockId> {
        let generation = self.store.generation();
        if node::generation(self.store.block(id)) == generation {
            return Ok(id);
        }
        let copy = self.store.allocate()?;
        let (dst, src) = self.store.block_with_source(copy, id);
        dst.copy_from_slice(src);
        node::set_generation(dst, generation);
        self.store.release(id);
        self.stats.inc_cow_copies();
        Ok(copy)
    }

    /// Evens out two adjacent siblings; the larger one donates.
    fn rebalance(&mut self, left: BlockId, right: BlockId) -> Result<(BlockId, BlockId)> {
        let left = self.writable(left)?;
        let right = self.writable(right)?;
        let layout = self.layout;
        let (l, r) = self.store.block_pair_mut(left, right);
        let (nl, nr) = (node::len(l), node::len(r));
        let half = (nl + nr) / 2;
        match nl.cmp(&nr) {
            Ordering::Greater => {
                let moved = nl - half;
                layout.shift(r, 0, moved, nr);
                layout.copy_entries(r, 0, l, half, moved);
                node::set_len(l, half);
                node::set_len(r, nr + moved);
            }
            Ordering::Less => {
                let moved = nr - half;
                layout.copy_entries(l, nl, r, 0, moved);
                layout.shift(r, moved, 0, half);
                node::set_len(l, nl + moved);
                node::set_len(r, half);
            }
            Ordering::Equal => {
                return Err(SifterError::Invariant("rebalance between equal siblings"));
            }
        }
        self.stats.inc_rebalances();
        Ok((left, right))
    }

    /// Moves the upper half of a full node into a fresh right sibling.
    fn split(&mut self, id: BlockId) -> Result<(BlockId, BlockId)> {
        let left = self.writable(id)?;
        let right = self.store.allocate()?;
        let generation = self.store.generation();
        let layout = self.layout;
        let (l, r) = self.store.block_pair_mut(left, right);
        let n = node::len(l);
        let half = n / 2;
        node::init(r, node::level(l), generation);
        layout.copy_entries(r, 0, l, half, n - half);
        node::set_len(l, half);
        node::set_len(r, n - half);
        self.stats.inc_splits();
        Ok((left, right))
    }

    /// Appends `right` to `left` and frees `right`.
    fn merge(&mut self, left: BlockId, right: BlockId) -> Result<BlockId> {
        let left = self.writable(left)?;
        let layout = self.layout;
        let (l, r) = self.store.block_with_source(left, right);
        let (nl, nr) = (node::len(l), node::len(r));
        if nl + nr >= layout.max_entries(node::level(l)) {
            return Err(SifterError::Invariant("merged node would overflow"));
        }
        layout.copy_entries(l, nl, r, 0, nr);
        node::set_len(l, nl + nr);
        self.store.release(right);
        self.stats.inc_merges();
        Ok(left)
    }

    fn grow_root(&mut self, left: BlockId, right: BlockId) -> Result<()> {
        let left_key = self.first_key(left)?;
        let right_key = self.first_key(right)?;
        let root = self.store.allocate()?;
        let generation = self.store.generation();
        let level = self.height + 1;
        let block = self.store.block_mut(root);
        node::init(block, level, generation);
        self.layout.insert_child(block, 0, &left_key, left);
        self.layout.insert_child(block, 1, &right_key, right);
        self.root = Some(root);
        self.height = level;
        self.stats.inc_root_grows();
        Ok(())
    }

    fn shrink_root(&mut self) {
        let Some(root) = self.root else {
            return;
        };
        let block = self.store.block(root);
        let (level, n) = (node::level(block), node::len(block));
        if level > 0 && n == 1 {
            let child = self.layout.child(block, 0);
            self.store.release(root);
            self.root = Some(child);
            self.height = node::level(self.store.block(child));
            self.stats.inc_root_shrinks();
        } else if level == 0 && n == 0 {
            self.store.release(root);
            self.root = None;
            self.height = 0;
            self.stats.inc_root_shrinks();
        }
    }
}

/// In-order iterator over a tree's entries.
pub struct Iter<'t, S: BlockStore> {
    tree: &'t BTree<S>,
    stack: SmallVec<[(BlockId, usize); 8]>,
}

impl<'t, S: BlockStore> Iterator for Iter<'t, S> {
    type Item = (&'t [u8], &'t [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        let tree = self.tree;
        loop {
            let (id, next) = self.stack.last_mut()?;
            let block = tree.store.block(*id);
            if *next >= node::len(block) {
                self.stack.pop();
                continue;
            }
            let idx = *next;
            *next += 1;
            if node::level(block) == 0 {
                return Some((tree.layout.key(block, idx), tree.layout.value(block, idx)));
            }
            let child = tree.layout.child(block, idx);
            self.stack.push((child, 0));
        }
    }
}
