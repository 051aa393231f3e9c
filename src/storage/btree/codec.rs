use std::marker::PhantomData;
use std::ops::ControlFlow;

use smallvec::SmallVec;

use super::store::{BlockStore, CowStore, OwnedStore};
use super::tree::{BTree, BTreeOptions};
use crate::primitives::arena::BlockArena;
use crate::primitives::bytes::ord;
use crate::types::{OpId, QueryId, RecordId, Result};

type Buf = SmallVec<[u8; 16]>;

/// Fixed-width, order-preserving encoding for typed tree entries.
pub trait FixedCodec: Sized {
    /// Encoded width in bytes.
    const LEN: usize;

    /// Writes the encoding into `out`, which is exactly `LEN` bytes.
    fn encode(&self, out: &mut [u8]);

    /// Reads a value back from `src`.
    fn decode(src: &[u8]) -> Self;
}

impl FixedCodec for () {
    const LEN: usize = 0;

    fn encode(&self, _out: &mut [u8]) {}

    fn decode(_src: &[u8]) -> Self {}
}

impl FixedCodec for u32 {
    const LEN: usize = 4;

    fn encode(&self, out: &mut [u8]) {
        ord::put_u32_be(out, *self);
    }

    fn decode(src: &[u8]) -> Self {
        ord::get_u32_be(src)
    }
}

impl FixedCodec for u64 {
    const LEN: usize = 8;

    fn encode(&self, out: &mut [u8]) {
        ord::put_u64_be(out, *self);
    }

    fn decode(src: &[u8]) -> Self {
        ord::get_u64_be(src)
    }
}

macro_rules! u32_newtype_codec {
    ($($ty:ident),*) => {
        $(
            impl FixedCodec for $ty {
                const LEN: usize = 4;

                fn encode(&self, out: &mut [u8]) {
                    ord::put_u32_be(out, self.0);
                }

                fn decode(src: &[u8]) -> Self {
                    $ty(ord::get_u32_be(src))
                }
            }
        )*
    };
}

u32_newtype_codec!(QueryId, OpId, RecordId);

fn encode<T: FixedCodec>(value: &T) -> Buf {
    let mut buf = Buf::from_elem(0, T::LEN);
    value.encode(&mut buf);
    buf
}

/// Typed view over a [`BTree`] whose keys and values implement [`FixedCodec`].
pub struct FixedMap<K, V, S: BlockStore = OwnedStore> {
    tree: BTree<S>,
    _marker: PhantomData<(K, V)>,
}

impl<K: FixedCodec, V: FixedCodec> FixedMap<K, V, OwnedStore> {
    /// Creates an empty owning map with `block_size` nodes.
    pub fn new(block_size: usize) -> Result<Self> {
        let options = BTreeOptions::new(K::LEN, V::LEN).with_block_size(block_size);
        Ok(Self {
            tree: BTree::new(options)?,
            _marker: PhantomData,
        })
    }
}

impl<K: FixedCodec, V: FixedCodec, S: BlockStore> FixedMap<K, V, S> {
    /// Copy-on-write clone allocating from `arena`.
    pub fn snapshot<'a>(&'a self, arena: &'a mut BlockArena) -> Result<FixedMap<K, V, CowStore<'a>>> {
        Ok(FixedMap {
            tree: self.tree.snapshot(arena)?,
            _marker: PhantomData,
        })
    }

    /// Underlying untyped tree.
    pub fn tree(&self) -> &BTree<S> {
        &self.tree
    }

    /// Number of entries.
    pub fn len(&self) -> u64 {
        self.tree.len()
    }

    /// Returns `true` if the map is empty.
    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Value stored under `key`.
    pub fn get(&self, key: &K) -> Option<V> {
        self.tree.search(&encode(key)).map(V::decode)
    }

    /// Returns `true` if `key` is present.
    pub fn contains_key(&self, key: &K) -> bool {
        self.tree.contains(&encode(key))
    }

    /// Inserts or overwrites; `false` when the identical entry already existed.
    pub fn insert(&mut self, key: &K, value: &V) -> Result<bool> {
        self.tree.insert(&encode(key), &encode(value))
    }

    /// Removes `key`; `false` when it was absent.
    pub fn remove(&mut self, key: &K) -> Result<bool> {
        self.tree.delete(&encode(key))
    }

    /// Smallest entry.
    pub fn first(&self) -> Option<(K, V)> {
        self.tree.first().map(|(k, v)| (K::decode(k), V::decode(v)))
    }

    /// Largest entry.
    pub fn last(&self) -> Option<(K, V)> {
        self.tree.last().map(|(k, v)| (K::decode(k), V::decode(v)))
    }

    /// Visits entries in key order until `f` breaks.
    pub fn for_each(&self, mut f: impl FnMut(K, V) -> ControlFlow<()>) {
        for (k, v) in self.tree.iter() {
            if f(K::decode(k), V::decode(v)).is_break() {
                return;
            }
        }
    }

    /// Keys in ascending order.
    pub fn keys(&self) -> Vec<K> {
        self.tree.iter().map(|(k, _)| K::decode(k)).collect()
    }

    /// Checks the underlying tree's structure.
    pub fn verify(&self) -> Result<()> {
        self.tree.verify()
    }
}
