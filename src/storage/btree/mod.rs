#![forbid(unsafe_code)]

//! Fixed-width, copy-on-write B-tree over arena blocks.
//!
//! Every entry has the same key and value width, which keeps nodes
//! binary-searchable without slot directories. Clones share all blocks
//! with their source and copy a node only the first time they write it.

mod codec;
pub mod node;
mod stats;
mod store;
mod tree;

pub use codec::{FixedCodec, FixedMap};
pub use node::{bytewise, KeyCompare, Layout};
pub use stats::{BTreeStats, BTreeStatsSnapshot};
pub use store::{BlockStore, CowStore, OwnedStore};
pub use tree::{BTree, BTreeOptions, Iter, Visitor};

#[cfg(test)]
mod tests;
