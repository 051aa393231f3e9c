//! Ordered index engine and the query catalogue built on it.

/// Fixed-width copy-on-write B-tree.
///
/// Backs every catalogue index and the per-document rank clones.
pub mod btree;

/// Query, operator and rank indexes shared by all matcher slots.
pub mod catalog;
