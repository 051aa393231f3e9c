//! Low-level primitives shared by the index, catalogue and matcher.
//!
//! Includes byte encoders, block and record arenas, string-distance
//! oracles and the single-writer gate.

/// Block arenas and handle-based record slabs.
pub mod arena;

/// Byte-level utilities and order-preserving encoders.
pub mod bytes;

/// Concurrency primitives and synchronization.
///
/// Coordinates catalogue writers with in-flight document matches.
pub mod concurrency;

/// Exact, Hamming and banded edit distance.
pub mod distance;
