//! Sifter: approximate-match document filtering.
//!
//! Queries (word sets with an exact, Hamming or edit-distance threshold) are
//! registered in a [`Catalogue`](storage::catalog::Catalogue) built on a
//! fixed-width copy-on-write B-tree. Each document is matched against a
//! private clone of the catalogue's operator ranking, so concurrent matches
//! never contend. [`Engine`] wraps the catalogue, the matcher and a worker
//! pool behind a small registration and matching API.

#![warn(missing_docs)]

pub mod cli;
pub mod dispatch;
pub mod document;
pub mod engine;
pub mod matcher;
pub mod options;
pub mod primitives;
pub mod storage;
pub mod types;

pub use engine::{Engine, EngineStatsSnapshot};
pub use matcher::{MatchResult, MatchStats};
pub use options::EngineOptions;
pub use storage::catalog::Registration;
pub use types::{DocId, MatchType, QueryId, Result, SifterError};
