#![forbid(unsafe_code)]
//! Identifiers, match kinds and the crate-wide error type.

use std::fmt;

use serde::Serialize;

/// Largest distance threshold a query may request.
pub const MAX_DIST: u32 = 3;
/// Number of threshold buckets per match type (`0..=MAX_DIST`).
pub const THRESHOLD_BUCKETS: usize = MAX_DIST as usize + 1;
/// Number of escalation levels (exact, Hamming, edit).
pub const LEVELS: usize = 3;
/// Hard cap on indexed word length; word keys are padded to `MAX_WORD_LEN_LIMIT + 1` bytes.
pub const MAX_WORD_LEN_LIMIT: usize = 31;

/// Caller-assigned query identifier.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize)]
#[serde(transparent)]
pub struct QueryId(pub u32);
/// Caller-assigned document identifier.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize)]
#[serde(transparent)]
pub struct DocId(pub u32);
/// Handle of an operator record inside the catalogue.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct OpId(pub u32);
/// Handle of a canonical query record inside the catalogue.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct RecordId(pub u32);

/// Opaque block reference: the generation that owns the block plus its arena index.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct BlockId(pub u64);

impl BlockId {
    /// Packs a generation tag and an arena index.
    pub const fn new(generation: u32, index: u32) -> Self {
        BlockId(((generation as u64) << 32) | index as u64)
    }

    /// Generation of the arena the block lives in.
    pub const fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Index of the block within its arena.
    pub const fn index(self) -> u32 {
        self.0 as u32
    }
}

/// Distance metric a query applies to each of its words.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub enum MatchType {
    /// Word must occur verbatim.
    Exact = 0,
    /// Same-length word within the Hamming threshold.
    Hamming = 1,
    /// Any word within the Levenshtein threshold.
    Edit = 2,
}

impl MatchType {
    /// Escalation level this match type resolves at.
    pub const fn level(self) -> usize {
        self as usize
    }

    /// Decodes the numeric form used by workload files.
    pub fn from_u32(value: u32) -> Result<Self> {
        match value {
            0 => Ok(MatchType::Exact),
            1 => Ok(MatchType::Hamming),
            2 => Ok(MatchType::Edit),
            _ => Err(SifterError::Invalid("unknown match type")),
        }
    }
}

/// Errors surfaced by the engine.
#[derive(thiserror::Error, Debug)]
pub enum SifterError {
    /// Underlying I/O failure (configuration or workload files).
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    /// Argument rejected before any state changed.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// Internal contract breach; the operation was aborted.
    #[error("invariant violated: {0}")]
    Invariant(&'static str),
    /// Structural check failed.
    #[error("corruption: {0}")]
    Corruption(&'static str),
    /// A bounded arena ran out of blocks.
    #[error("block arena exhausted after {capacity} blocks")]
    ArenaExhausted {
        /// Number of blocks the arena was allowed to hand out.
        capacity: usize,
    },
    /// The query id is already registered as a canonical query or an alias.
    #[error("query {0} is already registered")]
    DuplicateQuery(QueryId),
    /// Configuration could not be parsed or validated.
    #[error("config: {0}")]
    Config(String),
    /// A worker failed to match a document.
    #[error("document {doc} failed to match: {source}")]
    MatchFailed {
        /// Document that was being matched.
        doc: DocId,
        /// Underlying failure.
        #[source]
        source: Box<SifterError>,
    },
    /// A worker thread panicked while running a job.
    #[error("worker {slot} panicked: {message}")]
    WorkerPanic {
        /// Slot of the worker that panicked.
        slot: usize,
        /// Panic payload, when it was a string.
        message: String,
    },
    /// The engine has been shut down.
    #[error("engine is shut down")]
    Shutdown,
}

/// Crate-wide result alias.
pub type Result<T, E = SifterError> = std::result::Result<T, E>;

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.generation(), self.index())
    }
}

impl From<u32> for QueryId {
    fn from(value: u32) -> Self {
        QueryId(value)
    }
}

impl From<QueryId> for u32 {
    fn from(value: QueryId) -> Self {
        value.0
    }
}

impl From<u32> for DocId {
    fn from(value: u32) -> Self {
        DocId(value)
    }
}
