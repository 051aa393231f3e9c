use smallvec::SmallVec;

use crate::primitives::bytes::ord;
use crate::storage::btree::{FixedCodec, FixedMap};
use crate::types::{MatchType, OpId, QueryId, RecordId, LEVELS, THRESHOLD_BUCKETS};

/// Reference counts per (match type, threshold) bucket.
pub type RefCounts = [[u32; THRESHOLD_BUCKETS]; LEVELS];

/// Position of an operator in the rank index.
///
/// Encoded so that bytewise order is descending reference count, then
/// ascending operator handle.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RankKey {
    /// Active references when the key was written.
    pub refcnt: u32,
    /// Operator the key ranks.
    pub op: OpId,
}

impl FixedCodec for RankKey {
    const LEN: usize = 8;

    fn encode(&self, out: &mut [u8]) {
        ord::put_u32_be(out, u32::MAX - self.refcnt);
        ord::put_u32_be(&mut out[4..], self.op.0);
    }

    fn decode(src: &[u8]) -> Self {
        RankKey {
            refcnt: u32::MAX - ord::get_u32_be(src),
            op: OpId(ord::get_u32_be(&src[4..])),
        }
    }
}

/// One distinct query word and the canonical queries that use it.
#[derive(Debug)]
pub struct Operator {
    pub(crate) word: Box<[u8]>,
    pub(crate) refcnt: u32,
    pub(crate) dirty: bool,
    pub(crate) nr_refs: RefCounts,
    pub(crate) refs: [[Vec<RecordId>; THRESHOLD_BUCKETS]; LEVELS],
}

impl Operator {
    pub(crate) fn new(word: &[u8]) -> Self {
        Self {
            word: word.into(),
            refcnt: 0,
            dirty: false,
            nr_refs: RefCounts::default(),
            refs: Default::default(),
        }
    }

    /// Word bytes.
    pub fn word(&self) -> &[u8] {
        &self.word
    }

    /// Number of canonical queries referencing this word.
    pub fn refcnt(&self) -> u32 {
        self.refcnt
    }

    /// Reference counts per (match type, threshold).
    pub fn nr_refs(&self) -> &RefCounts {
        &self.nr_refs
    }

    /// Records referencing this word at `level` with `threshold`.
    pub fn refs(&self, level: usize, threshold: usize) -> &[RecordId] {
        &self.refs[level][threshold]
    }

    /// Whether the operator is parked awaiting a rank rebuild.
    pub fn is_parked(&self) -> bool {
        self.dirty
    }

    pub(crate) fn rank_key(&self, id: OpId) -> RankKey {
        RankKey {
            refcnt: self.refcnt,
            op: id,
        }
    }
}

/// Canonical query shared by every id registered with the same shape.
pub struct QueryRecord {
    pub(crate) qid: QueryId,
    pub(crate) match_type: MatchType,
    pub(crate) threshold: u32,
    pub(crate) ops: SmallVec<[OpId; 5]>,
    pub(crate) aliases: Option<FixedMap<QueryId, ()>>,
}

impl QueryRecord {
    /// Id the record answers to.
    pub fn qid(&self) -> QueryId {
        self.qid
    }

    /// Distance metric.
    pub fn match_type(&self) -> MatchType {
        self.match_type
    }

    /// Distance threshold.
    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Operators sorted by handle, without repeats.
    pub fn ops(&self) -> &[OpId] {
        &self.ops
    }

    /// Alias ids in ascending order.
    pub fn aliases(&self) -> Vec<QueryId> {
        self.aliases.as_ref().map(FixedMap::keys).unwrap_or_default()
    }

    /// Number of alias ids.
    pub fn alias_count(&self) -> u64 {
        self.aliases.as_ref().map_or(0, FixedMap::len)
    }
}
