use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::types::{MatchType, OpId, RecordId};

/// Structural identity of a query: two queries with equal signatures match
/// exactly the same documents.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct QuerySignature {
    pub match_type: MatchType,
    pub threshold: u32,
    pub ops: SmallVec<[OpId; 5]>,
}

/// Hash-based duplicate detector mapping signatures to canonical records.
pub(crate) struct DedupTable {
    map: FxHashMap<QuerySignature, RecordId>,
}

impl DedupTable {
    pub fn with_capacity(capacity: usize) -> Self {
        let mut map = FxHashMap::default();
        map.reserve(capacity);
        Self { map }
    }

    pub fn get(&self, signature: &QuerySignature) -> Option<RecordId> {
        self.map.get(signature).copied()
    }

    pub fn insert(&mut self, signature: QuerySignature, record: RecordId) {
        self.map.insert(signature, record);
    }

    pub fn remove(&mut self, signature: &QuerySignature) -> Option<RecordId> {
        self.map.remove(signature)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }
}
