#![forbid(unsafe_code)]

//! Shared query catalogue.
//!
//! The catalogue owns three ordered indexes (word to operator, query id to
//! record, operator rank) and a hash-based duplicate detector. Operators and
//! query records live in slabs and are addressed by stable handles. Changes
//! that may move an operator in the rank index park it on a dirty list; the
//! next [`Catalogue::rebuild_ranks`] reinserts or destroys parked operators.
//!
//! Every mutating call requires exclusive access; matching reads the
//! catalogue through `&self` only.

mod dedup;
mod operator;


use serde::Serialize;
use smallvec::SmallVec;
use tracing::{debug, warn};

pub use operator::{Operator, QueryRecord, RankKey, RefCounts};

use self::dedup::{DedupTable, QuerySignature};
use crate::matcher::SlotState;
use crate::options::EngineOptions;
use crate::primitives::arena::Slab;
use crate::primitives::bytes::ord;
use crate::storage::btree::{BTree, BTreeOptions, FixedMap};
use crate::types::{MatchType, OpId, QueryId, RecordId, Result, SifterError, MAX_DIST};

const OP_VALUE_LEN: usize = 4;

/// Outcome of a successful registration.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Registration {
    /// The query became a new canonical record.
    Canonical,
    /// The query duplicates an existing one and was filed as its alias.
    Alias(QueryId),
}

/// Point-in-time counts, suitable for logging or JSON output.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CatalogueSnapshot {
    /// Registered ids, canonical and alias.
    pub queries: u64,
    /// Canonical query records.
    pub records: usize,
    /// Signatures held by the duplicate detector.
    pub signatures: usize,
    /// Live operators.
    pub operators: usize,
    /// Operators present in the rank index.
    pub ranked: u64,
    /// Words summed over canonical records.
    pub words: u64,
    /// Operators parked until the next rank rebuild.
    pub dirty: usize,
}

/// Query and operator catalogue shared by every matcher slot.
pub struct Catalogue {
    options: EngineOptions,
    words: BTree,
    queries: FixedMap<QueryId, RecordId>,
    ranks: FixedMap<RankKey, ()>,
    dedup: DedupTable,
    operators: Slab<Operator>,
    records: Slab<QueryRecord>,
    dirty: Vec<OpId>,
    word_count: u64,
}

impl Catalogue {
    /// Creates an empty catalogue. `options` must already be validated.
    pub fn new(options: &EngineOptions) -> Result<Self> {
        let words = BTree::new(
            BTreeOptions::new(options.max_word_len + 1, OP_VALUE_LEN)
                .with_block_size(options.block_size),
        )?;
        Ok(Self {
            options: options.clone(),
            words,
            queries: FixedMap::new(options.block_size)?,
            ranks: FixedMap::new(options.block_size)?,
            dedup: DedupTable::with_capacity(options.dedup_capacity),
            operators: Slab::new(),
            records: Slab::new(),
            dirty: Vec::new(),
            word_count: 0,
        })
    }

    /// Options the catalogue was built with.
    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Allocates the private per-document state for matcher slot `slot`.
    pub fn new_slot(&self, slot: usize) -> SlotState {
        SlotState::new(slot, &self.options)
    }

    /// Registers `qid` with the words of `text`.
    ///
    /// A threshold of zero forces exact matching and exact matching forces a
    /// threshold of zero. Arguments are validated before anything changes.
    pub fn register(
        &mut self,
        qid: QueryId,
        text: &str,
        match_type: MatchType,
        threshold: u32,
    ) -> Result<Registration> {
        if threshold > MAX_DIST {
            return Err(SifterError::Invalid("threshold exceeds maximum distance"));
        }
        let (match_type, threshold) = match (match_type, threshold) {
            (_, 0) | (MatchType::Exact, _) => (MatchType::Exact, 0),
            other => other,
        };
        if qid.0 >= self.options.max_query_id {
            return Err(SifterError::Invalid("query id out of range"));
        }
        if self.queries.contains_key(&qid) {
            return Err(SifterError::DuplicateQuery(qid));
        }
        let words = self.tokenize(text)?;

        let mut ops: SmallVec<[OpId; 5]> = SmallVec::new();
        let mut fresh: SmallVec<[&[u8]; 5]> = SmallVec::new();
        for &word in &words {
            match self.lookup_word(word) {
                Some(op) => ops.push(op),
                None if fresh.contains(&word) => {}
                None => fresh.push(word),
            }
        }

        if fresh.is_empty() {
            ops.sort_unstable();
            ops.dedup();
            let signature = QuerySignature {
                match_type,
                threshold,
                ops: ops.clone(),
            };
            if let Some(rid) = self.dedup.get(&signature) {
                return self.add_alias(rid, qid);
            }
        }

        for word in fresh {
            ops.push(self.create_operator(word)?);
        }
        ops.sort_unstable();
        ops.dedup();

        let rid = RecordId(self.records.insert(QueryRecord {
            qid,
            match_type,
            threshold,
            ops: ops.clone(),
            aliases: None,
        }));
        self.queries.insert(&qid, &rid)?;
        self.dedup.insert(
            QuerySignature {
                match_type,
                threshold,
                ops: ops.clone(),
            },
            rid,
        );
        let (level, bucket) = (match_type.level(), threshold as usize);
        for &op in &ops {
            self.park(op)?;
            let operator = self.operator_mut(op)?;
            operator.refcnt += 1;
            operator.nr_refs[level][bucket] += 1;
            operator.refs[level][bucket].push(rid);
        }
        self.word_count += ops.len() as u64;
        debug!(
            qid = qid.0,
            record = rid.0,
            ?match_type,
            threshold,
            words = ops.len(),
            "catalogue.register"
        );
        Ok(Registration::Canonical)
    }

    /// Removes `qid`. Returns `false` when the id was not registered.
    pub fn unregister(&mut self, qid: QueryId) -> Result<bool> {
        let Some(rid) = self.queries.get(&qid) else {
            warn!(qid = qid.0, "catalogue.unregister: unknown query id");
            return Ok(false);
        };
        let record = self
            .records
            .get_mut(rid.0)
            .ok_or(SifterError::Invariant("query id maps to a freed record"))?;

        if record.qid != qid {
            let aliases = record
                .aliases
                .as_mut()
                .ok_or(SifterError::Invariant("alias missing from its record"))?;
            aliases.remove(&qid)?;
            if aliases.is_empty() {
                record.aliases = None;
            }
            self.queries.remove(&qid)?;
            debug!(qid = qid.0, canonical = record.qid.0, "catalogue.unregister alias");
            return Ok(true);
        }

        if let Some(aliases) = record.aliases.as_mut() {
            let (promoted, ()) = aliases
                .last()
                .ok_or(SifterError::Invariant("empty alias set left in place"))?;
            aliases.remove(&promoted)?;
            if aliases.is_empty() {
                record.aliases = None;
            }
            record.qid = promoted;
            self.queries.remove(&qid)?;
            debug!(qid = qid.0, promoted = promoted.0, "catalogue.unregister promoted alias");
            return Ok(true);
        }

        let signature = QuerySignature {
            match_type: record.match_type,
            threshold: record.threshold,
            ops: record.ops.clone(),
        };
        let (level, bucket) = (record.match_type.level(), record.threshold as usize);
        self.dedup.remove(&signature);
        self.queries.remove(&qid)?;
        let key_len = self.words.layout().key_len;
        for &op in &signature.ops {
            self.park(op)?;
            let operator = self
                .operators
                .get_mut(op.0)
                .ok_or(SifterError::Invariant("operator handle freed"))?;
            let refs = &mut operator.refs[level][bucket];
            let pos = refs
                .iter()
                .position(|&r| r == rid)
                .ok_or(SifterError::Invariant("record missing from operator references"))?;
            refs.swap_remove(pos);
            operator.nr_refs[level][bucket] -= 1;
            operator.refcnt -= 1;
            if operator.refcnt == 0 {
                let mut key = vec![0u8; key_len];
                ord::put_word_key(&mut key, &operator.word);
                self.words.delete(&key)?;
            }
        }
        self.records.remove(rid.0);
        self.word_count -= signature.ops.len() as u64;
        debug!(qid = qid.0, record = rid.0, "catalogue.unregister");
        Ok(true)
    }

    /// Reinserts parked operators into the rank index and destroys the ones
    /// nothing references any more. Returns the number of operators drained.
    pub fn rebuild_ranks(&mut self) -> Result<usize> {
        let drained = std::mem::take(&mut self.dirty);
        let mut destroyed = 0usize;
        for &op in &drained {
            let operator = self
                .operators
                .get_mut(op.0)
                .ok_or(SifterError::Invariant("parked operator freed"))?;
            operator.dirty = false;
            if operator.refcnt == 0 {
                self.operators.remove(op.0);
                destroyed += 1;
            } else {
                let key = operator.rank_key(op);
                self.ranks.insert(&key, &())?;
            }
        }
        debug!(
            drained = drained.len(),
            destroyed,
            ranked = self.ranks.len(),
            "catalogue.rebuild_ranks"
        );
        Ok(drained.len())
    }

    /// Returns `true` while parked operators are missing from the rank index.
    pub fn needs_rebuild(&self) -> bool {
        !self.dirty.is_empty()
    }

    /// Operator behind `op`.
    pub fn operator(&self, op: OpId) -> Option<&Operator> {
        self.operators.get(op.0)
    }

    /// Query record behind `rid`.
    pub fn record(&self, rid: RecordId) -> Option<&QueryRecord> {
        self.records.get(rid.0)
    }

    /// Operator rank index.
    pub fn ranks(&self) -> &FixedMap<RankKey, ()> {
        &self.ranks
    }

    /// Live operator for `word`, if any query uses it.
    pub fn lookup_word(&self, word: &[u8]) -> Option<OpId> {
        if word.len() > self.options.max_word_len {
            return None;
        }
        let mut key = [0u8; crate::types::MAX_WORD_LEN_LIMIT + 1];
        let key = &mut key[..self.words.layout().key_len];
        ord::put_word_key(key, word);
        self.words.search(key).map(|v| OpId(ord::get_u32_be(v)))
    }

    /// Reference count of the operator for `word`, zero when absent.
    pub fn operator_refcount(&self, word: &[u8]) -> u32 {
        self.lookup_word(word)
            .and_then(|op| self.operator(op))
            .map_or(0, Operator::refcnt)
    }

    /// Record currently answering for `qid`, canonical or alias.
    pub fn resolve(&self, qid: QueryId) -> Option<RecordId> {
        self.queries.get(&qid)
    }

    /// Registered ids, canonical and alias.
    pub fn query_count(&self) -> u64 {
        self.queries.len()
    }

    /// Canonical records.
    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// Live operators, including parked ones awaiting destruction.
    pub fn operator_count(&self) -> usize {
        self.operators.len()
    }

    /// Operators currently present in the rank index.
    pub fn ranked_count(&self) -> u64 {
        self.ranks.len()
    }

    /// Total operator references over canonical records.
    pub fn word_count(&self) -> u64 {
        self.word_count
    }

    /// Upper bound on operator handles, for sizing per-slot tables.
    pub fn operator_slots(&self) -> usize {
        self.operators.capacity()
    }

    /// Upper bound on record handles, for sizing per-slot tables.
    pub fn record_slots(&self) -> usize {
        self.records.capacity()
    }

    /// Current counts.
    pub fn snapshot(&self) -> CatalogueSnapshot {
        CatalogueSnapshot {
            queries: self.query_count(),
            records: self.record_count(),
            signatures: self.dedup.len(),
            operators: self.operator_count(),
            ranked: self.ranked_count(),
            words: self.word_count,
            dirty: self.dirty.len(),
        }
    }

    /// Logs the word index counters.
    pub fn emit_tracing(&self) {
        self.words.stats().emit_tracing();
    }

    /// Checks every index's structure.
    pub fn verify(&self) -> Result<()> {
        self.words.verify()?;
        self.queries.verify()?;
        self.ranks.verify()
    }

    fn tokenize<'t>(&self, text: &'t str) -> Result<SmallVec<[&'t [u8]; 5]>> {
        let mut words = SmallVec::new();
        for word in text.split_ascii_whitespace() {
            let word = word.as_bytes();
            if words.len() == self.options.max_query_words {
                return Err(SifterError::Invalid("query has too many words"));
            }
            if word.len() < self.options.min_word_len || word.len() > self.options.max_word_len {
                return Err(SifterError::Invalid("query word length out of range"));
            }
            if word.contains(&0) {
                return Err(SifterError::Invalid("query word contains a NUL byte"));
            }
            words.push(word);
        }
        if words.is_empty() {
            return Err(SifterError::Invalid("query has no words"));
        }
        Ok(words)
    }

    fn add_alias(&mut self, rid: RecordId, qid: QueryId) -> Result<Registration> {
        let block_size = self.options.block_size;
        let record = self
            .records
            .get_mut(rid.0)
            .ok_or(SifterError::Invariant("duplicate detector names a freed record"))?;
        let canonical = record.qid;
        let aliases = match record.aliases.as_mut() {
            Some(aliases) => aliases,
            None => record.aliases.insert(FixedMap::new(block_size)?),
        };
        aliases.insert(&qid, &())?;
        self.queries.insert(&qid, &rid)?;
        debug!(qid = qid.0, canonical = canonical.0, "catalogue.register alias");
        Ok(Registration::Alias(canonical))
    }

    fn create_operator(&mut self, word: &[u8]) -> Result<OpId> {
        let op = OpId(self.operators.insert(Operator::new(word)));
        let mut key = vec![0u8; self.words.layout().key_len];
        ord::put_word_key(&mut key, word);
        let mut value = [0u8; OP_VALUE_LEN];
        ord::put_u32_be(&mut value, op.0);
        self.words.insert(&key, &value)?;
        Ok(op)
    }

    /// Pulls `op` out of the rank index until the next rebuild.
    fn park(&mut self, op: OpId) -> Result<()> {
        let operator = self
            .operators
            .get_mut(op.0)
            .ok_or(SifterError::Invariant("operator handle freed"))?;
        if operator.dirty {
            return Ok(());
        }
        operator.dirty = true;
        if operator.refcnt > 0 {
            let key = operator.rank_key(op);
            self.ranks.remove(&key)?;
        }
        self.dirty.push(op);
        Ok(())
    }

    fn operator_mut(&mut self, op: OpId) -> Result<&mut Operator> {
        self.operators
            .get_mut(op.0)
            .ok_or(SifterError::Invariant("operator handle freed"))
    }
}
