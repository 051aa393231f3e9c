#![forbid(unsafe_code)]

//! Snapshot-isolated matching of one document against the catalogue.
//!
//! The matcher clones the catalogue's operator rank index into the slot's
//! private arena, then repeatedly takes the operator with the most remaining
//! references and resolves it level by level (exact, Hamming, edit). Each
//! computed minimum distance excludes the queries whose threshold it beats,
//! which lowers the rank of their other operators; every query an operator
//! satisfies is tentatively included. A query that survives every one of its
//! operators is a match.
//!
//! Operator progress lives in per-slot shadows, so the shared catalogue is
//! only read. All per-document state is reset when the match ends, including
//! when it ends with an error.

mod shadow;


use serde::Serialize;
use tracing::trace;

pub use shadow::SlotState;

use self::shadow::{Scratch, ShadowState, Teardown};
use crate::document::DocumentIndex;
use crate::primitives::distance;
use crate::storage::btree::{CowStore, FixedMap};
use crate::storage::catalog::{Catalogue, Operator, RankKey};
use crate::types::{DocId, OpId, QueryId, RecordId, Result, SifterError, LEVELS, MAX_DIST};

const LEVEL_EXACT: usize = 0;
const LEVEL_HAMMING: usize = 1;
const LEVEL_EDIT: usize = 2;
const NO_MATCH: u32 = MAX_DIST + 1;

/// Work counters for one document.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MatchStats {
    /// Operators resolved.
    pub rounds: u64,
    /// Rounds repeated on the same operator at a higher level.
    pub retries: u64,
    /// Minimum-distance computations per level.
    pub distance_calls: [u64; LEVELS],
    /// Queries excluded.
    pub exclusions: u64,
    /// Queries tentatively included.
    pub inclusions: u64,
}

/// Queries a document satisfies.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MatchResult {
    /// Document the result belongs to.
    pub doc_id: DocId,
    /// Satisfied query ids, aliases included, ascending.
    pub queries: Vec<QueryId>,
    /// Work counters.
    pub stats: MatchStats,
}

/// Result of one round on an operator.
enum Round {
    Resolved,
    Escalate,
}

/// Matches documents against a catalogue it only reads.
pub struct Matcher<'c> {
    catalogue: &'c Catalogue,
}

impl<'c> Matcher<'c> {
    /// Creates a matcher over `catalogue`.
    pub fn new(catalogue: &'c Catalogue) -> Self {
        Self { catalogue }
    }

    /// Matches `doc` on `slot` and returns the satisfied query ids.
    ///
    /// The catalogue must not hold operators awaiting a rank rebuild.
    pub fn run<D: DocumentIndex + ?Sized>(
        &self,
        slot: &mut SlotState,
        doc_id: DocId,
        doc: &D,
    ) -> Result<MatchResult> {
        let catalogue = self.catalogue;
        if catalogue.needs_rebuild() {
            return Err(SifterError::Invariant("rank index rebuild pending"));
        }
        let SlotState { arena, scratch, .. } = slot;
        let mut scratch = Teardown(scratch);
        scratch.prepare(catalogue.operator_slots(), catalogue.record_slots());

        let mut run = Run {
            catalogue,
            doc,
            ranks: catalogue.ranks().snapshot(arena)?,
            stats: MatchStats::default(),
        };
        while let Some((key, ())) = run.ranks.first() {
            run.resolve_operator(&mut scratch, key)?;
        }
        let queries = run.collect(&scratch)?;
        trace!(
            doc = doc_id.0,
            matched = queries.len(),
            rounds = run.stats.rounds,
            retries = run.stats.retries,
            "matcher.run"
        );
        Ok(MatchResult {
            doc_id,
            queries,
            stats: run.stats,
        })
    }
}

struct Run<'c, 'a, D: ?Sized> {
    catalogue: &'c Catalogue,
    doc: &'a D,
    ranks: FixedMap<RankKey, (), CowStore<'a>>,
    stats: MatchStats,
}

impl<'c, D: DocumentIndex + ?Sized> Run<'c, '_, D> {
    fn operator(&self, op: OpId) -> Result<&'c Operator> {
        let catalogue = self.catalogue;
        catalogue
            .operator(op)
            .ok_or(SifterError::Invariant("ranked operator missing from catalogue"))
    }

    /// Drives one operator through the escalation levels until it resolves.
    fn resolve_operator(&mut self, scratch: &mut Scratch, key: RankKey) -> Result<()> {
        let op = key.op;
        let operator = self.operator(op)?;
        let shadow = scratch.shadow(op, operator);
        if shadow.state != ShadowState::Active || shadow.refcnt != key.refcnt {
            return Err(SifterError::Invariant("rank key disagrees with operator shadow"));
        }
        loop {
            let start_level = scratch.ops[op.0 as usize].level;
            match self.exec_round(scratch, op, operator)? {
                Round::Resolved => break,
                Round::Escalate => {
                    let shadow = &mut scratch.ops[op.0 as usize];
                    if shadow.level == LEVEL_EDIT && start_level == LEVEL_EXACT {
                        shadow.need_hamming = true;
                    }
                    self.stats.retries += 1;
                }
            }
        }
        let shadow = &mut scratch.ops[op.0 as usize];
        self.ranks.remove(&RankKey {
            refcnt: shadow.refcnt,
            op,
        })?;
        shadow.state = ShadowState::Retired;
        self.stats.rounds += 1;
        Ok(())
    }

    fn exec_round(&mut self, scratch: &mut Scratch, op: OpId, operator: &'c Operator) -> Result<Round> {
        let word = operator.word();
        let shadow = &mut scratch.ops[op.0 as usize];
        let level = shadow.level;
        self.stats.distance_calls[level] += 1;

        let mut lower = 0;
        let mut skip_exclusion = false;
        if shadow.need_hamming {
            shadow.min_distance = min_distance(self.doc, LEVEL_HAMMING, word, 1, NO_MATCH);
            match pending_below(shadow.min_distance, &shadow.nr_refs[LEVEL_EDIT]) {
                Some(threshold) => lower = threshold,
                None => skip_exclusion = true,
            }
        }
        if !skip_exclusion {
            let bound = shadow.min_distance;
            shadow.min_distance = min_distance(self.doc, level, word, lower, bound).min(NO_MATCH);
            let distance = shadow.min_distance;
            trace!(op = op.0, level, distance, "matcher.round");
            for threshold in 0..distance as usize {
                for &rid in operator.refs(level, threshold) {
                    self.exclude(scratch, rid, op)?;
                }
            }
            self.reinsert_dirty(scratch)?;
        }

        let idx = op.0 as usize;
        let distance = scratch.ops[idx].min_distance;
        loop {
            let level = scratch.ops[idx].level;
            for threshold in distance as usize..=MAX_DIST as usize {
                for &rid in operator.refs(level, threshold) {
                    self.include(scratch, rid)?;
                }
            }
            let shadow = &mut scratch.ops[idx];
            shadow.level += 1;
            if shadow.level >= LEVELS {
                return Ok(Round::Resolved);
            }
            if pending_below(distance, &shadow.nr_refs[shadow.level]).is_some() {
                return Ok(Round::Escalate);
            }
        }
    }

    /// Marks `rid` as satisfied so far, once per document.
    fn include(&mut self, scratch: &mut Scratch, rid: RecordId) -> Result<()> {
        let catalogue = self.catalogue;
        let record = catalogue
            .record(rid)
            .ok_or(SifterError::Invariant("operator references a freed record"))?;
        if scratch.excluded.contains(record.qid().0) {
            return Ok(());
        }
        let flag = &mut scratch.included_flags[rid.0 as usize];
        if !*flag {
            *flag = true;
            scratch.included.push(rid);
            self.stats.inclusions += 1;
        }
        Ok(())
    }

    /// Excludes `rid`, releasing its references on every other operator.
    fn exclude(&mut self, scratch: &mut Scratch, rid: RecordId, src: OpId) -> Result<()> {
        let catalogue = self.catalogue;
        let record = catalogue
            .record(rid)
            .ok_or(SifterError::Invariant("operator references a freed record"))?;
        let qid = record.qid().0;
        if scratch.excluded.contains(qid) {
            return Ok(());
        }
        let (level, bucket) = (record.match_type().level(), record.threshold() as usize);
        for &other in record.ops() {
            if other == src {
                continue;
            }
            let operator = self.operator(other)?;
            let shadow = scratch.shadow(other, operator);
            if shadow.state == ShadowState::Retired || level < shadow.level {
                continue;
            }
            if !shadow.dirty {
                self.ranks.remove(&RankKey {
                    refcnt: shadow.refcnt,
                    op: other,
                })?;
                shadow.dirty = true;
                scratch.dirty.push(other);
            }
            let shadow = &mut scratch.ops[other.0 as usize];
            shadow.refcnt -= 1;
            shadow.nr_refs[level][bucket] -= 1;
            if shadow.refcnt == 0 {
                shadow.state = ShadowState::Retired;
            }
        }
        scratch.note_excluded(qid);
        self.stats.exclusions += 1;
        Ok(())
    }

    /// Puts operators whose reference count changed back into the clone.
    fn reinsert_dirty(&mut self, scratch: &mut Scratch) -> Result<()> {
        for op in scratch.dirty.drain(..) {
            let shadow = &mut scratch.ops[op.0 as usize];
            shadow.dirty = false;
            if shadow.state == ShadowState::Active {
                self.ranks.insert(
                    &RankKey {
                        refcnt: shadow.refcnt,
                        op,
                    },
                    &(),
                )?;
            }
        }
        Ok(())
    }

    /// Included, never-excluded queries plus their aliases, ascending.
    fn collect(&self, scratch: &Scratch) -> Result<Vec<QueryId>> {
        let mut queries = Vec::with_capacity(scratch.included.len());
        for &rid in &scratch.included {
            let record = self
                .catalogue
                .record(rid)
                .ok_or(SifterError::Invariant("included record was freed"))?;
            if scratch.excluded.contains(record.qid().0) {
                continue;
            }
            queries.push(record.qid());
            queries.extend(record.aliases());
        }
        queries.sort_unstable();
        Ok(queries)
    }
}

/// Smallest threshold below `distance` that still has pending references.
fn pending_below(distance: u32, nr_refs: &[u32]) -> Option<u32> {
    (0..distance).find(|&threshold| nr_refs[threshold as usize] != 0)
}

/// Minimum distance from `word` to the document's words at `level`.
///
/// Stops early, returning a distance no larger than `lower`, once a candidate
/// at or below `lower` is found. `upper` bounds the search from above.
fn min_distance<D: DocumentIndex + ?Sized>(
    doc: &D,
    level: usize,
    word: &[u8],
    lower: u32,
    upper: u32,
) -> u32 {
    let len = word.len();
    match level {
        LEVEL_EXACT => {
            if doc.exact_contains(word) {
                0
            } else {
                NO_MATCH
            }
        }
        LEVEL_HAMMING => {
            let mut best = upper;
            for candidate in doc.words_of_length(len) {
                let dist = distance::hamming(candidate, word);
                if dist <= lower {
                    return lower;
                }
                best = best.min(dist);
            }
            best
        }
        _ => {
            let mut best = upper;
            let mut gap = 1;
            while gap < best {
                let floor = lower.max(gap);
                let gap_len = gap as usize;
                // Same-length distance 1 is already ruled out by the Hamming pass.
                let lengths = [
                    len.checked_sub(gap_len),
                    (gap == 2).then_some(len),
                    Some(len + gap_len),
                ];
                for candidate_len in lengths.into_iter().flatten() {
                    let dist = min_edit_of_length(doc, candidate_len, word, floor, &mut best);
                    if dist <= floor {
                        return dist;
                    }
                }
                gap += 1;
            }
            best
        }
    }
}

fn min_edit_of_length<D: DocumentIndex + ?Sized>(
    doc: &D,
    len: usize,
    word: &[u8],
    floor: u32,
    best: &mut u32,
) -> u32 {
    for candidate in doc.words_of_length(len) {
        if let Some(dist) = distance::edit(word, candidate, *best) {
            if dist <= floor {
                return dist;
            }
            *best = dist;
        }
    }
    *best
}
