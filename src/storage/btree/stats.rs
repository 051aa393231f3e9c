use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

/// Snapshot of tree statistics at a point in time.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct BTreeStatsSnapshot {
    /// Number of point lookups performed
    pub searches: u64,
    /// Number of inserts that changed the tree
    pub inserts: u64,
    /// Number of deletes that removed a key
    pub deletes: u64,
    /// Number of node splits
    pub splits: u64,
    /// Number of sibling merges
    pub merges: u64,
    /// Number of sibling redistributions
    pub rebalances: u64,
    /// Number of blocks copied before a write
    pub cow_copies: u64,
    /// Number of times a new root was added
    pub root_grows: u64,
    /// Number of times the root was collapsed into its child or freed
    pub root_shrinks: u64,
}

/// Thread-safe statistics tracking for tree operations.
#[derive(Default, Debug)]
pub struct BTreeStats {
    searches: AtomicU64,
    inserts: AtomicU64,
    deletes: AtomicU64,
    splits: AtomicU64,
    merges: AtomicU64,
    rebalances: AtomicU64,
    cow_copies: AtomicU64,
    root_grows: AtomicU64,
    root_shrinks: AtomicU64,
}

impl BTreeStats {
    /// Returns the current count of point lookups.
    pub fn searches(&self) -> u64 {
        self.searches.load(AtomicOrdering::Relaxed)
    }

    /// Returns the current count of effective inserts.
    pub fn inserts(&self) -> u64 {
        self.inserts.load(AtomicOrdering::Relaxed)
    }

    /// Returns the current count of effective deletes.
    pub fn deletes(&self) -> u64 {
        self.deletes.load(AtomicOrdering::Relaxed)
    }

    /// Returns the current count of node splits.
    pub fn splits(&self) -> u64 {
        self.splits.load(AtomicOrdering::Relaxed)
    }

    /// Returns the current count of merges.
    pub fn merges(&self) -> u64 {
        self.merges.load(AtomicOrdering::Relaxed)
    }

    /// Returns the current count of redistributions.
    pub fn rebalances(&self) -> u64 {
        self.rebalances.load(AtomicOrdering::Relaxed)
    }

    /// Returns the number of blocks copied on write.
    pub fn cow_copies(&self) -> u64 {
        self.cow_copies.load(AtomicOrdering::Relaxed)
    }

    pub(crate) fn inc_searches(&self) {
        self.searches.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_inserts(&self) {
        self.inserts.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_deletes(&self) {
        self.deletes.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_splits(&self) {
        self.splits.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_merges(&self) {
        self.merges.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_rebalances(&self) {
        self.rebalances.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_cow_copies(&self) {
        self.cow_copies.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_root_grows(&self) {
        self.root_grows.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_root_shrinks(&self) {
        self.root_shrinks.fetch_add(1, AtomicOrdering::Relaxed);
    }

    /// Creates a snapshot of all current statistics.
    pub fn snapshot(&self) -> BTreeStatsSnapshot {
        BTreeStatsSnapshot {
            searches: self.searches(),
            inserts: self.inserts(),
            deletes: self.deletes(),
            splits: self.splits(),
            merges: self.merges(),
            rebalances: self.rebalances(),
            cow_copies: self.cow_copies(),
            root_grows: self.root_grows.load(AtomicOrdering::Relaxed),
            root_shrinks: self.root_shrinks.load(AtomicOrdering::Relaxed),
        }
    }

    /// Emits current statistics to the tracing infrastructure.
    pub fn emit_tracing(&self) {
        let snapshot = self.snapshot();
        tracing::info!(
            target: "sifter::btree::stats",
            searches = snapshot.searches,
            inserts = snapshot.inserts,
            deletes = snapshot.deletes,
            splits = snapshot.splits,
            merges = snapshot.merges,
            rebalances = snapshot.rebalances,
            cow_copies = snapshot.cow_copies,
            root_grows = snapshot.root_grows,
            root_shrinks = snapshot.root_shrinks,
            "btree stats snapshot"
        );
    }
}
