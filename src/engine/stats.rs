use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Engine counters at a point in time.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EngineStatsSnapshot {
    /// Queries registered, canonical and alias.
    pub queries_started: u64,
    /// Registrations that became aliases.
    pub aliases: u64,
    /// Queries removed.
    pub queries_ended: u64,
    /// Documents handed to the worker pool or matched inline.
    pub documents_submitted: u64,
    /// Documents whose match completed.
    pub documents_matched: u64,
    /// Documents whose match failed.
    pub documents_failed: u64,
    /// Results taken by the caller.
    pub results_delivered: u64,
    /// Rank index rebuilds.
    pub rank_rebuilds: u64,
}

/// Thread-safe engine counters.
#[derive(Default, Debug)]
pub struct EngineStats {
    queries_started: AtomicU64,
    aliases: AtomicU64,
    queries_ended: AtomicU64,
    documents_submitted: AtomicU64,
    documents_matched: AtomicU64,
    documents_failed: AtomicU64,
    results_delivered: AtomicU64,
    rank_rebuilds: AtomicU64,
}

macro_rules! counters {
    ($($inc:ident => $field:ident),* $(,)?) => {
        $(
            pub(crate) fn $inc(&self) {
                self.$field.fetch_add(1, Ordering::Relaxed);
            }
        )*
    };
}

impl EngineStats {
    counters! {
        inc_queries_started => queries_started,
        inc_aliases => aliases,
        inc_queries_ended => queries_ended,
        inc_documents_submitted => documents_submitted,
        inc_documents_matched => documents_matched,
        inc_documents_failed => documents_failed,
        inc_results_delivered => results_delivered,
        inc_rank_rebuilds => rank_rebuilds,
    }

    /// Creates a snapshot of every counter.
    pub fn snapshot(&self) -> EngineStatsSnapshot {
        EngineStatsSnapshot {
            queries_started: self.queries_started.load(Ordering::Relaxed),
            aliases: self.aliases.load(Ordering::Relaxed),
            queries_ended: self.queries_ended.load(Ordering::Relaxed),
            documents_submitted: self.documents_submitted.load(Ordering::Relaxed),
            documents_matched: self.documents_matched.load(Ordering::Relaxed),
            documents_failed: self.documents_failed.load(Ordering::Relaxed),
            results_delivered: self.results_delivered.load(Ordering::Relaxed),
            rank_rebuilds: self.rank_rebuilds.load(Ordering::Relaxed),
        }
    }

    /// Emits current counters to the tracing infrastructure.
    pub fn emit_tracing(&self) {
        let snapshot = self.snapshot();
        tracing::info!(
            target: "sifter::engine::stats",
            queries_started = snapshot.queries_started,
            aliases = snapshot.aliases,
            queries_ended = snapshot.queries_ended,
            documents_submitted = snapshot.documents_submitted,
            documents_matched = snapshot.documents_matched,
            documents_failed = snapshot.documents_failed,
            results_delivered = snapshot.results_delivered,
            rank_rebuilds = snapshot.rank_rebuilds,
            "engine stats snapshot"
        );
    }
}
