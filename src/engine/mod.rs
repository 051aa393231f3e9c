#![forbid(unsafe_code)]

//! Service facade tying the catalogue, the matcher and the worker pool
//! together.
//!
//! Query registration and removal are serialized against document matching
//! through a [`SingleWriter`] gate: every document holds a reader guard
//! until its match finishes, and catalogue writers wait for those guards to
//! drain. Workers match under the catalogue's read lock.

mod stats;


use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{error, info};

pub use stats::{EngineStats, EngineStatsSnapshot};

use crate::dispatch::WorkerPool;
use crate::document::WordIndex;
use crate::matcher::{MatchResult, Matcher};
use crate::options::EngineOptions;
use crate::primitives::concurrency::{ReaderGuard, SingleWriter};
use crate::storage::catalog::{Catalogue, CatalogueSnapshot, Registration};
use crate::types::{DocId, MatchType, QueryId, Result, SifterError};

struct DocumentJob {
    doc_id: DocId,
    text: String,
    _gate: ReaderGuard,
}

/// Document filtering engine.
pub struct Engine {
    options: EngineOptions,
    catalogue: Arc<RwLock<Catalogue>>,
    gate: SingleWriter,
    stats: Arc<EngineStats>,
    pool: WorkerPool<DocumentJob, Result<MatchResult>>,
}

impl Engine {
    /// Validates `options`, builds an empty catalogue and starts the workers.
    pub fn new(options: EngineOptions) -> Result<Self> {
        options.validate()?;
        let catalogue = Arc::new(RwLock::new(Catalogue::new(&options)?));
        let stats = Arc::new(EngineStats::default());
        let pool = WorkerPool::spawn(options.workers, |slot| {
            let catalogue = Arc::clone(&catalogue);
            let stats = Arc::clone(&stats);
            let mut state = catalogue.read().new_slot(slot);
            move |job: DocumentJob| {
                let catalogue = catalogue.read();
                let doc = WordIndex::new(&job.text, catalogue.options());
                let result = Matcher::new(&catalogue).run(&mut state, job.doc_id, &doc);
                record_outcome(&stats, job.doc_id, result)
            }
        })?;
        info!(
            workers = options.workers,
            block_size = options.block_size,
            "engine.start"
        );
        Ok(Self {
            options,
            catalogue,
            gate: SingleWriter::new(),
            stats,
            pool,
        })
    }

    /// Options the engine runs with.
    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Registers a query once no document is in flight.
    pub fn start_query(
        &self,
        qid: QueryId,
        text: &str,
        match_type: MatchType,
        threshold: u32,
    ) -> Result<Registration> {
        let _writer = self.gate.acquire_writer();
        let registration = self
            .catalogue
            .write()
            .register(qid, text, match_type, threshold)?;
        self.stats.inc_queries_started();
        if let Registration::Alias(_) = registration {
            self.stats.inc_aliases();
        }
        Ok(registration)
    }

    /// Removes a query once no document is in flight. `false` if unknown.
    pub fn end_query(&self, qid: QueryId) -> Result<bool> {
        let _writer = self.gate.acquire_writer();
        let removed = self.catalogue.write().unregister(qid)?;
        if removed {
            self.stats.inc_queries_ended();
        }
        Ok(removed)
    }

    /// Queues a document for matching on the worker pool.
    pub fn match_document(&self, doc_id: DocId, text: impl Into<String>) -> Result<()> {
        let gate = self.gate.acquire_reader();
        self.ensure_ranked()?;
        self.pool.submit(DocumentJob {
            doc_id,
            text: text.into(),
            _gate: gate,
        })?;
        self.stats.inc_documents_submitted();
        Ok(())
    }

    /// Next finished match, in completion order.
    ///
    /// Blocks while documents are in flight; `None` once everything
    /// submitted has been delivered.
    pub fn next_result(&self) -> Option<Result<MatchResult>> {
        let result = match self.pool.poll_result()? {
            Ok(result) => result,
            Err(err) => {
                self.stats.inc_documents_failed();
                Err(err)
            }
        };
        self.stats.inc_results_delivered();
        Some(result)
    }

    /// Blocks until every submitted document has been matched.
    pub fn wait_idle(&self) {
        self.pool.wait_idle();
    }

    /// Matches a document on the calling thread with a temporary slot.
    pub fn match_now(&self, doc_id: DocId, text: &str) -> Result<MatchResult> {
        let _gate = self.gate.acquire_reader();
        self.ensure_ranked()?;
        self.stats.inc_documents_submitted();
        let catalogue = self.catalogue.read();
        let mut slot = catalogue.new_slot(self.options.workers);
        let doc = WordIndex::new(text, catalogue.options());
        let result = Matcher::new(&catalogue).run(&mut slot, doc_id, &doc);
        let result = record_outcome(&self.stats, doc_id, result);
        if result.is_ok() {
            self.stats.inc_results_delivered();
        }
        result
    }

    /// Catalogue counts.
    pub fn catalogue(&self) -> CatalogueSnapshot {
        self.catalogue.read().snapshot()
    }

    /// Engine counters.
    pub fn stats(&self) -> EngineStatsSnapshot {
        self.stats.snapshot()
    }

    /// Rebuilds the rank index if registrations left it stale.
    fn ensure_ranked(&self) -> Result<()> {
        if !self.catalogue.read().needs_rebuild() {
            return Ok(());
        }
        let mut catalogue = self.catalogue.write();
        if catalogue.needs_rebuild() {
            catalogue.rebuild_ranks()?;
            self.stats.inc_rank_rebuilds();
        }
        Ok(())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.pool.wait_idle();
        self.stats.emit_tracing();
        let catalogue = self.catalogue.read();
        catalogue.emit_tracing();
        let catalogue = catalogue.snapshot();
        info!(
            queries = catalogue.queries,
            operators = catalogue.operators,
            "engine.stop"
        );
    }
}

fn record_outcome(
    stats: &EngineStats,
    doc_id: DocId,
    result: Result<MatchResult>,
) -> Result<MatchResult> {
    match result {
        Ok(result) => {
            stats.inc_documents_matched();
            Ok(result)
        }
        Err(err) => {
            stats.inc_documents_failed();
            error!(doc = doc_id.0, error = %err, "engine.match failed");
            Err(SifterError::MatchFailed {
                doc: doc_id,
                source: Box::new(err),
            })
        }
    }
}
