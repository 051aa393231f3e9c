use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::engine::Engine;
use crate::types::{DocId, MatchType, QueryId, SifterError};

/// Errors raised while replaying a workload.
#[derive(Debug, Error)]
pub enum WorkloadError {
    /// The workload file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// File that failed.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// A line did not follow the workload grammar.
    #[error("line {line}: {message}")]
    Parse {
        /// One-based line number.
        line: usize,
        /// What was wrong.
        message: String,
    },
    /// The engine rejected an operation.
    #[error("line {line}: {source}")]
    Engine {
        /// One-based line number.
        line: usize,
        /// Engine error.
        #[source]
        source: SifterError,
    },
}

/// One workload instruction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// `s <qid> <match_type> <threshold> <nwords> <words...>`
    StartQuery {
        /// Query id.
        qid: QueryId,
        /// Distance metric.
        match_type: MatchType,
        /// Distance threshold.
        threshold: u32,
        /// Space-joined query words.
        text: String,
    },
    /// `e <qid>`
    EndQuery(QueryId),
    /// `m <doc_id> <nwords> <words...>`
    MatchDocument {
        /// Document id.
        doc_id: DocId,
        /// Space-joined document words.
        text: String,
    },
    /// `r <doc_id> <nqueries> <qids...>`
    Expect {
        /// Document id.
        doc_id: DocId,
        /// Expected query ids, ascending.
        queries: Vec<QueryId>,
    },
}

/// Outcome of a replayed workload.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct WorkloadReport {
    /// Documents matched.
    pub documents: u64,
    /// Queries started.
    pub queries_started: u64,
    /// Queries ended.
    pub queries_ended: u64,
    /// Expected results checked.
    pub checked: u64,
    /// Documents whose result differed from the expectation.
    pub mismatches: Vec<Mismatch>,
}

/// A document whose result differed from the expectation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Mismatch {
    /// Document id.
    pub doc_id: DocId,
    /// Ids the workload expected.
    pub expected: Vec<QueryId>,
    /// Ids the engine produced, if the document was matched.
    pub actual: Option<Vec<QueryId>>,
}

/// Parses one workload line; blank lines and `#` comments yield `None`.
pub fn parse_line(line: usize, text: &str) -> Result<Option<Command>, WorkloadError> {
    let mut fields = text.split_ascii_whitespace();
    let Some(tag) = fields.next() else {
        return Ok(None);
    };
    if tag.starts_with('#') {
        return Ok(None);
    }
    let mut cursor = Fields { line, fields };
    let command = match tag {
        "s" => {
            let qid = QueryId(cursor.number("query id")?);
            let match_type = MatchType::from_u32(cursor.number("match type")?)
                .map_err(|_| cursor.error("match type must be 0, 1 or 2"))?;
            let threshold = cursor.number("threshold")?;
            let text = cursor.words()?;
            Command::StartQuery {
                qid,
                match_type,
                threshold,
                text,
            }
        }
        "e" => Command::EndQuery(QueryId(cursor.number("query id")?)),
        "m" => {
            let doc_id = DocId(cursor.number("document id")?);
            let text = cursor.words()?;
            Command::MatchDocument { doc_id, text }
        }
        "r" => {
            let doc_id = DocId(cursor.number("document id")?);
            let count: usize = cursor.number("query count")?;
            let mut queries = Vec::with_capacity(count);
            for _ in 0..count {
                queries.push(QueryId(cursor.number("query id")?));
            }
            cursor.finish()?;
            queries.sort_unstable();
            Command::Expect { doc_id, queries }
        }
        other => return Err(cursor.error(format!("unknown command {other:?}"))),
    };
    Ok(Some(command))
}

struct Fields<'t> {
    line: usize,
    fields: std::str::SplitAsciiWhitespace<'t>,
}

impl Fields<'_> {
    fn error(&self, message: impl Into<String>) -> WorkloadError {
        WorkloadError::Parse {
            line: self.line,
            message: message.into(),
        }
    }

    fn number<T: std::str::FromStr>(&mut self, what: &str) -> Result<T, WorkloadError> {
        let field = self
            .fields
            .next()
            .ok_or_else(|| self.error(format!("missing {what}")))?;
        field
            .parse()
            .map_err(|_| self.error(format!("invalid {what} {field:?}")))
    }

    /// Reads a word count followed by exactly that many words.
    fn words(&mut self) -> Result<String, WorkloadError> {
        let count: usize = self.number("word count")?;
        let mut words = Vec::with_capacity(count);
        for _ in 0..count {
            words.push(self.fields.next().ok_or_else(|| self.error("fewer words than announced"))?);
        }
        self.finish()?;
        Ok(words.join(" "))
    }

    fn finish(&mut self) -> Result<(), WorkloadError> {
        match self.fields.next() {
            Some(extra) => Err(self.error(format!("unexpected trailing field {extra:?}"))),
            None => Ok(()),
        }
    }
}

/// Replays the workload file at `path` against `engine`.
pub fn run_workload(engine: &Engine, path: &Path) -> Result<WorkloadReport, WorkloadError> {
    let text = fs::read_to_string(path).map_err(|source| WorkloadError::Io {
        path: path.display().to_string(),
        source,
    })?;
    replay(engine, &text)
}

/// Replays workload `text` against `engine`.
pub fn replay(engine: &Engine, text: &str) -> Result<WorkloadReport, WorkloadError> {
    let mut report = WorkloadReport::default();
    let mut results: HashMap<DocId, Vec<QueryId>> = HashMap::new();
    let mut pending = 0usize;

    for (idx, raw) in text.lines().enumerate() {
        let line = idx + 1;
        let Some(command) = parse_line(line, raw)? else {
            continue;
        };
        let engine_err = |source| WorkloadError::Engine { line, source };
        if !matches!(command, Command::MatchDocument { .. }) && pending > 0 {
            collect(engine, &mut results, &mut report).map_err(engine_err)?;
            pending = 0;
        }
        match command {
            Command::StartQuery {
                qid,
                match_type,
                threshold,
                text,
            } => {
                engine
                    .start_query(qid, &text, match_type, threshold)
                    .map_err(engine_err)?;
                report.queries_started += 1;
            }
            Command::EndQuery(qid) => {
                if engine.end_query(qid).map_err(engine_err)? {
                    report.queries_ended += 1;
                }
            }
            Command::MatchDocument { doc_id, text } => {
                engine.match_document(doc_id, text).map_err(engine_err)?;
                pending += 1;
            }
            Command::Expect { doc_id, queries } => {
                report.checked += 1;
                let actual = results.remove(&doc_id);
                if actual.as_ref() != Some(&queries) {
                    warn!(line, doc = doc_id.0, "workload.mismatch");
                    report.mismatches.push(Mismatch {
                        doc_id,
                        expected: queries,
                        actual,
                    });
                }
            }
        }
    }
    collect(engine, &mut results, &mut report)
        .map_err(|source| WorkloadError::Engine { line: text.lines().count(), source })?;
    debug!(
        documents = report.documents,
        checked = report.checked,
        mismatches = report.mismatches.len(),
        "workload.done"
    );
    Ok(report)
}

fn collect(
    engine: &Engine,
    results: &mut HashMap<DocId, Vec<QueryId>>,
    report: &mut WorkloadReport,
) -> Result<(), SifterError> {
    while let Some(result) = engine.next_result() {
        let result = result?;
        report.documents += 1;
        results.insert(result.doc_id, result.queries);
    }
    Ok(())
}
