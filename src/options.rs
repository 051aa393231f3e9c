//! Engine configuration.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::types::{Result, SifterError, MAX_WORD_LEN_LIMIT};

/// Tunables for the catalogue, the matcher slots and the worker pool.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineOptions {
    /// Size of every index node block in bytes.
    pub block_size: usize,
    /// Shortest indexed word.
    pub min_word_len: usize,
    /// Longest indexed word.
    pub max_word_len: usize,
    /// Number of worker threads, one concurrency slot each.
    pub workers: usize,
    /// Working memory per slot for rank-index clones.
    pub slot_arena_bytes: usize,
    /// Initial capacity of the duplicate-query detector.
    pub dedup_capacity: usize,
    /// Exclusive upper bound on query ids.
    pub max_query_id: u32,
    /// Maximum number of words in one query.
    pub max_query_words: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            block_size: 512,
            min_word_len: 1,
            max_word_len: MAX_WORD_LEN_LIMIT,
            workers: 4,
            slot_arena_bytes: 1 << 20,
            dedup_capacity: 1 << 16,
            max_query_id: 1 << 19,
            max_query_words: 5,
        }
    }
}

impl EngineOptions {
    /// Sets the node block size.
    pub fn block_size(mut self, bytes: usize) -> Self {
        self.block_size = bytes;
        self
    }

    /// Sets the indexed word length range.
    pub fn word_len(mut self, min: usize, max: usize) -> Self {
        self.min_word_len = min;
        self.max_word_len = max;
        self
    }

    /// Sets the number of worker slots.
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Sets the per-slot arena size in bytes.
    pub fn slot_arena_bytes(mut self, bytes: usize) -> Self {
        self.slot_arena_bytes = bytes;
        self
    }

    /// Sets the duplicate-detector capacity.
    pub fn dedup_capacity(mut self, capacity: usize) -> Self {
        self.dedup_capacity = capacity;
        self
    }

    /// Sets the exclusive upper bound on query ids.
    pub fn max_query_id(mut self, bound: u32) -> Self {
        self.max_query_id = bound;
        self
    }

    /// Number of blocks a slot arena may hand out.
    pub fn slot_arena_blocks(&self) -> usize {
        self.slot_arena_bytes / self.block_size.max(1)
    }

    /// Rejects inconsistent settings.
    pub fn validate(&self) -> Result<()> {
        if self.min_word_len == 0 || self.min_word_len > self.max_word_len {
            return Err(SifterError::Config(format!(
                "word length range {}..={} is empty",
                self.min_word_len, self.max_word_len
            )));
        }
        if self.max_word_len > MAX_WORD_LEN_LIMIT {
            return Err(SifterError::Config(format!(
                "max_word_len {} exceeds {MAX_WORD_LEN_LIMIT}",
                self.max_word_len
            )));
        }
        if self.workers == 0 {
            return Err(SifterError::Config("workers must be at least 1".into()));
        }
        if self.max_query_words == 0 {
            return Err(SifterError::Config("max_query_words must be at least 1".into()));
        }
        if self.max_query_id == 0 {
            return Err(SifterError::Config("max_query_id must be positive".into()));
        }
        if self.slot_arena_blocks() < 4 {
            return Err(SifterError::Config(format!(
                "slot arena of {} bytes holds fewer than four blocks",
                self.slot_arena_bytes
            )));
        }
        crate::storage::btree::Layout::new(self.block_size, MAX_WORD_LEN_LIMIT + 1, 4)
            .map_err(|err| SifterError::Config(format!("block_size {}: {err}", self.block_size)))?;
        Ok(())
    }

    /// Parses and validates options from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let options: Self =
            toml::from_str(text).map_err(|err| SifterError::Config(err.to_string()))?;
        options.validate()?;
        Ok(options)
    }

    /// Reads options from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }
}
