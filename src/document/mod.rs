//! Per-document word index consumed by the matcher.

use rustc_hash::FxHashSet;

use crate::options::EngineOptions;

/// Read-only view of a tokenized document.
pub trait DocumentIndex {
    /// Returns `true` if `word` occurs in the document.
    fn exact_contains(&self, word: &[u8]) -> bool;

    /// Distinct words of length `len`, empty outside the indexed range.
    fn words_of_length(&self, len: usize) -> &[&[u8]];
}

/// Length-bucketed, deduplicated words of one document, borrowing the text.
pub struct WordIndex<'a> {
    min_len: usize,
    buckets: Vec<Vec<&'a [u8]>>,
    set: FxHashSet<&'a [u8]>,
}

impl<'a> WordIndex<'a> {
    /// Indexes `text` using the word-length range of `options`.
    pub fn new(text: &'a str, options: &EngineOptions) -> Self {
        Self::with_range(text, options.min_word_len, options.max_word_len)
    }

    /// Indexes ASCII-whitespace separated words of `text` whose length lies in
    /// `min_len..=max_len`; other words are ignored.
    pub fn with_range(text: &'a str, min_len: usize, max_len: usize) -> Self {
        let min_len = min_len.max(1);
        let mut buckets = vec![Vec::new(); (max_len + 1).saturating_sub(min_len)];
        let mut set = FxHashSet::default();
        for word in text.split_ascii_whitespace().map(str::as_bytes) {
            if word.len() < min_len || word.len() > max_len {
                continue;
            }
            if set.insert(word) {
                buckets[word.len() - min_len].push(word);
            }
        }
        for bucket in &mut buckets {
            bucket.sort_unstable();
        }
        Self {
            min_len,
            buckets,
            set,
        }
    }

    /// Number of distinct indexed words.
    pub fn len(&self) -> usize {
        self.set.len()
    }

    /// Returns `true` if no word was indexed.
    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }
}

impl DocumentIndex for WordIndex<'_> {
    fn exact_contains(&self, word: &[u8]) -> bool {
        self.set.contains(word)
    }

    fn words_of_length(&self, len: usize) -> &[&[u8]] {
        len.checked_sub(self.min_len)
            .and_then(|idx| self.buckets.get(idx))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}
