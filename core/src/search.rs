//! Search over dictionary entries
//!
//! This module provides:
//! - Tokenization of entry text and queries
//! - An inverted index from token to entry ids, queried with AND semantics
//! - A case-insensitive substring scan used for short queries and as the
//!   fallback when the index has no answer
//!
//! The index is derived data. It is rebuilt from scratch whenever the full
//! entry list is refreshed and never treated as a source of truth.

use std::collections::{HashMap, HashSet};

use crate::models::DictionaryEntry;

/// Queries this short (in characters, after trimming) skip the index
pub const SHORT_QUERY_LEN: usize = 2;

/// Lower-case `text` and split it on non-alphanumeric boundaries
///
/// Single-character tokens are discarded.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| token.chars().count() > 1)
        .map(str::to_lowercase)
        .collect()
}

/// Inverted index from token to the ids of entries containing it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchIndex {
    tokens: HashMap<String, HashSet<String>>,
}

impl SearchIndex {
    /// Index the headword and meaning of every entry
    pub fn build(entries: &[DictionaryEntry]) -> Self {
        let mut tokens: HashMap<String, HashSet<String>> = HashMap::new();
        for entry in entries {
            for token in tokenize(&entry.word)
                .into_iter()
                .chain(tokenize(&entry.meaning))
            {
                tokens.entry(token).or_default().insert(entry.id.clone());
            }
        }

        log::debug!(
            "Built search index with {} tokens over {} entries",
            tokens.len(),
            entries.len()
        );
        Self { tokens }
    }

    /// Ids of entries containing every token of `query`
    ///
    /// Empty when the query has no indexable tokens or any token is unknown.
    pub fn lookup(&self, query: &str) -> HashSet<String> {
        let mut sets = Vec::new();
        for token in tokenize(query) {
            match self.tokens.get(&token) {
                Some(ids) => sets.push(ids),
                None => return HashSet::new(),
            }
        }

        // start from the smallest set so the intersection stays cheap
        sets.sort_by_key(|ids| ids.len());
        let mut sets = sets.into_iter();
        let Some(first) = sets.next() else {
            return HashSet::new();
        };

        let mut result = first.clone();
        for ids in sets {
            result.retain(|id| ids.contains(id));
            if result.is_empty() {
                break;
            }
        }
        result
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Number of distinct tokens
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn clear(&mut self) {
        self.tokens.clear();
    }
}

/// Entries whose headword or meaning contains `query`, ignoring case
pub fn substring_scan(entries: &[DictionaryEntry], query: &str) -> Vec<DictionaryEntry> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return Vec::new();
    }

    entries
        .iter()
        .filter(|entry| {
            entry.word.to_lowercase().contains(&needle)
                || entry.meaning.to_lowercase().contains(&needle)
        })
        .cloned()
        .collect()
}

/// Search `entries` the way the entry repository does
///
/// Short queries scan directly. Longer queries go through `index`, falling
/// back to a scan when the index yields nothing. Results keep list order.
pub fn search_entries(
    entries: &[DictionaryEntry],
    index: &SearchIndex,
    query: &str,
) -> Vec<DictionaryEntry> {
    let query = query.trim();
    if query.is_empty() {
        return Vec::new();
    }

    if query.chars().count() <= SHORT_QUERY_LEN {
        return substring_scan(entries, query);
    }

    let ids = index.lookup(query);
    if ids.is_empty() {
        log::debug!("Index has no match for '{query}', scanning entries");
        return substring_scan(entries, query);
    }

    entries
        .iter()
        .filter(|entry| ids.contains(&entry.id))
        .cloned()
        .collect()
}
