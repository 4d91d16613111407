use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use log::debug;

use crate::bounded_buffer::{FrequencyTable, Token};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    /// Repeated full passes, resolving one distinct word per pass.
    Scan,
    /// One pass with a word -> position index.
    Indexed,
}

impl Default for MergeStrategy {
    fn default() -> Self {
        MergeStrategy::Scan
    }
}

impl FromStr for MergeStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scan" => Ok(MergeStrategy::Scan),
            "indexed" | "hash" => Ok(MergeStrategy::Indexed),
            other => Err(format!("unknown merge strategy \"{}\"", other)),
        }
    }
}

impl fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            MergeStrategy::Scan => write!(f, "scan"),
            MergeStrategy::Indexed => write!(f, "indexed"),
        }
    }
}

/// Every distinct word of the input exactly once, in emission order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalResult {
    tokens: Vec<Token>,
}

impl GlobalResult {
    pub fn new(tokens: Vec<Token>) -> Self {
        GlobalResult { tokens }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Token> {
        self.tokens.iter()
    }

    pub fn get(&self, word: &[u8]) -> Option<u64> {
        self.tokens
            .iter()
            .find(|t| &t.word[..] == word)
            .map(|t| t.count)
    }

    /// Sum of all counts, i.e. the number of words in the input.
    pub fn total(&self) -> u64 {
        self.tokens.iter().map(|t| t.count).sum()
    }

    pub fn to_map(&self) -> HashMap<Bytes, u64> {
        self.tokens
            .iter()
            .map(|t| (t.word.clone(), t.count))
            .collect()
    }

    /// Count descending, then word ascending.
    pub fn sort_by_count(&mut self) {
        self.tokens
            .sort_unstable_by(|a, b| b.count.cmp(&a.count).then_with(|| a.word.cmp(&b.word)));
    }
}

impl IntoIterator for GlobalResult {
    type Item = Token;
    type IntoIter = std::vec::IntoIter<Token>;

    fn into_iter(self) -> Self::IntoIter {
        self.tokens.into_iter()
    }
}

/// Tombstoning multi-pass merge.
///
/// Each pass takes the first live entry across all tables (table order, then
/// position order), folds in every live entry with the same word, tombstones
/// all of them and emits the total. A pass that finds no live entry ends the
/// merge. Costs O(distinct × entries).
pub fn merge_scan(tables: Vec<FrequencyTable>) -> GlobalResult {
    let mut slots: Vec<Vec<Option<Token>>> = tables
        .into_iter()
        .map(|table| table.into_entries().into_iter().map(Some).collect())
        .collect();

    let mut merged = Vec::new();
    loop {
        let mut current: Option<Token> = None;
        for table in slots.iter_mut() {
            for slot in table.iter_mut() {
                if let Some(acc) = current.as_mut() {
                    let same = match slot {
                        Some(token) => token.word == acc.word,
                        None => false,
                    };
                    if same {
                        acc.count += slot.take().map_or(0, |t| t.count);
                    }
                } else {
                    current = slot.take();
                }
            }
        }

        match current {
            Some(token) => merged.push(token),
            None => break,
        }
    }
    GlobalResult::new(merged)
}

/// Single-pass merge with the same emission order as `merge_scan`.
pub fn merge_indexed(tables: Vec<FrequencyTable>) -> GlobalResult {
    let capacity = tables.iter().map(|t| t.len()).max().unwrap_or(0);
    let mut positions: HashMap<Bytes, usize> = HashMap::with_capacity(capacity);
    let mut merged: Vec<Token> = Vec::with_capacity(capacity);

    for table in tables {
        for token in table.into_entries() {
            match positions.get(&token.word) {
                Some(&position) => merged[position].count += token.count,
                None => {
                    positions.insert(token.word.clone(), merged.len());
                    merged.push(token);
                }
            }
        }
    }
    GlobalResult::new(merged)
}

pub fn reduce(tables: Vec<FrequencyTable>, strategy: MergeStrategy) -> GlobalResult {
    let entries: usize = tables.iter().map(|t| t.len()).sum();
    debug!(
        "reducer: merging {} tables with {} entries ({})",
        tables.len(),
        entries,
        strategy
    );
    let result = match strategy {
        MergeStrategy::Scan => merge_scan(tables),
        MergeStrategy::Indexed => merge_indexed(tables),
    };
    debug!("reducer: {} distinct words", result.len());
    result
}
