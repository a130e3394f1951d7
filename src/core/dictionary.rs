//! Longest-match dictionary over a fixed set of byte strings.
//!
//! Exact lookups go through an `FxHashMap`; longest-prefix lookups run an
//! anchored, leftmost-longest Aho-Corasick automaton, so a single pass over at
//! most `max_len` bytes finds the longest key starting at the search position.
//! Keys are identified by their insertion index.

use aho_corasick::{AhoCorasick, Anchored, Input, MatchKind, StartKind};
use rustc_hash::FxHashMap;

pub struct Dictionary {
    exact: FxHashMap<Vec<u8>, u32>,
    automaton: AhoCorasick,
    max_len: usize,
}

impl Dictionary {
    /// Build a dictionary. Keys must be non-empty and unique; a duplicate key
    /// resolves to its first index.
    pub fn new<K: AsRef<[u8]>>(keys: &[K]) -> Result<Self, aho_corasick::BuildError> {
        let mut exact = FxHashMap::default();
        exact.reserve(keys.len());
        let mut max_len = 0;
        for (index, key) in keys.iter().enumerate() {
            let key = key.as_ref();
            max_len = max_len.max(key.len());
            exact.entry(key.to_vec()).or_insert(index as u32);
        }
        let automaton = AhoCorasick::builder()
            .match_kind(MatchKind::LeftmostLongest)
            .start_kind(StartKind::Anchored)
            .build(keys)?;
        Ok(Self {
            exact,
            automaton,
            max_len,
        })
    }

    /// Index of `key`, if present.
    #[inline]
    pub fn find(&self, key: &[u8]) -> Option<u32> {
        self.exact.get(key).copied()
    }

    /// Longest key that is a prefix of `bytes`, looking at most `max_len` bytes ahead.
    ///
    /// Returns the key's index and length.
    #[inline]
    pub fn longest_prefix(&self, bytes: &[u8], max_len: usize) -> Option<(u32, usize)> {
        let end = bytes.len().min(max_len).min(self.max_len);
        if end == 0 {
            return None;
        }
        let input = Input::new(&bytes[..end]).anchored(Anchored::Yes);
        self.automaton
            .find(input)
            .map(|m| (m.pattern().as_u32(), m.end()))
    }

    pub fn len(&self) -> usize {
        self.exact.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty()
    }

    /// Length of the longest key.
    pub fn max_len(&self) -> usize {
        self.max_len
    }
}
