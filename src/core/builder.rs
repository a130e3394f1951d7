//! Vocabulary builder.
//!
//! [`VocabBuilder`] turns a token list (and optionally a prior [`Vocab`]) into a
//! new compiled model. Building is a pure function of its inputs: the same
//! builder always yields the same records, ids, flags and branches.
//!
//! # Example
//!
//! ```
//! use monstertok::{VocabBuilder, VocabConfig};
//!
//! let vocab = VocabBuilder::new(VocabConfig::default())
//!     .add_tokens(["hello", " world", "!"])
//!     .add_special_tokens(["<eos>"])
//!     .build()
//!     .unwrap();
//! assert!(vocab.token_to_id(b" world").is_some());
//! ```

use std::cmp::Ordering;

use log::{debug, info, warn};
use rustc_hash::{FxHashMap, FxHashSet};
use unicode_normalization::char::is_combining_mark;

use super::capcode::{self, CapcodeMode, DELETE_MARKER};
use super::charset::Charset;
use super::normalize::NormalizeError;
use super::vocab::{
    Branch, ByteClass, DeletedToken, ReserveBytes, TokenFlags, TokenRecord, Vocab, VocabConfig,
    VocabError, MAX_TOKEN_LEN, NONE_ID,
};

/// Score given to shadow records.
const SHADOW_SCORE: f32 = -1.0;

/// Endings that split off as their own token, e.g. `dog|'s`.
const SUFFIXES: [&str; 14] = [
    "'s", "'t", "'re", "'ve", "'m", "'ll", "'d", "’s", "’t", "’re", "’ve", "’m", "’ll", "’d",
];

/// A token waiting to be compiled.
#[derive(Debug, Clone)]
struct Entry {
    id: Option<u32>,
    score: f32,
    special: bool,
    count: u32,
}

/// A requested addition, kept raw until `build` normalizes it.
#[derive(Debug, Clone)]
struct Addition {
    raw: Vec<u8>,
    score: f32,
    special: bool,
}

/// Builds a [`Vocab`] from scratch or from a prior model.
#[derive(Debug, Clone)]
pub struct VocabBuilder {
    config: VocabConfig,
    prior: Vec<(Vec<u8>, Entry)>,
    prior_deleted: Vec<DeletedToken>,
    prior_unk: Option<u32>,
    additions: Vec<Addition>,
    deletions: Vec<Vec<u8>>,
    deleted_ids: Vec<u32>,
    target: Option<usize>,
    reset: bool,
    unk: Option<bool>,
}

impl VocabBuilder {
    /// Start an empty vocabulary.
    pub fn new(config: VocabConfig) -> Self {
        Self {
            config,
            prior: Vec::new(),
            prior_deleted: Vec::new(),
            prior_unk: None,
            additions: Vec::new(),
            deletions: Vec::new(),
            deleted_ids: Vec::new(),
            target: None,
            reset: false,
            unk: None,
        }
    }

    /// Start from an existing vocabulary. Ids are kept unless [`reset_ids`](Self::reset_ids) is called.
    pub fn from_vocab(vocab: &Vocab) -> Self {
        let mut builder = Self::new(vocab.config);
        builder.prior = vocab
            .records
            .iter()
            .filter(|r| !r.is_shadow())
            .map(|r| {
                (
                    r.bytes.clone(),
                    Entry {
                        id: Some(r.id),
                        score: r.score,
                        special: r.flags.is_special(),
                        count: 1,
                    },
                )
            })
            .collect();
        builder.prior_deleted = vocab.deleted.clone();
        builder.prior_unk = vocab.unk_id();
        builder
    }

    pub fn config(&self) -> &VocabConfig {
        &self.config
    }

    /// Add regular tokens with a score of zero.
    pub fn add_tokens<I, T>(self, tokens: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        self.add_scored_tokens(tokens.into_iter().map(|t| (t, 0.0)))
    }

    /// Add regular tokens with training scores. Negative scores count as zero.
    pub fn add_scored_tokens<I, T>(mut self, tokens: I) -> Self
    where
        I: IntoIterator<Item = (T, f32)>,
        T: AsRef<[u8]>,
    {
        self.additions
            .extend(tokens.into_iter().map(|(t, score)| Addition {
                raw: t.as_ref().to_vec(),
                score,
                special: false,
            }));
        self
    }

    /// Add special tokens. They only ever match exactly and are never split.
    pub fn add_special_tokens<I, T>(mut self, tokens: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        self.additions
            .extend(tokens.into_iter().map(|t| Addition {
                raw: t.as_ref().to_vec(),
                score: 0.0,
                special: true,
            }));
        self
    }

    /// Delete tokens, given either as stored or as raw text.
    pub fn delete_tokens<I, T>(mut self, tokens: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        self.deletions
            .extend(tokens.into_iter().map(|t| t.as_ref().to_vec()));
        self
    }

    /// Delete tokens by id.
    pub fn delete_ids<I: IntoIterator<Item = u32>>(mut self, ids: I) -> Self {
        self.deleted_ids.extend(ids);
        self
    }

    /// Grow or shrink the active vocabulary (UNK included) to `size` ids.
    pub fn resize(mut self, size: usize) -> Self {
        self.target = Some(size);
        self
    }

    /// Reassign every id densely from zero.
    pub fn reset_ids(mut self) -> Self {
        self.reset = true;
        self
    }

    pub fn enable_unk(mut self) -> Self {
        self.unk = Some(true);
        self
    }

    pub fn disable_unk(mut self) -> Self {
        self.unk = Some(false);
        self
    }

    /// Guarantee single-byte tokens for a set of byte values.
    pub fn reserve(mut self, reserve: ReserveBytes) -> Self {
        self.config.reserve = reserve;
        self
    }

    /// Compile the vocabulary.
    pub fn build(self) -> Result<Vocab, VocabError> {
        self.config.validate()?;
        let config = self.config;

        let mut state = MergeState {
            active: FxHashMap::default(),
            deleted: FxHashMap::default(),
        };
        for (bytes, entry) in self.prior {
            state.active.insert(bytes, entry);
        }
        for token in self.prior_deleted {
            state.deleted.insert(token.bytes.clone(), token);
        }
        let mut unk = self.unk.unwrap_or(self.prior_unk.is_some());
        let mut unk_id = self.prior_unk;

        // Deletions: by bytes, as stored or after encoding, then by id.
        for raw in &self.deletions {
            let mut removed = state.delete(raw);
            if let Ok(encoded) = encode_token(&config, raw) {
                removed |= state.delete(&encoded);
            }
            if !removed {
                debug!("delete: token {:?} not in vocabulary", String::from_utf8_lossy(raw));
            }
        }
        for &id in &self.deleted_ids {
            if id >= NONE_ID {
                return Err(VocabError::InvalidId(id));
            }
            if unk_id == Some(id) {
                unk = false;
                continue;
            }
            let found = state
                .active
                .iter()
                .find(|(_, e)| e.id == Some(id))
                .map(|(bytes, _)| bytes.clone());
            match found {
                Some(bytes) => {
                    state.delete(&bytes);
                }
                None => debug!("delete: id {id} is not assigned"),
            }
        }

        // Additions.
        for addition in self.additions {
            let bytes = match encode_token(&config, &addition.raw) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(
                        "dropping token {:?}: {e}",
                        String::from_utf8_lossy(&addition.raw)
                    );
                    continue;
                }
            };
            if bytes.is_empty() || bytes.len() > MAX_TOKEN_LEN {
                warn!(
                    "dropping token {:?}: {} bytes after normalization",
                    String::from_utf8_lossy(&addition.raw),
                    bytes.len()
                );
                continue;
            }
            state.add(bytes, addition.score, addition.special);
        }

        if config.capcode.uses_delete_marker() {
            state.add(vec![DELETE_MARKER], 0.0, true);
        }
        state.remove_special_conflicts();
        state.apply_reserve(config.reserve);

        if let Some(target) = self.target {
            state.resize(target, usize::from(unk));
        }

        if !unk {
            unk_id = None;
        }
        let unk_id = if self.reset {
            state.reset_ids(unk)?
        } else {
            state.assign_ids(unk, unk_id)?
        };

        compile(config, state, unk_id.unwrap_or(NONE_ID))
    }
}

impl Vocab {
    /// Start a modification of this vocabulary. The result is a new model.
    pub fn modify(&self) -> VocabBuilder {
        VocabBuilder::from_vocab(self)
    }
}

/// Normalize and capcode-encode a token candidate.
///
/// Candidates that already contain a marker are taken as encoded.
fn encode_token(config: &VocabConfig, raw: &[u8]) -> Result<Vec<u8>, NormalizeError> {
    let normalized = config.normalization.normalize(config.charset, raw)?;
    if config.capcode != CapcodeMode::Enabled || capcode::contains_marker(&normalized) {
        return Ok(normalized);
    }
    let text = std::str::from_utf8(&normalized)
        .map_err(|e| NormalizeError::InvalidUtf8(e.valid_up_to()))?;
    Ok(capcode::encode(config.capcode, text).into_bytes())
}

// =============================================================================
// Merging
// =============================================================================

/// Negative scores are reserved for shadow records; regular scores floor at zero.
fn regular_score(score: f32) -> f32 {
    score.max(0.0)
}

struct MergeState {
    active: FxHashMap<Vec<u8>, Entry>,
    deleted: FxHashMap<Vec<u8>, DeletedToken>,
}

impl MergeState {
    fn delete(&mut self, bytes: &[u8]) -> bool {
        let Some(entry) = self.active.remove(bytes) else {
            return false;
        };
        self.deleted.insert(
            bytes.to_vec(),
            DeletedToken {
                bytes: bytes.to_vec(),
                id: entry.id.unwrap_or(NONE_ID),
                score: entry.score,
            },
        );
        true
    }

    fn restore(&mut self, bytes: &[u8]) -> bool {
        let Some(token) = self.deleted.remove(bytes) else {
            return false;
        };
        self.active.insert(
            token.bytes,
            Entry {
                id: (token.id != NONE_ID).then_some(token.id),
                score: regular_score(token.score),
                special: false,
                count: 1,
            },
        );
        true
    }

    fn add(&mut self, bytes: Vec<u8>, score: f32, special: bool) {
        let score = regular_score(score);
        if let Some(entry) = self.active.get_mut(&bytes) {
            entry.count += 1;
            entry.score = entry.score.max(score);
            entry.special |= special;
            return;
        }
        let id = self
            .deleted
            .remove(&bytes)
            .and_then(|t| (t.id != NONE_ID).then_some(t.id));
        self.active.insert(
            bytes,
            Entry {
                id,
                score,
                special,
                count: 1,
            },
        );
    }

    /// Delete multi-byte regular tokens that overlap a special token.
    fn remove_special_conflicts(&mut self) {
        let specials: Vec<Vec<u8>> = self
            .active
            .iter()
            .filter(|(_, e)| e.special)
            .map(|(b, _)| b.clone())
            .collect();
        if specials.is_empty() {
            return;
        }
        let mut conflicts: Vec<Vec<u8>> = self
            .active
            .iter()
            .filter(|(bytes, e)| {
                !e.special
                    && bytes.len() > 1
                    && specials
                        .iter()
                        .any(|s| contains(bytes, s) || contains(s, bytes))
            })
            .map(|(b, _)| b.clone())
            .collect();
        conflicts.sort();
        for bytes in conflicts {
            debug!(
                "deleting {:?}: overlaps a special token",
                String::from_utf8_lossy(&bytes)
            );
            self.delete(&bytes);
        }
    }

    fn apply_reserve(&mut self, reserve: ReserveBytes) {
        for b in reserve.bytes() {
            let bytes = [b];
            if !self.active.contains_key(&bytes[..]) && !self.restore(&bytes) {
                self.add(bytes.to_vec(), 0.0, false);
            }
        }
        if reserve.contains(ReserveBytes::EXCLUSIVE) {
            let mut extra: Vec<Vec<u8>> = self
                .active
                .iter()
                .filter(|(bytes, e)| bytes.len() == 1 && !e.special && !reserve.reserves(bytes[0]))
                .map(|(b, _)| b.clone())
                .collect();
            extra.sort();
            for bytes in extra {
                self.delete(&bytes);
            }
        }
    }

    fn resize(&mut self, target: usize, unk: usize) {
        let current = self.active.len() + unk;
        match target.cmp(&current) {
            Ordering::Less => {
                let mut candidates: Vec<(&Vec<u8>, &Entry)> = self
                    .active
                    .iter()
                    .filter(|(bytes, e)| !e.special && bytes.len() > 1)
                    .collect();
                candidates.sort_by(|a, b| {
                    a.1.score
                        .total_cmp(&b.1.score)
                        .then(a.1.count.cmp(&b.1.count))
                        .then(a.0.cmp(b.0))
                });
                let excess = current - target;
                if candidates.len() < excess {
                    warn!(
                        "resize to {target}: only {} tokens can be removed",
                        candidates.len()
                    );
                }
                let doomed: Vec<Vec<u8>> = candidates
                    .into_iter()
                    .take(excess)
                    .map(|(b, _)| b.clone())
                    .collect();
                debug!("resize: deleting {} lowest scoring tokens", doomed.len());
                for bytes in doomed {
                    self.delete(&bytes);
                }
            }
            Ordering::Greater => {
                let mut candidates: Vec<&DeletedToken> = self.deleted.values().collect();
                candidates.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.bytes.cmp(&b.bytes)));
                let restore: Vec<Vec<u8>> = candidates
                    .into_iter()
                    .take(target - current)
                    .map(|t| t.bytes.clone())
                    .collect();
                debug!("resize: restoring {} deleted tokens", restore.len());
                for bytes in restore {
                    self.restore(&bytes);
                }
            }
            Ordering::Equal => {}
        }
    }

    /// Give every new token the lowest id not in use. Deleted tokens keep theirs.
    fn assign_ids(&mut self, unk: bool, unk_id: Option<u32>) -> Result<Option<u32>, VocabError> {
        let mut used: FxHashSet<u32> = self.active.values().filter_map(|e| e.id).collect();
        used.extend(
            self.deleted
                .values()
                .map(|t| t.id)
                .filter(|&id| id != NONE_ID),
        );
        let unk_id = unk_id.filter(|id| unk && used.insert(*id));

        let mut fresh: Vec<&Vec<u8>> = self
            .active
            .iter()
            .filter(|(_, e)| e.id.is_none())
            .map(|(b, _)| b)
            .collect();
        fresh.sort_by(|a, b| reset_order(a, b, &self.active));
        let fresh: Vec<Vec<u8>> = fresh.into_iter().cloned().collect();

        let mut next = 0u32;
        let mut take = |used: &mut FxHashSet<u32>| -> Result<u32, VocabError> {
            while used.contains(&next) {
                next += 1;
            }
            if next >= NONE_ID {
                return Err(VocabError::VocabularyFull);
            }
            used.insert(next);
            Ok(next)
        };
        for bytes in &fresh {
            let id = take(&mut used)?;
            if let Some(entry) = self.active.get_mut(bytes) {
                entry.id = Some(id);
            }
        }
        let unk_id = match (unk, unk_id) {
            (false, _) => None,
            (true, Some(id)) => Some(id),
            (true, None) => Some(take(&mut used)?),
        };
        debug!("assigned {} new ids", fresh.len());
        Ok(unk_id)
    }

    fn reset_ids(&mut self, unk: bool) -> Result<Option<u32>, VocabError> {
        let mut order: Vec<Vec<u8>> = self.active.keys().cloned().collect();
        order.sort_by(|a, b| reset_order(a, b, &self.active));
        let total = order.len() + usize::from(unk);
        if total >= NONE_ID as usize {
            return Err(VocabError::VocabularyFull);
        }
        for (id, bytes) in order.iter().enumerate() {
            if let Some(entry) = self.active.get_mut(bytes) {
                entry.id = Some(id as u32);
            }
        }
        for token in self.deleted.values_mut() {
            token.id = NONE_ID;
        }
        debug!("reset ids for {} tokens", order.len());
        Ok(unk.then_some(order.len() as u32))
    }
}

/// Single bytes by value, then regular tokens, then specials.
fn reset_order(a: &[u8], b: &[u8], active: &FxHashMap<Vec<u8>, Entry>) -> Ordering {
    let rank = |bytes: &[u8]| {
        if active.get(bytes).is_some_and(|e| e.special) {
            2
        } else if bytes.len() == 1 {
            0
        } else {
            1
        }
    };
    rank(a).cmp(&rank(b)).then_with(|| a.cmp(b))
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    needle.len() <= haystack.len() && haystack.windows(needle.len()).any(|w| w == needle)
}

// =============================================================================
// Compilation
// =============================================================================

/// Character categories used for flags, word counts and branch priorities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CharKind {
    Space,
    Letter,
    Digit,
    CaseMarker,
    DeleteMarker,
    Other,
}

impl CharKind {
    fn of(c: Option<char>, capcode: CapcodeMode) -> Self {
        let Some(c) = c else {
            return CharKind::Other;
        };
        if c.is_ascii() && capcode.is_marker(c as u8) {
            return if c as u8 == DELETE_MARKER {
                CharKind::DeleteMarker
            } else {
                CharKind::CaseMarker
            };
        }
        if c == ' ' {
            CharKind::Space
        } else if c.is_alphabetic() || is_combining_mark(c) {
            CharKind::Letter
        } else if c.is_numeric() {
            CharKind::Digit
        } else {
            CharKind::Other
        }
    }

    fn is_alphanumeric(self) -> bool {
        matches!(self, CharKind::Letter | CharKind::Digit)
    }

    fn is_space_like(self) -> bool {
        matches!(self, CharKind::Space | CharKind::DeleteMarker)
    }
}

/// A token split into characters, with byte offsets.
struct Scan {
    kinds: Vec<CharKind>,
    chars: Vec<Option<char>>,
    starts: Vec<usize>,
}

impl Scan {
    fn new(bytes: &[u8], charset: Charset, capcode: CapcodeMode) -> Self {
        let mut scan = Scan {
            kinds: Vec::with_capacity(bytes.len()),
            chars: Vec::with_capacity(bytes.len()),
            starts: Vec::with_capacity(bytes.len()),
        };
        let mut offset = 0;
        for (c, len) in charset.chars(bytes) {
            scan.kinds.push(CharKind::of(c, capcode));
            scan.chars.push(c);
            scan.starts.push(offset);
            offset += len;
        }
        scan
    }

    /// Does a word start right after character `k`? Case markers are skipped.
    fn word_follows(&self, k: usize) -> bool {
        self.kinds[k + 1..]
            .iter()
            .find(|&&kind| kind != CharKind::CaseMarker)
            .is_some_and(|kind| kind.is_alphanumeric())
    }

    fn word_count(&self) -> usize {
        (0..self.kinds.len())
            .filter(|&k| self.kinds[k].is_space_like() && self.word_follows(k))
            .count()
    }

    /// Character index starting at byte `offset`, if it is a boundary.
    fn char_at(&self, offset: usize) -> Option<usize> {
        self.starts.binary_search(&offset).ok()
    }
}

/// Derive flags and word count for a non-special token.
fn token_flags(bytes: &[u8], charset: Charset, capcode: CapcodeMode) -> (TokenFlags, u8) {
    let scan = Scan::new(bytes, charset, capcode);
    let mut flags = TokenFlags::default();
    let (Some(&first), Some(&last)) = (scan.kinds.first(), scan.kinds.last()) else {
        return (flags, 0);
    };

    match first {
        CharKind::Space => flags.set(TokenFlags::BEGINS_SPACE, true),
        CharKind::Letter => flags.set(TokenFlags::BEGINS_LETTER, true),
        CharKind::CaseMarker | CharKind::DeleteMarker => {
            flags.set(TokenFlags::BEGINS_SPACE, true);
            flags.set(TokenFlags::BEGINS_CAPCODE, true);
        }
        CharKind::Digit | CharKind::Other => {}
    }
    if matches!(last, CharKind::CaseMarker | CharKind::DeleteMarker) {
        flags.set(TokenFlags::ENDS_CAPCODE, true);
    }
    if last == CharKind::Letter {
        flags.set(TokenFlags::ENDS_LETTER, true);
    }

    let content = || {
        scan.kinds
            .iter()
            .copied()
            .filter(|&k| k != CharKind::CaseMarker)
            .map(|k| if k == CharKind::DeleteMarker { CharKind::Space } else { k })
    };
    let letters = content().all(|k| matches!(k, CharKind::Letter | CharKind::Space))
        && content().any(|k| k == CharKind::Letter);
    let digits = content().all(|k| matches!(k, CharKind::Digit | CharKind::Space))
        && content().any(|k| k == CharKind::Digit);
    let punct = content().all(|k| !k.is_alphanumeric());
    if scan.kinds.len() == 1 || letters || digits || punct {
        flags.set(TokenFlags::HOMOGENEOUS, true);
    }

    let words = scan.word_count();
    if first.is_space_like() && last == CharKind::Letter && letters && words == 1 {
        flags.set(TokenFlags::SINGLE_WORD, true);
    }
    (flags, words.min(u8::MAX as usize) as u8)
}

/// Priority of splitting `bytes` after its first `len` bytes.
fn split_priority(bytes: &[u8], len: usize, scan: &Scan, suffix_at: Option<usize>) -> u8 {
    if suffix_at == Some(len) {
        return 8;
    }
    let after = scan.char_at(len);
    if let Some(k) = after {
        if scan.kinds[k] == CharKind::Space
            && scan.kinds.get(k + 1).is_some_and(|n| n.is_alphanumeric())
        {
            return 10;
        }
    }
    let Some(k) = after else {
        return 1;
    };
    let (before, next) = (scan.kinds[k - 1], scan.kinds[k]);
    if (before == CharKind::Letter && next != CharKind::Letter)
        || (before == CharKind::Digit && next != CharKind::Digit)
    {
        9
    } else if matches!(next, CharKind::CaseMarker | CharKind::DeleteMarker) {
        9
    } else if before == CharKind::Space && next != CharKind::Space {
        8
    } else if before != CharKind::Space && next == CharKind::Space {
        7
    } else {
        1
    }
}

/// Byte offset where a trailing possessive or contraction begins.
fn suffix_start(bytes: &[u8], scan: &Scan) -> Option<usize> {
    SUFFIXES.iter().find_map(|suffix| {
        let start = bytes.len().checked_sub(suffix.len())?;
        if start == 0 || !bytes.ends_with(suffix.as_bytes()) {
            return None;
        }
        let k = scan.char_at(start)?;
        (scan.kinds[k - 1] == CharKind::Letter).then_some(start)
    })
}

struct Pending {
    bytes: Vec<u8>,
    id: u32,
    score: f32,
    special: bool,
    shadow: bool,
}

fn compile(config: VocabConfig, state: MergeState, unk_id: u32) -> Result<Vocab, VocabError> {
    let mut pending: Vec<Pending> = state
        .active
        .iter()
        .map(|(bytes, e)| Pending {
            bytes: bytes.clone(),
            id: e.id.unwrap_or(NONE_ID),
            score: e.score,
            special: e.special,
            shadow: false,
        })
        .collect();

    if config.capcode.uses_delete_marker() {
        let mut shadows = Vec::new();
        for p in pending.iter().filter(|p| !p.special && p.bytes.len() > 1) {
            if p.bytes[0] != b' ' {
                continue;
            }
            let scan = Scan::new(&p.bytes, config.charset, config.capcode);
            if !scan.word_follows(0) {
                continue;
            }
            let mut key = p.bytes.clone();
            key[0] = DELETE_MARKER;
            if !state.active.contains_key(&key) {
                shadows.push(Pending {
                    bytes: key,
                    id: p.id,
                    score: SHADOW_SCORE,
                    special: false,
                    shadow: true,
                });
            }
        }
        pending.extend(shadows);
    }
    pending.sort_by(|a, b| {
        a.bytes
            .len()
            .cmp(&b.bytes.len())
            .then_with(|| a.bytes.cmp(&b.bytes))
    });

    let index: FxHashMap<&[u8], usize> = pending
        .iter()
        .enumerate()
        .map(|(i, p)| (p.bytes.as_slice(), i))
        .collect();

    let mut records = Vec::with_capacity(pending.len());
    let mut tally = [[0u32; 4]; 256];
    for (position, p) in pending.iter().enumerate() {
        if p.special {
            records.push(TokenRecord {
                bytes: p.bytes.clone(),
                id: p.id,
                score: p.score,
                flags: TokenFlags::from_bits(TokenFlags::SPECIAL),
                word_count: 0,
                alt1: None,
                alt2: None,
            });
            continue;
        }
        let (flags, word_count) = token_flags(&p.bytes, config.charset, config.capcode);
        let scan = Scan::new(&p.bytes, config.charset, config.capcode);
        if !p.shadow {
            let column = match scan.kinds[0] {
                CharKind::Space => 0,
                CharKind::Letter => 1,
                CharKind::Digit => 2,
                _ => 3,
            };
            tally[p.bytes[0] as usize][column] += 1;
        }

        let suffix_at = suffix_start(&p.bytes, &scan);
        let mut branches: Vec<(u8, usize, usize)> = Vec::new();
        for len in (1..p.bytes.len()).rev() {
            let Some(&alt) = index.get(&p.bytes[..len]) else {
                continue;
            };
            if pending[alt].special {
                continue;
            }
            branches.push((split_priority(&p.bytes, len, &scan, suffix_at), len, alt));
        }
        branches.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.cmp(&a.1)));
        let mut alts = branches.iter().map(|&(_, len, alt)| {
            assert!(alt < position, "alternative must precede its token");
            Branch {
                index: alt as u32,
                length: len as u8,
                id: pending[alt].id,
            }
        });
        records.push(TokenRecord {
            bytes: p.bytes.clone(),
            id: p.id,
            score: p.score,
            flags,
            word_count,
            alt1: alts.next(),
            alt2: alts.next(),
        });
    }

    let begin_class = classify_begin_bytes(&tally);
    let delete_id = if config.capcode.uses_delete_marker() {
        index
            .get(&[DELETE_MARKER][..])
            .map_or(NONE_ID, |&i| pending[i].id)
    } else {
        NONE_ID
    };

    let mut deleted: Vec<DeletedToken> = state.deleted.into_values().collect();
    deleted.sort_by(|a, b| a.bytes.cmp(&b.bytes));

    let vocab = Vocab::assemble(config, records, unk_id, delete_id, begin_class, deleted)?;
    info!(
        "built vocabulary: {} ids, {} records, {} deleted, max token length {}",
        vocab.len(),
        vocab.records().len(),
        vocab.deleted_tokens().len(),
        vocab.max_token_len()
    );
    Ok(vocab)
}

fn classify_begin_bytes(tally: &[[u32; 4]; 256]) -> [ByteClass; 256] {
    let mut classes = [ByteClass::Unclassified; 256];
    for (class, counts) in classes.iter_mut().zip(tally) {
        let Some((winner, &count)) = counts.iter().enumerate().max_by_key(|&(_, &c)| c) else {
            continue;
        };
        let unique = counts
            .iter()
            .enumerate()
            .all(|(k, &c)| k == winner || c < count);
        if !unique || count <= 2 {
            continue;
        }
        *class = match winner {
            0 => ByteClass::Space,
            1 => ByteClass::Letter,
            3 => ByteClass::Punct,
            _ => ByteClass::Unclassified,
        };
    }
    classes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(tokens: &[&str]) -> Vocab {
        VocabBuilder::new(VocabConfig::default())
            .add_tokens(tokens)
            .build()
            .unwrap()
    }

    fn record<'a>(vocab: &'a Vocab, token: &[u8]) -> &'a TokenRecord {
        let id = vocab.token_to_id(token).unwrap();
        vocab.record_for_id(id).unwrap()
    }

    fn alt_bytes(vocab: &Vocab, branch: Option<Branch>) -> Option<Vec<u8>> {
        branch.map(|b| vocab.records()[b.index as usize].bytes.clone())
    }

    #[test]
    fn test_records_in_build_order() {
        let vocab = build(&["abc", "a", "b", "ab", "zz"]);
        let bytes: Vec<&[u8]> = vocab.records().iter().map(|r| r.bytes.as_slice()).collect();
        assert_eq!(bytes, vec![&b"a"[..], b"b", b"ab", b"zz", b"abc"]);
    }

    #[test]
    fn test_ids_packed_from_zero() {
        let vocab = build(&["b", "a", "ab"]);
        assert_eq!(vocab.token_to_id(b"a"), Some(0));
        assert_eq!(vocab.token_to_id(b"b"), Some(1));
        assert_eq!(vocab.token_to_id(b"ab"), Some(2));
        assert_eq!(vocab.reverse_len(), 3);
    }

    #[test]
    fn test_flags_single_word() {
        let vocab = build(&[" the", "the", " the cat", "!!", "a1"]);
        let the = record(&vocab, b" the");
        assert!(the.flags.is_single_word());
        assert!(the.flags.begins_with_space());
        assert!(the.flags.ends_with_letter());
        assert!(the.flags.is_homogeneous());
        assert_eq!(the.word_count, 1);

        let phrase = record(&vocab, b" the cat");
        assert!(!phrase.flags.is_single_word());
        assert_eq!(phrase.word_count, 2);

        let bare = record(&vocab, b"the");
        assert!(bare.flags.begins_with_letter());
        assert!(!bare.flags.begins_with_space());
        assert_eq!(bare.word_count, 0);

        assert!(record(&vocab, b"!!").flags.is_homogeneous());
        assert!(!record(&vocab, b"a1").flags.is_homogeneous());
    }

    #[test]
    fn test_alternatives_prefer_word_boundaries() {
        let vocab = build(&["a", "b", "c", "ab", "abc", "abc d", " ", " d", "abc "]);
        let rec = record(&vocab, b"abc d");
        // "abc" is followed by a space then a letter
        assert_eq!(alt_bytes(&vocab, rec.alt1), Some(b"abc".to_vec()));
        // "abc " ends on a space before a letter
        assert_eq!(alt_bytes(&vocab, rec.alt2), Some(b"abc ".to_vec()));
    }

    #[test]
    fn test_alternative_suffix() {
        let vocab = build(&["dog", "dog'", "dog's", "d", "do"]);
        let rec = record(&vocab, b"dog's");
        assert_eq!(alt_bytes(&vocab, rec.alt1), Some(b"dog".to_vec()));
        let alt1 = rec.alt1.unwrap();
        assert_eq!(alt1.length, 3);
        assert_eq!(Some(alt1.id), vocab.token_to_id(b"dog"));
    }

    #[test]
    fn test_alternatives_precede_owner() {
        let vocab = build(&["x", "xy", "xyz", "xyzw", "y", "yz"]);
        for (position, rec) in vocab.records().iter().enumerate() {
            for alt in [rec.alt1, rec.alt2].into_iter().flatten() {
                assert!((alt.index as usize) < position);
            }
        }
    }

    #[test]
    fn test_special_tokens() {
        let vocab = VocabBuilder::new(VocabConfig::default())
            .add_tokens(["<e", "os>", "e", "<", "hello"])
            .add_special_tokens(["<eos>"])
            .build()
            .unwrap();
        let eos = record(&vocab, b"<eos>");
        assert!(eos.flags.is_special());
        assert!(eos.alt1.is_none());
        assert_eq!(vocab.token_to_id(b"<e"), None);
        assert_eq!(vocab.token_to_id(b"os>"), None);
        assert!(vocab.token_to_id(b"e").is_some());
        assert!(vocab.token_to_id(b"hello").is_some());
        assert!(vocab
            .deleted_tokens()
            .iter()
            .any(|t| t.bytes == b"<e".to_vec()));
    }

    #[test]
    fn test_drops_overlong_and_empty() {
        let long = "x".repeat(41);
        let vocab = build(&["ok", &long, ""]);
        assert_eq!(vocab.len(), 1);
    }

    #[test]
    fn test_delete_keeps_other_ids() {
        let vocab = build(&["a", "b", "c", "ab"]);
        let b = vocab.token_to_id(b"b").unwrap();
        let ab = vocab.token_to_id(b"ab").unwrap();
        let edited = vocab
            .modify()
            .delete_tokens(["a"])
            .add_tokens(["zz"])
            .build()
            .unwrap();
        assert_eq!(edited.token_to_id(b"a"), None);
        assert_eq!(edited.token_to_id(b"b"), Some(b));
        assert_eq!(edited.token_to_id(b"ab"), Some(ab));
        // The id of "a" stays reserved
        assert_eq!(edited.token_to_id(b"zz"), Some(4));
    }

    #[test]
    fn test_delete_by_id_and_restore() {
        let vocab = build(&["a", "b", "ab"]);
        let ab = vocab.token_to_id(b"ab").unwrap();
        let edited = vocab.modify().delete_ids([ab]).build().unwrap();
        assert_eq!(edited.token_to_id(b"ab"), None);
        let restored = edited.modify().add_tokens(["ab"]).build().unwrap();
        assert_eq!(restored.token_to_id(b"ab"), Some(ab));

        let err = vocab.modify().delete_ids([NONE_ID]).build().unwrap_err();
        assert!(matches!(err, VocabError::InvalidId(_)));
    }

    #[test]
    fn test_resize_down_and_up() {
        let vocab = VocabBuilder::new(VocabConfig::default())
            .add_scored_tokens([("a", 0.0), ("b", 0.0), ("ab", 3.0), ("ba", 1.0), ("bb", 2.0)])
            .build()
            .unwrap();
        let small = vocab.modify().resize(3).build().unwrap();
        assert_eq!(small.len(), 3);
        assert!(small.token_to_id(b"ab").is_some());
        assert!(small.token_to_id(b"a").is_some());
        assert_eq!(small.token_to_id(b"ba"), None);

        let grown = small.modify().resize(4).build().unwrap();
        assert_eq!(grown.len(), 4);
        assert_eq!(grown.token_to_id(b"bb"), vocab.token_to_id(b"bb"));
        assert_eq!(grown.token_to_id(b"ba"), None);
    }

    #[test]
    fn test_negative_scores_floor_at_zero() {
        let vocab = VocabBuilder::new(VocabConfig::default())
            .add_scored_tokens([("a", 1.0), ("b", 1.0), ("ab", -1.0)])
            .build()
            .unwrap();
        let ab = vocab.token_to_id(b"ab").unwrap();
        let info = vocab.tokens().into_iter().find(|t| t.id == ab).unwrap();
        assert_eq!(info.score, 0.0);
        assert_eq!(vocab.len(), 3);

        let edited = vocab.modify().add_tokens(["ba"]).build().unwrap();
        assert_eq!(edited.token_to_id(b"ab"), Some(ab));
        assert_eq!(edited.len(), 4);
    }

    #[test]
    fn test_reset_ids() {
        let vocab = VocabBuilder::new(VocabConfig::default())
            .add_tokens(["zz", "b", "a"])
            .add_special_tokens(["<s>"])
            .enable_unk()
            .build()
            .unwrap();
        let edited = vocab
            .modify()
            .delete_tokens(["b"])
            .reset_ids()
            .build()
            .unwrap();
        assert_eq!(edited.token_to_id(b"a"), Some(0));
        assert_eq!(edited.token_to_id(b"zz"), Some(1));
        assert_eq!(edited.token_to_id(b"<s>"), Some(2));
        assert_eq!(edited.unk_id(), Some(3));
        assert_eq!(edited.reverse_len(), 4);
    }

    #[test]
    fn test_unk_toggle() {
        let vocab = build(&["a"]);
        assert_eq!(vocab.unk_id(), None);
        let with_unk = vocab.modify().enable_unk().build().unwrap();
        assert_eq!(with_unk.unk_id(), Some(1));
        assert_eq!(with_unk.len(), 2);
        let kept = with_unk.modify().add_tokens(["b"]).build().unwrap();
        assert_eq!(kept.unk_id(), Some(1));
        assert_eq!(kept.token_to_id(b"b"), Some(2));
        let without = kept.modify().disable_unk().build().unwrap();
        assert_eq!(without.unk_id(), None);
    }

    #[test]
    fn test_reserve_bytes() {
        let vocab = VocabBuilder::new(VocabConfig::default())
            .add_tokens(["hello"])
            .reserve(ReserveBytes::ALL)
            .build()
            .unwrap();
        assert_eq!(vocab.len(), 257);
        for b in 0..=255u8 {
            assert!(vocab.token_to_id(&[b]).is_some(), "byte {b} missing");
        }
        // Reserved single bytes survive a resize
        let small = vocab.modify().resize(10).build().unwrap();
        assert_eq!(small.len(), 256);
    }

    #[test]
    fn test_reserve_exclusive() {
        let tokens: [&[u8]; 3] = [&[0xFF], b"a", b"ab"];
        let vocab = VocabBuilder::new(VocabConfig::default())
            .add_tokens(tokens)
            .reserve(ReserveBytes::LOW_128.with(ReserveBytes::EXCLUSIVE))
            .build()
            .unwrap();
        assert_eq!(vocab.token_to_id(&[0xFF]), None);
        assert!(vocab.token_to_id(b"ab").is_some());
        assert_eq!(vocab.len(), 129);
    }

    #[test]
    fn test_delete_marker_and_shadows() {
        let config = VocabConfig::default().with_capcode(CapcodeMode::DeleteOnly);
        let vocab = VocabBuilder::new(config)
            .add_tokens([" cat", "ca", "t", " ", "!"])
            .build()
            .unwrap();
        let delete_id = vocab.delete_token_id().unwrap();
        assert_eq!(vocab.id_to_token(delete_id), Some(&[DELETE_MARKER][..]));
        assert!(vocab.record_for_id(delete_id).unwrap().flags.is_special());

        let shadow = vocab
            .records()
            .iter()
            .find(|r| r.bytes == b"\x7Fcat".to_vec())
            .unwrap();
        assert!(shadow.is_shadow());
        assert_eq!(Some(shadow.id), vocab.token_to_id(b" cat"));
        assert_eq!(shadow.word_count, 1);
        assert!(shadow.flags.begins_with_space());
        // Shadows are not listed
        assert_eq!(vocab.tokens().len(), vocab.len());
    }

    #[test]
    fn test_capcode_encodes_tokens() {
        let config = VocabConfig::default().with_capcode(CapcodeMode::Enabled);
        let vocab = VocabBuilder::new(config)
            .add_tokens(["Hello", " World"])
            .build()
            .unwrap();
        assert!(vocab.token_to_id(b"\x0Ehello").is_some());
        assert_eq!(
            vocab.token_to_id(b"Hello"),
            vocab.token_to_id(b"\x0Ehello")
        );
        let world = record(&vocab, b" \x0Eworld");
        assert_eq!(world.word_count, 1);
        assert!(world.flags.is_single_word());
    }

    #[test]
    fn test_begin_class_majority() {
        let vocab = build(&[
            "apple", "ant", "axe", "a", " a", " b", " c", " d", "!", "!!", "!?", "!.", "1", "12",
            "13", "14",
        ]);
        assert_eq!(vocab.begin_class(b'a'), ByteClass::Letter);
        assert_eq!(vocab.begin_class(b' '), ByteClass::Space);
        assert_eq!(vocab.begin_class(b'!'), ByteClass::Punct);
        assert_eq!(vocab.begin_class(b'1'), ByteClass::Unclassified);
        assert_eq!(vocab.begin_class(b'z'), ByteClass::Unclassified);
    }

    #[test]
    fn test_capcode_requires_utf8() {
        let config = VocabConfig::new(Charset::None).with_capcode(CapcodeMode::Enabled);
        assert!(matches!(
            VocabBuilder::new(config).build(),
            Err(VocabError::CapcodeRequiresUtf8)
        ));
    }
}
