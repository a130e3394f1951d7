//! The compiled vocabulary model.
//!
//! A [`Vocab`] is immutable once built. It holds one [`TokenRecord`] per
//! dictionary entry in build order (shorter tokens always before longer ones),
//! the longest-match [`Dictionary`] over those records, and an id-indexed
//! reverse table used for decoding.
//!
//! Records come in two sorts:
//!
//! - active tokens, each with a unique 24-bit id;
//! - shadow records (score below `-0.5`), which reuse the id of an active token
//!   under a different byte string. They are visible to lookups but never
//!   listed, and never occupy a reverse-table slot of their own.
//!
//! Every record may carry up to two alternative branches: shorter prefixes of
//! itself that are tokens in their own right. Branches always point backwards
//! in build order.

use std::fmt;

use rustc_hash::FxHashMap;
use thiserror::Error;

use super::capcode::{self, CapcodeMode};
use super::charset::Charset;
use super::dictionary::Dictionary;
use super::normalize::Normalization;

/// Sentinel for "no id", and the first id that does not fit in 24 bits.
pub const NONE_ID: u32 = 0xFF_FFFF;

/// Longest token, in bytes.
pub const MAX_TOKEN_LEN: usize = 40;

/// Errors from building, loading, or querying a vocabulary.
#[derive(Error, Debug)]
pub enum VocabError {
    #[error("invalid charset code {0} (expected 0, 1 or 2)")]
    InvalidCharset(u8),
    #[error("invalid capcode code {0} (expected 0, 1 or 2)")]
    InvalidCapcode(u8),
    #[error("invalid optimization level code {0}")]
    InvalidLevel(u8),
    #[error("unknown normalization: {0:?}")]
    InvalidNormalization(String),
    #[error("capcode requires the UTF-8 charset")]
    CapcodeRequiresUtf8,
    #[error("invalid token id {0}")]
    InvalidId(u32),
    #[error("vocabulary is full: no 24-bit id left to assign")]
    VocabularyFull,
    #[error("vocabulary data truncated at byte {0}")]
    Truncated(usize),
    #[error("record {index} has invalid length {len}")]
    TokenLength { index: usize, len: usize },
    #[error("record {index} refers to alternative {alt}, which is not an earlier record")]
    ForwardReference { index: usize, alt: usize },
    #[error("record {index} refers to alternative {alt}, which is not a shorter prefix of it")]
    NotAPrefix { index: usize, alt: usize },
    #[error("record {index} duplicates an earlier token")]
    DuplicateToken { index: usize },
    #[error("id {id} is assigned to more than one token")]
    DuplicateId { id: u32 },
    #[error("id {id} is outside the reverse table")]
    IdOutOfRange { id: u32 },
    #[error("invalid begin-byte class {code} for byte {byte}")]
    InvalidByteClass { byte: u8, code: u8 },
    #[error("{0} unexpected trailing bytes after vocabulary data")]
    TrailingBytes(usize),
    #[error("header field {0} does not match the vocabulary contents")]
    HeaderMismatch(&'static str),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("dictionary build error: {0}")]
    Dictionary(#[from] aho_corasick::BuildError),
}

impl VocabError {
    /// Whether this error means the vocabulary data itself is malformed.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            VocabError::Truncated(_)
                | VocabError::TokenLength { .. }
                | VocabError::ForwardReference { .. }
                | VocabError::NotAPrefix { .. }
                | VocabError::DuplicateToken { .. }
                | VocabError::DuplicateId { .. }
                | VocabError::IdOutOfRange { .. }
                | VocabError::InvalidByteClass { .. }
                | VocabError::TrailingBytes(_)
                | VocabError::HeaderMismatch(_)
        )
    }
}

/// Per-token flags, packed into the single byte that is persisted.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TokenFlags(u8);

impl TokenFlags {
    pub const ENDS_LETTER: u8 = 1;
    pub const BEGINS_LETTER: u8 = 1 << 1;
    pub const BEGINS_SPACE: u8 = 1 << 2;
    pub const ENDS_CAPCODE: u8 = 1 << 3;
    pub const BEGINS_CAPCODE: u8 = 1 << 4;
    pub const SINGLE_WORD: u8 = 1 << 5;
    pub const SPECIAL: u8 = 1 << 6;
    pub const HOMOGENEOUS: u8 = 1 << 7;

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    #[inline]
    pub const fn contains(self, flag: u8) -> bool {
        self.0 & flag != 0
    }

    #[inline]
    pub fn set(&mut self, flag: u8, on: bool) {
        if on {
            self.0 |= flag;
        } else {
            self.0 &= !flag;
        }
    }

    #[inline]
    pub const fn ends_with_letter(self) -> bool {
        self.contains(Self::ENDS_LETTER)
    }

    #[inline]
    pub const fn begins_with_letter(self) -> bool {
        self.contains(Self::BEGINS_LETTER)
    }

    /// Begins with a space or the forward-delete marker.
    #[inline]
    pub const fn begins_with_space(self) -> bool {
        self.contains(Self::BEGINS_SPACE)
    }

    #[inline]
    pub const fn ends_on_capcode(self) -> bool {
        self.contains(Self::ENDS_CAPCODE)
    }

    #[inline]
    pub const fn begins_on_capcode(self) -> bool {
        self.contains(Self::BEGINS_CAPCODE)
    }

    /// A space followed by exactly one whole word, e.g. `" the"`.
    #[inline]
    pub const fn is_single_word(self) -> bool {
        self.contains(Self::SINGLE_WORD)
    }

    /// Exact-match only; never split into alternatives.
    #[inline]
    pub const fn is_special(self) -> bool {
        self.contains(Self::SPECIAL)
    }

    /// Entirely letters and marks, or entirely non-alphanumeric.
    #[inline]
    pub const fn is_homogeneous(self) -> bool {
        self.contains(Self::HOMOGENEOUS)
    }
}

impl fmt::Debug for TokenFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TokenFlags({:#010b})", self.0)
    }
}

/// A shorter prefix of a token that is itself a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Branch {
    /// Record index of the prefix.
    pub index: u32,
    /// Prefix length in bytes.
    pub length: u8,
    /// Id of the prefix, cached so the tokenizer does not need a second lookup.
    pub id: u32,
}

/// One dictionary entry.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenRecord {
    pub bytes: Vec<u8>,
    pub id: u32,
    pub score: f32,
    pub flags: TokenFlags,
    pub word_count: u8,
    pub alt1: Option<Branch>,
    pub alt2: Option<Branch>,
}

impl TokenRecord {
    /// Shadow records share another token's id and are never listed.
    #[inline]
    pub fn is_shadow(&self) -> bool {
        self.score < -0.5
    }
}

/// What kind of token most often starts with a given byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ByteClass {
    #[default]
    Unclassified,
    Letter,
    Space,
    Punct,
}

impl ByteClass {
    pub fn from_code(byte: u8, code: u8) -> Result<Self, VocabError> {
        match code {
            0 => Ok(ByteClass::Unclassified),
            1 => Ok(ByteClass::Letter),
            2 => Ok(ByteClass::Space),
            3 => Ok(ByteClass::Punct),
            _ => Err(VocabError::InvalidByteClass { byte, code }),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            ByteClass::Unclassified => 0,
            ByteClass::Letter => 1,
            ByteClass::Space => 2,
            ByteClass::Punct => 3,
        }
    }
}

/// A token removed from the active set, kept so a later resize can bring it
/// back under the same id.
#[derive(Debug, Clone, PartialEq)]
pub struct DeletedToken {
    pub bytes: Vec<u8>,
    pub id: u32,
    pub score: f32,
}

/// Optimization mode the vocabulary was trained with. Informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OptimizationLevel {
    Unfiltered,
    Clean,
    #[default]
    Balanced,
    Consistent,
    Strict,
    NotApplicable,
}

impl OptimizationLevel {
    pub fn from_code(code: u8) -> Result<Self, VocabError> {
        match code {
            0 => Ok(Self::Unfiltered),
            1 => Ok(Self::Clean),
            2 => Ok(Self::Balanced),
            3 => Ok(Self::Consistent),
            4 => Ok(Self::Strict),
            5 => Ok(Self::NotApplicable),
            _ => Err(VocabError::InvalidLevel(code)),
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Unfiltered => "unfiltered",
            Self::Clean => "clean",
            Self::Balanced => "balanced",
            Self::Consistent => "consistent",
            Self::Strict => "strict",
            Self::NotApplicable => "n/a",
        }
    }
}

/// Which single-byte tokens the vocabulary must always contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ReserveBytes(u8);

impl ReserveBytes {
    pub const NONE: Self = Self(0);
    /// All 256 byte values.
    pub const ALL: Self = Self(1);
    /// Bytes 0 to 127.
    pub const LOW_128: Self = Self(1 << 1);
    /// Every byte that can occur in valid UTF-8.
    pub const UTF8: Self = Self(1 << 2);
    /// Printable ASCII plus tab, newline and carriage return.
    pub const ASCII: Self = Self(1 << 3);
    /// Delete single-byte tokens that are not reserved.
    pub const EXCLUSIVE: Self = Self(1 << 4);

    pub const fn from_code(code: u8) -> Self {
        Self(code)
    }

    pub const fn code(self) -> u8 {
        self.0
    }

    #[must_use]
    pub const fn with(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    /// Is byte `b` reserved?
    pub fn reserves(self, b: u8) -> bool {
        (self.contains(Self::ALL))
            || (self.contains(Self::LOW_128) && b < 128)
            || (self.contains(Self::UTF8) && !matches!(b, 0xC0 | 0xC1 | 0xF5..=0xFF))
            || (self.contains(Self::ASCII)
                && (b.is_ascii_graphic() || matches!(b, b' ' | b'\t' | b'\n' | b'\r')))
    }

    /// Iterate over the reserved byte values.
    pub fn bytes(self) -> impl Iterator<Item = u8> {
        (0u8..=255).filter(move |&b| self.reserves(b))
    }
}

/// Settings persisted in the vocabulary header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VocabConfig {
    pub capcode: CapcodeMode,
    pub charset: Charset,
    pub normalization: Normalization,
    pub level: OptimizationLevel,
    pub reserve: ReserveBytes,
}

impl VocabConfig {
    pub fn new(charset: Charset) -> Self {
        Self {
            charset,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_capcode(mut self, capcode: CapcodeMode) -> Self {
        self.capcode = capcode;
        self
    }

    #[must_use]
    pub fn with_normalization(mut self, normalization: Normalization) -> Self {
        self.normalization = normalization;
        self
    }

    #[must_use]
    pub fn with_level(mut self, level: OptimizationLevel) -> Self {
        self.level = level;
        self
    }

    #[must_use]
    pub fn with_reserve(mut self, reserve: ReserveBytes) -> Self {
        self.reserve = reserve;
        self
    }

    pub fn validate(&self) -> Result<(), VocabError> {
        if self.capcode != CapcodeMode::Disabled && self.charset != Charset::Utf8 {
            return Err(VocabError::CapcodeRequiresUtf8);
        }
        Ok(())
    }
}

/// Category reported when listing tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Regular,
    Single,
    Special,
    Unk,
}

/// One entry of [`Vocab::tokens`].
#[derive(Debug, Clone, PartialEq)]
pub struct TokenInfo {
    pub id: u32,
    /// The token as stored (normalized, capcode-encoded).
    pub token: Vec<u8>,
    /// The token with capcode markers decoded.
    pub decoded: Vec<u8>,
    pub kind: TokenKind,
    pub score: f32,
}

/// A compiled, immutable vocabulary.
pub struct Vocab {
    pub(crate) config: VocabConfig,
    pub(crate) records: Vec<TokenRecord>,
    pub(crate) dictionary: Dictionary,
    pub(crate) reverse: Vec<Option<u32>>,
    pub(crate) unk_id: u32,
    pub(crate) delete_token_id: u32,
    pub(crate) begin_class: [ByteClass; 256],
    pub(crate) max_token_len: usize,
    pub(crate) deleted: Vec<DeletedToken>,
    pub(crate) active: usize,
}

impl Vocab {
    /// Assemble a vocabulary from records in build order.
    ///
    /// Branch lengths and ids are re-derived from their indices, so callers
    /// only need to get the indices right. Fails if any record is malformed,
    /// refers forward, or collides with another.
    pub(crate) fn assemble(
        config: VocabConfig,
        mut records: Vec<TokenRecord>,
        unk_id: u32,
        delete_token_id: u32,
        begin_class: [ByteClass; 256],
        deleted: Vec<DeletedToken>,
    ) -> Result<Self, VocabError> {
        config.validate()?;

        let mut max_token_len = 0;
        for index in 0..records.len() {
            let len = records[index].bytes.len();
            if len == 0 || len > MAX_TOKEN_LEN {
                return Err(VocabError::TokenLength { index, len });
            }
            if records[index].id >= NONE_ID {
                return Err(VocabError::InvalidId(records[index].id));
            }
            max_token_len = max_token_len.max(len);
            let (alt1, alt2) = (records[index].alt1, records[index].alt2);
            records[index].alt1 = resolve_branch(&records, index, alt1)?;
            records[index].alt2 = resolve_branch(&records, index, alt2)?;
        }

        let keys: Vec<&[u8]> = records.iter().map(|r| r.bytes.as_slice()).collect();
        let dictionary = Dictionary::new(&keys)?;
        if dictionary.len() != records.len() {
            let mut seen = FxHashMap::default();
            for (index, key) in keys.iter().enumerate() {
                if seen.insert(*key, index).is_some() {
                    return Err(VocabError::DuplicateToken { index });
                }
            }
        }

        let mut reverse_len = records
            .iter()
            .filter(|r| !r.is_shadow())
            .map(|r| r.id as usize + 1)
            .max()
            .unwrap_or(0);
        if unk_id != NONE_ID {
            reverse_len = reverse_len.max(unk_id as usize + 1);
        }
        let mut reverse = vec![None; reverse_len];
        for (index, record) in records.iter().enumerate() {
            if record.is_shadow() {
                continue;
            }
            let slot = &mut reverse[record.id as usize];
            if slot.is_some() || record.id == unk_id {
                return Err(VocabError::DuplicateId { id: record.id });
            }
            *slot = Some(index as u32);
        }
        for record in records.iter().filter(|r| r.is_shadow()) {
            if reverse.get(record.id as usize).copied().flatten().is_none() {
                return Err(VocabError::IdOutOfRange { id: record.id });
            }
        }
        if delete_token_id != NONE_ID
            && reverse.get(delete_token_id as usize).copied().flatten().is_none()
        {
            return Err(VocabError::IdOutOfRange {
                id: delete_token_id,
            });
        }

        let active = reverse.iter().filter(|slot| slot.is_some()).count()
            + usize::from(unk_id != NONE_ID);

        Ok(Self {
            config,
            records,
            dictionary,
            reverse,
            unk_id,
            delete_token_id,
            begin_class,
            max_token_len,
            deleted,
            active,
        })
    }

    pub fn config(&self) -> &VocabConfig {
        &self.config
    }

    pub fn charset(&self) -> Charset {
        self.config.charset
    }

    pub fn capcode(&self) -> CapcodeMode {
        self.config.capcode
    }

    pub fn normalization(&self) -> Normalization {
        self.config.normalization
    }

    /// Number of active ids, including UNK.
    pub fn len(&self) -> usize {
        self.active
    }

    pub fn is_empty(&self) -> bool {
        self.active == 0
    }

    /// Highest id plus one.
    pub fn reverse_len(&self) -> usize {
        self.reverse.len()
    }

    pub fn max_token_len(&self) -> usize {
        self.max_token_len
    }

    pub fn unk_id(&self) -> Option<u32> {
        (self.unk_id != NONE_ID).then_some(self.unk_id)
    }

    pub fn delete_token_id(&self) -> Option<u32> {
        (self.delete_token_id != NONE_ID).then_some(self.delete_token_id)
    }

    /// All records in build order, shadows included.
    pub fn records(&self) -> &[TokenRecord] {
        &self.records
    }

    pub fn deleted_tokens(&self) -> &[DeletedToken] {
        &self.deleted
    }

    #[inline]
    pub fn begin_class(&self, byte: u8) -> ByteClass {
        self.begin_class[byte as usize]
    }

    /// Record for an active id.
    pub fn record_for_id(&self, id: u32) -> Option<&TokenRecord> {
        let index = self.reverse.get(id as usize).copied().flatten()?;
        Some(&self.records[index as usize])
    }

    /// Bytes of token `id` as stored. UNK and unassigned ids have none.
    #[inline]
    pub fn id_to_token(&self, id: u32) -> Option<&[u8]> {
        self.record_for_id(id).map(|r| r.bytes.as_slice())
    }

    /// Bytes of token `id` with capcode markers decoded.
    pub fn id_to_token_decoded(&self, id: u32) -> Option<Vec<u8>> {
        self.id_to_token(id)
            .map(|bytes| capcode::decode_all(self.config.capcode, bytes))
    }

    /// Id of an exact token. Accepts the stored form or text that normalizes to it.
    pub fn token_to_id(&self, token: &[u8]) -> Option<u32> {
        if let Some(id) = self.find_active(token) {
            return Some(id);
        }
        let prepared = self.prepare(token).ok()?;
        self.find_active(&prepared)
    }

    fn find_active(&self, bytes: &[u8]) -> Option<u32> {
        let index = self.dictionary.find(bytes)?;
        let record = &self.records[index as usize];
        (!record.is_shadow()).then_some(record.id)
    }

    /// Every listable token ordered by id; shadow records are excluded.
    pub fn tokens(&self) -> Vec<TokenInfo> {
        let mut out = Vec::with_capacity(self.active);
        for (id, slot) in self.reverse.iter().enumerate() {
            let id = id as u32;
            if let Some(index) = slot {
                let record = &self.records[*index as usize];
                let kind = if record.flags.is_special() {
                    TokenKind::Special
                } else if record.bytes.len() == 1 {
                    TokenKind::Single
                } else {
                    TokenKind::Regular
                };
                out.push(TokenInfo {
                    id,
                    token: record.bytes.clone(),
                    decoded: capcode::decode_all(self.config.capcode, &record.bytes),
                    kind,
                    score: record.score,
                });
            } else if id == self.unk_id {
                out.push(TokenInfo {
                    id,
                    token: Vec::new(),
                    decoded: Vec::new(),
                    kind: TokenKind::Unk,
                    score: 0.0,
                });
            }
        }
        out
    }
}

impl fmt::Debug for Vocab {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vocab")
            .field("config", &self.config)
            .field("len", &self.active)
            .field("records", &self.records.len())
            .field("max_token_len", &self.max_token_len)
            .field("unk_id", &self.unk_id())
            .field("delete_token_id", &self.delete_token_id())
            .finish()
    }
}

fn resolve_branch(
    records: &[TokenRecord],
    index: usize,
    branch: Option<Branch>,
) -> Result<Option<Branch>, VocabError> {
    let Some(branch) = branch else {
        return Ok(None);
    };
    let alt = branch.index as usize;
    if alt >= index {
        return Err(VocabError::ForwardReference { index, alt });
    }
    let target = &records[alt];
    let bytes = &records[index].bytes;
    if target.bytes.len() >= bytes.len() || !bytes.starts_with(&target.bytes) {
        return Err(VocabError::NotAPrefix { index, alt });
    }
    Ok(Some(Branch {
        index: branch.index,
        length: target.bytes.len() as u8,
        id: target.id,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn record(bytes: &[u8], id: u32) -> TokenRecord {
        TokenRecord {
            bytes: bytes.to_vec(),
            id,
            score: 0.0,
            flags: TokenFlags::default(),
            word_count: 0,
            alt1: None,
            alt2: None,
        }
    }

    fn branch(index: u32) -> Option<Branch> {
        Some(Branch {
            index,
            length: 0,
            id: 0,
        })
    }

    fn assemble(records: Vec<TokenRecord>, unk: u32) -> Result<Vocab, VocabError> {
        Vocab::assemble(
            VocabConfig::default(),
            records,
            unk,
            NONE_ID,
            [ByteClass::Unclassified; 256],
            Vec::new(),
        )
    }

    #[test]
    fn test_flags() {
        let mut flags = TokenFlags::default();
        flags.set(TokenFlags::SINGLE_WORD, true);
        flags.set(TokenFlags::BEGINS_SPACE, true);
        assert!(flags.is_single_word());
        assert!(flags.begins_with_space());
        assert!(!flags.is_special());
        flags.set(TokenFlags::SINGLE_WORD, false);
        assert_eq!(flags.bits(), TokenFlags::BEGINS_SPACE);
        assert_eq!(TokenFlags::from_bits(0xFF).bits(), 0xFF);
    }

    #[test]
    fn test_assemble_resolves_branches() {
        let mut abc = record(b"abc", 7);
        abc.alt1 = branch(1);
        abc.alt2 = branch(0);
        let vocab = assemble(vec![record(b"a", 3), record(b"ab", 5), abc], NONE_ID).unwrap();
        let alt1 = vocab.records()[2].alt1.unwrap();
        assert_eq!((alt1.index, alt1.length, alt1.id), (1, 2, 5));
        let alt2 = vocab.records()[2].alt2.unwrap();
        assert_eq!((alt2.index, alt2.length, alt2.id), (0, 1, 3));
        assert_eq!(vocab.reverse_len(), 8);
        assert_eq!(vocab.len(), 3);
        assert_eq!(vocab.max_token_len(), 3);
        assert_eq!(vocab.id_to_token(5), Some(&b"ab"[..]));
        assert_eq!(vocab.id_to_token(4), None);
    }

    #[test]
    fn test_assemble_rejects_self_reference() {
        let mut ab = record(b"ab", 1);
        ab.alt1 = branch(1);
        let err = assemble(vec![record(b"a", 0), ab], NONE_ID).unwrap_err();
        assert!(matches!(err, VocabError::ForwardReference { index: 1, alt: 1 }));
        assert!(err.is_corruption());
    }

    #[test]
    fn test_assemble_rejects_non_prefix_alternative() {
        let mut ab = record(b"ab", 1);
        ab.alt1 = branch(0);
        let err = assemble(vec![record(b"abcde", 0), ab, record(b"x", 2)], NONE_ID).unwrap_err();
        assert!(matches!(err, VocabError::NotAPrefix { index: 1, alt: 0 }));
        assert!(err.is_corruption());

        let mut ab = record(b"ab", 1);
        ab.alt2 = branch(0);
        let err = assemble(vec![record(b"x", 0), ab], NONE_ID).unwrap_err();
        assert!(matches!(err, VocabError::NotAPrefix { index: 1, alt: 0 }));
    }

    #[test]
    fn test_assemble_rejects_duplicates() {
        let err = assemble(vec![record(b"a", 0), record(b"a", 1)], NONE_ID).unwrap_err();
        assert!(matches!(err, VocabError::DuplicateToken { index: 1 }));

        let err = assemble(vec![record(b"a", 0), record(b"b", 0)], NONE_ID).unwrap_err();
        assert!(matches!(err, VocabError::DuplicateId { id: 0 }));

        let err = assemble(vec![record(b"a", 0)], 0).unwrap_err();
        assert!(matches!(err, VocabError::DuplicateId { id: 0 }));
    }

    #[test]
    fn test_assemble_rejects_bad_lengths() {
        let err = assemble(vec![record(&[b'x'; 41], 0)], NONE_ID).unwrap_err();
        assert!(matches!(err, VocabError::TokenLength { index: 0, len: 41 }));
        let err = assemble(vec![record(b"", 0)], NONE_ID).unwrap_err();
        assert!(matches!(err, VocabError::TokenLength { index: 0, len: 0 }));
    }

    #[test]
    fn test_shadow_records_are_hidden() {
        let mut shadow = record(b"\x7Fab", 1);
        shadow.score = -1.0;
        let vocab = assemble(vec![record(b"a", 0), record(b" ab", 1), shadow], 2).unwrap();
        assert_eq!(vocab.len(), 3);
        assert_eq!(vocab.token_to_id(b"\x7Fab"), None);
        assert_eq!(vocab.token_to_id(b" ab"), Some(1));
        let listed: Vec<_> = vocab.tokens().into_iter().map(|t| (t.id, t.kind)).collect();
        assert_eq!(
            listed,
            vec![
                (0, TokenKind::Single),
                (1, TokenKind::Regular),
                (2, TokenKind::Unk)
            ]
        );
    }

    #[test]
    fn test_reserve_bytes() {
        assert_eq!(ReserveBytes::ALL.bytes().count(), 256);
        assert_eq!(ReserveBytes::LOW_128.bytes().count(), 128);
        assert_eq!(ReserveBytes::UTF8.bytes().count(), 256 - 13);
        assert_eq!(ReserveBytes::ASCII.bytes().count(), 95 + 3);
        assert_eq!(ReserveBytes::NONE.bytes().count(), 0);
        assert!(!ReserveBytes::EXCLUSIVE.reserves(b'a'));
    }

    #[test]
    fn test_config_validation() {
        let config = VocabConfig::new(Charset::Utf16).with_capcode(CapcodeMode::Enabled);
        assert!(matches!(
            config.validate(),
            Err(VocabError::CapcodeRequiresUtf8)
        ));
        assert!(VocabConfig::default().validate().is_ok());
    }
}
