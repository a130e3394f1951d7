//! Capcode: a reversible case and word-boundary encoding.
//!
//! Capcode lets a vocabulary be case-insensitive without losing case. Upper-case
//! letters are lowered and announced by a marker byte placed in front of them:
//!
//! - [`CHARACTER_MARKER`] upper-cases the next character.
//! - [`WORD_MARKER`] upper-cases every letter up to the next non-letter.
//! - [`DELETE_MARKER`] is a forward-delete: it removes the space that follows it.
//!
//! The delete marker is never produced by [`encode`]. The tokenizer inserts it
//! when it commits a shorter token and wants to re-enter the rest of the word
//! through a space-prefixed token.
//!
//! All markers are ASCII control bytes, so they can never appear inside a
//! multi-byte UTF-8 sequence. Text that already contains one of them cannot be
//! encoded; check with [`contains_marker`] first.

use super::charset::Charset;
use super::vocab::VocabError;

/// Upper-cases the next character.
pub const CHARACTER_MARKER: u8 = 0x0E;
/// Upper-cases all letters until the next non-letter.
pub const WORD_MARKER: u8 = 0x0F;
/// Deletes the space that immediately follows it.
pub const DELETE_MARKER: u8 = 0x7F;

/// How much of capcode a vocabulary uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CapcodeMode {
    /// Text is tokenized as-is.
    #[default]
    Disabled,
    /// Only the delete marker is used; case is left alone.
    DeleteOnly,
    /// Full case encoding plus the delete marker.
    Enabled,
}

impl CapcodeMode {
    pub fn from_code(code: u8) -> Result<Self, VocabError> {
        match code {
            0 => Ok(CapcodeMode::Disabled),
            1 => Ok(CapcodeMode::DeleteOnly),
            2 => Ok(CapcodeMode::Enabled),
            _ => Err(VocabError::InvalidCapcode(code)),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            CapcodeMode::Disabled => 0,
            CapcodeMode::DeleteOnly => 1,
            CapcodeMode::Enabled => 2,
        }
    }

    /// Whether the delete marker is available to the tokenizer.
    #[inline]
    pub fn uses_delete_marker(self) -> bool {
        self != CapcodeMode::Disabled
    }

    /// Is `b` a marker byte under this mode?
    #[inline]
    pub fn is_marker(self, b: u8) -> bool {
        match self {
            CapcodeMode::Disabled => false,
            CapcodeMode::DeleteOnly => b == DELETE_MARKER,
            CapcodeMode::Enabled => is_marker(b),
        }
    }

    /// Offset of the first byte this mode treats as a marker.
    pub fn marker_position(self, bytes: &[u8]) -> Option<usize> {
        bytes.iter().position(|&b| self.is_marker(b))
    }
}

/// Is `b` one of the capcode marker bytes?
#[inline]
pub fn is_marker(b: u8) -> bool {
    matches!(b, CHARACTER_MARKER | WORD_MARKER | DELETE_MARKER)
}

/// Does the text already contain a marker byte?
pub fn contains_marker(bytes: &[u8]) -> bool {
    bytes.iter().any(|&b| is_marker(b))
}

/// Lower-case `c` only when upper-casing the result gives `c` back.
#[inline]
fn reversible_lower(c: char) -> Option<char> {
    if !c.is_uppercase() {
        return None;
    }
    let lower = single(c.to_lowercase())?;
    (single(lower.to_uppercase()) == Some(c)).then_some(lower)
}

#[inline]
fn single(mut it: impl Iterator<Item = char>) -> Option<char> {
    match (it.next(), it.next()) {
        (Some(c), None) => Some(c),
        _ => None,
    }
}

#[inline]
fn upper(c: char) -> char {
    single(c.to_uppercase()).unwrap_or(c)
}

/// Encode `text` for a vocabulary using `mode`.
///
/// Only [`CapcodeMode::Enabled`] changes the text. The caller is responsible
/// for rejecting text that already contains a marker byte.
pub fn encode(mode: CapcodeMode, text: &str) -> String {
    if mode != CapcodeMode::Enabled {
        return text.to_string();
    }
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len() + text.len() / 8 + 4);
    let mut i = 0;
    while i < chars.len() {
        if !chars[i].is_alphabetic() {
            out.push(chars[i]);
            i += 1;
            continue;
        }
        let start = i;
        while i < chars.len() && chars[i].is_alphabetic() {
            i += 1;
        }
        let run = &chars[start..i];
        if run.len() > 1 && run.iter().all(|&c| reversible_lower(c).is_some()) {
            out.push(WORD_MARKER as char);
            out.extend(run.iter().filter_map(|&c| reversible_lower(c)));
        } else {
            for &c in run {
                match reversible_lower(c) {
                    Some(lower) => {
                        out.push(CHARACTER_MARKER as char);
                        out.push(lower);
                    }
                    None => out.push(c),
                }
            }
        }
    }
    out
}

/// Stateful capcode decoder.
///
/// State survives between calls so the decoder can be fed the completed
/// prefixes of a token stream one at a time.
#[derive(Debug, Clone, Copy, Default)]
pub struct CapcodeDecoder {
    capitalize_next: bool,
    in_caps_word: bool,
    delete_pending: bool,
}

impl CapcodeDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one chunk. Bytes that are not valid UTF-8 pass through unchanged.
    pub fn decode(&mut self, mode: CapcodeMode, bytes: &[u8]) -> Vec<u8> {
        if mode == CapcodeMode::Disabled {
            return bytes.to_vec();
        }
        let full = mode == CapcodeMode::Enabled;
        let mut out = Vec::with_capacity(bytes.len());
        let mut pos = 0;
        while pos < bytes.len() {
            let (ch, len) = Charset::Utf8.next_char(&bytes[pos..]);
            let raw = &bytes[pos..pos + len];
            pos += len;

            if std::mem::take(&mut self.delete_pending) && raw == b" " {
                continue;
            }
            let Some(c) = ch else {
                self.capitalize_next = false;
                self.in_caps_word = false;
                out.extend_from_slice(raw);
                continue;
            };
            match raw[0] {
                DELETE_MARKER => {
                    self.delete_pending = true;
                    continue;
                }
                CHARACTER_MARKER if full => {
                    self.in_caps_word = false;
                    self.capitalize_next = true;
                    continue;
                }
                WORD_MARKER if full => {
                    self.in_caps_word = true;
                    continue;
                }
                _ => {}
            }
            if std::mem::take(&mut self.capitalize_next) {
                push_char(&mut out, upper(c));
            } else if self.in_caps_word && c.is_alphabetic() {
                push_char(&mut out, upper(c));
            } else {
                self.in_caps_word = false;
                out.extend_from_slice(raw);
            }
        }
        out
    }

    /// Reset all pending state.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[inline]
fn push_char(out: &mut Vec<u8>, c: char) {
    let mut buf = [0u8; 4];
    out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
}

/// Decode a complete capcode byte string.
pub fn decode_all(mode: CapcodeMode, bytes: &[u8]) -> Vec<u8> {
    CapcodeDecoder::new().decode(mode, bytes)
}
