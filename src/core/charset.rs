//! Character set rules used to find character boundaries inside byte strings.
//!
//! A vocabulary is compiled for exactly one charset. The charset decides how the
//! builder walks a token's characters when deriving flags, and how the streaming
//! decoder finds the last complete character boundary in its output.

use super::vocab::VocabError;

/// The encoding of the text a vocabulary was built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Charset {
    /// Binary data; every byte is one character.
    None,
    /// UTF-8 text.
    #[default]
    Utf8,
    /// UTF-16 little-endian text.
    Utf16,
}

impl Charset {
    /// Parse the header code (0, 1 or 2).
    pub fn from_code(code: u8) -> Result<Self, VocabError> {
        match code {
            0 => Ok(Charset::None),
            1 => Ok(Charset::Utf8),
            2 => Ok(Charset::Utf16),
            _ => Err(VocabError::InvalidCharset(code)),
        }
    }

    /// The header code for this charset.
    pub fn code(self) -> u8 {
        match self {
            Charset::None => 0,
            Charset::Utf8 => 1,
            Charset::Utf16 => 2,
        }
    }

    /// Human-readable name.
    pub fn name(self) -> &'static str {
        match self {
            Charset::None => "None",
            Charset::Utf8 => "UTF-8",
            Charset::Utf16 => "UTF-16",
        }
    }

    /// Decode the first character of `bytes`.
    ///
    /// Returns the character (or `None` when the bytes do not form a valid
    /// character) and the number of bytes consumed, which is always at least 1
    /// for non-empty input.
    #[inline]
    pub fn next_char(self, bytes: &[u8]) -> (Option<char>, usize) {
        if bytes.is_empty() {
            return (None, 0);
        }
        match self {
            Charset::None => (Some(bytes[0] as char), 1),
            Charset::Utf8 => next_utf8(bytes),
            Charset::Utf16 => next_utf16(bytes),
        }
    }

    /// Iterate over `(char, byte_len)` pairs.
    pub fn chars(self, bytes: &[u8]) -> CharIter<'_> {
        CharIter {
            charset: self,
            bytes,
        }
    }

    /// Number of trailing bytes that belong to an incomplete character.
    ///
    /// These are the bytes a streaming decoder must hold back until the next
    /// call supplies the rest of the character.
    pub fn incomplete_tail(self, bytes: &[u8]) -> usize {
        match self {
            Charset::None => 0,
            Charset::Utf8 => incomplete_utf8(bytes),
            Charset::Utf16 => incomplete_utf16(bytes),
        }
    }

    /// Convert decoded output to a `String`, replacing invalid sequences with U+FFFD.
    ///
    /// UTF-16 is read as little-endian code units. `None` is read as UTF-8,
    /// the encoding text input is taken in.
    pub fn decode_lossy(self, bytes: &[u8]) -> String {
        match self {
            Charset::Utf16 => {
                let units: Vec<u16> = bytes
                    .chunks_exact(2)
                    .map(|c| u16::from_le_bytes([c[0], c[1]]))
                    .collect();
                let mut text = String::from_utf16_lossy(&units);
                if bytes.len() % 2 != 0 {
                    text.push(char::REPLACEMENT_CHARACTER);
                }
                text
            }
            Charset::None | Charset::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
        }
    }
}

/// Iterator returned by [`Charset::chars`].
pub struct CharIter<'a> {
    charset: Charset,
    bytes: &'a [u8],
}

impl Iterator for CharIter<'_> {
    type Item = (Option<char>, usize);

    fn next(&mut self) -> Option<Self::Item> {
        if self.bytes.is_empty() {
            return None;
        }
        let (ch, len) = self.charset.next_char(self.bytes);
        self.bytes = &self.bytes[len..];
        Some((ch, len))
    }
}

/// Expected sequence length from a UTF-8 lead byte, 0 for a continuation or invalid byte.
#[inline]
fn utf8_sequence_len(lead: u8) -> usize {
    match lead {
        0x00..=0x7F => 1,
        0xC2..=0xDF => 2,
        0xE0..=0xEF => 3,
        0xF0..=0xF4 => 4,
        _ => 0,
    }
}

fn next_utf8(bytes: &[u8]) -> (Option<char>, usize) {
    let lead = bytes[0];
    if lead < 0x80 {
        return (Some(lead as char), 1);
    }
    let len = utf8_sequence_len(lead);
    if len == 0 || len > bytes.len() {
        return (None, 1);
    }
    match std::str::from_utf8(&bytes[..len]) {
        Ok(s) => (s.chars().next(), len),
        Err(_) => (None, 1),
    }
}

fn next_utf16(bytes: &[u8]) -> (Option<char>, usize) {
    if bytes.len() < 2 {
        return (None, bytes.len());
    }
    let unit = u16::from_le_bytes([bytes[0], bytes[1]]);
    if (0xD800..=0xDBFF).contains(&unit) {
        if bytes.len() < 4 {
            return (None, 2);
        }
        let low = u16::from_le_bytes([bytes[2], bytes[3]]);
        return match char::decode_utf16([unit, low]).next() {
            Some(Ok(ch)) => (Some(ch), 4),
            _ => (None, 2),
        };
    }
    match char::decode_utf16([unit]).next() {
        Some(Ok(ch)) => (Some(ch), 2),
        _ => (None, 2),
    }
}

fn incomplete_utf8(bytes: &[u8]) -> usize {
    let len = bytes.len();
    // A sequence is at most 4 bytes, so only the last 3 can be an unfinished one.
    for back in 1..=3.min(len) {
        let b = bytes[len - back];
        if b & 0xC0 == 0x80 {
            continue;
        }
        let need = utf8_sequence_len(b);
        return if need > back { back } else { 0 };
    }
    0
}

fn incomplete_utf16(bytes: &[u8]) -> usize {
    let odd = bytes.len() % 2;
    let even = bytes.len() - odd;
    if even >= 2 {
        let unit = u16::from_le_bytes([bytes[even - 2], bytes[even - 1]]);
        if (0xD800..=0xDBFF).contains(&unit) {
            return odd + 2;
        }
    }
    odd
}
