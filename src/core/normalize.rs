//! Declarative text normalization.
//!
//! A vocabulary stores its normalization as one byte of flags. The same flags
//! are applied to every token when the vocabulary is built and to every input
//! before it is tokenized, so both sides always agree.

use std::fmt;

use thiserror::Error;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use super::charset::Charset;
use super::vocab::VocabError;

/// Errors raised while preparing input for tokenization.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("input is not valid UTF-8 (at byte {0})")]
    InvalidUtf8(usize),
    #[error("input is not valid UTF-16LE")]
    InvalidUtf16,
    #[error("input already contains a capcode marker byte at offset {0}")]
    ContainsMarker(usize),
}

/// Set of normalization steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Normalization(u8);

impl Normalization {
    pub const NONE: Self = Self(0);
    pub const NFD: Self = Self(1);
    pub const LOWERCASE: Self = Self(2);
    pub const ACCENTS: Self = Self(4);
    pub const QUOTEMARKS: Self = Self(8);
    pub const COLLAPSE: Self = Self(16);
    pub const TRIM: Self = Self(32);
    pub const LEADING_SPACE: Self = Self(64);
    pub const NEWLINES: Self = Self(128);

    const NAMES: [(Self, &'static str); 8] = [
        (Self::NFD, "NFD"),
        (Self::LOWERCASE, "Lowercase"),
        (Self::ACCENTS, "Accents"),
        (Self::QUOTEMARKS, "Quotemarks"),
        (Self::COLLAPSE, "Collapse"),
        (Self::TRIM, "Trim"),
        (Self::LEADING_SPACE, "LeadingSpace"),
        (Self::NEWLINES, "NewLines"),
    ];

    pub const fn from_code(code: u8) -> Self {
        Self(code)
    }

    pub const fn code(self) -> u8 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub const fn with(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Whether normalized text can differ from the input in ways decoding cannot undo.
    pub const fn is_lossy(self) -> bool {
        self.0 & !Self::NFD.0 != 0
    }

    /// Parse a whitespace or comma separated list such as `"nfd lowercase"`.
    pub fn from_names(names: &str) -> Result<Self, VocabError> {
        let mut flags = Self::NONE;
        for word in names
            .split(|c: char| c.is_whitespace() || c == ',' || c == '+')
            .filter(|w| !w.is_empty())
        {
            if word.eq_ignore_ascii_case("none") {
                continue;
            }
            let (flag, _) = Self::NAMES
                .iter()
                .find(|(_, name)| name.eq_ignore_ascii_case(word))
                .ok_or_else(|| VocabError::InvalidNormalization(word.to_string()))?;
            flags = flags.with(*flag);
        }
        Ok(flags)
    }

    /// Normalize `input` according to the charset's rules.
    pub fn normalize(self, charset: Charset, input: &[u8]) -> Result<Vec<u8>, NormalizeError> {
        if self.is_empty() {
            return Ok(input.to_vec());
        }
        match charset {
            Charset::None => Ok(self.apply_ascii(input)),
            Charset::Utf8 => {
                let text = std::str::from_utf8(input)
                    .map_err(|e| NormalizeError::InvalidUtf8(e.valid_up_to()))?;
                Ok(self.apply(text).into_bytes())
            }
            Charset::Utf16 => {
                let text = decode_utf16le(input)?;
                Ok(encode_utf16le(&self.apply(&text)))
            }
        }
    }

    fn apply(self, text: &str) -> String {
        let mut s = text.to_string();
        if self.contains(Self::NEWLINES) {
            s = s.replace("\r\n", "\n").replace('\r', "\n");
        }
        if self.contains(Self::QUOTEMARKS) {
            s = s
                .chars()
                .map(|c| match c {
                    '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{201B}' => '\'',
                    '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{201F}' => '"',
                    other => other,
                })
                .collect();
        }
        if self.contains(Self::LOWERCASE) {
            s = s.to_lowercase();
        }
        if self.contains(Self::ACCENTS) {
            s = s.nfd().filter(|&c| !is_combining_mark(c)).collect();
        } else if self.contains(Self::NFD) {
            s = s.nfd().collect();
        }
        if self.contains(Self::COLLAPSE) {
            s = collapse_spaces(&s);
        }
        if self.contains(Self::TRIM) {
            s = s.trim().to_string();
        }
        if self.contains(Self::LEADING_SPACE) && !s.is_empty() && !s.starts_with(' ') {
            s.insert(0, ' ');
        }
        s
    }

    fn apply_ascii(self, input: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(input.len() + 1);
        let mut iter = input.iter().copied().peekable();
        while let Some(b) = iter.next() {
            match b {
                b'\r' if self.contains(Self::NEWLINES) => {
                    if iter.peek() == Some(&b'\n') {
                        iter.next();
                    }
                    out.push(b'\n');
                }
                b' ' if self.contains(Self::COLLAPSE) && out.last() == Some(&b' ') => {}
                _ if self.contains(Self::LOWERCASE) => out.push(b.to_ascii_lowercase()),
                _ => out.push(b),
            }
        }
        if self.contains(Self::TRIM) {
            let start = out
                .iter()
                .position(|b| !b.is_ascii_whitespace())
                .unwrap_or(out.len());
            let end = out
                .iter()
                .rposition(|b| !b.is_ascii_whitespace())
                .map_or(start, |p| p + 1);
            out = out[start..end].to_vec();
        }
        if self.contains(Self::LEADING_SPACE) && out.first().is_some_and(|&b| b != b' ') {
            out.insert(0, b' ');
        }
        out
    }
}

impl fmt::Display for Normalization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("None");
        }
        let names: Vec<&str> = Self::NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        f.write_str(&names.join(" "))
    }
}

fn collapse_spaces(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_space = false;
    for c in s.chars() {
        if c == ' ' {
            if prev_space {
                continue;
            }
            prev_space = true;
        } else {
            prev_space = false;
        }
        out.push(c);
    }
    out
}

fn decode_utf16le(input: &[u8]) -> Result<String, NormalizeError> {
    if input.len() % 2 != 0 {
        return Err(NormalizeError::InvalidUtf16);
    }
    let units = input
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]));
    char::decode_utf16(units)
        .collect::<Result<String, _>>()
        .map_err(|_| NormalizeError::InvalidUtf16)
}

/// Encode text as UTF-16 little-endian bytes.
pub fn encode_utf16le(text: &str) -> Vec<u8> {
    text.encode_utf16().flat_map(u16::to_le_bytes).collect()
}
