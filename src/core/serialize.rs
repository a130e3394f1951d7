//! Binary vocabulary format.
//!
//! Layout, all integers little-endian, `u24` meaning three bytes:
//!
//! ```text
//! header      capcode u8, charset u8, normalization u8, level u8, reserve u8, 3 zero bytes
//! counts      unk u24, active size u24, reverse length u24, record count u24,
//!             delete token id u24, max token length u8
//! records     length u8, bytes, flags u8, word count u8,
//!             alt1 index u24, alt2 index u24, id u24, score f32   (build order)
//! classes     256 begin-byte class bytes
//! deleted     count u24, then per token: length u8, bytes, id u24, score f32
//! ```
//!
//! An absent alternative is stored as index `0xFFFFFF`. Branch lengths and ids
//! are not stored; they are recovered from the referenced record on load.

use std::fs;
use std::path::Path;

use log::info;

use super::capcode::CapcodeMode;
use super::charset::Charset;
use super::normalize::Normalization;
use super::vocab::{
    Branch, ByteClass, DeletedToken, OptimizationLevel, ReserveBytes, TokenFlags, TokenRecord,
    Vocab, VocabConfig, VocabError, MAX_TOKEN_LEN, NONE_ID,
};

const HEADER_LEN: usize = 8;

impl Vocab {
    /// Serialize to the binary format.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + 16 + self.records.len() * 24 + 256);
        let c = &self.config;
        out.extend_from_slice(&[
            c.capcode.code(),
            c.charset.code(),
            c.normalization.code(),
            c.level.code(),
            c.reserve.code(),
            0,
            0,
            0,
        ]);
        put_u24(&mut out, self.unk_id);
        put_u24(&mut out, self.active as u32);
        put_u24(&mut out, self.reverse.len() as u32);
        put_u24(&mut out, self.records.len() as u32);
        put_u24(&mut out, self.delete_token_id);
        out.push(self.max_token_len as u8);

        for record in &self.records {
            put_token(&mut out, &record.bytes);
            out.push(record.flags.bits());
            out.push(record.word_count);
            put_u24(&mut out, record.alt1.map_or(NONE_ID, |b| b.index));
            put_u24(&mut out, record.alt2.map_or(NONE_ID, |b| b.index));
            put_u24(&mut out, record.id);
            out.extend_from_slice(&record.score.to_le_bytes());
        }

        out.extend(self.begin_class.iter().map(|c| c.code()));

        put_u24(&mut out, self.deleted.len() as u32);
        for token in &self.deleted {
            put_token(&mut out, &token.bytes);
            put_u24(&mut out, token.id);
            out.extend_from_slice(&token.score.to_le_bytes());
        }
        out
    }

    /// Parse the binary format. The whole input must be consumed.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, VocabError> {
        let mut r = Reader::new(bytes);

        let header = r.take(HEADER_LEN)?;
        let config = VocabConfig {
            capcode: CapcodeMode::from_code(header[0])?,
            charset: Charset::from_code(header[1])?,
            normalization: Normalization::from_code(header[2]),
            level: OptimizationLevel::from_code(header[3])?,
            reserve: ReserveBytes::from_code(header[4]),
        };

        let unk_id = r.u24()?;
        let active = r.u24()? as usize;
        let reverse_len = r.u24()? as usize;
        let count = r.u24()? as usize;
        let delete_token_id = r.u24()?;
        let max_token_len = r.u8()? as usize;

        let mut records = Vec::with_capacity(count.min(bytes.len() / 12));
        for index in 0..count {
            let token = r.token(index)?;
            let flags = TokenFlags::from_bits(r.u8()?);
            let word_count = r.u8()?;
            let alt1 = branch_ref(index, r.u24()?)?;
            let alt2 = branch_ref(index, r.u24()?)?;
            let id = r.u24()?;
            let score = r.f32()?;
            records.push(TokenRecord {
                bytes: token.to_vec(),
                id,
                score,
                flags,
                word_count,
                alt1,
                alt2,
            });
        }

        let mut begin_class = [ByteClass::Unclassified; 256];
        for (byte, code) in r.take(256)?.iter().enumerate() {
            begin_class[byte] = ByteClass::from_code(byte as u8, *code)?;
        }

        let deleted_count = r.u24()? as usize;
        let mut deleted = Vec::with_capacity(deleted_count.min(bytes.len() / 8));
        for index in 0..deleted_count {
            let token = r.token(index)?.to_vec();
            let id = r.u24()?;
            let score = r.f32()?;
            deleted.push(DeletedToken {
                bytes: token,
                id,
                score,
            });
        }
        r.finish()?;

        let vocab = Vocab::assemble(config, records, unk_id, delete_token_id, begin_class, deleted)?;
        if vocab.len() != active {
            return Err(VocabError::HeaderMismatch("active size"));
        }
        if vocab.reverse_len() != reverse_len {
            return Err(VocabError::HeaderMismatch("reverse length"));
        }
        if vocab.max_token_len() != max_token_len {
            return Err(VocabError::HeaderMismatch("max token length"));
        }
        Ok(vocab)
    }

    /// Write the vocabulary to a file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), VocabError> {
        fs::write(path.as_ref(), self.to_bytes())?;
        info!(
            "saved vocabulary to {}: {} ids",
            path.as_ref().display(),
            self.len()
        );
        Ok(())
    }

    /// Load a vocabulary file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, VocabError> {
        let bytes = fs::read(path.as_ref())?;
        let vocab = Self::from_bytes(&bytes)?;
        info!(
            "loaded vocabulary from {}: {} ids, {} records, {} deleted, max token length {}",
            path.as_ref().display(),
            vocab.len(),
            vocab.records().len(),
            vocab.deleted_tokens().len(),
            vocab.max_token_len()
        );
        Ok(vocab)
    }
}

/// An alternative index as stored; lengths and ids are filled in by `assemble`.
fn branch_ref(index: usize, alt: u32) -> Result<Option<Branch>, VocabError> {
    if alt == NONE_ID {
        return Ok(None);
    }
    if alt as usize >= index {
        return Err(VocabError::ForwardReference {
            index,
            alt: alt as usize,
        });
    }
    Ok(Some(Branch {
        index: alt,
        length: 0,
        id: NONE_ID,
    }))
}

#[inline]
fn put_u24(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes()[..3]);
}

#[inline]
fn put_token(out: &mut Vec<u8>, bytes: &[u8]) {
    out.push(bytes.len() as u8);
    out.extend_from_slice(bytes);
}

/// Bounds-checked cursor over the input.
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], VocabError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.bytes.len())
            .ok_or(VocabError::Truncated(self.pos))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, VocabError> {
        Ok(self.take(1)?[0])
    }

    fn u24(&mut self) -> Result<u32, VocabError> {
        let b = self.take(3)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], 0]))
    }

    fn f32(&mut self) -> Result<f32, VocabError> {
        let b = self.take(4)?;
        Ok(f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// A length-prefixed token of 1 to 40 bytes.
    fn token(&mut self, index: usize) -> Result<&'a [u8], VocabError> {
        let len = self.u8()? as usize;
        if len == 0 || len > MAX_TOKEN_LEN {
            return Err(VocabError::TokenLength { index, len });
        }
        self.take(len)
    }

    fn finish(self) -> Result<(), VocabError> {
        match self.bytes.len() - self.pos {
            0 => Ok(()),
            extra => Err(VocabError::TrailingBytes(extra)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::builder::VocabBuilder;

    fn sample() -> Vocab {
        let config = VocabConfig::default()
            .with_capcode(CapcodeMode::Enabled)
            .with_normalization(Normalization::NFD)
            .with_level(OptimizationLevel::Strict);
        VocabBuilder::new(config)
            .add_scored_tokens([("Hello", 2.5), (" world", 1.0), ("hel", 0.5), ("lo", 0.0)])
            .add_special_tokens(["<eos>"])
            .reserve(ReserveBytes::ASCII)
            .enable_unk()
            .build()
            .unwrap()
            .modify()
            .delete_tokens(["lo"])
            .build()
            .unwrap()
    }

    #[test]
    fn test_roundtrip_preserves_everything() {
        let vocab = sample();
        let bytes = vocab.to_bytes();
        let loaded = Vocab::from_bytes(&bytes).unwrap();
        assert_eq!(loaded.config(), vocab.config());
        assert_eq!(loaded.records(), vocab.records());
        assert_eq!(loaded.deleted_tokens(), vocab.deleted_tokens());
        assert_eq!(loaded.unk_id(), vocab.unk_id());
        assert_eq!(loaded.delete_token_id(), vocab.delete_token_id());
        assert_eq!(loaded.len(), vocab.len());
        for b in 0..=255u8 {
            assert_eq!(loaded.begin_class(b), vocab.begin_class(b));
        }
        assert_eq!(loaded.to_bytes(), bytes);
    }

    #[test]
    fn test_header_layout() {
        let bytes = sample().to_bytes();
        assert_eq!(&bytes[..HEADER_LEN], &[2, 1, 1, 4, 8, 0, 0, 0]);
    }

    #[test]
    fn test_rejects_bad_codes() {
        let mut bytes = sample().to_bytes();
        bytes[1] = 3;
        assert!(matches!(
            Vocab::from_bytes(&bytes),
            Err(VocabError::InvalidCharset(3))
        ));
        let mut bytes = sample().to_bytes();
        bytes[0] = 7;
        assert!(matches!(
            Vocab::from_bytes(&bytes),
            Err(VocabError::InvalidCapcode(7))
        ));
        let mut bytes = sample().to_bytes();
        bytes[3] = 6;
        assert!(matches!(
            Vocab::from_bytes(&bytes),
            Err(VocabError::InvalidLevel(6))
        ));
    }

    #[test]
    fn test_rejects_truncation_and_trailing_bytes() {
        let bytes = sample().to_bytes();
        for cut in [0, 5, 20, bytes.len() / 2, bytes.len() - 1] {
            let err = Vocab::from_bytes(&bytes[..cut]).unwrap_err();
            assert!(matches!(err, VocabError::Truncated(_)), "cut at {cut}: {err}");
        }
        let mut extra = bytes.clone();
        extra.push(0);
        assert!(matches!(
            Vocab::from_bytes(&extra),
            Err(VocabError::TrailingBytes(1))
        ));
    }

    #[test]
    fn test_rejects_long_token() {
        let mut bytes = sample().to_bytes();
        // Length byte of the first record
        bytes[HEADER_LEN + 16] = 41;
        assert!(matches!(
            Vocab::from_bytes(&bytes),
            Err(VocabError::TokenLength { index: 0, len: 41 })
        ));
    }

    #[test]
    fn test_rejects_bad_byte_class() {
        let vocab = sample();
        let mut bytes = vocab.to_bytes();
        let deleted_len: usize = vocab
            .deleted_tokens()
            .iter()
            .map(|t| 1 + t.bytes.len() + 7)
            .sum();
        let class_start = bytes.len() - 3 - deleted_len - 256;
        bytes[class_start + 10] = 4;
        assert!(matches!(
            Vocab::from_bytes(&bytes),
            Err(VocabError::InvalidByteClass { byte: 10, code: 4 })
        ));
    }
}
