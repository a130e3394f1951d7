//! Fixed-width little-endian token id streams.
//!
//! Ids are written as 2, 3 or 4 byte little-endian unsigned integers with no
//! framing. Encoding and decoding are explicit byte loops, so the format is the
//! same on every platform.

use thiserror::Error;

use super::tokenizer::Sink;
use super::vocab::Vocab;

/// Errors from encoding or decoding an id stream.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("stream length {len} is not a multiple of the id width {width}")]
    Misaligned { len: usize, width: usize },
    #[error("id {id} does not fit in {width} bytes")]
    IdTooLarge { id: u64, width: usize },
}

/// Bytes per id in a serialized stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdWidth {
    Two,
    Three,
    Four,
}

impl IdWidth {
    /// Narrowest automatic width for a vocabulary: 2 bytes up to 65536 ids, else 4.
    pub fn for_vocab(vocab: &Vocab) -> Self {
        if vocab.reverse_len() <= 1 << 16 {
            IdWidth::Two
        } else {
            IdWidth::Four
        }
    }

    pub fn from_bytes(bytes: usize) -> Option<Self> {
        match bytes {
            2 => Some(IdWidth::Two),
            3 => Some(IdWidth::Three),
            4 => Some(IdWidth::Four),
            _ => None,
        }
    }

    #[inline]
    pub fn bytes(self) -> usize {
        match self {
            IdWidth::Two => 2,
            IdWidth::Three => 3,
            IdWidth::Four => 4,
        }
    }

    /// Number of distinct ids this width can carry.
    #[inline]
    pub fn capacity(self) -> u64 {
        1 << (8 * self.bytes())
    }

    /// Check that every id below `reverse_len` fits.
    pub fn check_capacity(self, reverse_len: usize) -> Result<(), WireError> {
        if reverse_len as u64 > self.capacity() {
            return Err(WireError::IdTooLarge {
                id: reverse_len as u64 - 1,
                width: self.bytes(),
            });
        }
        Ok(())
    }

    #[inline]
    pub(crate) fn write(self, id: u32, out: &mut Vec<u8>) {
        out.extend_from_slice(&id.to_le_bytes()[..self.bytes()]);
    }

    #[inline]
    fn read(self, chunk: &[u8]) -> u32 {
        let mut buf = [0u8; 4];
        buf[..chunk.len()].copy_from_slice(chunk);
        u32::from_le_bytes(buf)
    }
}

/// Append `ids` to `out` at the given width.
pub fn serialize_ids_into(ids: &[u32], width: IdWidth, out: &mut Vec<u8>) -> Result<(), WireError> {
    if let Some(&id) = ids.iter().find(|&&id| u64::from(id) >= width.capacity()) {
        return Err(WireError::IdTooLarge {
            id: id.into(),
            width: width.bytes(),
        });
    }
    out.reserve(ids.len() * width.bytes());
    for &id in ids {
        width.write(id, out);
    }
    Ok(())
}

/// Encode `ids` at the given width.
pub fn serialize_ids(ids: &[u32], width: IdWidth) -> Result<Vec<u8>, WireError> {
    let mut out = Vec::new();
    serialize_ids_into(ids, width, &mut out)?;
    Ok(out)
}

/// Decode a stream produced by [`serialize_ids`].
pub fn deserialize_ids(bytes: &[u8], width: IdWidth) -> Result<Vec<u32>, WireError> {
    let step = width.bytes();
    if bytes.len() % step != 0 {
        return Err(WireError::Misaligned {
            len: bytes.len(),
            width: step,
        });
    }
    Ok(bytes.chunks_exact(step).map(|c| width.read(c)).collect())
}

/// Tokenizer output written straight into a byte stream.
pub(crate) struct WireSink<'a> {
    pub(crate) width: IdWidth,
    pub(crate) out: &'a mut Vec<u8>,
}

impl Sink for WireSink<'_> {
    #[inline]
    fn push(&mut self, id: u32) {
        self.width.write(id, self.out);
    }
}
