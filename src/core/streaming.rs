//! Streaming decoder for token-by-token output.
//!
//! When ids arrive one at a time, a token's bytes may end in the middle of a
//! multi-byte character, or right after a capcode marker whose effect depends
//! on the next token. The decoder keeps such trailing bytes back and only
//! returns completed text.
//!
//! Each call concatenates the held-over remainder with the new token bytes,
//! trims back to the last complete character for the vocabulary's charset,
//! and runs the capcode decoder over the completed prefix only. Capcode state
//! (pending capitalisation, pending delete) carries across calls.

use super::capcode::CapcodeDecoder;
use super::vocab::Vocab;
use super::wire::{self, IdWidth, WireError};

/// Decoder state without the vocabulary borrow.
///
/// Useful for owners that hold the vocabulary themselves. Most callers want
/// [`StreamingDecoder`].
#[derive(Debug, Clone, Default)]
pub struct DecodeState {
    remainder: Vec<u8>,
    capcode: CapcodeDecoder,
}

impl DecodeState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `ids` against `vocab`, returning the completed bytes.
    pub fn decode(&mut self, vocab: &Vocab, ids: &[u32]) -> Vec<u8> {
        for &id in ids {
            if let Some(bytes) = vocab.id_to_token(id) {
                self.remainder.extend_from_slice(bytes);
            }
        }
        let keep = vocab.charset().incomplete_tail(&self.remainder);
        let ready = self.remainder.len() - keep;
        if ready == 0 {
            return Vec::new();
        }
        let complete: Vec<u8> = self.remainder.drain(..ready).collect();
        self.capcode.decode(vocab.capcode(), &complete)
    }

    /// Return the held-back bytes as they are and clear them.
    pub fn flush(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.remainder)
    }

    pub fn reset(&mut self) {
        self.remainder.clear();
        self.capcode.reset();
    }

    pub fn has_pending(&self) -> bool {
        !self.remainder.is_empty()
    }

    pub fn pending_bytes(&self) -> usize {
        self.remainder.len()
    }
}

/// A streaming decoder borrowing its vocabulary.
///
/// # Example
///
/// ```
/// use monstertok::{StreamingDecoder, VocabBuilder, VocabConfig};
///
/// let vocab = VocabBuilder::new(VocabConfig::default())
///     .add_tokens(["caf", "é"])
///     .build()
///     .unwrap();
/// let ids = vocab.tokenize("café").unwrap().ids;
///
/// let mut decoder = StreamingDecoder::new(&vocab);
/// let mut text = Vec::new();
/// for &id in &ids {
///     text.extend(decoder.add_token(id));
/// }
/// text.extend(decoder.flush());
/// assert_eq!(text, "café".as_bytes());
/// ```
pub struct StreamingDecoder<'a> {
    vocab: &'a Vocab,
    state: DecodeState,
}

impl<'a> StreamingDecoder<'a> {
    pub fn new(vocab: &'a Vocab) -> Self {
        Self {
            vocab,
            state: DecodeState::new(),
        }
    }

    /// Decode ids. Unknown ids and holes in the id space decode to nothing.
    pub fn decode(&mut self, ids: &[u32]) -> Vec<u8> {
        self.state.decode(self.vocab, ids)
    }

    /// Decode a single id.
    pub fn add_token(&mut self, id: u32) -> Vec<u8> {
        self.state.decode(self.vocab, &[id])
    }

    /// Decode a fixed-width id stream.
    pub fn decode_serialized(&mut self, bytes: &[u8], width: IdWidth) -> Result<Vec<u8>, WireError> {
        let ids = wire::deserialize_ids(bytes, width)?;
        Ok(self.decode(&ids))
    }

    /// End of stream: return whatever is held back, without further decoding.
    pub fn flush(&mut self) -> Vec<u8> {
        self.state.flush()
    }

    /// Discard held-back bytes and capcode state.
    pub fn reset(&mut self) {
        self.state.reset();
    }

    pub fn has_pending(&self) -> bool {
        self.state.has_pending()
    }

    pub fn pending_bytes(&self) -> usize {
        self.state.pending_bytes()
    }
}
