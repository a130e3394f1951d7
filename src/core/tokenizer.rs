//! Branch-scoring tokenization engine.
//!
//! At every position the engine takes the longest dictionary match, then
//! decides whether committing it, or one of its two precomputed shorter
//! alternatives, gives the best two-token look-ahead. The look-ahead match of
//! the winning branch becomes the current match for the next step, so each
//! byte is scanned a bounded number of times and no step ever backtracks.
//!
//! One generic core, [`Vocab::run`], drives every output variant. Only the
//! [`Sink`] that receives ids differs.

use log::debug;
use rayon::prelude::*;
use thiserror::Error;

use super::capcode::{self, CapcodeMode, DELETE_MARKER};
use super::normalize::NormalizeError;
use super::vocab::{ByteClass, TokenFlags, TokenRecord, Vocab, VocabError, MAX_TOKEN_LEN};
use super::wire::{self, IdWidth, WireError, WireSink};

#[derive(Error, Debug)]
pub enum TokenizerError {
    #[error("Normalization error: {0}")]
    Normalize(#[from] NormalizeError),
    #[error("Vocabulary error: {0}")]
    Vocab(#[from] VocabError),
    #[error("Wire format error: {0}")]
    Wire(#[from] WireError),
}

/// Receives token ids as the engine commits them.
pub trait Sink {
    fn push(&mut self, id: u32);
}

impl Sink for Vec<u32> {
    #[inline]
    fn push(&mut self, id: u32) {
        Vec::push(self, id);
    }
}

/// Counts tokens without storing them.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CountSink(pub usize);

impl Sink for CountSink {
    #[inline]
    fn push(&mut self, _id: u32) {
        self.0 += 1;
    }
}

/// Result of tokenizing one input.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tokenization {
    pub ids: Vec<u32>,
    /// Input bytes that no token covered.
    pub missing: usize,
}

/// A dictionary match: record index and the number of input bytes it covers.
#[derive(Debug, Clone, Copy)]
struct Match {
    index: usize,
    len: usize,
}

/// One way of ending the next committed token.
#[derive(Debug, Clone, Copy)]
struct Choice {
    score: i32,
    first_id: u32,
    first_len: usize,
    marker: bool,
    next: Match,
}

/// A branch whose look-ahead may read better behind a delete marker.
#[derive(Debug, Clone, Copy)]
struct Probe {
    first_id: u32,
    flags: TokenFlags,
    words: i32,
    first_len: usize,
    plain_len: usize,
    alt: bool,
}

/// Earlier branches win ties.
#[inline]
fn keep_best(best: &mut Option<Choice>, choice: Choice) {
    if best.map_or(true, |b| choice.score > b.score) {
        *best = Some(choice);
    }
}

impl Vocab {
    /// Normalize and capcode-encode input for this vocabulary.
    pub fn prepare(&self, input: &[u8]) -> Result<Vec<u8>, NormalizeError> {
        let normalized = self
            .config
            .normalization
            .normalize(self.config.charset, input)?;
        let mode = self.config.capcode;
        if let Some(pos) = mode.marker_position(&normalized) {
            return Err(NormalizeError::ContainsMarker(pos));
        }
        if mode != CapcodeMode::Enabled {
            return Ok(normalized);
        }
        let text = std::str::from_utf8(&normalized)
            .map_err(|e| NormalizeError::InvalidUtf8(e.valid_up_to()))?;
        Ok(capcode::encode(mode, text).into_bytes())
    }

    /// Tokenize raw text.
    pub fn tokenize(&self, input: impl AsRef<[u8]>) -> Result<Tokenization, TokenizerError> {
        let data = self.prepare(input.as_ref())?;
        Ok(self.tokenize_bytes(&data))
    }

    /// Tokenize bytes that are already normalized and encoded.
    pub fn tokenize_bytes(&self, data: &[u8]) -> Tokenization {
        let mut ids = Vec::with_capacity(data.len() / 3 + 1);
        let missing = self.run(data, &mut ids);
        Tokenization { ids, missing }
    }

    /// Number of tokens `input` would produce.
    pub fn tokenize_count(&self, input: impl AsRef<[u8]>) -> Result<usize, TokenizerError> {
        let data = self.prepare(input.as_ref())?;
        let mut count = CountSink::default();
        self.run(&data, &mut count);
        Ok(count.0)
    }

    /// Tokenize into a fixed-width id stream appended to `out`. Returns the missing count.
    pub fn tokenize_serialized(
        &self,
        input: impl AsRef<[u8]>,
        width: IdWidth,
        out: &mut Vec<u8>,
    ) -> Result<usize, TokenizerError> {
        width.check_capacity(self.reverse_len())?;
        let data = self.prepare(input.as_ref())?;
        out.reserve((data.len() / 2 + 1) * width.bytes());
        let mut sink = WireSink { width, out };
        Ok(self.run(&data, &mut sink))
    }

    /// Tokenize many inputs in parallel. Results are in input order.
    pub fn tokenize_batch<T>(&self, inputs: &[T]) -> Result<Vec<Tokenization>, TokenizerError>
    where
        T: AsRef<[u8]> + Sync,
    {
        debug!("tokenizing batch of {}", inputs.len());
        inputs.par_iter().map(|input| self.tokenize(input)).collect()
    }

    /// Count tokens for many inputs in parallel.
    pub fn tokenize_count_batch<T>(&self, inputs: &[T]) -> Result<Vec<usize>, TokenizerError>
    where
        T: AsRef<[u8]> + Sync,
    {
        inputs
            .par_iter()
            .map(|input| self.tokenize_count(input))
            .collect()
    }

    /// Decode ids back to text. Unknown ids and UNK decode to nothing.
    pub fn decode(&self, ids: &[u32]) -> Vec<u8> {
        let mut raw = Vec::with_capacity(ids.len() * 4);
        for &id in ids {
            if let Some(bytes) = self.id_to_token(id) {
                raw.extend_from_slice(bytes);
            }
        }
        capcode::decode_all(self.config.capcode, &raw)
    }

    /// Decode a fixed-width id stream.
    pub fn decode_serialized(&self, bytes: &[u8], width: IdWidth) -> Result<Vec<u8>, WireError> {
        let ids = wire::deserialize_ids(bytes, width)?;
        Ok(self.decode(&ids))
    }

    /// Decode many id lists in parallel.
    pub fn decode_batch(&self, batches: &[Vec<u32>]) -> Vec<Vec<u8>> {
        batches.par_iter().map(|ids| self.decode(ids)).collect()
    }

    #[inline]
    fn longest_at(&self, data: &[u8], pos: usize) -> Option<Match> {
        self.dictionary
            .longest_prefix(&data[pos..], self.max_token_len)
            .map(|(index, len)| Match {
                index: index as usize,
                len,
            })
    }

    /// Begin class of the byte at `pos`. The end of input counts as a space.
    ///
    /// A token ending exactly at the end of input therefore earns the space
    /// and word-boundary bonuses. A reader that looks at padding past the end
    /// would see an unclassified byte there and give neither.
    #[inline]
    fn class_at(&self, data: &[u8], pos: usize) -> ByteClass {
        data.get(pos)
            .map_or(ByteClass::Space, |&b| self.begin_class[b as usize])
    }

    /// Longest match for `data[pos..]` read as if it followed a delete marker.
    ///
    /// Returns the match length in input bytes.
    #[inline]
    fn marker_match(
        &self,
        data: &[u8],
        pos: usize,
        scratch: &mut [u8; MAX_TOKEN_LEN + 1],
    ) -> Option<Match> {
        let take = (data.len() - pos).min(self.max_token_len.saturating_sub(1));
        scratch[1..=take].copy_from_slice(&data[pos..pos + take]);
        let (index, len) = self
            .dictionary
            .longest_prefix(&scratch[..=take], self.max_token_len)?;
        (len > 1).then_some(Match {
            index: index as usize,
            len: len - 1,
        })
    }

    /// The tokenization core. Emits ids into `sink` and returns the number of
    /// input bytes that no token covered.
    pub fn run<S: Sink>(&self, data: &[u8], sink: &mut S) -> usize {
        let unk = self.unk_id();
        let delete_id = self.delete_token_id();
        let mut scratch = [0u8; MAX_TOKEN_LEN + 1];
        scratch[0] = DELETE_MARKER;
        let mut missing = 0;
        let mut i = 0;

        while i < data.len() {
            let Some(mut current) = self.longest_at(data, i) else {
                if let Some(unk) = unk {
                    sink.push(unk);
                }
                missing += 1;
                i += 1;
                continue;
            };
            // Bytes of the current match that stand for a delete marker, not input.
            let mut adjust = 0usize;

            loop {
                let rec = &self.records[current.index];
                let end = i + current.len;
                if end >= data.len()
                    || (rec.flags.is_single_word() && self.class_at(data, end) == ByteClass::Space)
                {
                    sink.push(rec.id);
                    i = end;
                    break;
                }

                let first_words = i32::from(rec.word_count) - adjust as i32;
                let mut best: Option<Choice> = None;
                let mut probes: [Option<Probe>; 3] = [None; 3];

                // Branch A: the whole match.
                if let Some(next) = self.longest_at(data, end) {
                    let score =
                        self.branch_score(rec.flags, first_words, current.len, next, end, data, false);
                    keep_best(
                        &mut best,
                        Choice {
                            score,
                            first_id: rec.id,
                            first_len: current.len,
                            marker: false,
                            next,
                        },
                    );
                    if delete_id.is_some() && self.wants_marker(next, end, data) {
                        probes[0] = Some(Probe {
                            first_id: rec.id,
                            flags: rec.flags,
                            words: first_words,
                            first_len: current.len,
                            plain_len: next.len,
                            alt: false,
                        });
                    }
                }

                // Branches B and C: the precomputed shorter prefixes.
                for (slot, alt) in [rec.alt1, rec.alt2].into_iter().enumerate() {
                    let Some(alt) = alt else { continue };
                    let alt_len = alt.length as usize;
                    if alt_len <= adjust {
                        continue;
                    }
                    let first_len = alt_len - adjust;
                    let start = i + first_len;
                    let first = &self.records[alt.index as usize];
                    let words = i32::from(first.word_count) - adjust as i32;
                    let Some(next) = self.longest_at(data, start) else {
                        continue;
                    };
                    let total = first_len + next.len;
                    let score = self.branch_score(first.flags, words, total, next, start, data, false)
                        - shortfall_penalty(total, current.len);
                    keep_best(
                        &mut best,
                        Choice {
                            score,
                            first_id: alt.id,
                            first_len,
                            marker: false,
                            next,
                        },
                    );
                    if delete_id.is_some() && self.wants_marker(next, start, data) {
                        probes[slot + 1] = Some(Probe {
                            first_id: alt.id,
                            flags: first.flags,
                            words,
                            first_len,
                            plain_len: next.len,
                            alt: true,
                        });
                    }
                }

                // Marker-insertion variants of the branches above.
                for probe in probes.into_iter().flatten() {
                    let start = i + probe.first_len;
                    let Some(next) = self.marker_match(data, start, &mut scratch) else {
                        continue;
                    };
                    if next.len <= probe.plain_len {
                        continue;
                    }
                    let total = probe.first_len + next.len;
                    let mut score =
                        self.branch_score(probe.flags, probe.words, total, next, start, data, true);
                    if probe.alt {
                        score -= shortfall_penalty(total, current.len);
                    }
                    keep_best(
                        &mut best,
                        Choice {
                            score,
                            first_id: probe.first_id,
                            first_len: probe.first_len,
                            marker: true,
                            next,
                        },
                    );
                }

                let Some(choice) = best else {
                    sink.push(rec.id);
                    i = end;
                    break;
                };
                sink.push(choice.first_id);
                if choice.marker {
                    if let Some(delete_id) = delete_id {
                        sink.push(delete_id);
                    }
                }
                i += choice.first_len;
                current = choice.next;
                adjust = usize::from(choice.marker);
            }
        }
        missing
    }

    /// Should the look-ahead `next` at `pos` be retried behind a delete marker?
    #[inline]
    fn wants_marker(&self, next: Match, pos: usize, data: &[u8]) -> bool {
        let second = &self.records[next.index];
        second.flags.begins_with_letter()
            && second.word_count == 0
            && self.class_at(data, pos + next.len) == ByteClass::Letter
    }

    /// Score a two-token branch. `start` is where the second token begins.
    #[allow(clippy::too_many_arguments)]
    #[inline]
    fn branch_score(
        &self,
        first: TokenFlags,
        first_words: i32,
        total: usize,
        next: Match,
        start: usize,
        data: &[u8],
        marker: bool,
    ) -> i32 {
        let second: &TokenRecord = &self.records[next.index];
        let s = second.flags;
        let next_class = self.class_at(data, start + next.len);
        let second_words = i32::from(second.word_count);
        let boundary = matches!(next_class, ByteClass::Space | ByteClass::Punct);

        let mut score = total as i32
            + i32::from(first.is_homogeneous())
            + i32::from(s.is_homogeneous())
            + (first_words - 1).max(0)
            + (second_words - 1).max(0)
            + i32::from(next_class == ByteClass::Space)
            + 100 * (first_words + second_words + i32::from(boundary));
        if marker {
            score -= 1;
            if first.ends_with_letter() {
                score -= 103;
            }
        } else {
            score += i32::from(s.begins_with_space());
            if first.ends_with_letter() && s.begins_with_letter() {
                score -= 103;
            }
        }
        if first.ends_on_capcode() && s.begins_on_capcode() {
            score -= 100;
        }
        if s.ends_with_letter() && next_class == ByteClass::Letter {
            score -= 3;
        }
        score
    }
}

/// Penalty for an alternative branch that covers no more than the whole match.
#[inline]
fn shortfall_penalty(total: usize, whole: usize) -> i32 {
    if total < whole {
        100
    } else if total == whole {
        10_000
    } else {
        0
    }
}
