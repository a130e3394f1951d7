//! Core tokenization engine for monstertok.
//!
//! # Architecture
//!
//! - [`Vocab`]: the compiled vocabulary. Token records sorted by length, a
//!   byte dictionary for longest-prefix lookup, the id table and per-token
//!   flags and alternatives.
//! - [`VocabBuilder`]: adds, deletes, resizes and re-ids tokens, then
//!   compiles a fresh [`Vocab`]. Existing vocabularies are edited through
//!   [`Vocab::modify`].
//! - The branch-scoring engine ([`Vocab::tokenize`] and friends) picks, at
//!   every position, between the longest match and its two alternatives by
//!   looking one token ahead.
//! - [`Charset`], [`Normalization`] and [`CapcodeMode`] describe how input
//!   text is prepared before tokenization and how ids decode back.
//! - [`StreamingDecoder`]: decodes ids one at a time without splitting
//!   characters or capcode sequences.
//! - [`wire`]: fixed-width id streams.
//!
//! # Performance
//!
//! - **Aho-Corasick**: anchored leftmost-longest prefix lookup over all tokens
//! - **FxHashMap**: id and token maps during builds
//! - **Rayon parallelism**: batch tokenization and counting

mod builder;
pub mod capcode;
mod charset;
mod dictionary;
mod normalize;
mod serialize;
mod streaming;
mod tokenizer;
mod vocab;
pub mod wire;

pub use builder::VocabBuilder;
pub use capcode::{CapcodeMode, CHARACTER_MARKER, DELETE_MARKER, WORD_MARKER};
pub use charset::Charset;
pub use normalize::{encode_utf16le, Normalization, NormalizeError};
pub use streaming::{DecodeState, StreamingDecoder};
pub use tokenizer::{CountSink, Sink, Tokenization, TokenizerError};
pub use vocab::{
    Branch, ByteClass, DeletedToken, OptimizationLevel, ReserveBytes, TokenFlags, TokenInfo,
    TokenKind, TokenRecord, Vocab, VocabConfig, VocabError, MAX_TOKEN_LEN, NONE_ID,
};
pub use wire::{deserialize_ids, serialize_ids, serialize_ids_into, IdWidth, WireError};
