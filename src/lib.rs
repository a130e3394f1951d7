//! monstertok: a compiled-vocabulary tokenizer.
//!
//! Text is normalized, optionally capcode-encoded (case folded into marker
//! bytes), then segmented by a greedy longest-match engine that looks one
//! token ahead and may take a shorter alternative when that scores better.
//! Vocabularies are built with [`VocabBuilder`], stored in a compact binary
//! format and decoded back through [`Vocab::decode`] or a
//! [`StreamingDecoder`].
//!
//! ```
//! use monstertok::{CapcodeMode, ReserveBytes, VocabBuilder, VocabConfig};
//!
//! let config = VocabConfig::default().with_capcode(CapcodeMode::Enabled);
//! let vocab = VocabBuilder::new(config)
//!     .add_tokens(["hello", " world"])
//!     .reserve(ReserveBytes::LOW_128)
//!     .build()
//!     .unwrap();
//!
//! let tokenization = vocab.tokenize("Hello world").unwrap();
//! assert_eq!(tokenization.missing, 0);
//! assert_eq!(vocab.decode(&tokenization.ids), b"Hello world");
//! ```

pub mod core;
#[cfg(feature = "python")]
mod python;

pub use core::{
    deserialize_ids, serialize_ids, Branch, ByteClass, CapcodeMode, Charset, CountSink,
    DecodeState, DeletedToken, IdWidth, Normalization, NormalizeError, OptimizationLevel,
    ReserveBytes, Sink, StreamingDecoder, TokenFlags, TokenInfo, TokenKind, TokenRecord,
    Tokenization, TokenizerError, Vocab, VocabBuilder, VocabConfig, VocabError, WireError,
    MAX_TOKEN_LEN, NONE_ID,
};
