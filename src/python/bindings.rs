//! Python bindings for monstertok.
//!
//! Wraps [`Vocab`] and [`DecodeState`] in PyO3 classes. Vocabularies are
//! immutable and shared through an `Arc`, so decoders created from one keep
//! it alive without copying.
//!
//! # Example
//!
//! ```python
//! from monstertok import Vocab
//!
//! vocab = Vocab.load("english-32000.vocab")
//! ids = vocab.tokenize("Hello, world!")
//! text = vocab.decode(ids)
//!
//! decoder = vocab.streaming_decoder()
//! for token_id in token_stream:
//!     if text := decoder.add_token(token_id):
//!         print(text, end="", flush=True)
//! ```

use std::sync::Arc;

use pyo3::exceptions::{PyIOError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::{PyBytes, PyDict};

use crate::core::{
    encode_utf16le, CapcodeMode, Charset, DecodeState, Normalization, OptimizationLevel,
    ReserveBytes, TokenKind, TokenizerError, Vocab, VocabBuilder, VocabConfig, VocabError,
};

fn vocab_err(e: VocabError) -> PyErr {
    match e {
        VocabError::Io(e) => PyIOError::new_err(e.to_string()),
        other => PyValueError::new_err(other.to_string()),
    }
}

fn tokenize_err(e: TokenizerError) -> PyErr {
    PyValueError::new_err(e.to_string())
}

/// Text passed from Python: `str` is encoded for the vocabulary's charset,
/// `bytes` are used as given.
#[derive(FromPyObject)]
enum Text {
    #[pyo3(transparent)]
    Str(String),
    #[pyo3(transparent)]
    Bytes(Vec<u8>),
}

impl Text {
    fn into_bytes(self, charset: Charset) -> Vec<u8> {
        match (self, charset) {
            (Text::Str(s), Charset::Utf16) => encode_utf16le(&s),
            (Text::Str(s), _) => s.into_bytes(),
            (Text::Bytes(b), _) => b,
        }
    }
}

fn parse_charset(name: &str) -> PyResult<Charset> {
    match name.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
        "utf8" => Ok(Charset::Utf8),
        "utf16" => Ok(Charset::Utf16),
        "none" | "" => Ok(Charset::None),
        _ => Err(PyValueError::new_err(format!("unknown charset: {name}"))),
    }
}

/// Python wrapper for a compiled vocabulary.
#[pyclass(name = "Vocab")]
#[derive(Clone)]
pub struct PyVocab {
    inner: Arc<Vocab>,
}

impl PyVocab {
    fn wrap(vocab: Vocab) -> Self {
        Self {
            inner: Arc::new(vocab),
        }
    }

    fn encode(&self, text: Text) -> Vec<u8> {
        text.into_bytes(self.inner.charset())
    }

    fn encode_all(&self, texts: Option<Vec<Text>>) -> Vec<Vec<u8>> {
        texts
            .unwrap_or_default()
            .into_iter()
            .map(|t| self.encode(t))
            .collect()
    }

    fn text(&self, bytes: Vec<u8>) -> PyResult<String> {
        match self.inner.charset() {
            Charset::Utf16 => {
                if bytes.len() % 2 != 0 {
                    return Err(PyValueError::new_err("odd number of UTF-16 bytes"));
                }
                let units: Vec<u16> = bytes
                    .chunks_exact(2)
                    .map(|c| u16::from_le_bytes([c[0], c[1]]))
                    .collect();
                String::from_utf16(&units).map_err(|e| PyValueError::new_err(e.to_string()))
            }
            _ => String::from_utf8(bytes).map_err(|e| PyValueError::new_err(e.to_string())),
        }
    }
}

#[pymethods]
impl PyVocab {
    /// Build a new vocabulary from token lists.
    ///
    /// Args:
    ///     tokens: Regular tokens
    ///     special_tokens: Tokens that only ever match exactly
    ///     charset: "UTF-8", "UTF-16" or "None"
    ///     capcode: 0 (disabled), 1 (delete marker only) or 2 (full)
    ///     normalization: Space separated names, e.g. "NFD Quotemarks"
    ///     level: Optimization level code recorded in the header
    ///     reserve: Reserved single-byte token flags
    ///     unk: Whether to assign an UNK id
    #[staticmethod]
    #[pyo3(signature = (tokens, special_tokens=None, charset="UTF-8", capcode=0, normalization="", level=0, reserve=0, unk=false))]
    #[allow(clippy::too_many_arguments)]
    fn build(
        tokens: Vec<Text>,
        special_tokens: Option<Vec<Text>>,
        charset: &str,
        capcode: u8,
        normalization: &str,
        level: u8,
        reserve: u8,
        unk: bool,
    ) -> PyResult<Self> {
        let charset = parse_charset(charset)?;
        let encode = |texts: Vec<Text>| -> Vec<Vec<u8>> {
            texts.into_iter().map(|t| t.into_bytes(charset)).collect()
        };
        let config = VocabConfig::new(charset)
            .with_capcode(CapcodeMode::from_code(capcode).map_err(vocab_err)?)
            .with_normalization(Normalization::from_names(normalization).map_err(vocab_err)?)
            .with_level(OptimizationLevel::from_code(level).map_err(vocab_err)?)
            .with_reserve(ReserveBytes::from_code(reserve));
        let mut builder = VocabBuilder::new(config)
            .add_tokens(encode(tokens))
            .add_special_tokens(encode(special_tokens.unwrap_or_default()));
        if unk {
            builder = builder.enable_unk();
        }
        builder.build().map(Self::wrap).map_err(vocab_err)
    }

    /// Load a vocabulary file.
    #[staticmethod]
    fn load(path: &str) -> PyResult<Self> {
        Vocab::load(path).map(Self::wrap).map_err(vocab_err)
    }

    /// Parse a vocabulary from its binary form.
    #[staticmethod]
    fn from_bytes(data: &[u8]) -> PyResult<Self> {
        Vocab::from_bytes(data).map(Self::wrap).map_err(vocab_err)
    }

    fn save(&self, path: &str) -> PyResult<()> {
        self.inner.save(path).map_err(vocab_err)
    }

    fn to_bytes<'py>(&self, py: Python<'py>) -> Bound<'py, PyBytes> {
        PyBytes::new_bound(py, &self.inner.to_bytes())
    }

    /// Return a modified copy. The original is left untouched.
    ///
    /// Args:
    ///     add: Regular tokens to add
    ///     add_special: Special tokens to add
    ///     delete: Tokens to delete
    ///     delete_ids: Ids to delete
    ///     resize: Target vocabulary size, UNK included
    ///     reset_ids: Reassign ids densely from zero
    ///     unk: Enable or disable UNK; None keeps the current setting
    #[pyo3(signature = (add=None, add_special=None, delete=None, delete_ids=None, resize=None, reset_ids=false, unk=None))]
    #[allow(clippy::too_many_arguments)]
    fn modify(
        &self,
        add: Option<Vec<Text>>,
        add_special: Option<Vec<Text>>,
        delete: Option<Vec<Text>>,
        delete_ids: Option<Vec<u32>>,
        resize: Option<usize>,
        reset_ids: bool,
        unk: Option<bool>,
    ) -> PyResult<Self> {
        let mut builder = self
            .inner
            .modify()
            .delete_tokens(self.encode_all(delete))
            .delete_ids(delete_ids.unwrap_or_default())
            .add_tokens(self.encode_all(add))
            .add_special_tokens(self.encode_all(add_special));
        if let Some(size) = resize {
            builder = builder.resize(size);
        }
        if reset_ids {
            builder = builder.reset_ids();
        }
        builder = match unk {
            Some(true) => builder.enable_unk(),
            Some(false) => builder.disable_unk(),
            None => builder,
        };
        builder.build().map(Self::wrap).map_err(vocab_err)
    }

    /// Tokenize text. Accepts `str` or `bytes`.
    fn tokenize(&self, text: Text) -> PyResult<Vec<u32>> {
        self.inner
            .tokenize(self.encode(text))
            .map(|t| t.ids)
            .map_err(tokenize_err)
    }

    /// Tokenize and also return the number of input bytes no token covered.
    fn tokenize_with_missing(&self, text: Text) -> PyResult<(Vec<u32>, usize)> {
        self.inner
            .tokenize(self.encode(text))
            .map(|t| (t.ids, t.missing))
            .map_err(tokenize_err)
    }

    fn tokenize_count(&self, text: Text) -> PyResult<usize> {
        self.inner
            .tokenize_count(self.encode(text))
            .map_err(tokenize_err)
    }

    /// Tokenize many texts in parallel.
    ///
    /// The GIL is released while Rayon workers run.
    fn tokenize_batch(&self, py: Python<'_>, texts: Vec<Text>) -> PyResult<Vec<Vec<u32>>> {
        let texts: Vec<Vec<u8>> = texts.into_iter().map(|t| self.encode(t)).collect();
        let vocab = Arc::clone(&self.inner);
        py.allow_threads(move || vocab.tokenize_batch(&texts))
            .map(|results| results.into_iter().map(|t| t.ids).collect())
            .map_err(tokenize_err)
    }

    /// Decode ids to a string.
    ///
    /// Raises:
    ///     ValueError: If the decoded bytes are not valid text for the charset
    fn decode(&self, tokens: Vec<u32>) -> PyResult<String> {
        self.text(self.inner.decode(&tokens))
    }

    fn decode_bytes<'py>(&self, py: Python<'py>, tokens: Vec<u32>) -> Bound<'py, PyBytes> {
        PyBytes::new_bound(py, &self.inner.decode(&tokens))
    }

    fn token_to_id(&self, token: Text) -> Option<u32> {
        self.inner.token_to_id(&self.encode(token))
    }

    /// The stored (encoded) bytes of a token, or None.
    fn id_to_token<'py>(&self, py: Python<'py>, id: u32) -> Option<Bound<'py, PyBytes>> {
        self.inner.id_to_token(id).map(|b| PyBytes::new_bound(py, b))
    }

    fn id_to_token_decoded<'py>(&self, py: Python<'py>, id: u32) -> Option<Bound<'py, PyBytes>> {
        self.inner
            .id_to_token_decoded(id)
            .map(|b| PyBytes::new_bound(py, &b))
    }

    /// List every token as a dict with id, token, decoded, type and score.
    fn tokens<'py>(&self, py: Python<'py>) -> PyResult<Vec<Bound<'py, PyDict>>> {
        self.inner
            .tokens()
            .into_iter()
            .map(|info| {
                let dict = PyDict::new_bound(py);
                dict.set_item("id", info.id)?;
                dict.set_item("token", PyBytes::new_bound(py, &info.token))?;
                dict.set_item("decoded", PyBytes::new_bound(py, &info.decoded))?;
                let kind = match info.kind {
                    TokenKind::Regular => "regular",
                    TokenKind::Single => "single",
                    TokenKind::Special => "special",
                    TokenKind::Unk => "unk",
                };
                dict.set_item("type", kind)?;
                dict.set_item("score", info.score)?;
                Ok(dict)
            })
            .collect()
    }

    #[getter]
    fn vocab_size(&self) -> usize {
        self.inner.len()
    }

    #[getter]
    fn unk_id(&self) -> Option<u32> {
        self.inner.unk_id()
    }

    #[getter]
    fn delete_token_id(&self) -> Option<u32> {
        self.inner.delete_token_id()
    }

    #[getter]
    fn charset(&self) -> &'static str {
        self.inner.charset().name()
    }

    #[getter]
    fn capcode(&self) -> u8 {
        self.inner.capcode().code()
    }

    #[getter]
    fn normalization(&self) -> String {
        self.inner.normalization().to_string()
    }

    /// Create a streaming decoder bound to this vocabulary.
    fn streaming_decoder(&self) -> PyStreamingDecoder {
        PyStreamingDecoder {
            vocab: Arc::clone(&self.inner),
            state: DecodeState::new(),
        }
    }

    fn __len__(&self) -> usize {
        self.inner.len()
    }

    fn __repr__(&self) -> String {
        format!(
            "Vocab(vocab_size={}, charset={}, capcode={})",
            self.inner.len(),
            self.inner.charset().name(),
            self.inner.capcode().code()
        )
    }
}

/// Python wrapper for the streaming decoder.
///
/// Holds back incomplete characters and pending capcode markers, returning
/// only text that can no longer change.
#[pyclass(name = "StreamingDecoder")]
pub struct PyStreamingDecoder {
    vocab: Arc<Vocab>,
    state: DecodeState,
}

impl PyStreamingDecoder {
    fn emit(&self, bytes: Vec<u8>) -> Option<String> {
        if bytes.is_empty() {
            return None;
        }
        Some(self.vocab.charset().decode_lossy(&bytes))
    }
}

#[pymethods]
impl PyStreamingDecoder {
    /// Add a token and return any completed text, or None while buffering.
    fn add_token(&mut self, token_id: u32) -> Option<String> {
        let bytes = self.state.decode(&self.vocab, &[token_id]);
        self.emit(bytes)
    }

    /// Add several tokens at once.
    fn add_tokens(&mut self, token_ids: Vec<u32>) -> Option<String> {
        let bytes = self.state.decode(&self.vocab, &token_ids);
        self.emit(bytes)
    }

    /// Return any buffered bytes, lossily decoded.
    fn flush(&mut self) -> String {
        let bytes = self.state.flush();
        self.vocab.charset().decode_lossy(&bytes)
    }

    fn reset(&mut self) {
        self.state.reset();
    }

    #[getter]
    fn has_pending(&self) -> bool {
        self.state.has_pending()
    }

    #[getter]
    fn pending_bytes(&self) -> usize {
        self.state.pending_bytes()
    }

    fn __repr__(&self) -> String {
        format!(
            "StreamingDecoder(pending_bytes={})",
            self.state.pending_bytes()
        )
    }
}
