mod bindings;

pub use bindings::{PyStreamingDecoder, PyVocab};

use pyo3::prelude::*;

/// monstertok: compiled-vocabulary tokenizer with Python bindings
///
/// - Branch-scored greedy segmentation with one token of look-ahead
/// - Capcode case encoding and declarative normalization
/// - Rayon parallelism for batch tokenization
/// - Streaming decoder for token-by-token output
#[pymodule]
fn _core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyVocab>()?;
    m.add_class::<PyStreamingDecoder>()?;
    m.add("NONE_ID", crate::core::NONE_ID)?;
    m.add("MAX_TOKEN_LEN", crate::core::MAX_TOKEN_LEN)?;
    Ok(())
}
