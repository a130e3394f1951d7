//! Integration tests for the tokenization engine.
//!
//! These tests build small vocabularies through the public builder and check
//! round-trips, determinism, coverage and the branch decisions the engine
//! makes at word boundaries.

use monstertok::{
    deserialize_ids, CapcodeMode, IdWidth, Normalization, ReserveBytes, StreamingDecoder,
    TokenizerError, Vocab, VocabBuilder, VocabConfig,
};

const CORPUS: &[&str] = &[
    "the cat sat on the mat",
    "The quick brown fox jumps over the lazy dog.",
    "walking and talking, they're going home",
    "1234567890 numbers 42",
    "Multi-line\ntext\nwith\nnewlines",
    "Unicode: こんにちは 世界 🦀",
    "",
    " ",
    "a",
];

/// Test that decode(tokenize(x)) == x on a fully covered vocabulary.
#[test]
fn test_roundtrip_corpus() {
    let vocab = create_english_vocab(CapcodeMode::Disabled);

    for text in CORPUS {
        let result = vocab.tokenize(text).unwrap();
        assert_eq!(result.missing, 0, "Uncovered bytes in: {:?}", text);
        assert_eq!(
            vocab.decode(&result.ids),
            text.as_bytes(),
            "Roundtrip failed for: {:?}",
            text
        );
    }
}

/// Test round-trips through capcode, including the delete marker.
#[test]
fn test_roundtrip_corpus_with_capcode() {
    for mode in [CapcodeMode::DeleteOnly, CapcodeMode::Enabled] {
        let vocab = create_english_vocab(mode);
        for text in CORPUS {
            let result = vocab.tokenize(text).unwrap();
            assert_eq!(result.missing, 0, "{:?}: uncovered bytes in {:?}", mode, text);
            assert_eq!(
                vocab.decode(&result.ids),
                text.as_bytes(),
                "{:?}: roundtrip failed for {:?}",
                mode,
                text
            );
        }
    }
}

/// Test that repeated runs give identical ids.
#[test]
fn test_deterministic() {
    let vocab = create_english_vocab(CapcodeMode::Enabled);
    let rebuilt = create_english_vocab(CapcodeMode::Enabled);

    for text in CORPUS {
        let first = vocab.tokenize(text).unwrap();
        assert_eq!(first, vocab.tokenize(text).unwrap());
        assert_eq!(first, rebuilt.tokenize(text).unwrap());
    }
}

/// Test that a vocabulary reserving all 256 bytes never misses input.
#[test]
fn test_reserved_bytes_full_coverage() {
    let vocab = create_english_vocab(CapcodeMode::Disabled);
    let data: Vec<u8> = (0..=255u8).chain((0..=255u8).rev()).collect();

    let result = vocab.tokenize(&data).unwrap();
    assert_eq!(result.missing, 0);
    assert_eq!(vocab.decode(&result.ids), data);
}

/// Test the whole-input match against its shorter prefixes.
#[test]
fn test_full_match_preferred_over_prefixes() {
    let vocab = VocabBuilder::new(VocabConfig::default())
        .add_tokens(["a", "ab", "abc", " "])
        .reserve(ReserveBytes::ALL)
        .build()
        .unwrap();

    let ids = vocab.tokenize("abc").unwrap().ids;
    assert_eq!(ids, vec![vocab.token_to_id(b"abc").unwrap()]);
}

/// Test that a single space-led word followed by a space is committed at once,
/// even when a longer alternative branch would score higher.
#[test]
fn test_single_word_before_space_commits_immediately() {
    let vocab = VocabBuilder::new(VocabConfig::default())
        .add_tokens([" cat", " ca", " c", " dog", " do", " ", "t dogs", "t dog"])
        .reserve(ReserveBytes::ALL)
        .build()
        .unwrap();

    let cat = vocab.token_to_id(b" cat").unwrap();
    let record = vocab.record_for_id(cat).unwrap();
    assert!(record.flags.is_single_word());
    assert!(record.alt1.is_some(), "\" cat\" should have a shorter alternative");

    // " ca" + "t dogs" covers the input in two tokens; the word is still kept whole.
    let ids = vocab.tokenize(" cat dogs").unwrap().ids;
    assert_eq!(
        ids,
        vec![
            cat,
            vocab.token_to_id(b" dog").unwrap(),
            vocab.token_to_id(b"s").unwrap()
        ],
        "alternative \" ca\" + \"t dogs\" must not be taken"
    );
}

/// Test that uncovered bytes are counted and either dropped or replaced by UNK.
#[test]
fn test_missing_bytes() {
    let vocab = VocabBuilder::new(VocabConfig::default())
        .add_tokens(["he", "llo", " "])
        .build()
        .unwrap();

    let result = vocab.tokenize("hello, world").unwrap();
    assert!(result.missing > 0);
    assert!(vocab.unk_id().is_none());

    let with_unk = vocab.modify().enable_unk().build().unwrap();
    let unk = with_unk.unk_id().unwrap();
    let result_unk = with_unk.tokenize("hello, world").unwrap();
    assert_eq!(result_unk.missing, result.missing);
    assert_eq!(
        result_unk.ids.iter().filter(|&&id| id == unk).count(),
        result.missing
    );
    assert_eq!(with_unk.decode(&result_unk.ids), b"hello ");
}

/// Test that normalization is applied to input before matching.
#[test]
fn test_normalized_input() {
    let config = VocabConfig::default()
        .with_normalization(Normalization::LOWERCASE.with(Normalization::COLLAPSE));
    let vocab = VocabBuilder::new(config)
        .add_tokens(["hello", " world"])
        .reserve(ReserveBytes::ASCII)
        .build()
        .unwrap();

    let result = vocab.tokenize("HELLO    World").unwrap();
    assert_eq!(result.missing, 0);
    assert_eq!(
        result.ids,
        vec![
            vocab.token_to_id(b"hello").unwrap(),
            vocab.token_to_id(b" world").unwrap()
        ]
    );
    assert_eq!(vocab.decode(&result.ids), b"hello world");
}

/// Test that input already holding a marker byte is rejected before tokenizing.
#[test]
fn test_marker_in_input_rejected() {
    let vocab = create_english_vocab(CapcodeMode::Enabled);
    let err = vocab.tokenize("word\x0Fword").unwrap_err();
    assert!(matches!(err, TokenizerError::Normalize(_)), "got {err}");

    let plain = create_english_vocab(CapcodeMode::Disabled);
    assert!(plain.tokenize("word\x0Fword").is_ok());
}

/// Test that counting, serialized output and plain ids agree.
#[test]
fn test_output_variants_agree() {
    let vocab = create_english_vocab(CapcodeMode::Enabled);
    let texts: Vec<&str> = CORPUS.to_vec();

    let batch = vocab.tokenize_batch(&texts).unwrap();
    let counts = vocab.tokenize_count_batch(&texts).unwrap();
    for ((text, result), count) in texts.iter().zip(&batch).zip(&counts) {
        assert_eq!(result, &vocab.tokenize(text).unwrap());
        assert_eq!(*count, result.ids.len());

        let width = IdWidth::for_vocab(&vocab);
        let mut stream = Vec::new();
        let missing = vocab.tokenize_serialized(text, width, &mut stream).unwrap();
        assert_eq!(missing, result.missing);
        assert_eq!(deserialize_ids(&stream, width).unwrap(), result.ids);
    }
}

/// Test streaming decode of a codepoint split across tokens.
#[test]
fn test_streaming_holds_partial_codepoint() {
    let shi = "世".as_bytes();
    let tokens: [&[u8]; 3] = [b"x", &shi[..2], &shi[2..]];
    let vocab = VocabBuilder::new(VocabConfig::default())
        .add_tokens(tokens)
        .build()
        .unwrap();
    let ids = vocab.tokenize("x世").unwrap().ids;
    assert_eq!(ids.len(), 3);

    let mut decoder = StreamingDecoder::new(&vocab);
    assert_eq!(decoder.decode(&ids[..2]), b"x");
    assert_eq!(decoder.pending_bytes(), 2);
    assert_eq!(decoder.decode(&ids[2..]), shi);
    assert!(!decoder.has_pending());

    decoder.decode(&ids[..2]);
    assert_eq!(decoder.flush(), &shi[..2]);
}

/// Create a small English vocabulary that reserves every byte value.
fn create_english_vocab(capcode: CapcodeMode) -> Vocab {
    let words = [
        "the", "cat", "sat", "on", "mat", "quick", "brown", "fox", "jumps", "over", "lazy", "dog",
        "walk", "walking", "talk", "talking", "ing", "and", "they", "going", "home", "numbers",
        "with", "text", "line", "new", "lines", "multi", "unicode",
    ];
    let mut tokens: Vec<String> = Vec::new();
    for word in words {
        tokens.push(word.to_string());
        tokens.push(format!(" {word}"));
    }
    tokens.extend(
        ["'re", "'s", ", ", ".", "12", "123", "4567", "90", "\n", "  ", "世界", " 世界"]
            .iter()
            .map(|s| s.to_string()),
    );

    let config = VocabConfig::default().with_capcode(capcode);
    VocabBuilder::new(config)
        .add_tokens(&tokens)
        .reserve(ReserveBytes::ALL)
        .build()
        .unwrap()
}
