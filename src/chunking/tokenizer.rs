//! Tokenizers used to measure and cut chunks

use regex::Regex;
use std::ops::Range;
use std::sync::LazyLock;

use super::ChunkError;

static WORD_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\S+").expect("word pattern is valid"));

/// Splits text into tokens, reporting each token as a byte span of the input.
///
/// Spans are ordered by start and lie on `char` boundaries so a chunk can be
/// cut straight out of the source text. Several subword tokens of one
/// character may repeat the same span; each still counts as a token.
pub trait Tokenizer: Send + Sync {
    fn tokenize(&self, text: &str) -> Result<Vec<Range<usize>>, ChunkError>;

    /// Short name for logs
    fn name(&self) -> &str;

    fn count_tokens(&self, text: &str) -> Result<usize, ChunkError> {
        Ok(self.tokenize(text)?.len())
    }
}

/// Whitespace-delimited word tokenizer
///
/// Provider agnostic; one token per run of non-whitespace characters.
#[derive(Debug, Default, Clone, Copy)]
pub struct WordTokenizer;

impl Tokenizer for WordTokenizer {
    fn tokenize(&self, text: &str) -> Result<Vec<Range<usize>>, ChunkError> {
        Ok(WORD_PATTERN.find_iter(text).map(|m| m.range()).collect())
    }

    fn name(&self) -> &str {
        "word"
    }
}

/// Subword tokenizer backed by a HuggingFace `tokenizer.json`
#[cfg(feature = "hf-tokenizer")]
pub struct HfTokenizer {
    inner: tokenizers::Tokenizer,
    name: String,
}

#[cfg(feature = "hf-tokenizer")]
impl HfTokenizer {
    pub fn from_file(path: &std::path::Path) -> Result<Self, ChunkError> {
        let inner = tokenizers::Tokenizer::from_file(path).map_err(|e| {
            ChunkError::InvalidConfig(format!(
                "Failed to load tokenizer {}: {}",
                path.display(),
                e
            ))
        })?;

        Ok(Self {
            inner,
            name: format!("huggingface:{}", path.display()),
        })
    }
}

#[cfg(feature = "hf-tokenizer")]
impl Tokenizer for HfTokenizer {
    fn tokenize(&self, text: &str) -> Result<Vec<Range<usize>>, ChunkError> {
        let encoding = self
            .inner
            .encode(text, false)
            .map_err(|e| ChunkError::Tokenization(e.to_string()))?;

        Ok(byte_spans(text, encoding.get_offsets()))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// One span per tokenizer unit, widened to `char` boundaries.
///
/// Zero-width entries (special tokens) are dropped. Units that split a
/// multi-byte character keep that character's span, so the count matches
/// what the model sees.
#[cfg(any(feature = "hf-tokenizer", test))]
fn byte_spans(text: &str, offsets: &[(usize, usize)]) -> Vec<Range<usize>> {
    let mut spans: Vec<Range<usize>> = Vec::with_capacity(offsets.len());

    for &(start, end) in offsets {
        let end = end.min(text.len());
        if start >= end {
            continue;
        }

        let mut start = start;
        while !text.is_char_boundary(start) {
            start -= 1;
        }
        let mut end = end;
        while !text.is_char_boundary(end) {
            end += 1;
        }

        if let Some(last) = spans.last() {
            start = start.max(last.start);
            end = end.max(start);
        }
        spans.push(start..end);
    }

    spans
}
