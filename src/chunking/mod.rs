//! Token-aware chunking
//!
//! Splits evidence text into overlapping segments bounded by a token budget.
//! Every chunk is a contiguous slice of the source text running from its first
//! token to its last, so dropping the overlapping prefix of each chunk and
//! concatenating the rest yields every token of the original in order.

mod tokenizer;

#[cfg(feature = "hf-tokenizer")]
pub use tokenizer::HfTokenizer;
pub use tokenizer::{Tokenizer, WordTokenizer};

use crate::config::{ChunkingConfig, TokenizerKind};
use std::sync::Arc;
use thiserror::Error;

/// Default maximum chunk size in tokens
pub const DEFAULT_MAX_CHUNK_TOKENS: usize = 800;

/// Default overlap between consecutive chunks in tokens
pub const DEFAULT_CHUNK_OVERLAP: usize = 100;

#[derive(Error, Debug)]
pub enum ChunkError {
    #[error("Invalid chunking configuration: {0}")]
    InvalidConfig(String),

    #[error("Tokenization failed: {0}")]
    Tokenization(String),
}

/// One segment produced by the chunker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    /// 0-based position among the chunks of one reference
    pub index: usize,
    pub text: String,
    pub token_count: usize,
    /// Byte offsets of the chunk within the source text
    pub start_byte: usize,
    pub end_byte: usize,
}

/// Sliding-window chunker over tokenizer spans
#[derive(Clone)]
pub struct Chunker {
    tokenizer: Arc<dyn Tokenizer>,
    max_tokens: usize,
    overlap: usize,
}

impl std::fmt::Debug for Chunker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chunker")
            .field("tokenizer", &self.tokenizer.name())
            .field("max_tokens", &self.max_tokens)
            .field("overlap", &self.overlap)
            .finish()
    }
}

impl Chunker {
    /// Create a chunker; `overlap` must be strictly smaller than `max_tokens`.
    pub fn new(
        tokenizer: Arc<dyn Tokenizer>,
        max_tokens: usize,
        overlap: usize,
    ) -> Result<Self, ChunkError> {
        if max_tokens == 0 {
            return Err(ChunkError::InvalidConfig(
                "max_chunk_tokens must be greater than 0".to_string(),
            ));
        }
        if overlap >= max_tokens {
            return Err(ChunkError::InvalidConfig(format!(
                "chunk_overlap ({}) must be smaller than max_chunk_tokens ({})",
                overlap, max_tokens
            )));
        }

        Ok(Self {
            tokenizer,
            max_tokens,
            overlap,
        })
    }

    /// Word tokenizer with the default 800/100 window
    pub fn with_defaults() -> Self {
        Self {
            tokenizer: Arc::new(WordTokenizer),
            max_tokens: DEFAULT_MAX_CHUNK_TOKENS,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }

    pub fn from_config(config: &ChunkingConfig) -> Result<Self, ChunkError> {
        let tokenizer: Arc<dyn Tokenizer> = match config.tokenizer {
            TokenizerKind::Word => Arc::new(WordTokenizer),
            #[cfg(feature = "hf-tokenizer")]
            TokenizerKind::Huggingface => {
                Arc::new(HfTokenizer::from_file(&config.tokenizer_path)?)
            }
            #[cfg(not(feature = "hf-tokenizer"))]
            TokenizerKind::Huggingface => {
                return Err(ChunkError::InvalidConfig(
                    "huggingface tokenizer requires the `hf-tokenizer` feature".to_string(),
                ));
            }
        };

        Self::new(tokenizer, config.max_chunk_tokens, config.chunk_overlap)
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    pub fn tokenizer(&self) -> &dyn Tokenizer {
        self.tokenizer.as_ref()
    }

    /// Split `text` into ordered chunks.
    ///
    /// Text that fits in one window comes back as a single chunk with no
    /// overlap applied. Whitespace-only text yields no chunks.
    pub fn chunk(&self, text: &str) -> Result<Vec<TextChunk>, ChunkError> {
        let spans = self.tokenizer.tokenize(text)?;
        let total = spans.len();

        if total == 0 {
            return Ok(Vec::new());
        }

        let make_chunk = |index: usize, first: usize, last: usize| {
            let start_byte = spans[first].start;
            let end_byte = spans[last - 1].end;
            TextChunk {
                index,
                text: text[start_byte..end_byte].to_string(),
                token_count: last - first,
                start_byte,
                end_byte,
            }
        };

        if total <= self.max_tokens {
            return Ok(vec![make_chunk(0, 0, total)]);
        }

        let mut chunks = Vec::with_capacity(total / (self.max_tokens - self.overlap) + 1);
        let mut start = 0;

        loop {
            let end = (start + self.max_tokens).min(total);
            chunks.push(make_chunk(chunks.len(), start, end));

            if end == total {
                break;
            }

            start = end - self.overlap;
        }

        Ok(chunks)
    }
}
