use crate::config::{Config, TokenizerKind, SCHEMA_VERSION};
use crate::error::{EvidxError, Result, ValidationError};
use tracing::warn;

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration, collecting every problem
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_storage(config, &mut errors);
        Self::validate_chunking(config, &mut errors);
        Self::validate_embedding(config, &mut errors);
        Self::validate_search(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(EvidxError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != SCHEMA_VERSION {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_storage(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.storage.pool_size == 0 {
            errors.push(ValidationError::new(
                "storage.pool_size",
                "Pool size must be greater than 0",
            ));
        }

        if config.storage.database_path.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.database_path",
                "Database path cannot be empty",
            ));
        }
    }

    fn validate_chunking(config: &Config, errors: &mut Vec<ValidationError>) {
        let chunking = &config.chunking;

        if chunking.max_chunk_tokens == 0 {
            errors.push(ValidationError::new(
                "chunking.max_chunk_tokens",
                "Max chunk tokens must be greater than 0",
            ));
        } else if chunking.chunk_overlap >= chunking.max_chunk_tokens {
            errors.push(ValidationError::new(
                "chunking.chunk_overlap",
                format!(
                    "Overlap ({}) must be smaller than max chunk tokens ({})",
                    chunking.chunk_overlap, chunking.max_chunk_tokens
                ),
            ));
        }

        if chunking.tokenizer == TokenizerKind::Huggingface
            && chunking.tokenizer_path.as_os_str().is_empty()
        {
            errors.push(ValidationError::new(
                "chunking.tokenizer_path",
                "A tokenizer.json path is required for the huggingface tokenizer",
            ));
        }
    }

    fn validate_embedding(config: &Config, errors: &mut Vec<ValidationError>) {
        let embedding = &config.embedding;

        if embedding.dimension == Some(0) {
            errors.push(ValidationError::new(
                "embedding.dimension",
                "Dimension must be greater than 0",
            ));
        }

        if embedding.batch_size == 0 {
            errors.push(ValidationError::new(
                "embedding.batch_size",
                "Batch size must be greater than 0",
            ));
        }

        if embedding.max_concurrent_batches == 0 {
            errors.push(ValidationError::new(
                "embedding.max_concurrent_batches",
                "Max concurrent batches must be greater than 0",
            ));
        }

        if embedding.request_timeout_secs == 0 {
            errors.push(ValidationError::new(
                "embedding.request_timeout_secs",
                "Request timeout must be greater than 0",
            ));
        }

        // unusual sizes are allowed, providers may truncate
        let model = embedding.effective_model();
        let dimension = embedding.effective_dimension();
        if dimension > 0 && !embedding.provider.usual_dimensions(&model).contains(&dimension) {
            warn!(
                "Dimension {} is unusual for {} model {}",
                dimension, embedding.provider, model
            );
        }
    }

    fn validate_search(config: &Config, errors: &mut Vec<ValidationError>) {
        let search = &config.search;

        if !(search.rrf_k > 0.0 && search.rrf_k.is_finite()) {
            errors.push(ValidationError::new(
                "search.rrf_k",
                format!("RRF k must be a positive number, got {}", search.rrf_k),
            ));
        }

        if search.overfetch_factor == 0 {
            errors.push(ValidationError::new(
                "search.overfetch_factor",
                "Overfetch factor must be at least 1",
            ));
        }

        if search.sub_search_timeout_ms == 0 {
            errors.push(ValidationError::new(
                "search.sub_search_timeout_ms",
                "Sub-search timeout must be greater than 0",
            ));
        }

        if search.default_limit == 0 {
            errors.push(ValidationError::new(
                "search.default_limit",
                "Default limit must be greater than 0",
            ));
        }
    }
}
