/// Local embedding through fastembed ONNX models
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::sync::Arc;

use super::provider::{
    check_dimension, ensure_non_empty, EmbeddingError, EmbeddingProvider, EmbeddingResult,
    ProviderKind, ProviderSettings,
};

/// Runs models on a blocking thread; nothing leaves the machine.
///
/// Models are downloaded to the fastembed cache on first use:
/// - all-MiniLM-L6-v2: ~90MB (384 dims)
/// - bge-small-en-v1.5: ~130MB (384 dims)
/// - bge-base-en-v1.5: ~440MB (768 dims)
pub struct LocalProvider {
    model: Arc<TextEmbedding>,
    model_name: String,
    dimension: usize,
}

impl LocalProvider {
    pub fn new(settings: &ProviderSettings) -> EmbeddingResult<Self> {
        let (embedding_model, native_dim) = match settings.model.to_lowercase().as_str() {
            "all-minilm-l6-v2" => (EmbeddingModel::AllMiniLML6V2, 384),
            "bge-small-en-v1.5" => (EmbeddingModel::BGESmallENV15, 384),
            "bge-base-en-v1.5" => (EmbeddingModel::BGEBaseENV15, 768),
            _ => {
                return Err(EmbeddingError::InvalidConfig {
                    message: format!(
                        "Unsupported local model: {}. Supported: all-MiniLM-L6-v2, bge-small-en-v1.5, bge-base-en-v1.5",
                        settings.model
                    ),
                });
            }
        };

        // Local models cannot truncate their output
        if settings.dimension != native_dim {
            return Err(EmbeddingError::DimensionMismatch {
                expected: settings.dimension,
                actual: native_dim,
            });
        }

        tracing::info!(
            "Initializing local embedding model: {} ({}D)",
            settings.model,
            native_dim
        );

        let model = TextEmbedding::try_new(
            InitOptions::new(embedding_model).with_show_download_progress(true),
        )
        .map_err(|e| EmbeddingError::ProviderUnavailable {
            message: format!("Model initialization failed: {}", e),
        })?;

        Ok(Self {
            model: Arc::new(model),
            model_name: settings.model.clone(),
            dimension: native_dim,
        })
    }

    async fn run(&self, texts: Vec<String>) -> EmbeddingResult<Vec<Vec<f32>>> {
        let model = Arc::clone(&self.model);
        tokio::task::spawn_blocking(move || model.embed(texts, None))
            .await
            .map_err(|e| EmbeddingError::ProviderUnavailable {
                message: format!("Embedding task failed: {}", e),
            })?
            .map_err(|e| EmbeddingError::ProviderUnavailable {
                message: format!("Embedding generation failed: {}", e),
            })
    }
}

#[async_trait]
impl EmbeddingProvider for LocalProvider {
    async fn embed(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
        ensure_non_empty(text)?;

        let embedding = self
            .run(vec![text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| EmbeddingError::ParseError {
                message: "No embeddings generated".to_string(),
            })?;

        check_dimension(self.dimension, embedding)
    }

    async fn embed_batch(&self, texts: &[String]) -> Vec<EmbeddingResult<Vec<f32>>> {
        let mut results: Vec<Option<EmbeddingResult<Vec<f32>>>> = texts
            .iter()
            .map(|t| ensure_non_empty(t).err().map(Err))
            .collect();

        let (valid, positions): (Vec<String>, Vec<usize>) = texts
            .iter()
            .enumerate()
            .filter(|(i, _)| results[*i].is_none())
            .map(|(i, t)| (t.clone(), i))
            .unzip();

        if !valid.is_empty() {
            match self.run(valid).await {
                Ok(vectors) if vectors.len() == positions.len() => {
                    for (pos, v) in positions.into_iter().zip(vectors) {
                        results[pos] = Some(check_dimension(self.dimension, v));
                    }
                }
                Ok(vectors) => {
                    let err = EmbeddingError::ParseError {
                        message: format!(
                            "Expected {} embeddings, model produced {}",
                            positions.len(),
                            vectors.len()
                        ),
                    };
                    for pos in positions {
                        results[pos] = Some(Err(err.clone()));
                    }
                }
                Err(e) => {
                    for pos in positions {
                        results[pos] = Some(Err(e.clone()));
                    }
                }
            }
        }

        results
            .into_iter()
            .map(|r| {
                r.unwrap_or_else(|| {
                    Err(EmbeddingError::ParseError {
                        message: "Missing embedding for input".to_string(),
                    })
                })
            })
            .collect()
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Local
    }
}
