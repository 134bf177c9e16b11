//! Embedding providers
//!
//! - `EmbeddingProvider` trait with per-item batch results
//! - `EmbeddingBackend`, the closed set of backends chosen once from config
//! - `OpenAiProvider` and `GeminiProvider` over HTTP
//! - `LocalProvider` through fastembed (feature `local-embeddings`)
//! - `BatchEmbedder` for concurrent batches with retry on transient errors

mod batch;
mod gemini;
#[cfg(feature = "local-embeddings")]
mod local;
mod openai;
mod provider;

pub use batch::{BatchEmbedder, BatchStats, RetryPolicy};
pub use gemini::GeminiProvider;
#[cfg(feature = "local-embeddings")]
pub use local::LocalProvider;
pub use openai::OpenAiProvider;
pub use provider::{
    EmbeddingError, EmbeddingProvider, EmbeddingResult, ProviderKind, ProviderSettings,
};

use crate::config::EmbeddingConfig;
use async_trait::async_trait;
use std::time::Duration;

/// One of the supported backends, selected at startup
pub enum EmbeddingBackend {
    OpenAi(OpenAiProvider),
    Gemini(GeminiProvider),
    #[cfg(feature = "local-embeddings")]
    Local(LocalProvider),
}

impl EmbeddingBackend {
    /// Build the configured backend, reading the API key from the environment.
    pub fn from_config(config: &EmbeddingConfig) -> EmbeddingResult<Self> {
        let api_key = config
            .api_key_env_name()
            .and_then(|name| std::env::var(name).ok())
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty());

        let settings = ProviderSettings {
            model: config.effective_model(),
            dimension: config.effective_dimension(),
            dimension_configured: config.dimension.is_some(),
            api_key,
            base_url: config
                .base_url
                .clone()
                .filter(|url| !url.trim().is_empty()),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
        };

        Self::new(config.provider, &settings)
    }

    pub fn new(kind: ProviderKind, settings: &ProviderSettings) -> EmbeddingResult<Self> {
        if settings.dimension == 0 {
            return Err(EmbeddingError::InvalidConfig {
                message: "embedding dimension must be greater than 0".to_string(),
            });
        }

        let backend = match kind {
            ProviderKind::OpenAi => EmbeddingBackend::OpenAi(OpenAiProvider::new(settings)?),
            ProviderKind::Gemini => EmbeddingBackend::Gemini(GeminiProvider::new(settings)?),
            #[cfg(feature = "local-embeddings")]
            ProviderKind::Local => EmbeddingBackend::Local(LocalProvider::new(settings)?),
            #[cfg(not(feature = "local-embeddings"))]
            ProviderKind::Local => {
                return Err(EmbeddingError::InvalidConfig {
                    message: "local provider requires the `local-embeddings` feature".to_string(),
                });
            }
        };

        tracing::info!(
            "Embedding provider: {} model={} dimension={} ready={}",
            kind,
            settings.model,
            settings.dimension,
            backend.is_ready()
        );

        Ok(backend)
    }

    fn inner(&self) -> &dyn EmbeddingProvider {
        match self {
            EmbeddingBackend::OpenAi(p) => p,
            EmbeddingBackend::Gemini(p) => p,
            #[cfg(feature = "local-embeddings")]
            EmbeddingBackend::Local(p) => p,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for EmbeddingBackend {
    async fn embed(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
        self.inner().embed(text).await
    }

    async fn embed_batch(&self, texts: &[String]) -> Vec<EmbeddingResult<Vec<f32>>> {
        self.inner().embed_batch(texts).await
    }

    fn dimension(&self) -> usize {
        self.inner().dimension()
    }

    fn model_name(&self) -> &str {
        self.inner().model_name()
    }

    fn kind(&self) -> ProviderKind {
        self.inner().kind()
    }

    fn is_ready(&self) -> bool {
        self.inner().is_ready()
    }
}
