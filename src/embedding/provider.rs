/// Embedding provider trait, error taxonomy and provider identities
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EmbeddingError {
    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Model not found: {model}")]
    ModelNotFound { model: String },

    #[error("Provider unavailable: {message}")]
    ProviderUnavailable { message: String },

    #[error("Input too long: {message}")]
    InputTooLong { message: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Network error: {message}")]
    NetworkError { message: String },

    #[error("Failed to parse provider response: {message}")]
    ParseError { message: String },

    #[error("Server error (HTTP {}): {message}", .status.map(|s| s.to_string()).unwrap_or_else(|| "?".to_string()))]
    ServerError {
        message: String,
        status: Option<u16>,
    },

    #[error("Rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<u64>,
    },

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid embedding configuration: {message}")]
    InvalidConfig { message: String },
}

impl EmbeddingError {
    /// Rate limits, network failures and 5xx responses; the caller may retry these.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EmbeddingError::RateLimited { .. }
                | EmbeddingError::NetworkError { .. }
                | EmbeddingError::ServerError { .. }
        )
    }

    /// Everything else: skip the item and continue without an embedding.
    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }

    /// Server-suggested wait for rate-limited errors
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            EmbeddingError::RateLimited {
                retry_after: Some(secs),
                ..
            } => Some(Duration::from_secs(*secs)),
            _ => None,
        }
    }

    fn is_input_error(&self) -> bool {
        matches!(
            self,
            EmbeddingError::InputTooLong { .. } | EmbeddingError::InvalidInput { .. }
        )
    }
}

/// Per-item outcome of a batch call
pub type EmbeddingResult<T> = Result<T, EmbeddingError>;

/// The closed set of embedding backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[serde(rename = "openai")]
    OpenAi,
    Gemini,
    Local,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Gemini => "gemini",
            ProviderKind::Local => "local",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "text-embedding-3-small",
            ProviderKind::Gemini => "models/embedding-001",
            ProviderKind::Local => "all-MiniLM-L6-v2",
        }
    }

    /// Native output size of `model` for this provider
    pub fn default_dimension(&self, model: &str) -> usize {
        match self {
            ProviderKind::OpenAi => {
                if model.contains("text-embedding-3-large") {
                    3072
                } else {
                    1536
                }
            }
            ProviderKind::Gemini => 768,
            ProviderKind::Local => {
                if model.eq_ignore_ascii_case("bge-base-en-v1.5") {
                    768
                } else {
                    384
                }
            }
        }
    }

    /// Dimensions that are expected for this provider; others get a warning.
    pub fn usual_dimensions(&self, model: &str) -> Vec<usize> {
        match self {
            ProviderKind::OpenAi => vec![1536, 3072],
            ProviderKind::Gemini => vec![768],
            ProviderKind::Local => vec![self.default_dimension(model)],
        }
    }

    /// Environment variable holding the API key, if the provider needs one
    pub fn default_api_key_env(&self) -> Option<&'static str> {
        match self {
            ProviderKind::OpenAi => Some("OPENAI_API_KEY"),
            ProviderKind::Gemini => Some("GEMINI_API_KEY"),
            ProviderKind::Local => None,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = EmbeddingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(ProviderKind::OpenAi),
            "gemini" => Ok(ProviderKind::Gemini),
            "local" => Ok(ProviderKind::Local),
            other => Err(EmbeddingError::InvalidConfig {
                message: format!(
                    "Unsupported embedding provider: {}. Supported: openai, gemini, local",
                    other
                ),
            }),
        }
    }
}

/// Resolved settings handed to a concrete provider at construction
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub model: String,
    pub dimension: usize,
    /// Whether the dimension was set explicitly rather than taken from the model
    pub dimension_configured: bool,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub request_timeout: Duration,
}

/// Trait for embedding providers
///
/// Providers are stateless with respect to retries: a transient failure is
/// reported to the caller, which decides whether to try again.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding for a single non-empty text
    async fn embed(&self, text: &str) -> EmbeddingResult<Vec<f32>>;

    /// Generate embeddings for several texts.
    ///
    /// Returns exactly one result per input, in input order. One failed item
    /// never invalidates the others.
    async fn embed_batch(&self, texts: &[String]) -> Vec<EmbeddingResult<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await);
        }
        results
    }

    /// Configured output dimension
    fn dimension(&self) -> usize;

    fn model_name(&self) -> &str;

    fn kind(&self) -> ProviderKind;

    /// Whether credentials and models are in place to serve requests
    fn is_ready(&self) -> bool {
        true
    }
}

/// Reject empty inputs before they reach the network
pub(crate) fn ensure_non_empty(text: &str) -> EmbeddingResult<()> {
    if text.trim().is_empty() {
        return Err(EmbeddingError::InvalidInput {
            message: "Empty text".to_string(),
        });
    }
    Ok(())
}

/// Verify a vector has exactly the configured length
pub(crate) fn check_dimension(expected: usize, embedding: Vec<f32>) -> EmbeddingResult<Vec<f32>> {
    if embedding.len() != expected {
        return Err(EmbeddingError::DimensionMismatch {
            expected,
            actual: embedding.len(),
        });
    }
    Ok(embedding)
}

pub(crate) fn build_http_client(timeout: Duration) -> EmbeddingResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| EmbeddingError::InvalidConfig {
            message: format!("Failed to build HTTP client: {}", e),
        })
}

/// Map a transport failure to the error taxonomy
pub(crate) fn map_transport_error(provider: &str, endpoint: &str, err: reqwest::Error) -> EmbeddingError {
    if err.is_connect() {
        EmbeddingError::NetworkError {
            message: format!("Cannot connect to {} at {}: {}", provider, endpoint, err),
        }
    } else if err.is_timeout() {
        EmbeddingError::NetworkError {
            message: format!("Request to {} timed out: {}", provider, err),
        }
    } else if err.is_decode() {
        EmbeddingError::ParseError {
            message: err.to_string(),
        }
    } else {
        EmbeddingError::NetworkError {
            message: err.to_string(),
        }
    }
}

/// Map a non-success HTTP status to the error taxonomy
pub(crate) fn map_http_status(
    provider: &str,
    model: &str,
    status: u16,
    message: &str,
    retry_after: Option<u64>,
) -> EmbeddingError {
    let lowered = message.to_lowercase();
    match status {
        401 | 403 => EmbeddingError::AuthenticationFailed {
            message: format!("{}: {}", provider, message),
        },
        404 => EmbeddingError::ModelNotFound {
            model: format!("{} ({}): {}", model, provider, message),
        },
        429 => EmbeddingError::RateLimited {
            message: format!("{}: {}", provider, message),
            retry_after,
        },
        400 if lowered.contains("api key") => EmbeddingError::AuthenticationFailed {
            message: format!("{}: {}", provider, message),
        },
        400 if lowered.contains("token") || lowered.contains("length") => {
            EmbeddingError::InputTooLong {
                message: format!("{}: {}", provider, message),
            }
        }
        400 | 413 | 422 => EmbeddingError::InvalidInput {
            message: format!("{}: {}", provider, message),
        },
        500..=599 => EmbeddingError::ServerError {
            message: format!("{}: {}", provider, message),
            status: Some(status),
        },
        _ => EmbeddingError::ProviderUnavailable {
            message: format!("{} returned HTTP {}: {}", provider, status, message),
        },
    }
}

/// Retry each input on its own after a whole-batch input error.
///
/// A single oversized or malformed text fails the entire request for
/// providers that accept arrays; this keeps the rest of the batch usable.
pub(crate) async fn isolate_items<P>(
    provider: &P,
    texts: &[String],
    batch_error: EmbeddingError,
) -> Vec<EmbeddingResult<Vec<f32>>>
where
    P: EmbeddingProvider + ?Sized,
{
    if texts.len() <= 1 || !batch_error.is_input_error() {
        return vec![Err(batch_error); texts.len()];
    }

    tracing::debug!(
        "Batch of {} rejected ({}), embedding items individually",
        texts.len(),
        batch_error
    );

    let mut results = Vec::with_capacity(texts.len());
    for text in texts {
        results.push(provider.embed(text).await);
    }
    results
}
