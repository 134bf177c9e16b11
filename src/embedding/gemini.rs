//! Google Gemini embeddings
//!
//! One `embedContent` request per text with `taskType = RETRIEVAL_DOCUMENT`.
//! Batches fan the requests out concurrently, so each item succeeds or
//! fails on its own.

use async_trait::async_trait;
use futures_util::future::join_all;
use serde::Deserialize;

use super::provider::{
    build_http_client, check_dimension, ensure_non_empty, map_http_status, map_transport_error,
    EmbeddingError, EmbeddingProvider, EmbeddingResult, ProviderKind, ProviderSettings,
};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Debug, Deserialize)]
struct EmbedContentResponse {
    embedding: ContentEmbedding,
}

#[derive(Debug, Deserialize)]
struct ContentEmbedding {
    values: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: Option<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: Option<String>,
}

pub struct GeminiProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    /// Always carries the `models/` prefix
    model: String,
    dimension: usize,
    send_dimension: bool,
}

impl GeminiProvider {
    pub fn new(settings: &ProviderSettings) -> EmbeddingResult<Self> {
        let model = if settings.model.starts_with("models/") {
            settings.model.clone()
        } else {
            format!("models/{}", settings.model)
        };

        let base = settings
            .base_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/');

        Ok(Self {
            client: build_http_client(settings.request_timeout)?,
            endpoint: format!("{}/{}:embedContent", base, model),
            api_key: settings.api_key.clone().filter(|k| !k.is_empty()),
            model,
            dimension: settings.dimension,
            send_dimension: settings.dimension_configured,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn request_body(&self, text: &str) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "content": { "parts": [{ "text": text }] },
            "taskType": "RETRIEVAL_DOCUMENT",
        });
        if self.send_dimension {
            body["outputDimensionality"] = serde_json::json!(self.dimension);
        }
        body
    }
}

#[async_trait]
impl EmbeddingProvider for GeminiProvider {
    async fn embed(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
        ensure_non_empty(text)?;

        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| EmbeddingError::AuthenticationFailed {
                message: "Gemini API key is not configured".to_string(),
            })?;

        let response = self
            .client
            .post(&self.endpoint)
            .query(&[("key", api_key)])
            .json(&self.request_body(text))
            .send()
            .await
            .map_err(|e| map_transport_error("Gemini", &self.endpoint, e))?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorResponse>(&body)
                .ok()
                .and_then(|r| r.error)
                .and_then(|d| d.message)
                .unwrap_or(body);
            return Err(map_http_status("Gemini", &self.model, status, &message, None));
        }

        let parsed: EmbedContentResponse =
            response
                .json()
                .await
                .map_err(|e| EmbeddingError::ParseError {
                    message: format!("Failed to parse Gemini embedding response: {}", e),
                })?;

        check_dimension(self.dimension, parsed.embedding.values)
    }

    async fn embed_batch(&self, texts: &[String]) -> Vec<EmbeddingResult<Vec<f32>>> {
        join_all(texts.iter().map(|t| self.embed(t))).await
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    fn is_ready(&self) -> bool {
        self.api_key.is_some()
    }
}
