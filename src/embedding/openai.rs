//! OpenAI embeddings over HTTP
//!
//! `POST {base}/v1/embeddings` with bearer auth. The `dimensions` parameter is
//! only sent to `text-embedding-3-*` models, which support truncated outputs.
//! Works against OpenAI-compatible servers through `base_url`.

use async_trait::async_trait;
use serde::Deserialize;

use super::provider::{
    build_http_client, check_dimension, ensure_non_empty, isolate_items, map_http_status,
    map_transport_error, EmbeddingError, EmbeddingProvider, EmbeddingResult, ProviderKind,
    ProviderSettings,
};

const DEFAULT_BASE_URL: &str = "https://api.openai.com";

/// Upper bound on inputs per request accepted by the API
const MAX_BATCH_SIZE: usize = 2048;

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: Option<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: Option<String>,
}

pub struct OpenAiProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    dimension: usize,
}

impl OpenAiProvider {
    pub fn new(settings: &ProviderSettings) -> EmbeddingResult<Self> {
        let base = settings
            .base_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/');

        Ok(Self {
            client: build_http_client(settings.request_timeout)?,
            endpoint: format!("{}/v1/embeddings", base),
            api_key: settings.api_key.clone().filter(|k| !k.is_empty()),
            model: settings.model.clone(),
            dimension: settings.dimension,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn request_body(&self, texts: &[String]) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        if self.model.starts_with("text-embedding-3") {
            body["dimensions"] = serde_json::json!(self.dimension);
        }
        body
    }

    async fn post(&self, texts: &[String]) -> EmbeddingResult<Vec<Vec<f32>>> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| EmbeddingError::AuthenticationFailed {
                message: "OpenAI API key is not configured".to_string(),
            })?;

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&self.request_body(texts))
            .send()
            .await
            .map_err(|e| map_transport_error("OpenAI", &self.endpoint, e))?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorResponse>(&body)
                .ok()
                .and_then(|r| r.error)
                .and_then(|d| d.message)
                .unwrap_or(body);
            return Err(map_http_status(
                "OpenAI",
                &self.model,
                status,
                &message,
                retry_after,
            ));
        }

        let mut parsed: EmbeddingResponse =
            response
                .json()
                .await
                .map_err(|e| EmbeddingError::ParseError {
                    message: format!("Failed to parse OpenAI embedding response: {}", e),
                })?;

        if parsed.data.len() != texts.len() {
            return Err(EmbeddingError::ParseError {
                message: format!(
                    "Expected {} embeddings but OpenAI returned {}",
                    texts.len(),
                    parsed.data.len()
                ),
            });
        }

        parsed.data.sort_by_key(|d| d.index);
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiProvider {
    async fn embed(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
        ensure_non_empty(text)?;

        let mut vectors = self.post(&[text.to_string()]).await?;
        let embedding = vectors.pop().ok_or_else(|| EmbeddingError::ParseError {
            message: "OpenAI returned no embeddings".to_string(),
        })?;

        check_dimension(self.dimension, embedding)
    }

    async fn embed_batch(&self, texts: &[String]) -> Vec<EmbeddingResult<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());

        for group in texts.chunks(MAX_BATCH_SIZE) {
            // Empty entries are answered locally so they cannot fail the request.
            let mut group_results: Vec<Option<EmbeddingResult<Vec<f32>>>> = group
                .iter()
                .map(|t| ensure_non_empty(t).err().map(Err))
                .collect();

            let (sendable, positions): (Vec<String>, Vec<usize>) = group
                .iter()
                .enumerate()
                .filter(|(i, _)| group_results[*i].is_none())
                .map(|(i, t)| (t.clone(), i))
                .unzip();

            if !sendable.is_empty() {
                let outcomes = match self.post(&sendable).await {
                    Ok(vectors) => vectors
                        .into_iter()
                        .map(|v| check_dimension(self.dimension, v))
                        .collect(),
                    Err(e) => isolate_items(self, &sendable, e).await,
                };
                for (pos, outcome) in positions.into_iter().zip(outcomes) {
                    group_results[pos] = Some(outcome);
                }
            }

            results.extend(group_results.into_iter().map(|r| {
                r.unwrap_or_else(|| {
                    Err(EmbeddingError::ParseError {
                        message: "Missing embedding for input".to_string(),
                    })
                })
            }));
        }

        results
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    fn is_ready(&self) -> bool {
        self.api_key.is_some()
    }
}
