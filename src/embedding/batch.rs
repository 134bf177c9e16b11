/// Batch embedding with bounded concurrency and retries
use super::{EmbeddingError, EmbeddingProvider, EmbeddingResult};
use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Exponential backoff for transient provider errors
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Delay before retry number `attempt` (0-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(500))
    }
}

/// Aggregate counts for one `embed_all` call
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchStats {
    pub embedded: usize,
    pub failed: usize,
    pub batches: usize,
}

/// Splits inputs into provider batches and runs several at once.
///
/// Output order always matches input order, whatever order the batches
/// finish in. Only transient failures are retried, and only for the items
/// that hit them.
pub struct BatchEmbedder {
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
    max_concurrent: usize,
    retry: RetryPolicy,
}

impl BatchEmbedder {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        batch_size: usize,
        max_concurrent: usize,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            provider,
            batch_size: batch_size.max(1),
            max_concurrent: max_concurrent.max(1),
            retry,
        }
    }

    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    /// Embed every text; returns one result per input in input order.
    pub async fn embed_all(&self, texts: &[String]) -> (Vec<EmbeddingResult<Vec<f32>>>, BatchStats) {
        if texts.is_empty() {
            return (Vec::new(), BatchStats::default());
        }

        let start = std::time::Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let batches: Vec<&[String]> = texts.chunks(self.batch_size).collect();
        let total_batches = batches.len();

        let futures = batches.into_iter().enumerate().map(|(n, batch)| {
            let semaphore = Arc::clone(&semaphore);
            async move {
                // The semaphore is never closed
                let _permit = semaphore.acquire_owned().await.ok();
                let results = self.embed_with_retry(batch).await;
                let failed = results.iter().filter(|r| r.is_err()).count();
                if failed > 0 {
                    warn!(
                        "Batch {}/{}: {} of {} items failed to embed",
                        n + 1,
                        total_batches,
                        failed,
                        batch.len()
                    );
                } else {
                    debug!("Embedded batch {}/{}", n + 1, total_batches);
                }
                results
            }
        });

        let results: Vec<EmbeddingResult<Vec<f32>>> =
            join_all(futures).await.into_iter().flatten().collect();

        let failed = results.iter().filter(|r| r.is_err()).count();
        let stats = BatchStats {
            embedded: results.len() - failed,
            failed,
            batches: total_batches,
        };

        info!(
            "Embedding complete via {}: {} embedded, {} failed, {} batches, {}ms",
            self.provider.kind(),
            stats.embedded,
            stats.failed,
            stats.batches,
            start.elapsed().as_millis()
        );

        (results, stats)
    }

    async fn embed_with_retry(&self, batch: &[String]) -> Vec<EmbeddingResult<Vec<f32>>> {
        let mut results = fit_len(self.provider.embed_batch(batch).await, batch.len());

        for attempt in 0..self.retry.max_retries {
            let pending: Vec<usize> = results
                .iter()
                .enumerate()
                .filter(|(_, r)| matches!(r, Err(e) if e.is_transient()))
                .map(|(i, _)| i)
                .collect();

            if pending.is_empty() {
                break;
            }

            let delay = pending
                .iter()
                .filter_map(|&i| results[i].as_ref().err().and_then(EmbeddingError::retry_after))
                .max()
                .unwrap_or_else(|| self.retry.delay_for(attempt));

            debug!(
                "Retrying {} items after transient error (attempt {}/{}, waiting {:?})",
                pending.len(),
                attempt + 1,
                self.retry.max_retries,
                delay
            );
            tokio::time::sleep(delay).await;

            let retry_texts: Vec<String> = pending.iter().map(|&i| batch[i].clone()).collect();
            let retried = fit_len(self.provider.embed_batch(&retry_texts).await, pending.len());

            for (i, outcome) in pending.into_iter().zip(retried) {
                results[i] = outcome;
            }
        }

        results
    }
}

/// Guard against providers that return the wrong number of results
fn fit_len(
    mut results: Vec<EmbeddingResult<Vec<f32>>>,
    expected: usize,
) -> Vec<EmbeddingResult<Vec<f32>>> {
    if results.len() != expected {
        warn!(
            "Provider returned {} results for {} inputs",
            results.len(),
            expected
        );
        results.truncate(expected);
        results.resize(
            expected,
            Err(EmbeddingError::ParseError {
                message: "Provider returned no result for this input".to_string(),
            }),
        );
    }
    results
}
