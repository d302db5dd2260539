// src/core/retry.rs

use crate::core::key_pool::KeyPool;
use crate::error::{AppError, Result, TaggedUpstreamError};
use crate::metrics;
use crate::storage::KeyRecord;
use crate::upstream::{ChatPayload, UpstreamClient, UpstreamResponse};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first one.
    pub max_retries: u32,
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff_base: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// Linear backoff after the failed attempt `attempt` (0-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.backoff_base.saturating_mul(attempt + 1)
    }
}

/// Calls upstream with one key, retrying retryable failures on that same key
/// and reporting every outcome to the key pool.
#[derive(Clone)]
pub struct RetryCoordinator {
    pool: KeyPool,
    upstream: Arc<dyn UpstreamClient>,
    policy: RetryPolicy,
}

impl RetryCoordinator {
    pub fn new(pool: KeyPool, upstream: Arc<dyn UpstreamClient>, policy: RetryPolicy) -> Self {
        Self {
            pool,
            upstream,
            policy,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    #[instrument(skip_all, fields(key.id = key.id, model = %payload.model))]
    pub async fn call_with_retry(
        &self,
        key: &KeyRecord,
        payload: &ChatPayload,
        cancel: &CancellationToken,
    ) -> Result<UpstreamResponse> {
        let mut attempt: u32 = 0;
        loop {
            let started = Instant::now();
            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    info!(attempt, "Request cancelled during upstream call");
                    return Err(AppError::RequestCancelled);
                }
                outcome = self.upstream.send(&key.secret, payload) => outcome,
            };
            let elapsed = started.elapsed();
            let latency_ms = elapsed.as_secs_f64() * 1000.0;

            self.pool
                .record_outcome(key.id, outcome.is_ok(), latency_ms)
                .await;

            let cause = match outcome {
                Ok(response) => {
                    metrics::record_upstream_attempt(None, elapsed);
                    debug!(attempt, latency_ms, status = %response.status, "Upstream call succeeded");
                    return Ok(response);
                }
                Err(cause) => cause,
            };

            let tagged = TaggedUpstreamError::new(key.id, cause);
            metrics::record_upstream_attempt(Some(tagged.class), elapsed);

            if tagged.is_terminal() {
                warn!(
                    attempt,
                    status = tagged.status(),
                    key.preview = %key.preview(),
                    error = %tagged.cause,
                    "Terminal upstream error, not retrying"
                );
                return Err(tagged.into());
            }

            if attempt >= self.policy.max_retries {
                warn!(
                    attempts = attempt + 1,
                    status = tagged.status(),
                    error = %tagged.cause,
                    "Upstream retries exhausted"
                );
                return Err(tagged.into());
            }

            let delay = self.policy.backoff_for(attempt);
            warn!(
                attempt,
                status = tagged.status(),
                delay_ms = delay.as_millis() as u64,
                error = %tagged.cause,
                "Retryable upstream error, backing off"
            );
            metrics::record_retry();

            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    info!(attempt, "Request cancelled during backoff");
                    return Err(AppError::RequestCancelled);
                }
                () = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}
