// src/core/key_pool.rs

use crate::core::scoring::{self, ScoreBreakdown};
use crate::error::{AppError, Result};
use crate::metrics;
use crate::storage::{
    candidate_order, listing_order, AppliedOutcome, HealthStatus, KeyFilter, KeyId, KeyRecord,
    KeyStore, Storage,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Gemini API keys issued by Google AI Studio start with this.
pub const KEY_PREFIX: &str = "AIzaSy";
pub const MIN_KEY_LENGTH: usize = 20;

/// Reject secrets that cannot be Gemini API keys.
pub fn validate_key_format(secret: &str) -> Result<()> {
    if secret.is_empty() {
        return Err(AppError::validation("key", "API key cannot be empty"));
    }
    if !secret.starts_with(KEY_PREFIX) {
        return Err(AppError::validation(
            "key",
            "Invalid Gemini API key format: keys start with \"AIzaSy\"",
        ));
    }
    if secret.len() < MIN_KEY_LENGTH {
        return Err(AppError::validation("key", "Gemini API key is too short"));
    }
    Ok(())
}

/// Read-only view of one key, safe to serialize: the secret appears only as
/// a preview.
#[derive(Debug, Clone, Serialize)]
pub struct KeySnapshot {
    pub id: KeyId,
    pub preview: String,
    pub enabled: bool,
    pub health_status: HealthStatus,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub success_rate: f64,
    pub avg_response_time_ms: f64,
    pub consecutive_failures: u32,
    pub last_check_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub score: f64,
    pub score_breakdown: ScoreBreakdown,
}

impl From<&KeyRecord> for KeySnapshot {
    fn from(key: &KeyRecord) -> Self {
        let breakdown = scoring::breakdown(key);
        Self {
            id: key.id,
            preview: key.preview(),
            enabled: key.enabled,
            health_status: key.health_status(),
            total_requests: key.metrics.total_requests,
            successful_requests: key.metrics.successful_requests,
            success_rate: key.metrics.success_rate,
            avg_response_time_ms: key.metrics.avg_response_time_ms,
            consecutive_failures: key.metrics.consecutive_failures,
            last_check_time: key.metrics.last_check_time,
            created_at: key.created_at,
            score: breakdown.total(),
            score_breakdown: breakdown,
        }
    }
}

/// Aggregate view of the pool for `/status` and the admin API.
///
/// `healthy_keys` and `by_status` describe the enabled keys only; the usage
/// and performance figures cover every key.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub total_keys: usize,
    pub enabled_keys: usize,
    pub healthy_keys: usize,
    pub by_status: BTreeMap<HealthStatus, usize>,
    pub usage: UsageStats,
    pub performance: PerformanceStats,
    pub keys: Vec<KeySnapshot>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UsageStats {
    pub total_requests: u64,
    pub successful_requests: u64,
}

/// Unweighted means over keys; zero for an empty pool.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PerformanceStats {
    pub avg_response_time_ms: f64,
    pub avg_success_rate: f64,
}

/// Key lifecycle plus the feedback contract on top of a [`Storage`] backend.
#[derive(Clone)]
pub struct KeyPool {
    store: Arc<dyn Storage>,
    unhealthy_threshold: u32,
}

impl KeyPool {
    pub fn new(store: Arc<dyn Storage>, unhealthy_threshold: u32) -> Self {
        Self {
            store,
            unhealthy_threshold,
        }
    }

    pub fn store(&self) -> &Arc<dyn Storage> {
        &self.store
    }

    /// Enabled keys, best first.
    #[instrument(level = "debug", skip(self))]
    pub async fn list_candidates(&self) -> Result<Vec<KeyRecord>> {
        let mut keys = self.store.list_keys(KeyFilter::EnabledOnly).await?;
        keys.sort_by(candidate_order);
        debug!(count = keys.len(), "Listed candidate keys");
        Ok(keys)
    }

    /// Every key, best success rate first.
    pub async fn list_all(&self) -> Result<Vec<KeyRecord>> {
        let mut keys = self.store.list_keys(KeyFilter::All).await?;
        keys.sort_by(listing_order);
        Ok(keys)
    }

    /// Report the outcome of one upstream call. Never fails: persistence
    /// problems are logged and counted.
    #[instrument(level = "debug", skip(self), fields(key.id = id))]
    pub async fn record_outcome(&self, id: KeyId, success: bool, latency_ms: f64) {
        if let Err(e) = self.try_record_outcome(id, success, latency_ms).await {
            let err = AppError::FeedbackPersistence {
                key_id: id,
                message: e.to_string(),
            };
            warn!(error = %err, "Dropping key feedback");
            metrics::record_feedback_failure();
        }
    }

    async fn try_record_outcome(&self, id: KeyId, success: bool, latency_ms: f64) -> Result<()> {
        let AppliedOutcome {
            previous,
            record: key,
        } = self
            .store
            .apply_outcome(id, success, latency_ms, self.unhealthy_threshold, Utc::now())
            .await?;

        if previous != key.health_status() {
            info!(
                key.id = id,
                key.preview = %key.preview(),
                from = %previous,
                to = %key.health_status(),
                consecutive_failures = key.metrics.consecutive_failures,
                "Key health changed"
            );
        }
        Ok(())
    }

    #[instrument(skip(self, secret))]
    pub async fn add_key(&self, secret: &str) -> Result<KeyRecord> {
        let secret = secret.trim();
        validate_key_format(secret)?;
        let key = self.store.add_key(secret).await?;
        info!(key.id = key.id, key.preview = %key.preview(), "API key added");
        Ok(key)
    }

    pub async fn delete_key(&self, id: KeyId) -> Result<()> {
        if !self.store.delete_key(id).await? {
            return Err(AppError::KeyNotFound { id });
        }
        info!(key.id = id, "API key deleted");
        Ok(())
    }

    pub async fn set_enabled(&self, id: KeyId, enabled: bool) -> Result<()> {
        if !self.store.set_key_enabled(id, enabled).await? {
            return Err(AppError::KeyNotFound { id });
        }
        info!(key.id = id, enabled, "API key toggled");
        Ok(())
    }

    /// Add every secret not already present. Malformed secrets are skipped.
    /// Returns how many were added.
    pub async fn seed(&self, secrets: &[String]) -> Result<usize> {
        let mut added = 0;
        for secret in secrets {
            match self.add_key(secret).await {
                Ok(_) => added += 1,
                Err(AppError::DuplicateKey) => {}
                Err(e @ AppError::Validation { .. }) => {
                    warn!(error = %e, "Skipping configured key");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(added)
    }

    pub async fn stats(&self) -> Result<PoolStats> {
        let keys = self.list_all().await?;
        let mut by_status = BTreeMap::new();
        let mut enabled_keys = 0;
        let mut healthy_keys = 0;
        let mut usage = UsageStats::default();
        let mut latency_sum = 0.0;
        let mut success_rate_sum = 0.0;
        for key in &keys {
            usage.total_requests += key.metrics.total_requests;
            usage.successful_requests += key.metrics.successful_requests;
            latency_sum += key.metrics.avg_response_time_ms;
            success_rate_sum += key.metrics.success_rate;

            if !key.enabled {
                continue;
            }
            enabled_keys += 1;
            *by_status.entry(key.health_status()).or_insert(0) += 1;
            if key.is_healthy() {
                healthy_keys += 1;
            }
        }

        let performance = if keys.is_empty() {
            PerformanceStats::default()
        } else {
            let count = keys.len() as f64;
            PerformanceStats {
                avg_response_time_ms: latency_sum / count,
                avg_success_rate: success_rate_sum / count,
            }
        };

        Ok(PoolStats {
            total_keys: keys.len(),
            enabled_keys,
            healthy_keys,
            by_status,
            usage,
            performance,
            keys: keys.iter().map(KeySnapshot::from).collect(),
        })
    }
}
