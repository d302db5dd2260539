// src/storage/traits.rs

use crate::error::Result;
use crate::storage::{HealthStatus, KeyId, KeyMetrics, KeyRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::warn;

/// Which keys `list_keys` should return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFilter {
    All,
    EnabledOnly,
}

impl KeyFilter {
    pub fn matches(self, key: &KeyRecord) -> bool {
        match self {
            Self::All => true,
            Self::EnabledOnly => key.enabled,
        }
    }
}

/// Result of [`KeyStore::apply_outcome`]: the health a key had before the
/// update and the record as stored afterwards.
#[derive(Debug, Clone)]
pub struct AppliedOutcome {
    pub previous: HealthStatus,
    pub record: KeyRecord,
}

/// Durable record of upstream keys, their metrics and runtime settings.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Add a new key. Fails with `DuplicateKey` if the secret is already stored.
    async fn add_key(&self, secret: &str) -> Result<KeyRecord>;

    /// Remove a key. Returns `false` if it did not exist.
    async fn delete_key(&self, id: KeyId) -> Result<bool>;

    /// Enable or disable a key. Returns `false` if it did not exist.
    async fn set_key_enabled(&self, id: KeyId, enabled: bool) -> Result<bool>;

    async fn get_key(&self, id: KeyId) -> Result<Option<KeyRecord>>;

    /// Keys matching `filter`, in no particular order.
    async fn list_keys(&self, filter: KeyFilter) -> Result<Vec<KeyRecord>>;

    /// Overwrite the metric fields of a key. Last write wins.
    async fn update_key_metrics(&self, id: KeyId, metrics: &KeyMetrics) -> Result<()>;

    /// Fold one call outcome into a key's metrics as a single
    /// read-modify-write. Fails with `KeyNotFound` if the key is gone.
    async fn apply_outcome(
        &self,
        id: KeyId,
        success: bool,
        latency_ms: f64,
        unhealthy_threshold: u32,
        now: DateTime<Utc>,
    ) -> Result<AppliedOutcome>;

    async fn get_config_value(&self, name: &str) -> Result<Option<String>>;

    async fn set_config_value(&self, name: &str, value: &str) -> Result<()>;

    /// Cheap reachability check for health reporting.
    async fn ping(&self) -> Result<()>;

    /// Read a setting, falling back to `default` when it is unset or the
    /// store cannot be read.
    async fn config_value_or(&self, name: &str, default: &str) -> String {
        match self.get_config_value(name).await {
            Ok(Some(value)) => value,
            Ok(None) => default.to_string(),
            Err(e) => {
                warn!(config.name = name, error = %e, "Failed to read config value, using default");
                default.to_string()
            }
        }
    }
}

/// Ephemeral shared counters, used by round-robin selection.
///
/// There is no compare-and-set: concurrent writers may overwrite each other.
#[async_trait]
pub trait CursorStore: Send + Sync {
    async fn get_cursor(&self, name: &str) -> Result<Option<String>>;

    async fn set_cursor(&self, name: &str, value: &str, ttl: Option<Duration>) -> Result<()>;
}
