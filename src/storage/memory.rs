// src/storage/memory.rs

use crate::error::{AppError, Result};
use crate::storage::{
    secret_fingerprint, AppliedOutcome, CursorStore, KeyFilter, KeyId, KeyMetrics, KeyRecord,
    KeyStore,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::trace;

struct CursorEntry {
    value: String,
    expires_at: Option<Instant>,
}

/// In-memory implementation of key storage
#[derive(Clone)]
pub struct InMemoryStore {
    keys: Arc<RwLock<BTreeMap<KeyId, KeyRecord>>>,
    config: Arc<RwLock<HashMap<String, String>>>,
    cursors: Arc<DashMap<String, CursorEntry>>,
    next_id: Arc<AtomicU64>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            keys: Arc::new(RwLock::new(BTreeMap::new())),
            config: Arc::new(RwLock::new(HashMap::new())),
            cursors: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Build a store pre-populated with the given records, keeping their ids.
    pub fn with_keys(records: impl IntoIterator<Item = KeyRecord>) -> Self {
        let keys: BTreeMap<KeyId, KeyRecord> =
            records.into_iter().map(|record| (record.id, record)).collect();
        let next_id = keys.keys().next_back().map_or(1, |id| id + 1);
        Self {
            keys: Arc::new(RwLock::new(keys)),
            config: Arc::new(RwLock::new(HashMap::new())),
            cursors: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(next_id)),
        }
    }
}

#[async_trait]
impl KeyStore for InMemoryStore {
    async fn add_key(&self, secret: &str) -> Result<KeyRecord> {
        trace!("InMemoryStore::add_key: waiting for write lock");
        let mut keys = self.keys.write().await;
        let fingerprint = secret_fingerprint(secret);
        if keys.values().any(|k| k.fingerprint() == fingerprint) {
            return Err(AppError::DuplicateKey);
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let record = KeyRecord::new(id, secret);
        keys.insert(id, record.clone());
        Ok(record)
    }

    async fn delete_key(&self, id: KeyId) -> Result<bool> {
        let mut keys = self.keys.write().await;
        Ok(keys.remove(&id).is_some())
    }

    async fn set_key_enabled(&self, id: KeyId, enabled: bool) -> Result<bool> {
        let mut keys = self.keys.write().await;
        match keys.get_mut(&id) {
            Some(record) => {
                record.enabled = enabled;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get_key(&self, id: KeyId) -> Result<Option<KeyRecord>> {
        trace!(key.id = id, "InMemoryStore::get_key: waiting for read lock");
        let keys = self.keys.read().await;
        Ok(keys.get(&id).cloned())
    }

    async fn list_keys(&self, filter: KeyFilter) -> Result<Vec<KeyRecord>> {
        trace!("InMemoryStore::list_keys: waiting for read lock");
        let keys = self.keys.read().await;
        trace!("InMemoryStore::list_keys: got read lock");
        Ok(keys
            .values()
            .filter(|record| filter.matches(record))
            .cloned()
            .collect())
    }

    async fn update_key_metrics(&self, id: KeyId, metrics: &KeyMetrics) -> Result<()> {
        trace!(key.id = id, "InMemoryStore::update_key_metrics: waiting for write lock");
        let mut keys = self.keys.write().await;
        match keys.get_mut(&id) {
            Some(record) => {
                record.metrics = metrics.clone();
                Ok(())
            }
            None => Err(AppError::KeyNotFound { id }),
        }
    }

    async fn apply_outcome(
        &self,
        id: KeyId,
        success: bool,
        latency_ms: f64,
        unhealthy_threshold: u32,
        now: DateTime<Utc>,
    ) -> Result<AppliedOutcome> {
        trace!(key.id = id, "InMemoryStore::apply_outcome: waiting for write lock");
        let mut keys = self.keys.write().await;
        let record = keys.get_mut(&id).ok_or(AppError::KeyNotFound { id })?;
        let previous = record.health_status();
        record
            .metrics
            .apply_outcome(success, latency_ms, unhealthy_threshold, now);
        Ok(AppliedOutcome {
            previous,
            record: record.clone(),
        })
    }

    async fn get_config_value(&self, name: &str) -> Result<Option<String>> {
        Ok(self.config.read().await.get(name).cloned())
    }

    async fn set_config_value(&self, name: &str, value: &str) -> Result<()> {
        self.config
            .write()
            .await
            .insert(name.to_string(), value.to_string());
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl CursorStore for InMemoryStore {
    async fn get_cursor(&self, name: &str) -> Result<Option<String>> {
        let expired = match self.cursors.get(name) {
            None => return Ok(None),
            Some(entry) => match entry.expires_at {
                Some(at) if at <= Instant::now() => true,
                _ => return Ok(Some(entry.value.clone())),
            },
        };
        if expired {
            self.cursors.remove(name);
        }
        Ok(None)
    }

    async fn set_cursor(&self, name: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        self.cursors.insert(
            name.to_string(),
            CursorEntry {
                value: value.to_string(),
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
        Ok(())
    }
}
