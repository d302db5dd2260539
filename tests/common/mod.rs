//! Shared fixtures for integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use chrono::{DateTime, Utc};
use gemini_balance::config::AppConfig;
use gemini_balance::core::{KeyPool, LoadBalancer, RetryCoordinator, RetryPolicy, StrategyKind};
use gemini_balance::error::{AppError, Result};
use gemini_balance::storage::{
    AppliedOutcome, CursorStore, InMemoryStore, KeyFilter, KeyId, KeyMetrics, KeyRecord, KeyStore,
    Storage,
};
use gemini_balance::upstream::{ChatPayload, UpstreamClient, UpstreamError, UpstreamResponse};
use gemini_balance::AppState;
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const ADMIN_TOKEN: &str = "test-admin-token";

/// Deterministic, Gemini-looking test secret.
pub fn secret(n: u64) -> String {
    format!("AIzaSyTestKey{n:06}")
}

pub fn chat_body() -> String {
    json!({
        "model": "gemini-2.5-flash",
        "messages": [{"role": "user", "content": "Hello"}]
    })
    .to_string()
}

pub fn chat_payload() -> ChatPayload {
    ChatPayload::new(chat_body(), "gemini-2.5-flash", false)
}

/// One scripted upstream reply.
#[derive(Debug, Clone, Copy)]
pub enum Reply {
    Ok,
    Status(u16),
    Transport,
}

/// Upstream client that answers from a per-key script. Once a key's script
/// is used up it answers with the fallback reply.
pub struct ScriptedUpstream {
    scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
    fallback: Reply,
    calls: Mutex<Vec<String>>,
}

impl ScriptedUpstream {
    pub fn new(fallback: Reply) -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            fallback,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn always_ok() -> Self {
        Self::new(Reply::Ok)
    }

    pub fn script(self, secret: impl Into<String>, replies: impl IntoIterator<Item = Reply>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(secret.into(), replies.into_iter().collect());
        self
    }

    /// Secrets used, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl UpstreamClient for ScriptedUpstream {
    async fn send(
        &self,
        secret: &SecretString,
        _payload: &ChatPayload,
    ) -> std::result::Result<UpstreamResponse, UpstreamError> {
        let secret = secret.expose_secret().to_string();
        self.calls.lock().unwrap().push(secret.clone());
        let reply = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&secret)
            .and_then(VecDeque::pop_front)
            .unwrap_or(self.fallback);

        match reply {
            Reply::Ok => {
                let mut headers = HeaderMap::new();
                headers.insert("content-type", HeaderValue::from_static("application/json"));
                Ok(UpstreamResponse {
                    status: StatusCode::OK,
                    headers,
                    body: Body::from(format!(r#"{{"served_by":"{secret}"}}"#)),
                })
            }
            Reply::Status(code) => Err(UpstreamError::status(code, "scripted failure")),
            Reply::Transport => Err(UpstreamError::transport("connection reset")),
        }
    }
}

/// Store whose metric writes always fail; everything else is delegated.
pub struct MetricsWriteFailingStore {
    inner: InMemoryStore,
}

impl MetricsWriteFailingStore {
    pub fn new(inner: InMemoryStore) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl KeyStore for MetricsWriteFailingStore {
    async fn add_key(&self, secret: &str) -> Result<KeyRecord> {
        self.inner.add_key(secret).await
    }

    async fn delete_key(&self, id: KeyId) -> Result<bool> {
        self.inner.delete_key(id).await
    }

    async fn set_key_enabled(&self, id: KeyId, enabled: bool) -> Result<bool> {
        self.inner.set_key_enabled(id, enabled).await
    }

    async fn get_key(&self, id: KeyId) -> Result<Option<KeyRecord>> {
        self.inner.get_key(id).await
    }

    async fn list_keys(&self, filter: KeyFilter) -> Result<Vec<KeyRecord>> {
        self.inner.list_keys(filter).await
    }

    async fn update_key_metrics(&self, _id: KeyId, _metrics: &KeyMetrics) -> Result<()> {
        Err(AppError::StorageUnavailable {
            message: "write refused".to_string(),
        })
    }

    async fn apply_outcome(
        &self,
        _id: KeyId,
        _success: bool,
        _latency_ms: f64,
        _unhealthy_threshold: u32,
        _now: DateTime<Utc>,
    ) -> Result<AppliedOutcome> {
        Err(AppError::StorageUnavailable {
            message: "write refused".to_string(),
        })
    }

    async fn get_config_value(&self, name: &str) -> Result<Option<String>> {
        self.inner.get_config_value(name).await
    }

    async fn set_config_value(&self, name: &str, value: &str) -> Result<()> {
        self.inner.set_config_value(name, value).await
    }

    async fn ping(&self) -> Result<()> {
        self.inner.ping().await
    }
}

#[async_trait]
impl CursorStore for MetricsWriteFailingStore {
    async fn get_cursor(&self, name: &str) -> Result<Option<String>> {
        self.inner.get_cursor(name).await
    }

    async fn set_cursor(&self, name: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        self.inner.set_cursor(name, value, ttl).await
    }
}

/// In-memory store holding keys `1..=n` with fresh metrics.
pub fn store_with_keys(n: u64) -> Arc<InMemoryStore> {
    Arc::new(InMemoryStore::with_keys(
        (1..=n).map(|id| KeyRecord::new(id, secret(id))),
    ))
}

pub fn pool(store: Arc<dyn Storage>) -> KeyPool {
    KeyPool::new(store, 3)
}

pub fn balancer(store: Arc<dyn Storage>, strategy: StrategyKind) -> LoadBalancer {
    LoadBalancer::new(pool(store), strategy, None)
}

pub fn coordinator(
    store: Arc<dyn Storage>,
    upstream: Arc<dyn UpstreamClient>,
    max_retries: u32,
) -> RetryCoordinator {
    RetryCoordinator::new(
        pool(store),
        upstream,
        RetryPolicy {
            max_retries,
            backoff_base: Duration::from_millis(1000),
        },
    )
}

/// Test configuration builder
pub struct TestConfigBuilder {
    config: AppConfig,
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        let mut config = AppConfig::default();
        config.server.test_mode = true;
        config.server.admin_token = Some(ADMIN_TOKEN.to_string());
        config.balancer.backoff_base_ms = 0;
        Self { config }
    }

    pub fn without_admin_token(mut self) -> Self {
        self.config.server.admin_token = None;
        self
    }

    pub fn with_strategy(mut self, strategy: StrategyKind) -> Self {
        self.config.balancer.strategy = strategy;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.config.balancer.max_retries = max_retries;
        self
    }

    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.config.server.max_body_bytes = max_body_bytes;
        self
    }

    pub fn build(self) -> AppConfig {
        self.config
    }
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub fn app_state(
    config: AppConfig,
    store: Arc<dyn Storage>,
    upstream: Arc<dyn UpstreamClient>,
) -> Arc<AppState> {
    Arc::new(AppState::from_parts(config, store, upstream))
}
