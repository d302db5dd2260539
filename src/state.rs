// src/state.rs

use crate::config::AppConfig;
use crate::core::{Dispatcher, KeyPool, LoadBalancer, RetryCoordinator, RetryPolicy};
use crate::error::Result;
use crate::storage::{InMemoryStore, Storage};
use crate::upstream::{GeminiClient, UpstreamClient};
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use std::sync::Arc;
use tracing::{info, warn};

/// Shared application state.
pub struct AppState {
    pub config: AppConfig,
    pub dispatcher: Dispatcher,
    admin_token: Option<SecretString>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Connect the configured store, build the upstream client and seed keys
    /// from configuration into an empty store.
    pub async fn new(config: &AppConfig) -> Result<Self> {
        let store = Self::connect_store(config).await?;
        let upstream: Arc<dyn UpstreamClient> =
            Arc::new(GeminiClient::new(&config.upstream, &config.server)?);
        info!(target_url = %config.upstream.target_url, "Upstream HTTP client created successfully.");

        let state = Self::from_parts(config.clone(), store, upstream);
        state.seed_keys().await?;
        Ok(state)
    }

    /// Wire the core together from already-built parts.
    pub fn from_parts(
        config: AppConfig,
        store: Arc<dyn Storage>,
        upstream: Arc<dyn UpstreamClient>,
    ) -> Self {
        let balancer_config = &config.balancer;
        let pool = KeyPool::new(store, balancer_config.unhealthy_threshold);
        let balancer = LoadBalancer::new(
            pool.clone(),
            balancer_config.strategy,
            balancer_config.cursor_ttl(),
        );
        let coordinator = RetryCoordinator::new(
            pool,
            upstream,
            RetryPolicy {
                max_retries: balancer_config.max_retries,
                backoff_base: balancer_config.backoff_base(),
            },
        );
        let dispatcher = Dispatcher::new(balancer, coordinator, balancer_config.failover_attempts);
        let admin_token = config.server.admin_token();

        Self {
            config,
            dispatcher,
            admin_token,
            started_at: Utc::now(),
        }
    }

    pub fn balancer(&self) -> &LoadBalancer {
        self.dispatcher.balancer()
    }

    pub fn pool(&self) -> &KeyPool {
        self.balancer().pool()
    }

    pub fn admin_token(&self) -> Option<&SecretString> {
        self.admin_token.as_ref()
    }

    async fn connect_store(config: &AppConfig) -> Result<Arc<dyn Storage>> {
        match &config.redis_url {
            #[cfg(feature = "redis")]
            Some(url) => {
                let store =
                    crate::storage::RedisStore::connect(url, config.redis_key_prefix.clone()).await?;
                info!("Redis persistence is enabled.");
                Ok(Arc::new(store))
            }
            #[cfg(not(feature = "redis"))]
            Some(_) => {
                warn!("redis_url is set but Redis support is not compiled in; using in-memory store");
                Ok(Arc::new(InMemoryStore::new()))
            }
            None => {
                info!("Running without Redis persistence.");
                Ok(Arc::new(InMemoryStore::new()))
            }
        }
    }

    async fn seed_keys(&self) -> Result<()> {
        let existing = self.pool().list_all().await?;
        if !existing.is_empty() {
            info!(
                keys = existing.len(),
                "Store already holds keys. Skipping initialization from config."
            );
            return Ok(());
        }
        if self.config.keys.is_empty() {
            warn!("Store is empty and no keys are configured; requests will fail until keys are added");
            return Ok(());
        }
        let added = self.pool().seed(&self.config.keys).await?;
        info!(added, "Initialized key store from config.");
        Ok(())
    }
}
