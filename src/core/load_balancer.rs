// src/core/load_balancer.rs

use crate::core::key_pool::{KeyPool, PoolStats};
use crate::core::strategy::{
    select_adaptive, select_least_used, Candidates, RoundRobinCursor, StrategyKind,
};
use crate::error::{AppError, Result};
use crate::metrics;
use crate::storage::{KeyId, KeyRecord, KeyStore};
use serde::Serialize;
use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Store setting holding the active strategy name.
pub const STRATEGY_CONFIG_KEY: &str = "load_balance_strategy";

/// Everything one selection decision is based on.
#[derive(Debug, Clone)]
pub struct SelectionContext {
    pub strategy: StrategyKind,
    pub excluded: HashSet<KeyId>,
    /// Enabled keys not in `excluded`, best first.
    pub candidates: Vec<KeyRecord>,
}

/// A value produced by a replacement key during failover.
#[derive(Debug)]
pub struct Recovered<T> {
    pub key_id: KeyId,
    pub value: T,
    /// Failover iterations used, including the successful one.
    pub iterations: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct BalancerStats {
    pub strategy: StrategyKind,
    #[serde(flatten)]
    pub pool: PoolStats,
}

/// Picks keys per the configured strategy and replaces failed ones.
///
/// Holds no per-request state, so one instance serves all requests.
#[derive(Clone)]
pub struct LoadBalancer {
    pool: KeyPool,
    default_strategy: StrategyKind,
    round_robin: RoundRobinCursor,
}

impl LoadBalancer {
    pub fn new(pool: KeyPool, default_strategy: StrategyKind, cursor_ttl: Option<Duration>) -> Self {
        let round_robin = RoundRobinCursor::new(pool.store().clone(), cursor_ttl);
        Self {
            pool,
            default_strategy,
            round_robin,
        }
    }

    pub fn pool(&self) -> &KeyPool {
        &self.pool
    }

    /// Strategy stored at runtime, or the configured default.
    pub async fn current_strategy(&self) -> StrategyKind {
        let name = self
            .pool
            .store()
            .config_value_or(STRATEGY_CONFIG_KEY, self.default_strategy.as_str())
            .await;
        StrategyKind::resolve(&name)
    }

    pub async fn set_strategy(&self, strategy: StrategyKind) -> Result<()> {
        self.pool
            .store()
            .set_config_value(STRATEGY_CONFIG_KEY, strategy.as_str())
            .await?;
        info!(strategy = %strategy, "Load balance strategy updated");
        Ok(())
    }

    pub async fn selection_context(&self, excluded: &HashSet<KeyId>) -> Result<SelectionContext> {
        let candidates: Vec<KeyRecord> = self
            .pool
            .list_candidates()
            .await?
            .into_iter()
            .filter(|key| !excluded.contains(&key.id))
            .collect();

        Ok(SelectionContext {
            strategy: self.current_strategy().await,
            excluded: excluded.clone(),
            candidates,
        })
    }

    /// Choose one enabled key not in `excluded`.
    #[instrument(level = "debug", skip(self), fields(excluded = excluded.len()))]
    pub async fn select_key(&self, excluded: &HashSet<KeyId>) -> Result<KeyRecord> {
        let context = self.selection_context(excluded).await?;
        let strategy = context.strategy;

        let Some(candidates) = Candidates::new(context.candidates) else {
            warn!(excluded = ?context.excluded, "No available API keys");
            metrics::record_selection_failure();
            return Err(AppError::NoAvailableKeys);
        };
        let candidate_count = candidates.len();

        let key = match strategy {
            StrategyKind::RoundRobin => self.round_robin.select(&candidates).await.key,
            StrategyKind::LeastUsed => select_least_used(&candidates).clone(),
            StrategyKind::Adaptive => select_adaptive(&candidates).clone(),
        };

        metrics::record_selection(strategy);
        info!(
            event = "key_selected",
            key.id = key.id,
            key.preview = %key.preview(),
            strategy = %strategy,
            total_candidates = candidate_count,
            "API key selected for request"
        );
        Ok(key)
    }

    /// Find a replacement for `failed_id`.
    pub async fn failover(&self, failed_id: KeyId, max_attempts: u32) -> Result<KeyRecord> {
        let mut excluded = HashSet::from([failed_id]);
        let recovered = self
            .failover_with(&mut excluded, max_attempts, |key| async move { Ok(key) })
            .await?;
        Ok(recovered.value)
    }

    /// Run `attempt` on successive replacement keys until one succeeds.
    ///
    /// Each iteration selects a key outside `excluded` and hands it to
    /// `attempt`. A failure that names a key adds that key to `excluded`
    /// before the next iteration. Failures are logged, not returned, until
    /// `max_attempts` iterations have failed; then the result is
    /// `FailoverExhausted`. Cancellation stops the loop at once.
    pub async fn failover_with<T, F, Fut>(
        &self,
        excluded: &mut HashSet<KeyId>,
        max_attempts: u32,
        mut attempt: F,
    ) -> Result<Recovered<T>>
    where
        F: FnMut(KeyRecord) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        for iteration in 1..=max_attempts {
            let result = match self.select_key(excluded).await {
                Ok(key) => {
                    let key_id = key.id;
                    debug!(key.id = key_id, iteration, "Trying failover key");
                    attempt(key).await.map(|value| (key_id, value))
                }
                Err(e) => Err(e),
            };

            match result {
                Ok((key_id, value)) => {
                    metrics::record_failover(false);
                    info!(key.id = key_id, iteration, "Failover succeeded");
                    return Ok(Recovered {
                        key_id,
                        value,
                        iterations: iteration,
                    });
                }
                Err(AppError::RequestCancelled) => return Err(AppError::RequestCancelled),
                Err(e) => {
                    warn!(
                        iteration,
                        max_attempts,
                        error = %e,
                        key.id = e.key_id(),
                        "Failover attempt failed"
                    );
                    if let Some(id) = e.key_id() {
                        excluded.insert(id);
                    }
                }
            }
        }

        metrics::record_failover(true);
        warn!(max_attempts, excluded = ?excluded, "All failover attempts exhausted");
        Err(AppError::FailoverExhausted {
            attempts: max_attempts,
        })
    }

    pub async fn stats(&self) -> Result<BalancerStats> {
        let pool = self.pool.stats().await?;
        metrics::record_key_health(&pool);
        Ok(BalancerStats {
            strategy: self.current_strategy().await,
            pool,
        })
    }
}
