// src/core/dispatch.rs

use crate::core::load_balancer::LoadBalancer;
use crate::core::retry::RetryCoordinator;
use crate::error::{AppError, Result};
use crate::storage::KeyId;
use crate::upstream::{ChatPayload, UpstreamResponse};
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

/// A successful call and which key served it.
#[derive(Debug)]
pub struct Dispatched {
    pub key_id: KeyId,
    pub response: UpstreamResponse,
    /// Replacement keys tried after the first one failed.
    pub failovers: u32,
}

/// One logical chat request: select, call with retries, fail over.
#[derive(Clone)]
pub struct Dispatcher {
    balancer: LoadBalancer,
    coordinator: RetryCoordinator,
    failover_attempts: u32,
}

impl Dispatcher {
    pub fn new(balancer: LoadBalancer, coordinator: RetryCoordinator, failover_attempts: u32) -> Self {
        Self {
            balancer,
            coordinator,
            failover_attempts,
        }
    }

    pub fn balancer(&self) -> &LoadBalancer {
        &self.balancer
    }

    #[instrument(skip_all, fields(model = %payload.model, stream = payload.stream))]
    pub async fn execute(
        &self,
        payload: &ChatPayload,
        cancel: &CancellationToken,
    ) -> Result<Dispatched> {
        let key = self.balancer.select_key(&HashSet::new()).await?;

        let failed = match self.coordinator.call_with_retry(&key, payload, cancel).await {
            Ok(response) => {
                return Ok(Dispatched {
                    key_id: key.id,
                    response,
                    failovers: 0,
                })
            }
            Err(AppError::Upstream(tagged)) => tagged,
            Err(other) => return Err(other),
        };

        info!(
            key.id = failed.key_id,
            class = %failed.class,
            "Primary key failed, starting failover"
        );

        let mut excluded = HashSet::from([failed.key_id]);
        let coordinator = &self.coordinator;
        let recovered = self
            .balancer
            .failover_with(&mut excluded, self.failover_attempts, |key| async move {
                coordinator.call_with_retry(&key, payload, cancel).await
            })
            .await?;

        Ok(Dispatched {
            key_id: recovered.key_id,
            response: recovered.value,
            failovers: recovered.iterations,
        })
    }
}
