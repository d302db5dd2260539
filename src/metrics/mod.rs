//! Metrics collection and export module
//!
//! Uses the `metrics` facade; nothing is recorded until a recorder is
//! installed (see [`exporters::install_prometheus`]).

pub mod exporters;
pub mod middleware;

pub use exporters::{install_prometheus, metrics_handler};

use crate::core::{PoolStats, StrategyKind};
use crate::error::ErrorClass;
use crate::storage::HealthStatus;
use metrics::{counter, gauge, histogram};
use std::time::Duration;

pub fn record_request(method: &str, path: String, status: u16, duration: Duration) {
    counter!(
        "gemini_balance_requests_total",
        "method" => method.to_string(),
        "path" => path.clone(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("gemini_balance_request_duration_seconds", "method" => method.to_string(), "path" => path)
        .record(duration.as_secs_f64());
}

pub fn record_selection(strategy: StrategyKind) {
    counter!("gemini_balance_key_selections_total", "strategy" => strategy.as_str()).increment(1);
}

pub fn record_selection_failure() {
    counter!("gemini_balance_key_selection_failures_total").increment(1);
}

pub fn record_failover(exhausted: bool) {
    let result = if exhausted { "exhausted" } else { "replaced" };
    counter!("gemini_balance_failovers_total", "result" => result).increment(1);
}

/// One upstream attempt. `class` is `None` on success.
pub fn record_upstream_attempt(class: Option<ErrorClass>, latency: Duration) {
    let outcome = match class {
        None => "success",
        Some(ErrorClass::Terminal) => "terminal",
        Some(ErrorClass::Retryable) => "retryable",
    };
    counter!("gemini_balance_upstream_attempts_total", "outcome" => outcome).increment(1);
    histogram!("gemini_balance_upstream_latency_seconds").record(latency.as_secs_f64());
}

pub fn record_retry() {
    counter!("gemini_balance_retries_total").increment(1);
}

pub fn record_feedback_failure() {
    counter!("gemini_balance_feedback_failures_total").increment(1);
}

pub fn record_key_health(stats: &PoolStats) {
    gauge!("gemini_balance_keys_total").set(stats.total_keys as f64);
    gauge!("gemini_balance_keys_enabled").set(stats.enabled_keys as f64);
    gauge!("gemini_balance_keys_healthy").set(stats.healthy_keys as f64);
    for status in [
        HealthStatus::Healthy,
        HealthStatus::Unknown,
        HealthStatus::RateLimited,
        HealthStatus::Unhealthy,
    ] {
        let count = stats.by_status.get(&status).copied().unwrap_or(0);
        gauge!("gemini_balance_keys_by_status", "status" => status.as_str()).set(count as f64);
    }
}
