// src/storage/key_record.rs

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Stable identifier of an upstream key, assigned by the store.
pub type KeyId = u64;

/// Default number of consecutive failures after which a key is unhealthy.
pub const DEFAULT_UNHEALTHY_THRESHOLD: u32 = 3;

/// Weight of the newest latency sample in the moving average.
const LATENCY_EMA_ALPHA: f64 = 0.1;

/// Declaration order is the candidate ordering.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    #[default]
    Unknown,
    RateLimited,
    Unhealthy,
}

impl HealthStatus {
    /// Sort rank used for candidate ordering. Lower is better.
    pub const fn rank(self) -> u8 {
        match self {
            Self::Healthy => 0,
            Self::Unknown => 1,
            Self::RateLimited => 2,
            Self::Unhealthy => 3,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Unknown => "unknown",
            Self::RateLimited => "rate_limited",
            Self::Unhealthy => "unhealthy",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HealthStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "healthy" => Ok(Self::Healthy),
            "unknown" => Ok(Self::Unknown),
            "rate_limited" => Ok(Self::RateLimited),
            "unhealthy" => Ok(Self::Unhealthy),
            _ => Err(format!("Invalid health status: {s}")),
        }
    }
}

/// The mutable, feedback-driven part of a key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyMetrics {
    pub health_status: HealthStatus,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub success_rate: f64,
    pub avg_response_time_ms: f64,
    pub consecutive_failures: u32,
    pub last_check_time: Option<DateTime<Utc>>,
}

impl Default for KeyMetrics {
    fn default() -> Self {
        Self {
            health_status: HealthStatus::Unknown,
            total_requests: 0,
            successful_requests: 0,
            success_rate: 0.0,
            avg_response_time_ms: 0.0,
            consecutive_failures: 0,
            last_check_time: None,
        }
    }
}

impl KeyMetrics {
    /// Apply one feedback event.
    ///
    /// Counters only grow, `success_rate` is recomputed from them, latency is
    /// an exponential moving average seeded by the first sample, and
    /// `unhealthy_threshold` consecutive failures force `Unhealthy`.
    pub fn apply_outcome(
        &mut self,
        success: bool,
        latency_ms: f64,
        unhealthy_threshold: u32,
        now: DateTime<Utc>,
    ) {
        self.total_requests += 1;
        if success {
            self.successful_requests += 1;
        }
        self.success_rate = self.successful_requests as f64 / self.total_requests as f64;

        let latency_ms = latency_ms.max(0.0);
        self.avg_response_time_ms = if self.avg_response_time_ms == 0.0 {
            latency_ms
        } else {
            self.avg_response_time_ms * (1.0 - LATENCY_EMA_ALPHA) + latency_ms * LATENCY_EMA_ALPHA
        };

        if success {
            self.consecutive_failures = 0;
            self.health_status = HealthStatus::Healthy;
        } else {
            self.consecutive_failures += 1;
            self.health_status = if self.consecutive_failures >= unhealthy_threshold {
                HealthStatus::Unhealthy
            } else {
                HealthStatus::Unknown
            };
        }

        self.last_check_time = Some(now);
    }
}

/// One upstream credential with its rolling performance metrics.
#[derive(Debug, Clone)]
pub struct KeyRecord {
    pub id: KeyId,
    pub secret: SecretString,
    pub enabled: bool,
    pub metrics: KeyMetrics,
    pub created_at: DateTime<Utc>,
}

impl KeyRecord {
    pub fn new(id: KeyId, secret: impl Into<String>) -> Self {
        Self {
            id,
            secret: SecretString::new(secret.into()),
            enabled: true,
            metrics: KeyMetrics::default(),
            created_at: Utc::now(),
        }
    }

    pub fn with_metrics(mut self, metrics: KeyMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn preview(&self) -> String {
        preview_secret(self.secret.expose_secret())
    }

    pub fn fingerprint(&self) -> String {
        secret_fingerprint(self.secret.expose_secret())
    }

    pub fn health_status(&self) -> HealthStatus {
        self.metrics.health_status
    }

    pub fn success_rate(&self) -> f64 {
        self.metrics.success_rate
    }

    pub fn total_requests(&self) -> u64 {
        self.metrics.total_requests
    }

    pub fn avg_response_time_ms(&self) -> f64 {
        self.metrics.avg_response_time_ms
    }

    /// Healthy status with a success rate above 80%.
    pub fn is_healthy(&self) -> bool {
        self.metrics.health_status == HealthStatus::Healthy && self.metrics.success_rate > 0.8
    }
}

/// Ordering of the candidate set: health rank, then success rate
/// descending, then average latency ascending, then id.
pub fn candidate_order(a: &KeyRecord, b: &KeyRecord) -> Ordering {
    a.health_status()
        .rank()
        .cmp(&b.health_status().rank())
        .then_with(|| b.success_rate().total_cmp(&a.success_rate()))
        .then_with(|| a.avg_response_time_ms().total_cmp(&b.avg_response_time_ms()))
        .then_with(|| a.id.cmp(&b.id))
}

/// Ordering used when listing every key: success rate descending, latency
/// ascending, then id.
pub fn listing_order(a: &KeyRecord, b: &KeyRecord) -> Ordering {
    b.success_rate()
        .total_cmp(&a.success_rate())
        .then_with(|| a.avg_response_time_ms().total_cmp(&b.avg_response_time_ms()))
        .then_with(|| a.id.cmp(&b.id))
}

/// Short, loggable form of a secret.
pub fn preview_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() > 8 {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{head}...{tail}")
    } else {
        "****".to_string()
    }
}

/// Hex SHA-256 of a secret, used to detect duplicates without storing an
/// index of plaintext secrets.
pub fn secret_fingerprint(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_with(id: KeyId, status: HealthStatus, rate: f64, latency: f64) -> KeyRecord {
        KeyRecord::new(id, format!("secret-{id}")).with_metrics(KeyMetrics {
            health_status: status,
            success_rate: rate,
            avg_response_time_ms: latency,
            ..KeyMetrics::default()
        })
    }

    #[test]
    fn test_new_key_starts_unknown_and_empty() {
        let key = KeyRecord::new(1, "AIzaSyExampleExample");
        assert!(key.enabled);
        assert_eq!(key.health_status(), HealthStatus::Unknown);
        assert_eq!(key.total_requests(), 0);
        assert_eq!(key.success_rate(), 0.0);
        assert!(key.metrics.last_check_time.is_none());
    }

    #[test]
    fn test_first_latency_seeds_average() {
        let mut metrics = KeyMetrics::default();
        metrics.apply_outcome(true, 1200.0, 3, Utc::now());
        assert_eq!(metrics.avg_response_time_ms, 1200.0);

        metrics.apply_outcome(true, 200.0, 3, Utc::now());
        assert!((metrics.avg_response_time_ms - 1100.0).abs() < 1e-9);
    }

    #[test]
    fn test_success_rate_tracks_counters() {
        let mut metrics = KeyMetrics::default();
        metrics.apply_outcome(true, 10.0, 3, Utc::now());
        metrics.apply_outcome(false, 10.0, 3, Utc::now());
        metrics.apply_outcome(true, 10.0, 3, Utc::now());
        metrics.apply_outcome(true, 10.0, 3, Utc::now());

        assert_eq!(metrics.total_requests, 4);
        assert_eq!(metrics.successful_requests, 3);
        assert!((metrics.success_rate - 0.75).abs() < 1e-9);
        assert!(metrics.successful_requests <= metrics.total_requests);
    }

    #[test]
    fn test_third_consecutive_failure_marks_unhealthy() {
        let mut metrics = KeyMetrics {
            consecutive_failures: 2,
            health_status: HealthStatus::Unknown,
            ..KeyMetrics::default()
        };
        metrics.apply_outcome(false, 0.0, 3, Utc::now());
        assert_eq!(metrics.consecutive_failures, 3);
        assert_eq!(metrics.health_status, HealthStatus::Unhealthy);

        metrics.apply_outcome(true, 0.0, 3, Utc::now());
        assert_eq!(metrics.consecutive_failures, 0);
        assert_eq!(metrics.health_status, HealthStatus::Healthy);
    }

    #[test]
    fn test_single_failure_drops_to_unknown() {
        let mut metrics = KeyMetrics {
            health_status: HealthStatus::Healthy,
            ..KeyMetrics::default()
        };
        metrics.apply_outcome(false, 50.0, 3, Utc::now());
        assert_eq!(metrics.health_status, HealthStatus::Unknown);
        assert_eq!(metrics.consecutive_failures, 1);
    }

    #[test]
    fn test_candidate_order() {
        let mut keys = vec![
            key_with(1, HealthStatus::Unhealthy, 1.0, 10.0),
            key_with(2, HealthStatus::Healthy, 0.5, 10.0),
            key_with(3, HealthStatus::Healthy, 0.9, 500.0),
            key_with(4, HealthStatus::Healthy, 0.9, 100.0),
            key_with(5, HealthStatus::RateLimited, 1.0, 10.0),
            key_with(6, HealthStatus::Unknown, 0.0, 0.0),
        ];
        keys.sort_by(candidate_order);
        let ids: Vec<KeyId> = keys.iter().map(|k| k.id).collect();
        assert_eq!(ids, vec![4, 3, 2, 6, 5, 1]);
    }

    #[test]
    fn test_preview_hides_secret() {
        assert_eq!(preview_secret("AIzaSyA1234567890xyz"), "AIza...0xyz");
        assert_eq!(preview_secret("short"), "****");
    }

    #[test]
    fn test_health_status_round_trips_through_str() {
        for status in [
            HealthStatus::Healthy,
            HealthStatus::Unknown,
            HealthStatus::RateLimited,
            HealthStatus::Unhealthy,
        ] {
            assert_eq!(status.as_str().parse::<HealthStatus>(), Ok(status));
        }
        assert!("broken".parse::<HealthStatus>().is_err());
    }
}
