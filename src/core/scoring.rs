// src/core/scoring.rs

use crate::storage::{HealthStatus, KeyRecord};
use serde::Serialize;

pub const HEALTH_WEIGHT: f64 = 40.0;
pub const SUCCESS_RATE_WEIGHT: f64 = 35.0;
pub const LATENCY_WEIGHT: f64 = 25.0;
/// Latency points lost per second of average response time.
pub const LATENCY_PENALTY_PER_SECOND: f64 = 5.0;

/// The three components of a key's score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    pub health: f64,
    pub success_rate: f64,
    pub latency: f64,
}

impl ScoreBreakdown {
    pub fn total(&self) -> f64 {
        self.health + self.success_rate + self.latency
    }
}

fn health_points(status: HealthStatus) -> f64 {
    match status {
        HealthStatus::Healthy => HEALTH_WEIGHT,
        HealthStatus::Unknown => 20.0,
        HealthStatus::RateLimited => 5.0,
        HealthStatus::Unhealthy => 0.0,
    }
}

/// A key with no latency samples yet gets the full latency component.
fn latency_points(avg_response_time_ms: f64) -> f64 {
    if avg_response_time_ms <= 0.0 {
        LATENCY_WEIGHT
    } else {
        (LATENCY_WEIGHT - avg_response_time_ms / 1000.0 * LATENCY_PENALTY_PER_SECOND).max(0.0)
    }
}

pub fn breakdown(key: &KeyRecord) -> ScoreBreakdown {
    let success_rate = key.success_rate().clamp(0.0, 1.0);
    ScoreBreakdown {
        health: health_points(key.health_status()),
        success_rate: success_rate * SUCCESS_RATE_WEIGHT,
        latency: latency_points(key.avg_response_time_ms()),
    }
}

/// Desirability of a key in `[0, 100]`. Pure and deterministic.
pub fn score(key: &KeyRecord) -> f64 {
    breakdown(key).total()
}
