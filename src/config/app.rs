// src/config/app.rs

use crate::core::StrategyKind;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::Validate;

pub const DEFAULT_TARGET_URL: &str = "https://generativelanguage.googleapis.com/v1beta/openai";

#[derive(Debug, Deserialize, Clone, PartialEq, Serialize, Validate)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_connect_timeout")]
    #[validate(range(min = 1, message = "Connect timeout cannot be 0"))]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout")]
    #[validate(range(min = 1, message = "Request timeout cannot be 0"))]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub admin_token: Option<String>,
    #[serde(default = "default_max_body_bytes")]
    #[validate(range(min = 1024))]
    pub max_body_bytes: usize,
    #[serde(default)]
    pub test_mode: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: default_request_timeout(),
            admin_token: None,
            max_body_bytes: default_max_body_bytes(),
            test_mode: false,
        }
    }
}

impl ServerConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn admin_token(&self) -> Option<SecretString> {
        self.admin_token
            .as_ref()
            .filter(|token| !token.trim().is_empty())
            .map(|token| SecretString::new(token.clone()))
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Serialize, Validate)]
pub struct UpstreamConfig {
    #[serde(default = "default_target_url")]
    #[validate(url)]
    pub target_url: String,
    #[serde(default)]
    pub proxy_url: Option<String>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            target_url: default_target_url(),
            proxy_url: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Serialize, Validate)]
pub struct BalancerConfig {
    #[serde(default)]
    pub strategy: StrategyKind,
    #[serde(default = "default_failover_attempts")]
    #[validate(range(min = 1, max = 20))]
    pub failover_attempts: u32,
    #[serde(default = "default_max_retries")]
    #[validate(range(max = 10))]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_unhealthy_threshold")]
    #[validate(range(min = 1))]
    pub unhealthy_threshold: u32,
    #[serde(default)]
    pub cursor_ttl_secs: Option<u64>,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::default(),
            failover_attempts: default_failover_attempts(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            unhealthy_threshold: default_unhealthy_threshold(),
            cursor_ttl_secs: None,
        }
    }
}

impl BalancerConfig {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn cursor_ttl(&self) -> Option<Duration> {
        self.cursor_ttl_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Default, Serialize, Validate)]
pub struct AppConfig {
    #[serde(default)]
    #[validate(nested)]
    pub server: ServerConfig,
    #[serde(default)]
    #[validate(nested)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    #[validate(nested)]
    pub balancer: BalancerConfig,
    /// Secrets seeded into an empty store on first start.
    #[serde(default)]
    pub keys: Vec<String>,
    #[serde(default)]
    pub redis_url: Option<String>,
    #[serde(default)]
    pub redis_key_prefix: Option<String>,
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_request_timeout() -> u64 {
    300
}

fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_target_url() -> String {
    DEFAULT_TARGET_URL.to_string()
}

fn default_failover_attempts() -> u32 {
    3
}

fn default_max_retries() -> u32 {
    2
}

fn default_backoff_base_ms() -> u64 {
    1000
}

fn default_unhealthy_threshold() -> u32 {
    crate::storage::DEFAULT_UNHEALTHY_THRESHOLD
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_yaml_uses_defaults() {
        let config: AppConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.request_timeout_secs, 300);
        assert_eq!(config.upstream.target_url, DEFAULT_TARGET_URL);
        assert_eq!(config.balancer.strategy, StrategyKind::Adaptive);
        assert_eq!(config.balancer.failover_attempts, 3);
        assert_eq!(config.balancer.max_retries, 2);
        assert_eq!(config.balancer.backoff_base(), Duration::from_millis(1000));
        assert!(config.keys.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_blank_admin_token_is_treated_as_unset() {
        let server = ServerConfig {
            admin_token: Some("   ".to_string()),
            ..ServerConfig::default()
        };
        assert!(server.admin_token().is_none());
    }

    #[test]
    fn test_derive_validation_rejects_zero_failover_attempts() {
        let mut config = AppConfig::default();
        config.balancer.failover_attempts = 0;
        assert!(config.validate().is_err());
    }
}
