// src/config/validation.rs

use crate::config::AppConfig;
use crate::error::{AppError, Result};
use crate::storage::preview_secret;
use std::collections::HashSet;
use tracing::{debug, warn};
use url::Url;
use validator::Validate;

pub struct ConfigValidator;

impl ConfigValidator {
    pub fn validate(config: &AppConfig) -> Result<()> {
        debug!("Starting configuration validation");

        config.validate()?;
        debug!("Field validation passed");

        if let Err(e) = Self::validate_keys(config) {
            warn!("Key validation failed: {}", e);
            return Err(e);
        }
        debug!("Key validation passed");

        if let Err(e) = Self::validate_upstream(config) {
            warn!("Upstream config validation failed: {}", e);
            return Err(e);
        }
        debug!("Upstream config validation passed");

        if let Err(e) = Self::validate_redis_config(config) {
            warn!("Redis config validation failed: {}", e);
            return Err(e);
        }
        debug!("Redis config validation passed");

        if let Err(e) = Self::validate_server_config(config) {
            warn!("Server config validation failed: {}", e);
            return Err(e);
        }
        debug!("Server config validation passed");

        debug!("Configuration validation completed successfully");
        Ok(())
    }

    fn validate_keys(config: &AppConfig) -> Result<()> {
        if config.keys.is_empty() {
            warn!("No API keys configured; the store must already contain keys");
        }

        let mut seen = HashSet::new();
        for key in &config.keys {
            if key.trim().is_empty() {
                return Err(AppError::config_validation(
                    "API key cannot be empty",
                    Some("keys"),
                ));
            }
            if !seen.insert(key) {
                return Err(AppError::config_validation(
                    format!("Duplicate API key: {}", preview_secret(key)),
                    Some("keys"),
                ));
            }
        }

        debug!("Validated {} configured keys", seen.len());
        Ok(())
    }

    fn validate_upstream(config: &AppConfig) -> Result<()> {
        let target = Self::validate_url(&config.upstream.target_url, "upstream.target_url")?;
        if !matches!(target.scheme(), "http" | "https") {
            return Err(AppError::config_validation(
                format!("Unsupported target URL scheme '{}'", target.scheme()),
                Some("upstream.target_url"),
            ));
        }

        if let Some(proxy_url) = &config.upstream.proxy_url {
            Self::validate_proxy_url(proxy_url)?;
        }
        Ok(())
    }

    fn validate_redis_config(config: &AppConfig) -> Result<()> {
        if let Some(redis_url) = &config.redis_url {
            let url = Self::validate_url(redis_url, "redis_url")?;
            if !matches!(url.scheme(), "redis" | "rediss") {
                return Err(AppError::config_validation(
                    format!("Unsupported Redis URL scheme '{}'", url.scheme()),
                    Some("redis_url"),
                ));
            }
            if !cfg!(feature = "redis") {
                warn!("redis_url is set but the binary was built without the 'redis' feature");
            }
        }
        Ok(())
    }

    fn validate_server_config(config: &AppConfig) -> Result<()> {
        // Port 0 lets the OS pick one, only useful in tests.
        if config.server.port == 0 && !config.server.test_mode {
            return Err(AppError::config_validation(
                "Server port cannot be 0 (except in test mode)",
                Some("server.port"),
            ));
        }

        if config.server.host.trim().is_empty() {
            return Err(AppError::config_validation(
                "Server host cannot be empty",
                Some("server.host"),
            ));
        }

        if config.server.admin_token().is_none() {
            warn!("No admin token configured; admin API will reject all requests");
        }

        Ok(())
    }

    fn validate_url(url_str: &str, field_name: &str) -> Result<Url> {
        Url::parse(url_str).map_err(|e| {
            AppError::config_validation(
                format!("Invalid URL in {field_name}: {url_str} - {e}"),
                Some(field_name),
            )
        })
    }

    fn validate_proxy_url(proxy_url: &str) -> Result<()> {
        let url = Self::validate_url(proxy_url, "upstream.proxy_url")?;
        match url.scheme() {
            "http" | "https" | "socks5" => Ok(()),
            scheme => Err(AppError::config_validation(
                format!("Unsupported proxy scheme '{scheme}'. Supported: http, https, socks5"),
                Some("upstream.proxy_url"),
            )),
        }
    }
}
