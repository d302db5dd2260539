// src/config/loader.rs

use crate::config::{AppConfig, ConfigValidator};
use crate::core::StrategyKind;
use crate::error::{AppError, Result};
use std::path::Path;
use tracing::{debug, info, warn};

/// Load configuration from file, apply environment overrides, then validate.
///
/// A missing file is not an error: defaults plus environment are enough to
/// run with `GEMINI_API_KEYS`.
pub fn load_config(config_path: &Path) -> Result<AppConfig> {
    let mut config = if config_path.exists() {
        info!("Loading configuration from file: {}", config_path.display());
        load_from_file(config_path)?
    } else {
        info!("Configuration file not found, using defaults");
        AppConfig::default()
    };

    override_with_env(&mut config);

    ConfigValidator::validate(&config)?;

    debug!("Configuration loaded and validated successfully");
    Ok(config)
}

fn load_from_file(config_path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(config_path).map_err(|_| AppError::ConfigNotFound {
        path: config_path.display().to_string(),
    })?;

    serde_yaml::from_str(&content).map_err(|e| AppError::ConfigParse {
        message: format!("Failed to parse config file: {e}"),
        line: e.location().map(|loc| loc.line()),
    })
}

fn override_with_env(config: &mut AppConfig) {
    if let Ok(redis_url) = std::env::var("REDIS_URL") {
        info!("Overriding Redis URL from environment variable");
        config.redis_url = Some(redis_url);
    }

    if let Ok(port_str) = std::env::var("PORT") {
        if let Ok(port) = port_str.parse::<u16>() {
            info!("Overriding server port from environment variable: {}", port);
            config.server.port = port;
        } else {
            warn!("Invalid PORT environment variable: {}", port_str);
        }
    }

    if let Ok(strategy) = std::env::var("LOAD_BALANCE_STRATEGY") {
        match strategy.parse::<StrategyKind>() {
            Ok(kind) => {
                info!(strategy = %kind, "Overriding load balance strategy from environment");
                config.balancer.strategy = kind;
            }
            Err(e) => warn!("Invalid LOAD_BALANCE_STRATEGY environment variable: {}", e),
        }
    }

    if let Ok(token) = std::env::var("ADMIN_TOKEN") {
        info!("Overriding admin token from environment variable");
        config.server.admin_token = Some(token);
    }

    if let Ok(keys) = std::env::var("GEMINI_API_KEYS") {
        let extra: Vec<String> = keys
            .split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(String::from)
            .collect();
        info!("Adding {} API key(s) from GEMINI_API_KEYS", extra.len());
        for key in extra {
            if !config.keys.contains(&key) {
                config.keys.push(key);
            }
        }
    }
}

/// Validate configuration without failing, for the `check-config` command.
pub fn validate_config(config: &AppConfig, source: &str) -> bool {
    match ConfigValidator::validate(config) {
        Ok(()) => {
            debug!("Configuration validation passed for source: {}", source);
            true
        }
        Err(e) => {
            warn!("Configuration validation failed for source '{}': {}", source, e);
            false
        }
    }
}
