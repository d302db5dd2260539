// src/config/mod.rs

pub mod app;
pub mod loader;
pub mod validation;

pub use app::{AppConfig, BalancerConfig, ServerConfig, UpstreamConfig, DEFAULT_TARGET_URL};
pub use loader::{load_config, validate_config};
pub use validation::ConfigValidator;
