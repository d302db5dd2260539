// src/handlers/mod.rs

pub mod admin;
pub mod chat;
pub mod health;

pub use admin::admin_routes;
pub use chat::{chat_completions, list_models};
pub use health::{health_check, status};
