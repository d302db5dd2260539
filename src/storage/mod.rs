// src/storage/mod.rs

pub mod key_record;
pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;
pub mod traits;

pub use key_record::{
    candidate_order, listing_order, preview_secret, secret_fingerprint, HealthStatus, KeyId,
    KeyMetrics, KeyRecord, DEFAULT_UNHEALTHY_THRESHOLD,
};
pub use memory::InMemoryStore;
#[cfg(feature = "redis")]
pub use redis::RedisStore;
pub use traits::{AppliedOutcome, CursorStore, KeyFilter, KeyStore};

/// Backend holding both durable key records and round-robin cursors.
pub trait Storage: KeyStore + CursorStore {}

impl<T: KeyStore + CursorStore> Storage for T {}
