// src/storage/redis.rs

use crate::error::{AppError, Result};
use crate::storage::{
    secret_fingerprint, AppliedOutcome, CursorStore, KeyFilter, KeyId, KeyMetrics, KeyRecord,
    KeyStore,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_redis::{Config as PoolConfig, Connection as RedisConnection, Pool, Runtime};
use once_cell::sync::Lazy;
use redis::{AsyncCommands, Script};
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

pub const DEFAULT_KEY_PREFIX: &str = "gemini_balance:";

const KEY_SET: &str = "keys";
const KEY_ID_SEQUENCE: &str = "key_id_seq";
const CONFIG_HASH: &str = "config";

/// Value held by a secret index entry while its record is being written.
const PENDING_CLAIM: &str = "pending";

/// HSET the given field/value pairs only while the record still has its
/// secret, so a concurrent delete cannot leave a metrics-only hash behind.
static UPDATE_METRICS_SCRIPT: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r"
if redis.call('HEXISTS', KEYS[1], 'secret') == 0 then
  return 0
end
redis.call('HSET', KEYS[1], unpack(ARGV))
return 1
",
    )
});

/// Redis implementation of key storage
///
/// Layout, relative to the prefix:
/// - `keys`: set of key ids
/// - `key:{id}`: hash with the secret and its metrics
/// - `secret:{sha256}`: id owning a secret, for duplicate detection
/// - `config`: hash of runtime settings
/// - `cursor:{name}`: plain string, optionally with a TTL
#[derive(Clone)]
pub struct RedisStore {
    pool: Pool,
    key_prefix: String,
}

impl RedisStore {
    pub fn new(pool: Pool, key_prefix: Option<String>) -> Self {
        Self {
            pool,
            key_prefix: key_prefix.unwrap_or_else(|| DEFAULT_KEY_PREFIX.to_string()),
        }
    }

    /// Create a pool for `redis_url` and verify it answers.
    pub async fn connect(redis_url: &str, key_prefix: Option<String>) -> Result<Self> {
        let pool = PoolConfig::from_url(redis_url).create_pool(Some(Runtime::Tokio1))?;
        let store = Self::new(pool, key_prefix);
        store.ping().await?;
        info!(key_prefix = %store.key_prefix, "Connected to Redis");
        Ok(store)
    }

    fn prefix_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    fn record_key(&self, id: KeyId) -> String {
        self.prefix_key(&format!("key:{id}"))
    }

    fn secret_index_key(&self, fingerprint: &str) -> String {
        self.prefix_key(&format!("secret:{fingerprint}"))
    }

    async fn get_connection(&self) -> Result<RedisConnection> {
        self.pool.get().await.map_err(Into::into)
    }

    /// Allocate an id and write the record for a secret whose index entry is
    /// already claimed.
    async fn insert_record(
        &self,
        conn: &mut RedisConnection,
        index_key: &str,
        secret: &str,
    ) -> Result<KeyRecord> {
        let id: KeyId = conn.incr(self.prefix_key(KEY_ID_SEQUENCE), 1).await?;
        let record = KeyRecord::new(id, secret);
        let mut fields = vec![
            ("secret", record.secret.expose_secret().clone()),
            ("enabled", record.enabled.to_string()),
            ("created_at", record.created_at.to_rfc3339()),
        ];
        fields.extend(Self::metrics_fields(&record.metrics));

        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.set(index_key, id);
        pipe.hset_multiple(self.record_key(id), &fields);
        pipe.sadd(self.prefix_key(KEY_SET), id);
        let _: () = pipe.query_async(conn).await?;
        Ok(record)
    }

    /// Write metric fields if the record still exists.
    async fn write_metrics(
        &self,
        conn: &mut RedisConnection,
        id: KeyId,
        metrics: &KeyMetrics,
    ) -> Result<()> {
        let mut invocation = UPDATE_METRICS_SCRIPT.prepare_invoke();
        invocation.key(self.record_key(id));
        for (field, value) in Self::metrics_fields(metrics) {
            invocation.arg(field).arg(value);
        }
        let written: i64 = invocation.invoke_async(conn).await?;
        if written == 0 {
            return Err(AppError::KeyNotFound { id });
        }
        Ok(())
    }

    fn metrics_fields(metrics: &KeyMetrics) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("health_status", metrics.health_status.as_str().to_string()),
            ("total_requests", metrics.total_requests.to_string()),
            ("successful_requests", metrics.successful_requests.to_string()),
            ("success_rate", metrics.success_rate.to_string()),
            ("avg_response_time_ms", metrics.avg_response_time_ms.to_string()),
            ("consecutive_failures", metrics.consecutive_failures.to_string()),
        ];
        if let Some(at) = metrics.last_check_time {
            fields.push(("last_check_time", at.to_rfc3339()));
        }
        fields
    }
}

fn parse_field<T: std::str::FromStr>(hash: &HashMap<String, String>, field: &str) -> Option<T> {
    hash.get(field).and_then(|raw| raw.parse().ok())
}

fn parse_time(hash: &HashMap<String, String>, field: &str) -> Option<DateTime<Utc>> {
    hash.get(field)
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Rebuild a record from its hash. Missing or malformed metric fields fall
/// back to the values of a fresh key; a missing secret means the hash is not
/// a key record.
fn parse_key_record(id: KeyId, hash: &HashMap<String, String>) -> Option<KeyRecord> {
    let secret = hash.get("secret")?;
    let defaults = KeyMetrics::default();
    Some(KeyRecord {
        id,
        secret: SecretString::new(secret.clone()),
        enabled: parse_field(hash, "enabled").unwrap_or(true),
        metrics: KeyMetrics {
            health_status: parse_field(hash, "health_status").unwrap_or(defaults.health_status),
            total_requests: parse_field(hash, "total_requests").unwrap_or(0),
            successful_requests: parse_field(hash, "successful_requests").unwrap_or(0),
            success_rate: parse_field(hash, "success_rate").unwrap_or(0.0),
            avg_response_time_ms: parse_field(hash, "avg_response_time_ms").unwrap_or(0.0),
            consecutive_failures: parse_field(hash, "consecutive_failures").unwrap_or(0),
            last_check_time: parse_time(hash, "last_check_time"),
        },
        created_at: parse_time(hash, "created_at").unwrap_or_else(Utc::now),
    })
}

#[async_trait]
impl KeyStore for RedisStore {
    async fn add_key(&self, secret: &str) -> Result<KeyRecord> {
        let mut conn = self.get_connection().await?;
        let index_key = self.secret_index_key(&secret_fingerprint(secret));

        let claimed: bool = conn.set_nx(&index_key, PENDING_CLAIM).await?;
        if !claimed {
            debug!("RedisStore::add_key: secret already registered");
            return Err(AppError::DuplicateKey);
        }

        match self.insert_record(&mut conn, &index_key, secret).await {
            Ok(record) => {
                trace!(key.id = record.id, "RedisStore::add_key: stored");
                Ok(record)
            }
            Err(e) => {
                let released: redis::RedisResult<()> = conn.del(&index_key).await;
                if let Err(cleanup) = released {
                    warn!(error = %cleanup, "Failed to release secret index after a failed insert");
                }
                Err(e)
            }
        }
    }

    async fn delete_key(&self, id: KeyId) -> Result<bool> {
        let mut conn = self.get_connection().await?;
        let secret: Option<String> = conn.hget(self.record_key(id), "secret").await?;
        let Some(secret) = secret else {
            return Ok(false);
        };

        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.del(self.record_key(id));
        pipe.del(self.secret_index_key(&secret_fingerprint(&secret)));
        pipe.srem(self.prefix_key(KEY_SET), id);
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(true)
    }

    async fn set_key_enabled(&self, id: KeyId, enabled: bool) -> Result<bool> {
        let mut conn = self.get_connection().await?;
        let exists: bool = conn.exists(self.record_key(id)).await?;
        if !exists {
            return Ok(false);
        }
        let _: () = conn
            .hset(self.record_key(id), "enabled", enabled.to_string())
            .await?;
        Ok(true)
    }

    async fn get_key(&self, id: KeyId) -> Result<Option<KeyRecord>> {
        trace!(key.id = id, "RedisStore::get_key: start");
        let mut conn = self.get_connection().await?;
        let hash: HashMap<String, String> = conn.hgetall(self.record_key(id)).await?;
        if hash.is_empty() {
            return Ok(None);
        }
        Ok(parse_key_record(id, &hash))
    }

    async fn list_keys(&self, filter: KeyFilter) -> Result<Vec<KeyRecord>> {
        trace!("RedisStore::list_keys: start");
        let mut conn = self.get_connection().await?;
        let ids: Vec<KeyId> = conn.smembers(self.prefix_key(KEY_SET)).await?;
        trace!("RedisStore::list_keys: found {} ids", ids.len());

        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        for id in &ids {
            pipe.hgetall(self.record_key(*id));
        }
        let hashes: Vec<HashMap<String, String>> = pipe.query_async(&mut conn).await?;

        let mut records = Vec::with_capacity(ids.len());
        for (id, hash) in ids.into_iter().zip(hashes) {
            match parse_key_record(id, &hash) {
                Some(record) if filter.matches(&record) => records.push(record),
                Some(_) => {}
                None => warn!(key.id = id, "Key id listed without a stored record, skipping"),
            }
        }
        Ok(records)
    }

    async fn update_key_metrics(&self, id: KeyId, metrics: &KeyMetrics) -> Result<()> {
        trace!(key.id = id, "RedisStore::update_key_metrics: start");
        let mut conn = self.get_connection().await?;
        self.write_metrics(&mut conn, id, metrics).await
    }

    /// Read, fold and write back. Concurrent outcomes for the same key are
    /// last-write-wins here.
    async fn apply_outcome(
        &self,
        id: KeyId,
        success: bool,
        latency_ms: f64,
        unhealthy_threshold: u32,
        now: DateTime<Utc>,
    ) -> Result<AppliedOutcome> {
        let mut conn = self.get_connection().await?;
        let hash: HashMap<String, String> = conn.hgetall(self.record_key(id)).await?;
        let mut record = parse_key_record(id, &hash).ok_or(AppError::KeyNotFound { id })?;
        let previous = record.health_status();
        record
            .metrics
            .apply_outcome(success, latency_ms, unhealthy_threshold, now);
        self.write_metrics(&mut conn, id, &record.metrics).await?;
        Ok(AppliedOutcome { previous, record })
    }

    async fn get_config_value(&self, name: &str) -> Result<Option<String>> {
        let mut conn = self.get_connection().await?;
        let value: Option<String> = conn.hget(self.prefix_key(CONFIG_HASH), name).await?;
        Ok(value)
    }

    async fn set_config_value(&self, name: &str, value: &str) -> Result<()> {
        let mut conn = self.get_connection().await?;
        let _: () = conn.hset(self.prefix_key(CONFIG_HASH), name, value).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.get_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

#[async_trait]
impl CursorStore for RedisStore {
    async fn get_cursor(&self, name: &str) -> Result<Option<String>> {
        let mut conn = self.get_connection().await?;
        let value: Option<String> = conn.get(self.prefix_key(&format!("cursor:{name}"))).await?;
        Ok(value)
    }

    async fn set_cursor(&self, name: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.get_connection().await?;
        let key = self.prefix_key(&format!("cursor:{name}"));
        match ttl {
            Some(ttl) => {
                let _: () = conn.set_ex(key, value, ttl.as_secs().max(1)).await?;
            }
            None => {
                let _: () = conn.set(key, value).await?;
            }
        }
        Ok(())
    }
}
