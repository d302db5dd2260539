// src/core/strategy.rs

use crate::core::scoring;
use crate::storage::{CursorStore, KeyRecord, Storage};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Name of the shared round-robin cursor.
pub const ROUND_ROBIN_CURSOR: &str = "round_robin_index";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    RoundRobin,
    LeastUsed,
    #[default]
    Adaptive,
}

impl StrategyKind {
    pub const ALL: [Self; 3] = [Self::RoundRobin, Self::LeastUsed, Self::Adaptive];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RoundRobin => "round_robin",
            Self::LeastUsed => "least_used",
            Self::Adaptive => "adaptive",
        }
    }

    /// Lenient parse used for stored settings: anything unrecognized is
    /// treated as `Adaptive`.
    pub fn resolve(name: &str) -> Self {
        name.parse().unwrap_or_else(|_| {
            warn!(strategy = name, "Unknown load balance strategy, falling back to adaptive");
            Self::Adaptive
        })
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "round_robin" => Ok(Self::RoundRobin),
            "least_used" => Ok(Self::LeastUsed),
            "adaptive" => Ok(Self::Adaptive),
            other => Err(format!(
                "Invalid strategy: {other}. Expected one of: round_robin, least_used, adaptive"
            )),
        }
    }
}

/// A non-empty, ordered candidate set.
#[derive(Debug, Clone)]
pub struct Candidates(Vec<KeyRecord>);

impl Candidates {
    /// `None` when `keys` is empty.
    pub fn new(keys: Vec<KeyRecord>) -> Option<Self> {
        if keys.is_empty() {
            None
        } else {
            Some(Self(keys))
        }
    }

    pub fn as_slice(&self) -> &[KeyRecord] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false; present for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn first(&self) -> &KeyRecord {
        &self.0[0]
    }

    pub fn get(&self, index: usize) -> Option<&KeyRecord> {
        self.0.get(index)
    }

    pub fn into_inner(self) -> Vec<KeyRecord> {
        self.0
    }
}

/// Fewest total requests. Ties go to the earliest candidate.
pub fn select_least_used(candidates: &Candidates) -> &KeyRecord {
    let mut best = candidates.first();
    for key in &candidates.as_slice()[1..] {
        if key.total_requests() < best.total_requests() {
            best = key;
        }
    }
    best
}

/// Highest score. Ties go to the earliest candidate.
pub fn select_adaptive(candidates: &Candidates) -> &KeyRecord {
    let mut best = candidates.first();
    let mut best_score = scoring::score(best);
    for key in &candidates.as_slice()[1..] {
        let s = scoring::score(key);
        if s > best_score {
            best = key;
            best_score = s;
        }
    }
    trace!(key.id = best.id, score = best_score, "Adaptive selection");
    best
}

/// Result of a round-robin pick.
#[derive(Debug)]
pub struct RoundRobinSelection {
    pub key: KeyRecord,
    pub index: usize,
    /// Background write of the next cursor value. Callers normally drop it.
    pub persist: JoinHandle<()>,
}

/// Round-robin over a cursor kept in shared storage.
///
/// The read and the write of the cursor are separate operations with no
/// compare-and-set, so concurrent callers (or other instances sharing the
/// store) may read the same index and pick the same key. This only skews the
/// distribution; it never selects a key outside the candidate set.
#[derive(Clone)]
pub struct RoundRobinCursor {
    store: Arc<dyn Storage>,
    name: String,
    ttl: Option<Duration>,
}

impl RoundRobinCursor {
    pub fn new(store: Arc<dyn Storage>, ttl: Option<Duration>) -> Self {
        Self::named(store, ROUND_ROBIN_CURSOR, ttl)
    }

    pub fn named(store: Arc<dyn Storage>, name: impl Into<String>, ttl: Option<Duration>) -> Self {
        Self {
            store,
            name: name.into(),
            ttl,
        }
    }

    async fn current_index(&self, len: usize) -> usize {
        let raw = match self.store.get_cursor(&self.name).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(cursor = %self.name, error = %e, "Failed to read round-robin cursor, starting from 0");
                None
            }
        };

        match raw.as_deref().map(str::trim).map(str::parse::<usize>) {
            Some(Ok(index)) if index < len => index,
            Some(Ok(index)) => {
                debug!(cursor = %self.name, index, len, "Cursor out of range, resetting");
                0
            }
            Some(Err(_)) => {
                debug!(cursor = %self.name, "Cursor value unparsable, resetting");
                0
            }
            None => 0,
        }
    }

    pub async fn select(&self, candidates: &Candidates) -> RoundRobinSelection {
        let len = candidates.len();
        let index = self.current_index(len).await;
        let key = candidates.as_slice()[index].clone();
        let next = (index + 1) % len;

        let store = Arc::clone(&self.store);
        let name = self.name.clone();
        let ttl = self.ttl;
        let persist = tokio::spawn(async move {
            if let Err(e) = store.set_cursor(&name, &next.to_string(), ttl).await {
                warn!(cursor = %name, next, error = %e, "Failed to persist round-robin cursor");
            }
        });

        trace!(key.id = key.id, index, next, "Round-robin selection");
        RoundRobinSelection {
            key,
            index,
            persist,
        }
    }
}
