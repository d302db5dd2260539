// src/core/mod.rs

pub mod dispatch;
pub mod key_pool;
pub mod load_balancer;
pub mod retry;
pub mod scoring;
pub mod strategy;

pub use dispatch::{Dispatched, Dispatcher};
pub use key_pool::{
    validate_key_format, KeyPool, KeySnapshot, PerformanceStats, PoolStats, UsageStats,
};
pub use load_balancer::{
    BalancerStats, LoadBalancer, Recovered, SelectionContext, STRATEGY_CONFIG_KEY,
};
pub use retry::{RetryCoordinator, RetryPolicy};
pub use scoring::{score, ScoreBreakdown};
pub use strategy::{Candidates, RoundRobinCursor, RoundRobinSelection, StrategyKind};
