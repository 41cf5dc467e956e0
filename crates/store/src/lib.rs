//! The Shared Persistent Store contract (spec §6.1): a key/value store
//! supporting atomic list and hash operations, an approximate-membership
//! filter, and pipelining. This crate defines the contract as a trait and
//! ships two implementations: [`RedisStore`] for production, backed by a
//! Redis-compatible service with the RedisBloom module, and [`MemoryStore`]
//! for tests and dry runs.

mod memory;
mod redis_store;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

use async_trait::async_trait;
use std::collections::HashMap;
use waypoint_core::WaypointError;

#[async_trait]
pub trait Store: Send + Sync {
    async fn lpush(&self, key: &str, value: &str) -> Result<(), WaypointError>;
    async fn rpush(&self, key: &str, value: &str) -> Result<(), WaypointError>;
    async fn lpop(&self, key: &str) -> Result<Option<String>, WaypointError>;
    async fn rpop(&self, key: &str) -> Result<Option<String>, WaypointError>;
    async fn llen(&self, key: &str) -> Result<u64, WaypointError>;
    /// All keys beginning with `prefix`, e.g. `"frontier:"` during resharding.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, WaypointError>;

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), WaypointError>;
    /// Sets `field` only if absent; returns `true` if it set a new field.
    async fn hsetnx(&self, key: &str, field: &str, value: &str) -> Result<bool, WaypointError>;
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, WaypointError>;
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, WaypointError>;
    async fn hdel(&self, key: &str, fields: &[&str]) -> Result<(), WaypointError>;

    /// Creates the approximate-membership filter at `key` if it doesn't
    /// already exist. Idempotent.
    async fn filter_reserve(&self, key: &str, capacity: u64, fpr: f64) -> Result<(), WaypointError>;
    async fn filter_exists(&self, key: &str) -> Result<bool, WaypointError>;
    /// Pipelined membership test; result order matches `items`.
    async fn filter_contains_many(&self, key: &str, items: &[String]) -> Result<Vec<bool>, WaypointError>;
    /// Pipelined insert; inserts are idempotent (re-adding is a no-op).
    async fn filter_add_many(&self, key: &str, items: &[String]) -> Result<(), WaypointError>;

    async fn get(&self, key: &str) -> Result<Option<String>, WaypointError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), WaypointError>;
    async fn delete(&self, key: &str) -> Result<(), WaypointError>;
}
