//! Shared key-value cache. Values are JSON strings on the wire; the typed
//! helpers encode/decode at the boundary. Failed reads degrade to `None`
//! and failed writes to `false` — callers log and fall back, they do not
//! crash on a cold cache.

mod memory;
mod redis_cache;

pub use memory::InMemoryCache;
pub use redis_cache::RedisCache;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use tracing::error;

#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;

    /// `ttl` in seconds; `None` means no expiry.
    async fn set(&self, key: &str, value: String, ttl: Option<u64>) -> bool;

    async fn delete(&self, key: &str) -> bool;

    async fn exists(&self, key: &str) -> bool;

    /// Glob-style pattern, `*` matching any run of characters.
    async fn keys(&self, pattern: &str) -> Vec<String>;

    async fn incr(&self, key: &str, amount: i64) -> Option<i64>;

    async fn hash_set(&self, name: &str, field: &str, value: String) -> bool;

    async fn hash_get(&self, name: &str, field: &str) -> Option<String>;

    async fn hash_get_all(&self, name: &str) -> HashMap<String, String>;

    async fn hash_delete(&self, name: &str, field: &str) -> bool;

    /// Score-ordered set; members with equal scores keep insertion order.
    async fn add_to_sorted_set(&self, name: &str, member: String, score: f64) -> bool;

    /// Members with `min <= score <= max`, ascending.
    async fn get_from_sorted_set_by_score(&self, name: &str, min: f64, max: f64) -> Vec<String>;

    /// Lightweight in-process pub/sub; returns the receiver count.
    async fn publish(&self, channel: &str, message: String) -> usize;
}

/// Read and JSON-decode a key; decode failures log and degrade to `None`.
pub async fn get_json<T: DeserializeOwned>(cache: &dyn Cache, key: &str) -> Option<T> {
    let raw = cache.get(key).await?;
    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(e) => {
            error!("Value at {} is not valid JSON: {}", key, e);
            None
        }
    }
}

/// JSON-encode and write a key.
pub async fn set_json<T: Serialize>(
    cache: &dyn Cache,
    key: &str,
    value: &T,
    ttl: Option<u64>,
) -> bool {
    match serde_json::to_string(value) {
        Ok(raw) => cache.set(key, raw, ttl).await,
        Err(e) => {
            error!("Failed to encode value for {}: {}", key, e);
            false
        }
    }
}
