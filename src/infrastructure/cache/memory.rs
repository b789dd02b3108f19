use crate::infrastructure::cache::Cache;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// Process-local cache with the same surface as the Redis backend.
/// Authoritative store for tests and the backtest runner; expiry is lazy.
#[derive(Default)]
pub struct InMemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
    hashes: Mutex<HashMap<String, HashMap<String, String>>>,
    sorted_sets: Mutex<HashMap<String, Vec<(f64, String)>>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

fn glob_match(pattern: &str, key: &str) -> bool {
    // Redis KEYS-style matching, `*` only.
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == key;
    }
    let mut pos = 0;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            if !key.starts_with(part) {
                return false;
            }
            pos = part.len();
        } else if i == parts.len() - 1 && !pattern.ends_with('*') {
            return key[pos..].ends_with(part);
        } else {
            match key[pos..].find(part) {
                Some(found) => pos += found + part.len(),
                None => return false,
            }
        }
    }
    true
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.expired() => {
                entries.remove(key);
                None
            }
            Some(entry) => Some(entry.value.clone()),
            None => None,
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Option<u64>) -> bool {
        let expires_at = ttl.map(|secs| Instant::now() + Duration::from_secs(secs));
        self.entries
            .lock()
            .await
            .insert(key.to_string(), Entry { value, expires_at });
        true
    }

    async fn delete(&self, key: &str) -> bool {
        self.entries.lock().await.remove(key).is_some()
    }

    async fn exists(&self, key: &str) -> bool {
        self.get(key).await.is_some()
    }

    async fn keys(&self, pattern: &str) -> Vec<String> {
        let mut entries = self.entries.lock().await;
        entries.retain(|_, e| !e.expired());
        entries
            .keys()
            .filter(|k| glob_match(pattern, k))
            .cloned()
            .collect()
    }

    async fn incr(&self, key: &str, amount: i64) -> Option<i64> {
        let mut entries = self.entries.lock().await;
        let current = entries
            .get(key)
            .filter(|e| !e.expired())
            .and_then(|e| e.value.parse::<i64>().ok())
            .unwrap_or(0);
        let next = current + amount;
        entries.insert(
            key.to_string(),
            Entry {
                value: next.to_string(),
                expires_at: None,
            },
        );
        Some(next)
    }

    async fn hash_set(&self, name: &str, field: &str, value: String) -> bool {
        self.hashes
            .lock()
            .await
            .entry(name.to_string())
            .or_default()
            .insert(field.to_string(), value);
        true
    }

    async fn hash_get(&self, name: &str, field: &str) -> Option<String> {
        self.hashes
            .lock()
            .await
            .get(name)
            .and_then(|h| h.get(field).cloned())
    }

    async fn hash_get_all(&self, name: &str) -> HashMap<String, String> {
        self.hashes
            .lock()
            .await
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    async fn hash_delete(&self, name: &str, field: &str) -> bool {
        self.hashes
            .lock()
            .await
            .get_mut(name)
            .map(|h| h.remove(field).is_some())
            .unwrap_or(false)
    }

    async fn add_to_sorted_set(&self, name: &str, member: String, score: f64) -> bool {
        let mut sets = self.sorted_sets.lock().await;
        let set = sets.entry(name.to_string()).or_default();
        // Re-adding a member updates its score, as ZADD does.
        set.retain(|(_, m)| *m != member);
        let pos = set.partition_point(|(s, _)| *s <= score);
        set.insert(pos, (score, member));
        true
    }

    async fn get_from_sorted_set_by_score(&self, name: &str, min: f64, max: f64) -> Vec<String> {
        self.sorted_sets
            .lock()
            .await
            .get(name)
            .map(|set| {
                set.iter()
                    .filter(|(score, _)| *score >= min && *score <= max)
                    .map(|(_, member)| member.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    async fn publish(&self, _channel: &str, _message: String) -> usize {
        0
    }
}
