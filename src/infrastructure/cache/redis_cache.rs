use crate::infrastructure::cache::Cache;
use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::{Client, Commands, Connection};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{error, info, warn};

/// Redis-backed cache. Holds one connection per service behind a mutex;
/// a failed call drops the connection so the next call reconnects.
pub struct RedisCache {
    client: Client,
    conn: Mutex<Option<Connection>>,
}

impl RedisCache {
    pub fn connect(uri: &str) -> Result<Self> {
        let client = Client::open(uri).context("Invalid Redis URI")?;
        let conn = client
            .get_connection()
            .context("Failed to connect to Redis")?;
        info!("Connected to Redis");
        Ok(Self {
            client,
            conn: Mutex::new(Some(conn)),
        })
    }

    fn with_conn<T>(&self, op: impl FnOnce(&mut Connection) -> redis::RedisResult<T>) -> Option<T> {
        let mut guard = match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if guard.is_none() {
            warn!("Redis connection lost, reconnecting...");
            match self.client.get_connection() {
                Ok(conn) => *guard = Some(conn),
                Err(e) => {
                    error!("Failed to reconnect to Redis: {}", e);
                    return None;
                }
            }
        }

        let conn = guard.as_mut().expect("connection present after reconnect");
        match op(conn) {
            Ok(value) => Some(value),
            Err(e) => {
                error!("Redis operation failed: {}", e);
                // Force a reconnect on the next call.
                *guard = None;
                None
            }
        }
    }
}

fn score_arg(score: f64) -> String {
    if score == f64::INFINITY {
        "+inf".to_string()
    } else if score == f64::NEG_INFINITY {
        "-inf".to_string()
    } else {
        score.to_string()
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, key: &str) -> Option<String> {
        self.with_conn(|conn| conn.get::<_, Option<String>>(key))
            .flatten()
    }

    async fn set(&self, key: &str, value: String, ttl: Option<u64>) -> bool {
        self.with_conn(|conn| match ttl {
            Some(secs) => conn.set_ex::<_, _, ()>(key, value, secs),
            None => conn.set::<_, _, ()>(key, value),
        })
        .is_some()
    }

    async fn delete(&self, key: &str) -> bool {
        self.with_conn(|conn| conn.del::<_, i64>(key))
            .map(|n| n > 0)
            .unwrap_or(false)
    }

    async fn exists(&self, key: &str) -> bool {
        self.with_conn(|conn| conn.exists::<_, bool>(key))
            .unwrap_or(false)
    }

    async fn keys(&self, pattern: &str) -> Vec<String> {
        self.with_conn(|conn| conn.keys::<_, Vec<String>>(pattern))
            .unwrap_or_default()
    }

    async fn incr(&self, key: &str, amount: i64) -> Option<i64> {
        self.with_conn(|conn| conn.incr::<_, _, i64>(key, amount))
    }

    async fn hash_set(&self, name: &str, field: &str, value: String) -> bool {
        self.with_conn(|conn| conn.hset::<_, _, _, ()>(name, field, value))
            .is_some()
    }

    async fn hash_get(&self, name: &str, field: &str) -> Option<String> {
        self.with_conn(|conn| conn.hget::<_, _, Option<String>>(name, field))
            .flatten()
    }

    async fn hash_get_all(&self, name: &str) -> HashMap<String, String> {
        self.with_conn(|conn| conn.hgetall::<_, HashMap<String, String>>(name))
            .unwrap_or_default()
    }

    async fn hash_delete(&self, name: &str, field: &str) -> bool {
        self.with_conn(|conn| conn.hdel::<_, _, i64>(name, field))
            .map(|n| n > 0)
            .unwrap_or(false)
    }

    async fn add_to_sorted_set(&self, name: &str, member: String, score: f64) -> bool {
        self.with_conn(|conn| conn.zadd::<_, _, _, i64>(name, member, score))
            .is_some()
    }

    async fn get_from_sorted_set_by_score(&self, name: &str, min: f64, max: f64) -> Vec<String> {
        self.with_conn(|conn| {
            conn.zrangebyscore::<_, _, _, Vec<String>>(name, score_arg(min), score_arg(max))
        })
        .unwrap_or_default()
    }

    async fn publish(&self, channel: &str, message: String) -> usize {
        self.with_conn(|conn| conn.publish::<_, _, i64>(channel, message))
            .map(|n| n as usize)
            .unwrap_or(0)
    }
}
