use crate::domain::constants::{cache_keys, ttl};
use crate::domain::market::{Candle, Timeframe};
use crate::infrastructure::cache::{get_json, set_json, Cache};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;

/// Tracks in-progress custom-timeframe candles in the cache. The cache is
/// authoritative: a restarted aggregator resumes from the persisted
/// partials, and TTL expiry reaps buckets that never complete.
pub struct StateManager {
    cache: Arc<dyn Cache>,
}

impl StateManager {
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        Self { cache }
    }

    pub async fn get_partial_candle(
        &self,
        exchange: &str,
        symbol: &str,
        timeframe: Timeframe,
        bar_end: DateTime<Utc>,
    ) -> Option<Candle> {
        let key = cache_keys::partial_candle(exchange, symbol, timeframe, bar_end);
        get_json(self.cache.as_ref(), &key).await
    }

    pub async fn store_partial_candle(&self, candle: &Candle, bar_end: DateTime<Utc>) -> bool {
        let key = cache_keys::partial_candle(&candle.exchange, &candle.symbol, candle.timeframe, bar_end);
        debug!("Storing partial candle at {}", key);
        set_json(
            self.cache.as_ref(),
            &key,
            candle,
            Some(ttl::PARTIAL_CANDLE),
        )
        .await
    }

    pub async fn delete_partial_candle(
        &self,
        exchange: &str,
        symbol: &str,
        timeframe: Timeframe,
        bar_end: DateTime<Utc>,
    ) -> bool {
        let key = cache_keys::partial_candle(exchange, symbol, timeframe, bar_end);
        self.cache.delete(&key).await
    }

    /// All in-flight partials for a symbol (operational visibility).
    pub async fn list_partial_candles(&self, exchange: &str, symbol: &str) -> Vec<Candle> {
        let pattern = format!("partial:candle:{}:{}:*", exchange, symbol);
        let mut candles = Vec::new();
        for key in self.cache.keys(&pattern).await {
            if let Some(candle) = get_json::<Candle>(self.cache.as_ref(), &key).await {
                candles.push(candle);
            }
        }
        candles
    }
}
