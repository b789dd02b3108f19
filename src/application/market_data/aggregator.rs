use crate::application::market_data::StateManager;
use crate::domain::constants::{exchanges, routing};
use crate::domain::market::{
    calculate_candle_boundaries, Candle, CandleEvent, CandleSource, Timeframe,
};
use crate::infrastructure::bus::{publish_json, MessageBus};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

/// Rolls base-timeframe candles into custom timeframes.
///
/// At most one partial exists per `(exchange, symbol, timeframe, bucket)`:
/// the partial lives in the cache keyed by bucket end, and completing a
/// bucket deletes the key before publishing. Downstream consumers dedupe
/// by candle identity, so a redelivered closing bar is harmless. The
/// read-merge-write-complete sequence is serialized per key through an
/// in-process mutex registry.
pub struct CandleAggregator {
    state: Arc<StateManager>,
    bus: Arc<dyn MessageBus>,
    key_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl CandleAggregator {
    pub fn new(state: Arc<StateManager>, bus: Arc<dyn MessageBus>) -> Self {
        Self {
            state,
            bus,
            key_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.key_locks.lock().await;
        Arc::clone(locks.entry(key.to_string()).or_default())
    }

    /// Process one base candle for one custom timeframe. Returns the
    /// completed custom candle when this bar closed the bucket. The
    /// emitted event inherits the base bar's source so downstream
    /// consumers read from the matching candle set.
    pub async fn process_candle(
        &self,
        base: &Candle,
        timeframe: Timeframe,
        source: CandleSource,
    ) -> Option<Candle> {
        let (start, end) = calculate_candle_boundaries(base.timestamp, timeframe);
        let key = format!(
            "{}:{}:{}:{}",
            base.exchange, base.symbol, timeframe, end.timestamp_millis()
        );

        let lock = self.lock_for(&key).await;
        let _guard = lock.lock().await;

        let existing = self
            .state
            .get_partial_candle(&base.exchange, &base.symbol, timeframe, end)
            .await;

        let partial = match existing {
            None => {
                debug!(
                    "Created new partial candle for {}:{} {} starting at {}",
                    base.exchange, base.symbol, timeframe, start
                );
                Candle {
                    exchange: base.exchange.clone(),
                    symbol: base.symbol.clone(),
                    timeframe,
                    timestamp: end,
                    open: base.open,
                    high: base.high,
                    low: base.low,
                    close: base.close,
                    volume: base.volume,
                    is_closed: false,
                }
            }
            Some(previous) => {
                debug!(
                    "Updated partial candle for {}:{} {} closing at {}",
                    base.exchange, base.symbol, timeframe, end
                );
                previous.merge(base)
            }
        };

        let is_complete = base.timestamp >= end && base.is_closed;
        if is_complete {
            let completed = Candle {
                is_closed: true,
                ..partial
            };

            self.state
                .delete_partial_candle(&base.exchange, &base.symbol, timeframe, end)
                .await;

            info!(
                "Completed candle for {}:{} {} closing at {}",
                base.exchange, base.symbol, timeframe, end
            );

            self.publish_custom_candle(&completed, source).await;
            Some(completed)
        } else {
            self.state.store_partial_candle(&partial, end).await;
            None
        }
    }

    /// Process one base candle for every configured custom timeframe.
    pub async fn process_for_timeframes(
        &self,
        base: &Candle,
        timeframes: &[Timeframe],
        source: CandleSource,
    ) -> Vec<Candle> {
        let mut completed = Vec::new();
        for &timeframe in timeframes {
            if timeframe == base.timeframe {
                continue;
            }
            if let Some(candle) = self.process_candle(base, timeframe, source).await {
                completed.push(candle);
            }
        }
        completed
    }

    async fn publish_custom_candle(&self, candle: &Candle, source: CandleSource) {
        let routing_key = routing::candle_new(&candle.exchange, &candle.symbol, candle.timeframe);
        let event = CandleEvent {
            candle: candle.clone(),
            source,
        };
        if let Err(e) = publish_json(
            self.bus.as_ref(),
            exchanges::MARKET_DATA,
            &routing_key,
            &event,
        )
        .await
        {
            error!("Error publishing custom timeframe candle: {:#}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::bus::InProcessBus;
    use crate::infrastructure::cache::{Cache, InMemoryCache};
    use chrono::{DateTime, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn base_candle(close_time: &str, o: Decimal, h: Decimal, l: Decimal, c: Decimal, v: Decimal) -> Candle {
        Candle {
            exchange: "hyperliquid".to_string(),
            symbol: "BTC-USD".to_string(),
            timeframe: Timeframe::FifteenMin,
            timestamp: close_time.parse::<DateTime<Utc>>().unwrap(),
            open: o,
            high: h,
            low: l,
            close: c,
            volume: v,
            is_closed: true,
        }
    }

    fn aggregator() -> (CandleAggregator, Arc<InMemoryCache>) {
        let cache = Arc::new(InMemoryCache::new());
        let state = Arc::new(StateManager::new(cache.clone()));
        let bus = Arc::new(InProcessBus::new());
        (CandleAggregator::new(state, bus), cache)
    }

    #[tokio::test]
    async fn test_four_quarter_bars_close_one_hour_bucket() {
        let (aggregator, cache) = aggregator();

        let bars = [
            base_candle("2024-01-01T00:15:00Z", dec!(1), dec!(3), dec!(1), dec!(2), dec!(10)),
            base_candle("2024-01-01T00:30:00Z", dec!(2), dec!(4), dec!(2), dec!(3), dec!(20)),
            base_candle("2024-01-01T00:45:00Z", dec!(3), dec!(3), dec!(2), dec!(2.5), dec!(30)),
            base_candle("2024-01-01T01:00:00Z", dec!(2.5), dec!(5), dec!(2.5), dec!(4.5), dec!(40)),
        ];

        let mut emitted = Vec::new();
        for bar in &bars {
            if let Some(candle) = aggregator.process_candle(bar, Timeframe::OneHour, CandleSource::Live).await {
                emitted.push(candle);
            }
        }

        assert_eq!(emitted.len(), 1);
        let hourly = &emitted[0];
        assert_eq!(hourly.open, dec!(1));
        assert_eq!(hourly.high, dec!(5));
        assert_eq!(hourly.low, dec!(1));
        assert_eq!(hourly.close, dec!(4.5));
        assert_eq!(hourly.volume, dec!(100));
        assert!(hourly.is_closed);
        assert_eq!(
            hourly.timestamp,
            "2024-01-01T01:00:00Z".parse::<DateTime<Utc>>().unwrap()
        );

        // Completed bucket leaves no partial behind.
        assert!(cache.keys("partial:candle:*").await.is_empty());
    }

    #[tokio::test]
    async fn test_partial_persists_until_completion() {
        let (aggregator, cache) = aggregator();

        let bar = base_candle("2024-01-01T00:15:00Z", dec!(1), dec!(3), dec!(1), dec!(2), dec!(10));
        assert!(aggregator
            .process_candle(&bar, Timeframe::OneHour, CandleSource::Live)
            .await
            .is_none());

        let partials = cache.keys("partial:candle:*").await;
        assert_eq!(partials.len(), 1);
        assert!(partials[0].ends_with("2024-01-01T01:00:00Z"));
    }

    #[tokio::test]
    async fn test_redelivered_final_bar_does_not_emit_twice() {
        let (aggregator, _cache) = aggregator();

        let bars = [
            base_candle("2024-01-01T00:15:00Z", dec!(1), dec!(3), dec!(1), dec!(2), dec!(10)),
            base_candle("2024-01-01T01:00:00Z", dec!(2), dec!(4), dec!(2), dec!(3), dec!(20)),
        ];
        assert!(aggregator
            .process_candle(&bars[0], Timeframe::OneHour, CandleSource::Live)
            .await
            .is_none());
        assert!(aggregator
            .process_candle(&bars[1], Timeframe::OneHour, CandleSource::Live)
            .await
            .is_some());

        // Redelivery of the closing bar finds no partial; it creates a
        // fresh one-bar partial, completes it, and emits a candle with
        // only its own data rather than double-counting the bucket.
        let replay = aggregator
            .process_candle(&bars[1], Timeframe::OneHour, CandleSource::Live)
            .await
            .unwrap();
        assert_eq!(replay.volume, dec!(20));
    }

    #[tokio::test]
    async fn test_open_base_bar_never_completes_bucket() {
        let (aggregator, _cache) = aggregator();
        let mut bar =
            base_candle("2024-01-01T01:00:00Z", dec!(1), dec!(3), dec!(1), dec!(2), dec!(10));
        bar.is_closed = false;
        assert!(aggregator
            .process_candle(&bar, Timeframe::OneHour, CandleSource::Live)
            .await
            .is_none());
    }
}
