use crate::application::market_data::CandleAggregator;
use crate::domain::constants::{cache_keys, exchanges, queues, routing};
use crate::domain::market::{CandleEvent, CandleSource, Timeframe};
use crate::domain::repositories::CandleRepository;
use crate::infrastructure::bus::{publish_json, Delivery, MessageBus, MessageHandler};
use crate::infrastructure::cache::Cache;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// The data service: consumes base candles published by ingestion on
/// `external.new.#`, persists them, mirrors them into the cache sorted
/// sets, republishes them as `candle.new` events and drives the custom
/// timeframe aggregator.
pub struct DataService {
    bus: Arc<dyn MessageBus>,
    cache: Arc<dyn Cache>,
    repository: Arc<dyn CandleRepository>,
    aggregator: Arc<CandleAggregator>,
    custom_timeframes: Vec<Timeframe>,
}

impl DataService {
    pub fn new(
        bus: Arc<dyn MessageBus>,
        cache: Arc<dyn Cache>,
        repository: Arc<dyn CandleRepository>,
        aggregator: Arc<CandleAggregator>,
        custom_timeframes: Vec<Timeframe>,
    ) -> Self {
        Self {
            bus,
            cache,
            repository,
            aggregator,
            custom_timeframes,
        }
    }

    pub async fn start(self: &Arc<Self>) -> Result<()> {
        info!("Starting data service...");
        self.bus
            .bind_queue(
                exchanges::MARKET_DATA,
                queues::EXTERNAL_DATA,
                routing::EXTERNAL_ALL,
            )
            .await?;

        self.bus
            .subscribe(
                queues::EXTERNAL_DATA,
                Arc::new(ExternalCandleHandler {
                    service: Arc::clone(self),
                }),
            )
            .await?;

        info!("Data service started");
        Ok(())
    }

    pub async fn stop(&self) {
        info!("Stopping data service...");
        self.bus.stop().await;
        info!("Data service stopped");
    }

    #[instrument(skip(self, event), fields(symbol = %event.candle.symbol, timeframe = %event.candle.timeframe))]
    pub async fn handle_base_candle(&self, event: CandleEvent) -> Result<()> {
        let candle = &event.candle;

        // Persist first: the upsert is the idempotency barrier for
        // redelivered events.
        self.repository
            .upsert(std::slice::from_ref(candle))
            .await
            .context("failed to persist base candle")?;

        // Mirror into the source-specific sorted set for strategy reads.
        let set_key = match event.source {
            CandleSource::Historical => {
                cache_keys::historical_candles(&candle.exchange, &candle.symbol, candle.timeframe)
            }
            CandleSource::Live => {
                cache_keys::live_candles(&candle.exchange, &candle.symbol, candle.timeframe)
            }
        };
        let member = serde_json::to_string(candle)?;
        if !self
            .cache
            .add_to_sorted_set(&set_key, member, candle.score())
            .await
        {
            warn!("Failed to cache candle in {}", set_key);
        }

        // Republish closed base bars for strategy consumption.
        if candle.is_closed {
            let routing_key =
                routing::candle_new(&candle.exchange, &candle.symbol, candle.timeframe);
            publish_json(self.bus.as_ref(), exchanges::MARKET_DATA, &routing_key, &event)
                .await
                .context("failed to republish base candle")?;
        }

        // Roll into custom timeframes. Completed customs are published by
        // the aggregator itself; mirror them into the cache here.
        let completed = self
            .aggregator
            .process_for_timeframes(candle, &self.custom_timeframes, event.source)
            .await;
        for custom in completed {
            let set_key = match event.source {
                CandleSource::Historical => cache_keys::historical_candles(
                    &custom.exchange,
                    &custom.symbol,
                    custom.timeframe,
                ),
                CandleSource::Live => {
                    cache_keys::live_candles(&custom.exchange, &custom.symbol, custom.timeframe)
                }
            };
            let member = serde_json::to_string(&custom)?;
            self.cache
                .add_to_sorted_set(&set_key, member, custom.score())
                .await;
            debug!(
                "Aggregated {} candle for {}:{}",
                custom.timeframe, custom.exchange, custom.symbol
            );
        }

        Ok(())
    }
}

struct ExternalCandleHandler {
    service: Arc<DataService>,
}

#[async_trait]
impl MessageHandler for ExternalCandleHandler {
    async fn handle(&self, delivery: Delivery) -> Result<()> {
        // Malformed payloads are rejected without requeue; redelivering
        // them can never succeed.
        let event: CandleEvent = match delivery.decode() {
            Ok(event) => event,
            Err(e) => {
                error!("Rejecting undecodable candle event: {}", e);
                return Ok(());
            }
        };
        self.service.handle_base_candle(event).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::market_data::StateManager;
    use crate::domain::market::Candle;
    use crate::infrastructure::bus::InProcessBus;
    use crate::infrastructure::cache::InMemoryCache;
    use crate::infrastructure::persistence::InMemoryCandleRepository;
    use rust_decimal_macros::dec;

    fn service() -> (Arc<DataService>, Arc<InMemoryCache>, Arc<InMemoryCandleRepository>) {
        let bus: Arc<dyn MessageBus> = Arc::new(InProcessBus::new());
        let cache = Arc::new(InMemoryCache::new());
        let repository = Arc::new(InMemoryCandleRepository::new());
        let state = Arc::new(StateManager::new(cache.clone()));
        let aggregator = Arc::new(CandleAggregator::new(state, Arc::clone(&bus)));
        let service = Arc::new(DataService::new(
            bus,
            cache.clone(),
            repository.clone(),
            aggregator,
            vec![Timeframe::OneHour],
        ));
        (service, cache, repository)
    }

    fn event(close_time: &str) -> CandleEvent {
        CandleEvent {
            candle: Candle {
                exchange: "hyperliquid".to_string(),
                symbol: "BTC-USD".to_string(),
                timeframe: Timeframe::FifteenMin,
                timestamp: close_time.parse().unwrap(),
                open: dec!(1),
                high: dec!(3),
                low: dec!(1),
                close: dec!(2),
                volume: dec!(10),
                is_closed: true,
            },
            source: CandleSource::Live,
        }
    }

    #[tokio::test]
    async fn test_base_candle_persisted_and_cached() {
        let (service, cache, repository) = service();
        service.handle_base_candle(event("2024-01-01T00:15:00Z")).await.unwrap();

        let stored = repository
            .find_by("hyperliquid", "BTC-USD", Timeframe::FifteenMin, None, None, None)
            .await
            .unwrap();
        assert_eq!(stored.len(), 1);

        let members = cache
            .get_from_sorted_set_by_score(
                &cache_keys::live_candles("hyperliquid", "BTC-USD", Timeframe::FifteenMin),
                f64::NEG_INFINITY,
                f64::INFINITY,
            )
            .await;
        assert_eq!(members.len(), 1);
    }

    #[tokio::test]
    async fn test_redelivery_is_idempotent_at_persistence() {
        let (service, _cache, repository) = service();
        let e = event("2024-01-01T00:15:00Z");
        service.handle_base_candle(e.clone()).await.unwrap();
        service.handle_base_candle(e).await.unwrap();

        let stored = repository
            .find_by("hyperliquid", "BTC-USD", Timeframe::FifteenMin, None, None, None)
            .await
            .unwrap();
        assert_eq!(stored.len(), 1);
    }
}
