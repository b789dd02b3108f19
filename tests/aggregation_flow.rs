//! End-to-end aggregation: four 15-minute bars published on the bus roll
//! into exactly one closed hourly candle.

use async_trait::async_trait;
use obtrade::application::market_data::{CandleAggregator, DataService, StateManager};
use obtrade::domain::constants::{cache_keys, exchanges, queues, routing};
use obtrade::domain::market::{Candle, CandleEvent, CandleSource, Timeframe};
use obtrade::infrastructure::bus::{
    publish_json, Delivery, InProcessBus, MessageBus, MessageHandler,
};
use obtrade::infrastructure::cache::{Cache, InMemoryCache};
use obtrade::domain::repositories::CandleRepository;
use obtrade::infrastructure::persistence::InMemoryCandleRepository;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tokio::sync::Mutex;

struct CollectingHandler {
    events: Arc<Mutex<Vec<CandleEvent>>>,
}

#[async_trait]
impl MessageHandler for CollectingHandler {
    async fn handle(&self, delivery: Delivery) -> anyhow::Result<()> {
        self.events.lock().await.push(delivery.decode()?);
        Ok(())
    }
}

fn base_candle(close_time: &str, o: Decimal, h: Decimal, l: Decimal, c: Decimal, v: Decimal) -> Candle {
    Candle {
        exchange: "hyperliquid".to_string(),
        symbol: "BTC-USD".to_string(),
        timeframe: Timeframe::FifteenMin,
        timestamp: close_time.parse().unwrap(),
        open: o,
        high: h,
        low: l,
        close: c,
        volume: v,
        is_closed: true,
    }
}

#[tokio::test]
async fn test_four_base_bars_emit_one_hourly_candle() {
    let bus: Arc<dyn MessageBus> = Arc::new(InProcessBus::new());
    let cache = Arc::new(InMemoryCache::new());
    let repository = Arc::new(InMemoryCandleRepository::new());

    let state = Arc::new(StateManager::new(cache.clone()));
    let aggregator = Arc::new(CandleAggregator::new(state, Arc::clone(&bus)));
    let service = Arc::new(DataService::new(
        Arc::clone(&bus),
        cache.clone(),
        repository.clone(),
        aggregator,
        vec![Timeframe::OneHour],
    ));
    service.start().await.unwrap();

    // Observe everything republished on candle.new.#.
    let events = Arc::new(Mutex::new(Vec::new()));
    bus.bind_queue(exchanges::MARKET_DATA, queues::CANDLES, routing::CANDLE_ALL)
        .await
        .unwrap();
    bus.subscribe(
        queues::CANDLES,
        Arc::new(CollectingHandler {
            events: Arc::clone(&events),
        }),
    )
    .await
    .unwrap();

    let bars = [
        base_candle("2024-01-01T00:15:00Z", dec!(1), dec!(3), dec!(1), dec!(2), dec!(10)),
        base_candle("2024-01-01T00:30:00Z", dec!(2), dec!(4), dec!(2), dec!(3), dec!(20)),
        base_candle("2024-01-01T00:45:00Z", dec!(3), dec!(3), dec!(2), dec!(2.5), dec!(30)),
        base_candle("2024-01-01T01:00:00Z", dec!(2.5), dec!(5), dec!(2.5), dec!(4.5), dec!(40)),
    ];
    for bar in &bars {
        let routing_key = routing::external_new(&bar.exchange, &bar.symbol, bar.timeframe);
        publish_json(
            bus.as_ref(),
            exchanges::MARKET_DATA,
            &routing_key,
            &CandleEvent {
                candle: bar.clone(),
                source: CandleSource::Live,
            },
        )
        .await
        .unwrap();
    }

    tokio::time::sleep(std::time::Duration::from_millis(300)).await;

    let seen = events.lock().await;
    let hourly: Vec<&CandleEvent> = seen
        .iter()
        .filter(|e| e.candle.timeframe == Timeframe::OneHour)
        .collect();
    assert_eq!(hourly.len(), 1, "exactly one hourly emission expected");

    let candle = &hourly[0].candle;
    assert_eq!(candle.open, dec!(1));
    assert_eq!(candle.high, dec!(5));
    assert_eq!(candle.low, dec!(1));
    assert_eq!(candle.close, dec!(4.5));
    assert_eq!(candle.volume, dec!(100));
    assert!(candle.is_closed);
    assert_eq!(
        candle.timestamp,
        "2024-01-01T01:00:00Z".parse::<chrono::DateTime<chrono::Utc>>().unwrap()
    );

    // The four base bars were also republished for strategy consumption.
    let base: Vec<&CandleEvent> = seen
        .iter()
        .filter(|e| e.candle.timeframe == Timeframe::FifteenMin)
        .collect();
    assert_eq!(base.len(), 4);
    drop(seen);

    // Completed bucket leaves no partial key behind.
    assert!(cache.keys("partial:candle:*").await.is_empty());

    // Both timeframes landed in the live sorted set.
    let hourly_set = cache
        .get_from_sorted_set_by_score(
            &cache_keys::live_candles("hyperliquid", "BTC-USD", Timeframe::OneHour),
            f64::NEG_INFINITY,
            f64::INFINITY,
        )
        .await;
    assert_eq!(hourly_set.len(), 1);

    // Base bars are persisted once each.
    let stored = repository
        .find_by("hyperliquid", "BTC-USD", Timeframe::FifteenMin, None, None, None)
        .await
        .unwrap();
    assert_eq!(stored.len(), 4);

    bus.stop().await;
}

#[tokio::test]
async fn test_partial_survives_incomplete_bucket() {
    let bus: Arc<dyn MessageBus> = Arc::new(InProcessBus::new());
    let cache = Arc::new(InMemoryCache::new());
    let repository = Arc::new(InMemoryCandleRepository::new());

    let state = Arc::new(StateManager::new(cache.clone()));
    let aggregator = Arc::new(CandleAggregator::new(state.clone(), Arc::clone(&bus)));
    let service = Arc::new(DataService::new(
        Arc::clone(&bus),
        cache.clone(),
        repository,
        aggregator,
        vec![Timeframe::OneHour],
    ));
    service.start().await.unwrap();

    let bar = base_candle("2024-01-01T00:15:00Z", dec!(1), dec!(3), dec!(1), dec!(2), dec!(10));
    let routing_key = routing::external_new(&bar.exchange, &bar.symbol, bar.timeframe);
    publish_json(
        bus.as_ref(),
        exchanges::MARKET_DATA,
        &routing_key,
        &CandleEvent {
            candle: bar,
            source: CandleSource::Live,
        },
    )
    .await
    .unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    let partials = state.list_partial_candles("hyperliquid", "BTC-USD").await;
    assert_eq!(partials.len(), 1);
    assert!(!partials[0].is_closed);
    assert_eq!(partials[0].volume, dec!(10));

    bus.stop().await;
}
