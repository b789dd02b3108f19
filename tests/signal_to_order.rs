//! Signal-to-order flow: a published strategy signal becomes a
//! risk-sized exchange order with lifecycle events reaching monitoring,
//! and the cancel path settles everything.

use obtrade::application::execution::{ExecutionService, RiskSettings};
use obtrade::application::monitoring::{MonitoringService, OrderTracker};
use obtrade::domain::constants::{cache_keys, exchanges, routing};
use obtrade::domain::market::Timeframe;
use obtrade::domain::trading::{
    Direction, ExecutionStatus, Order, OrderSide, OrderStatus, Signal, SignalType,
};
use obtrade::infrastructure::alert::{AlertManager, AlertSink, TracingSink};
use obtrade::infrastructure::bus::{publish_json, InProcessBus, MessageBus};
use obtrade::infrastructure::cache::{get_json, Cache, InMemoryCache};
use obtrade::infrastructure::exchange::PaperExchange;
use obtrade::infrastructure::persistence::InMemoryPositionRepository;
use chrono::Utc;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

fn signal() -> Signal {
    Signal {
        id: "sig-e2e-1".to_string(),
        strategy_name: "OrderBlock".to_string(),
        exchange: "paper".to_string(),
        symbol: "BTC-USD".to_string(),
        timeframe: Timeframe::OneHour,
        direction: Direction::Long,
        signal_type: SignalType::Entry,
        price_target: Some(dec!(68000)),
        stop_loss: Some(dec!(66000)),
        take_profit: Some(dec!(72000)),
        risk_reward_ratio: Some(dec!(2)),
        confidence_score: dec!(0.85),
        execution_status: ExecutionStatus::Pending,
        timestamp: Utc::now(),
        metadata: HashMap::new(),
        indicator_id: None,
    }
}

struct Pipeline {
    bus: Arc<dyn MessageBus>,
    cache: Arc<InMemoryCache>,
    exchange: Arc<PaperExchange>,
    execution: Arc<ExecutionService>,
    monitoring: Arc<MonitoringService>,
}

async fn pipeline() -> Pipeline {
    let bus: Arc<dyn MessageBus> = Arc::new(InProcessBus::new());
    let cache = Arc::new(InMemoryCache::new());
    let exchange = Arc::new(PaperExchange::new("paper", dec!(1000)));

    let execution = Arc::new(ExecutionService::new(
        exchange.clone(),
        Arc::clone(&bus),
        cache.clone(),
        RiskSettings {
            risk_per_trade: dec!(0.01),
            max_position_size: dec!(0.1),
            leverage: 1,
            fallback_equity: dec!(1000),
        },
    ));
    execution.start().await.unwrap();

    let sinks: Vec<Arc<dyn AlertSink>> = vec![Arc::new(TracingSink)];
    let tracker = Arc::new(OrderTracker::new(
        cache.clone(),
        Arc::new(InMemoryPositionRepository::new()),
    ));
    let monitoring = Arc::new(MonitoringService::new(
        Arc::clone(&bus),
        Arc::new(AlertManager::new(sinks)),
        tracker,
    ));
    monitoring.start().await.unwrap();

    Pipeline {
        bus,
        cache,
        exchange,
        execution,
        monitoring,
    }
}

async fn publish_signal(p: &Pipeline, signal: &Signal) {
    let routing_key = routing::signal_detected(&signal.exchange, &signal.symbol, signal.timeframe);
    publish_json(p.bus.as_ref(), exchanges::STRATEGY, &routing_key, signal)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_signal_becomes_sized_order_and_reaches_monitoring() {
    let p = pipeline().await;

    publish_signal(&p, &signal()).await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    // One open order on the exchange, sized (1000 * 0.01) / 2000.
    assert_eq!(p.exchange.open_order_count().await, 1);

    let active = p
        .cache
        .hash_get_all(&cache_keys::active_orders("paper", "BTC-USD"))
        .await;
    assert_eq!(active.len(), 1);
    let order: Order = serde_json::from_str(active.values().next().unwrap()).unwrap();
    assert_eq!(order.side, OrderSide::Buy);
    assert_eq!(order.size, dec!(0.005));
    assert_eq!(order.price, dec!(68000));
    assert_eq!(order.status, OrderStatus::Open);
    assert_eq!(order.signal_id.as_deref(), Some("sig-e2e-1"));

    // Monitoring saw the order.new event: live view and alert history.
    assert_eq!(p.monitoring.tracker().all_orders().await.len(), 1);
    let alerts = p.monitoring.alerts().recent_alerts(10).await;
    assert_eq!(alerts.len(), 1);

    p.bus.stop().await;
}

#[tokio::test]
async fn test_redelivered_signal_does_not_double_order() {
    let p = pipeline().await;

    let s = signal();
    publish_signal(&p, &s).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    publish_signal(&p, &s).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(p.exchange.open_order_count().await, 1);
    p.bus.stop().await;
}

#[tokio::test]
async fn test_cancel_path_settles_order_everywhere() {
    let p = pipeline().await;

    publish_signal(&p, &signal()).await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    let active = p
        .cache
        .hash_get_all(&cache_keys::active_orders("paper", "BTC-USD"))
        .await;
    let order: Order = serde_json::from_str(active.values().next().unwrap()).unwrap();

    p.execution.cancel_order(&order.id, "BTC-USD").await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    // Cache entry settled, active set emptied.
    let cached: Order = get_json(
        p.cache.as_ref() as &dyn Cache,
        &cache_keys::order("paper", "BTC-USD", &order.id),
    )
    .await
    .unwrap();
    assert_eq!(cached.status, OrderStatus::Cancelled);
    assert!(p
        .cache
        .hash_get_all(&cache_keys::active_orders("paper", "BTC-USD"))
        .await
        .is_empty());

    // Monitoring saw created then cancelled, in that order.
    assert!(p.monitoring.tracker().all_orders().await.is_empty());
    let alerts = p.monitoring.alerts().recent_alerts(10).await;
    assert_eq!(alerts.len(), 2);

    // Exchange agrees nothing is open.
    assert_eq!(p.exchange.open_order_count().await, 0);

    p.bus.stop().await;
}

#[tokio::test]
async fn test_exchange_failure_surfaces_as_failed_alert() {
    let p = pipeline().await;
    p.exchange.set_fail_orders(true);

    publish_signal(&p, &signal()).await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(p.exchange.open_order_count().await, 0);
    let alerts = p.monitoring.alerts().recent_alerts(10).await;
    assert_eq!(alerts.len(), 1);
    assert_eq!(
        alerts[0].alert_type,
        obtrade::domain::alert::AlertType::OrderFailed
    );

    p.bus.stop().await;
}
