use crate::domain::constants::{cache_keys, exchanges, queues, routing, ttl};
use crate::domain::decimal::quantize_size;
use crate::domain::trading::{
    Direction, Order, OrderEvent, OrderEventKind, OrderSide, OrderStatus, OrderType, Signal,
    SignalType,
};
use crate::infrastructure::bus::{publish_json, Delivery, MessageBus, MessageHandler};
use crate::infrastructure::cache::{get_json, set_json, Cache};
use crate::infrastructure::exchange::{ExchangeConnector, OrderParams, OrderRequest};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct RiskSettings {
    /// Fraction of account equity risked per trade.
    pub risk_per_trade: Decimal,
    pub max_position_size: Decimal,
    pub leverage: u32,
    /// Equity assumed when the venue cannot report a balance.
    pub fallback_equity: Decimal,
}

impl Default for RiskSettings {
    fn default() -> Self {
        Self {
            risk_per_trade: dec!(0.01),
            max_position_size: dec!(0.1),
            leverage: 1,
            fallback_equity: dec!(10000),
        }
    }
}

/// Translates strategy signals into exchange orders: validates, clamps
/// entries to the current price corridor, sizes by risk, submits, caches
/// the resulting order and publishes its lifecycle events.
///
/// Signal events are serialized per symbol so racing signals for the same
/// market cannot double-size.
pub struct ExecutionService {
    exchange: Arc<dyn ExchangeConnector>,
    bus: Arc<dyn MessageBus>,
    cache: Arc<dyn Cache>,
    risk: RiskSettings,
    workers: Mutex<HashMap<String, mpsc::UnboundedSender<Signal>>>,
}

impl ExecutionService {
    pub fn new(
        exchange: Arc<dyn ExchangeConnector>,
        bus: Arc<dyn MessageBus>,
        cache: Arc<dyn Cache>,
        risk: RiskSettings,
    ) -> Self {
        Self {
            exchange,
            bus,
            cache,
            risk,
            workers: Mutex::new(HashMap::new()),
        }
    }

    pub async fn start(self: &Arc<Self>) -> Result<()> {
        info!("Starting execution service...");

        self.exchange
            .initialize()
            .await
            .context("exchange initialization failed")?;

        // Producer side: the order-events queue and its bindings exist
        // before the first event is published, so nothing is dropped when
        // monitoring attaches later.
        self.bus.declare_exchange(exchanges::EXECUTION).await?;
        self.bus.declare_queue(queues::ORDERS).await?;
        for pattern in ["order.new.#", "order.cancelled.#", "order.failed.#"] {
            self.bus
                .bind_queue(exchanges::EXECUTION, queues::ORDERS, pattern)
                .await?;
        }

        self.bus
            .bind_queue(exchanges::STRATEGY, queues::SIGNALS, routing::SIGNAL_ALL)
            .await?;
        self.bus
            .subscribe(
                queues::SIGNALS,
                Arc::new(SignalHandler {
                    service: Arc::clone(self),
                }),
            )
            .await?;

        info!("Execution service started successfully");
        Ok(())
    }

    pub async fn stop(&self) {
        info!("Stopping execution service...");
        self.workers.lock().await.clear();
        if let Err(e) = self.exchange.close().await {
            warn!("Error closing exchange connector: {:#}", e);
        }
        self.bus.stop().await;
        info!("Execution service stopped");
    }

    async fn dispatch(self: &Arc<Self>, signal: Signal) {
        let symbol = signal.symbol.clone();
        let mut workers = self.workers.lock().await;
        let sender = workers.entry(symbol.clone()).or_insert_with(|| {
            let (tx, mut rx) = mpsc::unbounded_channel::<Signal>();
            let service = Arc::clone(self);
            tokio::spawn(async move {
                while let Some(signal) = rx.recv().await {
                    service.handle_signal(signal).await;
                }
            });
            tx
        });
        if sender.send(signal).is_err() {
            warn!("Worker for {} is gone, dropping signal", symbol);
        }
    }

    #[instrument(skip(self, signal), fields(signal_id = %signal.id, symbol = %signal.symbol))]
    async fn handle_signal(&self, signal: Signal) {
        info!("Received signal: {}", signal.id);

        // At-least-once delivery: a signal already recorded as processed
        // must not size and submit a second order.
        let signal_key = cache_keys::signal(self.exchange.id(), &signal.symbol, &signal.id);
        if self.cache.exists(&signal_key).await {
            warn!("Signal {} already processed, skipping redelivery", signal.id);
            return;
        }

        match self.process_signal(&signal).await {
            Some(request) => match self.execute_order(&signal, request).await {
                Some(order) => info!("Order executed successfully: {}", order.id),
                None => error!("Failed to execute order for signal: {}", signal.id),
            },
            None => warn!("Signal rejected: {}", signal.id),
        }
    }

    /// Validate a signal against current market conditions and turn it
    /// into order parameters, or reject it.
    pub async fn process_signal(&self, signal: &Signal) -> Option<OrderRequest> {
        let price_target = match signal.price_target {
            Some(price) => price,
            None => {
                error!("Invalid signal format: missing price target");
                return None;
            }
        };

        // Current market price, falling back to the signal's own target.
        let current_price = match self.exchange.fetch_ticker(&signal.symbol).await {
            Ok(Some(ticker)) => ticker.last,
            Ok(None) => price_target,
            Err(e) => {
                warn!("Failed to fetch market data for signal validation: {:#}", e);
                price_target
            }
        };

        // Entries more than 20% away from the market are clamped to 10%.
        let mut entry = price_target;
        if current_price > Decimal::ZERO {
            if entry < current_price * dec!(0.8) {
                info!(
                    "Signal {} entry price too far from current price. Adjusting entry.",
                    signal.id
                );
                entry = current_price * dec!(0.9);
            } else if entry > current_price * dec!(1.2) {
                info!(
                    "Signal {} entry price too far from current price. Adjusting entry.",
                    signal.id
                );
                entry = current_price * dec!(1.1);
            }
        }

        let mut size = self.position_size(signal, entry).await;
        if signal.confidence_score < dec!(0.8) {
            size *= signal.confidence_score;
        }
        size = size.min(self.risk.max_position_size);

        // Record the processed signal for monitoring reads.
        let signal_key = cache_keys::signal(self.exchange.id(), &signal.symbol, &signal.id);
        set_json(self.cache.as_ref(), &signal_key, signal, Some(ttl::DAY)).await;

        let request = OrderRequest {
            symbol: signal.symbol.clone(),
            order_type: OrderType::Limit,
            side: match signal.direction {
                Direction::Long => OrderSide::Buy,
                Direction::Short => OrderSide::Sell,
            },
            amount: size,
            price: Some(entry),
            params: OrderParams {
                signal_id: Some(signal.id.clone()),
                time_in_force: "GTC".to_string(),
                stop_loss: signal.stop_loss,
                take_profit: signal.take_profit,
                leverage: self.risk.leverage,
                reduce_only: signal.signal_type == SignalType::Exit,
            },
        };

        info!("Processed signal {} into order parameters", signal.id);
        Some(request)
    }

    /// `(equity * risk_per_trade) / |entry - stop|`, rounded to 6 dp;
    /// falls back to a minimal size when anything is missing.
    async fn position_size(&self, signal: &Signal, entry: Decimal) -> Decimal {
        let Some(stop_loss) = signal.stop_loss else {
            return dec!(0.01);
        };
        let price_risk = (entry - stop_loss).abs();
        if price_risk.is_zero() {
            return dec!(0.01);
        }

        let equity = match self.exchange.fetch_balance().await {
            Ok(balance) => balance.total_equity().unwrap_or_else(|| {
                warn!("Could not determine account equity, using default value");
                self.risk.fallback_equity
            }),
            Err(e) => {
                warn!("Error fetching balance: {:#}", e);
                self.risk.fallback_equity
            }
        };

        let size = quantize_size(equity * self.risk.risk_per_trade / price_risk);
        info!(
            "Calculated position size: {} for {} with {}% risk",
            size,
            signal.symbol,
            self.risk.risk_per_trade * dec!(100)
        );
        size
    }

    /// Submit to the exchange, cache the order, publish the order event.
    /// Submission is never retried; a failure becomes an `order.failed`
    /// event with a synthetic order.
    pub async fn execute_order(&self, signal: &Signal, request: OrderRequest) -> Option<Order> {
        let price = request.price.unwrap_or_default();
        info!(
            "Executing {:?} {} order for {}: {} @ {}",
            request.order_type, request.side, request.symbol, request.amount, price
        );

        match self.exchange.create_order(&request).await {
            Ok(response) => {
                let now = Utc::now();
                let order = Order {
                    id: response.id,
                    signal_id: Some(signal.id.clone()),
                    exchange: self.exchange.id().to_string(),
                    symbol: request.symbol.clone(),
                    order_type: request.order_type,
                    side: request.side,
                    price,
                    size: request.amount,
                    value: price * request.amount,
                    status: response.status,
                    filled_size: response.filled_size,
                    average_fill_price: response.average_fill_price,
                    fee: response.fee,
                    created_at: now,
                    updated_at: now,
                    metadata: HashMap::new(),
                };

                self.cache_order(&order).await;
                self.publish_order_event(&order, OrderEventKind::Created)
                    .await;
                Some(order)
            }
            Err(e) => {
                error!("Error executing order: {:#}", e);
                let now = Utc::now();
                let failed = Order {
                    id: format!("failed-{}", Uuid::new_v4()),
                    signal_id: Some(signal.id.clone()),
                    exchange: self.exchange.id().to_string(),
                    symbol: request.symbol.clone(),
                    order_type: request.order_type,
                    side: request.side,
                    price,
                    size: request.amount,
                    value: price * request.amount,
                    status: OrderStatus::Failed,
                    filled_size: Decimal::ZERO,
                    average_fill_price: None,
                    fee: Decimal::ZERO,
                    created_at: now,
                    updated_at: now,
                    metadata: HashMap::new(),
                };
                self.publish_order_event(&failed, OrderEventKind::Failed)
                    .await;
                None
            }
        }
    }

    /// Cancel an order on the exchange, settle the cached copy, and
    /// publish the cancellation event.
    pub async fn cancel_order(&self, order_id: &str, symbol: &str) -> Option<Order> {
        info!("Cancelling order {} for {}", order_id, symbol);

        if let Err(e) = self.exchange.cancel_order(order_id, Some(symbol)).await {
            error!("Error cancelling order {}: {:#}", order_id, e);
            return None;
        }

        let order_key = cache_keys::order(self.exchange.id(), symbol, order_id);
        let mut order = match get_json::<Order>(self.cache.as_ref(), &order_key).await {
            Some(order) => order,
            None => match self.exchange.fetch_order(order_id, Some(symbol)).await {
                Ok(response) => {
                    let now = Utc::now();
                    Order {
                        id: response.id,
                        signal_id: None,
                        exchange: self.exchange.id().to_string(),
                        symbol: symbol.to_string(),
                        order_type: OrderType::Limit,
                        side: OrderSide::Buy,
                        price: Decimal::ZERO,
                        size: response.filled_size,
                        value: Decimal::ZERO,
                        status: OrderStatus::Cancelled,
                        filled_size: response.filled_size,
                        average_fill_price: response.average_fill_price,
                        fee: response.fee,
                        created_at: now,
                        updated_at: now,
                        metadata: HashMap::new(),
                    }
                }
                Err(fetch_error) => {
                    warn!(
                        "Could not fetch order details after cancellation: {:#}",
                        fetch_error
                    );
                    let now = Utc::now();
                    Order {
                        id: order_id.to_string(),
                        signal_id: None,
                        exchange: self.exchange.id().to_string(),
                        symbol: symbol.to_string(),
                        order_type: OrderType::Limit,
                        side: OrderSide::Buy,
                        price: Decimal::ZERO,
                        size: Decimal::ZERO,
                        value: Decimal::ZERO,
                        status: OrderStatus::Cancelled,
                        filled_size: Decimal::ZERO,
                        average_fill_price: None,
                        fee: Decimal::ZERO,
                        created_at: now,
                        updated_at: now,
                        metadata: HashMap::new(),
                    }
                }
            },
        };

        if order.status.can_transition_to(OrderStatus::Cancelled) {
            order.status = OrderStatus::Cancelled;
        }
        order.updated_at = Utc::now();

        self.cache_order(&order).await;
        self.publish_order_event(&order, OrderEventKind::Cancelled)
            .await;

        info!("Order {} cancelled successfully", order_id);
        Some(order)
    }

    /// Write the order under its key and keep the active-orders hash in
    /// step with its status.
    async fn cache_order(&self, order: &Order) {
        let order_key = cache_keys::order(&order.exchange, &order.symbol, &order.id);
        set_json(self.cache.as_ref(), &order_key, order, Some(ttl::ORDER_DATA)).await;

        let active_key = cache_keys::active_orders(&order.exchange, &order.symbol);
        if order.status == OrderStatus::Open {
            if let Ok(payload) = serde_json::to_string(order) {
                self.cache.hash_set(&active_key, &order.id, payload).await;
            }
        } else {
            self.cache.hash_delete(&active_key, &order.id).await;
        }
        debug!("Cached order {} in {}", order.id, order_key);
    }

    async fn publish_order_event(&self, order: &Order, kind: OrderEventKind) {
        let routing_key = match kind {
            OrderEventKind::Created => routing::order_new(&order.exchange, &order.symbol),
            OrderEventKind::Cancelled => routing::order_cancelled(&order.exchange, &order.symbol),
            OrderEventKind::Failed => routing::order_failed(&order.exchange, &order.symbol),
        };

        let event = OrderEvent {
            event: kind,
            order: order.clone(),
            timestamp: Utc::now(),
        };

        match publish_json(self.bus.as_ref(), exchanges::EXECUTION, &routing_key, &event).await {
            Ok(()) => info!("Published {:?} event for order {}", kind, order.id),
            Err(e) => error!("Error publishing order event: {:#}", e),
        }
    }
}

struct SignalHandler {
    service: Arc<ExecutionService>,
}

#[async_trait]
impl MessageHandler for SignalHandler {
    async fn handle(&self, delivery: Delivery) -> Result<()> {
        // Malformed payloads are rejected without requeue.
        let signal: Signal = match delivery.decode() {
            Ok(signal) => signal,
            Err(e) => {
                error!("Rejecting undecodable signal: {}", e);
                return Ok(());
            }
        };
        self.service.dispatch(signal).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::Timeframe;
    use crate::domain::trading::ExecutionStatus;
    use crate::infrastructure::bus::InProcessBus;
    use crate::infrastructure::cache::InMemoryCache;
    use crate::infrastructure::exchange::PaperExchange;

    fn signal() -> Signal {
        Signal {
            id: "sig-1".to_string(),
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

    struct Fixture {
        service: Arc<ExecutionService>,
        exchange: Arc<PaperExchange>,
        cache: Arc<InMemoryCache>,
        bus: Arc<InProcessBus>,
    }

    fn fixture(equity: Decimal) -> Fixture {
        let exchange = Arc::new(PaperExchange::new("paper", equity));
        let cache = Arc::new(InMemoryCache::new());
        let bus = Arc::new(InProcessBus::new());
        let service = Arc::new(ExecutionService::new(
            exchange.clone(),
            bus.clone(),
            cache.clone(),
            RiskSettings {
                risk_per_trade: dec!(0.01),
                max_position_size: dec!(0.1),
                leverage: 1,
                fallback_equity: dec!(10000),
            },
        ));
        Fixture {
            service,
            exchange,
            cache,
            bus,
        }
    }

    #[tokio::test]
    async fn test_signal_sized_by_risk() {
        let f = fixture(dec!(1000));
        let request = f.service.process_signal(&signal()).await.unwrap();

        // 1000 * 0.01 / |68000 - 66000| = 0.005
        assert_eq!(request.amount, dec!(0.005));
        assert_eq!(request.side, OrderSide::Buy);
        assert_eq!(request.price, Some(dec!(68000)));
        assert_eq!(request.params.stop_loss, Some(dec!(66000)));
        assert_eq!(request.params.take_profit, Some(dec!(72000)));
        assert_eq!(request.params.time_in_force, "GTC");
        assert!(!request.params.reduce_only);
    }

    #[tokio::test]
    async fn test_low_confidence_scales_size() {
        let f = fixture(dec!(1000));
        let mut s = signal();
        s.confidence_score = dec!(0.5);
        let request = f.service.process_signal(&s).await.unwrap();
        assert_eq!(request.amount, dec!(0.0025));
    }

    #[tokio::test]
    async fn test_size_capped_at_max() {
        let f = fixture(dec!(10000000));
        let request = f.service.process_signal(&signal()).await.unwrap();
        assert_eq!(request.amount, dec!(0.1));
    }

    #[tokio::test]
    async fn test_entry_clamped_to_price_corridor() {
        let f = fixture(dec!(1000));
        f.exchange.set_ticker("BTC-USD", dec!(100000)).await;
        let request = f.service.process_signal(&signal()).await.unwrap();
        // 68000 is below 80% of 100000; clamp to 90%.
        assert_eq!(request.price, Some(dec!(90000)));
    }

    #[tokio::test]
    async fn test_exit_signal_is_reduce_only() {
        let f = fixture(dec!(1000));
        let mut s = signal();
        s.signal_type = SignalType::Exit;
        let request = f.service.process_signal(&s).await.unwrap();
        assert!(request.params.reduce_only);
    }

    #[tokio::test]
    async fn test_execute_caches_and_publishes_order() {
        let f = fixture(dec!(1000));
        f.bus
            .bind_queue(exchanges::EXECUTION, queues::ORDERS, routing::ORDER_ALL)
            .await
            .unwrap();

        let s = signal();
        let request = f.service.process_signal(&s).await.unwrap();
        let order = f.service.execute_order(&s, request).await.unwrap();

        assert_eq!(order.status, OrderStatus::Open);
        assert_eq!(order.signal_id.as_deref(), Some("sig-1"));

        let cached: Order = get_json(
            f.cache.as_ref() as &dyn Cache,
            &cache_keys::order("paper", "BTC-USD", &order.id),
        )
        .await
        .unwrap();
        assert_eq!(cached.id, order.id);

        let active = f
            .cache
            .hash_get_all(&cache_keys::active_orders("paper", "BTC-USD"))
            .await;
        assert!(active.contains_key(&order.id));
        assert_eq!(f.bus.queue_depth(queues::ORDERS).await, 1);
    }

    #[tokio::test]
    async fn test_cancel_updates_cache_and_publishes() {
        let f = fixture(dec!(1000));
        f.bus
            .bind_queue(exchanges::EXECUTION, queues::ORDERS, routing::ORDER_ALL)
            .await
            .unwrap();

        let s = signal();
        let request = f.service.process_signal(&s).await.unwrap();
        let order = f.service.execute_order(&s, request).await.unwrap();

        let cancelled = f.service.cancel_order(&order.id, "BTC-USD").await.unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);

        let cached: Order = get_json(
            f.cache.as_ref() as &dyn Cache,
            &cache_keys::order("paper", "BTC-USD", &order.id),
        )
        .await
        .unwrap();
        assert_eq!(cached.status, OrderStatus::Cancelled);

        let active = f
            .cache
            .hash_get_all(&cache_keys::active_orders("paper", "BTC-USD"))
            .await;
        assert!(active.is_empty());

        // order.new then order.cancelled.
        assert_eq!(f.bus.queue_depth(queues::ORDERS).await, 2);
    }

    #[tokio::test]
    async fn test_exchange_failure_publishes_failed_event() {
        let f = fixture(dec!(1000));
        f.bus
            .bind_queue(exchanges::EXECUTION, queues::ORDERS, routing::ORDER_ALL)
            .await
            .unwrap();
        f.exchange.set_fail_orders(true);

        let s = signal();
        let request = f.service.process_signal(&s).await.unwrap();
        assert!(f.service.execute_order(&s, request).await.is_none());
        assert_eq!(f.bus.queue_depth(queues::ORDERS).await, 1);

        // Nothing was cached for the failed order.
        let active = f
            .cache
            .hash_get_all(&cache_keys::active_orders("paper", "BTC-USD"))
            .await;
        assert!(active.is_empty());
    }
}
