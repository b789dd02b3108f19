use crate::application::monitoring::OrderTracker;
use crate::domain::alert::{Alert, AlertType};
use crate::domain::constants::{exchanges, queues, routing};
use crate::domain::trading::{OrderEvent, OrderEventKind};
use crate::infrastructure::alert::AlertManager;
use crate::infrastructure::bus::{Delivery, MessageBus, MessageHandler};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info, instrument};

/// Consumes `order.#`, turns every order event into an operator alert and
/// keeps the live order view current.
pub struct MonitoringService {
    bus: Arc<dyn MessageBus>,
    alerts: Arc<AlertManager>,
    tracker: Arc<OrderTracker>,
}

impl MonitoringService {
    pub fn new(
        bus: Arc<dyn MessageBus>,
        alerts: Arc<AlertManager>,
        tracker: Arc<OrderTracker>,
    ) -> Self {
        Self {
            bus,
            alerts,
            tracker,
        }
    }

    pub async fn start(self: &Arc<Self>) -> Result<()> {
        info!("Starting monitoring service...");

        self.bus
            .bind_queue(exchanges::EXECUTION, queues::ORDERS, routing::ORDER_ALL)
            .await?;
        self.bus
            .subscribe(
                queues::ORDERS,
                Arc::new(OrderEventHandler {
                    service: Arc::clone(self),
                }),
            )
            .await?;

        info!("Monitoring service started successfully");
        Ok(())
    }

    pub async fn stop(&self) {
        info!("Stopping monitoring service...");
        self.bus.stop().await;
        info!("Monitoring service stopped");
    }

    pub fn tracker(&self) -> &OrderTracker {
        &self.tracker
    }

    pub fn alerts(&self) -> &AlertManager {
        &self.alerts
    }

    #[instrument(skip(self, event), fields(order_id = %event.order.id))]
    pub async fn handle_order_event(&self, event: OrderEvent) {
        info!("Received order event: {:?} {}", event.event, event.order.id);

        self.tracker.apply_order(&event.order).await;

        let (alert_type, verb) = match event.event {
            OrderEventKind::Created => (AlertType::OrderPlaced, "placed"),
            OrderEventKind::Cancelled => (AlertType::OrderCancelled, "cancelled"),
            OrderEventKind::Failed => (AlertType::OrderFailed, "failed"),
        };

        let alert = Alert {
            // Keyed by order id and event kind: a redelivered event dedups,
            // distinct lifecycle events for one order do not.
            id: format!("{}:{}", event.order.id, verb),
            alert_type,
            symbol: event.order.symbol.clone(),
            message: format!(
                "Order {} {} ({} {} @ {})",
                event.order.id, verb, event.order.side, event.order.size, event.order.price
            ),
            timestamp: event.timestamp,
            details: serde_json::to_value(&event).unwrap_or_default(),
        };

        if !self.alerts.send_alert(alert).await {
            error!("Alert delivery failed for order {}", event.order.id);
        }
    }
}

struct OrderEventHandler {
    service: Arc<MonitoringService>,
}

#[async_trait]
impl MessageHandler for OrderEventHandler {
    async fn handle(&self, delivery: Delivery) -> Result<()> {
        // Malformed payloads are rejected without requeue.
        let event: OrderEvent = match delivery.decode() {
            Ok(event) => event,
            Err(e) => {
                error!("Rejecting undecodable order event: {}", e);
                return Ok(());
            }
        };
        self.service.handle_order_event(event).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::trading::{Order, OrderSide, OrderStatus, OrderType};
    use crate::infrastructure::alert::{AlertSink, TracingSink};
    use crate::infrastructure::bus::InProcessBus;
    use crate::infrastructure::cache::InMemoryCache;
    use crate::infrastructure::persistence::InMemoryPositionRepository;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn service() -> Arc<MonitoringService> {
        let bus = Arc::new(InProcessBus::new());
        let sinks: Vec<Arc<dyn AlertSink>> = vec![Arc::new(TracingSink)];
        let alerts = Arc::new(AlertManager::new(sinks));
        let tracker = Arc::new(OrderTracker::new(
            Arc::new(InMemoryCache::new()),
            Arc::new(InMemoryPositionRepository::new()),
        ));
        Arc::new(MonitoringService::new(bus, alerts, tracker))
    }

    fn event(kind: OrderEventKind, status: OrderStatus) -> OrderEvent {
        OrderEvent {
            event: kind,
            order: Order {
                id: "o-1".to_string(),
                signal_id: None,
                exchange: "paper".to_string(),
                symbol: "BTC-USD".to_string(),
                order_type: OrderType::Limit,
                side: OrderSide::Buy,
                price: dec!(68000),
                size: dec!(0.005),
                value: dec!(340),
                status,
                filled_size: dec!(0),
                average_fill_price: None,
                fee: dec!(0),
                created_at: Utc::now(),
                updated_at: Utc::now(),
                metadata: Default::default(),
            },
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_order_event_builds_alert_and_updates_view() {
        let service = service();
        service
            .handle_order_event(event(OrderEventKind::Created, OrderStatus::Open))
            .await;

        assert_eq!(service.tracker().all_orders().await.len(), 1);
        let alerts = service.alerts().recent_alerts(10).await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_type, AlertType::OrderPlaced);
    }

    #[tokio::test]
    async fn test_redelivered_event_does_not_duplicate_alert() {
        let service = service();
        let e = event(OrderEventKind::Created, OrderStatus::Open);
        service.handle_order_event(e.clone()).await;
        service.handle_order_event(e).await;
        assert_eq!(service.alerts().recent_alerts(10).await.len(), 1);
    }

    #[tokio::test]
    async fn test_lifecycle_events_produce_distinct_alerts() {
        let service = service();
        service
            .handle_order_event(event(OrderEventKind::Created, OrderStatus::Open))
            .await;
        service
            .handle_order_event(event(OrderEventKind::Cancelled, OrderStatus::Cancelled))
            .await;

        let alerts = service.alerts().recent_alerts(10).await;
        assert_eq!(alerts.len(), 2);
        // The cancel settled the order out of the live view.
        assert!(service.tracker().all_orders().await.is_empty());
    }
}
