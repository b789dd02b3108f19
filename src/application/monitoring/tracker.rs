use crate::domain::constants::cache_keys;
use crate::domain::repositories::PositionRepository;
use crate::domain::trading::{Order, OrderStatus, Position};
use crate::infrastructure::cache::Cache;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// In-memory views of live orders and positions for the operator surface.
/// The cache and repositories stay authoritative; this is a read-through
/// accelerator fed by order events and periodic refreshes.
pub struct OrderTracker {
    cache: Arc<dyn Cache>,
    positions_repo: Arc<dyn PositionRepository>,
    orders: Mutex<HashMap<String, Order>>,
    positions: Mutex<HashMap<String, Position>>,
}

impl OrderTracker {
    pub fn new(cache: Arc<dyn Cache>, positions_repo: Arc<dyn PositionRepository>) -> Self {
        Self {
            cache,
            positions_repo,
            orders: Mutex::new(HashMap::new()),
            positions: Mutex::new(HashMap::new()),
        }
    }

    /// Warm the order view from the active-orders hash.
    pub async fn load_active_orders(&self, exchange: &str, symbol: &str) {
        let key = cache_keys::active_orders(exchange, symbol);
        let entries = self.cache.hash_get_all(&key).await;
        let mut orders = self.orders.lock().await;
        for (id, raw) in entries {
            match serde_json::from_str::<Order>(&raw) {
                Ok(order) => {
                    orders.insert(id, order);
                }
                Err(e) => warn!("Undecodable active order {}: {}", id, e),
            }
        }
    }

    /// Apply an order event: open orders enter the view, settled orders
    /// leave it. Replayed events converge to the same state.
    pub async fn apply_order(&self, order: &Order) {
        let mut orders = self.orders.lock().await;
        if order.status == OrderStatus::Open {
            orders.insert(order.id.clone(), order.clone());
            debug!("Tracking open order {}", order.id);
        } else {
            orders.remove(&order.id);
            debug!("Order {} settled as {}", order.id, order.status);
        }
    }

    pub async fn refresh_positions(&self, exchange: &str, symbol: Option<&str>) {
        match self.positions_repo.find_open(exchange, symbol).await {
            Ok(open) => {
                let mut positions = self.positions.lock().await;
                positions.clear();
                for position in open {
                    positions.insert(position.id.clone(), position);
                }
            }
            Err(e) => warn!("Failed to refresh positions: {:#}", e),
        }
    }

    /// Snapshot of the live orders view.
    pub async fn all_orders(&self) -> Vec<Order> {
        self.orders.lock().await.values().cloned().collect()
    }

    /// Snapshot of the live positions view.
    pub async fn all_positions(&self) -> Vec<Position> {
        self.positions.lock().await.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::trading::{OrderSide, OrderType};
    use crate::infrastructure::cache::InMemoryCache;
    use crate::infrastructure::persistence::InMemoryPositionRepository;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn order(id: &str, status: OrderStatus) -> Order {
        Order {
            id: id.to_string(),
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
        }
    }

    fn tracker() -> OrderTracker {
        OrderTracker::new(
            Arc::new(InMemoryCache::new()),
            Arc::new(InMemoryPositionRepository::new()),
        )
    }

    #[tokio::test]
    async fn test_open_orders_tracked_until_settled() {
        let tracker = tracker();
        tracker.apply_order(&order("o-1", OrderStatus::Open)).await;
        assert_eq!(tracker.all_orders().await.len(), 1);

        tracker
            .apply_order(&order("o-1", OrderStatus::Cancelled))
            .await;
        assert!(tracker.all_orders().await.is_empty());
    }

    #[tokio::test]
    async fn test_replayed_event_converges() {
        let tracker = tracker();
        let open = order("o-1", OrderStatus::Open);
        tracker.apply_order(&open).await;
        tracker.apply_order(&open).await;
        assert_eq!(tracker.all_orders().await.len(), 1);
    }

    #[tokio::test]
    async fn test_load_active_orders_from_cache() {
        let cache = Arc::new(InMemoryCache::new());
        let open = order("o-9", OrderStatus::Open);
        cache
            .hash_set(
                &cache_keys::active_orders("paper", "BTC-USD"),
                "o-9",
                serde_json::to_string(&open).unwrap(),
            )
            .await;

        let tracker = OrderTracker::new(
            cache,
            Arc::new(InMemoryPositionRepository::new()),
        );
        tracker.load_active_orders("paper", "BTC-USD").await;
        assert_eq!(tracker.all_orders().await.len(), 1);
    }
}
