use crate::domain::trading::{Order, OrderStatus, Position};
use crate::infrastructure::exchange::{
    Balance, ExchangeConnector, ExchangeOrder, OrderRequest, Ticker,
};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::info;

/// Simulated venue used by tests and the backtest runner. Orders are
/// accepted as open and settle only via cancel; prices come from a
/// settable ticker map.
pub struct PaperExchange {
    exchange_id: String,
    equity: Decimal,
    orders: Mutex<HashMap<String, ExchangeOrder>>,
    tickers: Mutex<HashMap<String, Decimal>>,
    next_id: AtomicU64,
    fail_orders: AtomicBool,
}

impl PaperExchange {
    pub fn new(exchange_id: impl Into<String>, equity: Decimal) -> Self {
        Self {
            exchange_id: exchange_id.into(),
            equity,
            orders: Mutex::new(HashMap::new()),
            tickers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            fail_orders: AtomicBool::new(false),
        }
    }

    /// Make subsequent `create_order` calls fail (test hook).
    pub fn set_fail_orders(&self, fail: bool) {
        self.fail_orders.store(fail, Ordering::SeqCst);
    }

    pub async fn set_ticker(&self, symbol: &str, last: Decimal) {
        self.tickers.lock().await.insert(symbol.to_string(), last);
    }

    pub async fn open_order_count(&self) -> usize {
        self.orders
            .lock()
            .await
            .values()
            .filter(|o| o.status == OrderStatus::Open)
            .count()
    }
}

#[async_trait]
impl ExchangeConnector for PaperExchange {
    fn id(&self) -> &str {
        &self.exchange_id
    }

    async fn initialize(&self) -> Result<()> {
        info!("Paper exchange initialized");
        Ok(())
    }

    async fn create_order(&self, request: &OrderRequest) -> Result<ExchangeOrder> {
        if self.fail_orders.load(Ordering::SeqCst) {
            return Err(anyhow!("simulated exchange failure"));
        }

        let id = format!("paper-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let order = ExchangeOrder {
            id: id.clone(),
            symbol: request.symbol.clone(),
            status: OrderStatus::Open,
            filled_size: Decimal::ZERO,
            average_fill_price: None,
            fee: dec!(0),
        };
        self.orders.lock().await.insert(id, order.clone());
        Ok(order)
    }

    async fn cancel_order(&self, id: &str, _symbol: Option<&str>) -> Result<ExchangeOrder> {
        let mut orders = self.orders.lock().await;
        let order = orders
            .get_mut(id)
            .ok_or_else(|| anyhow!("unknown order: {}", id))?;
        if order.status == OrderStatus::Open {
            order.status = OrderStatus::Cancelled;
        }
        Ok(order.clone())
    }

    async fn fetch_order(&self, id: &str, _symbol: Option<&str>) -> Result<ExchangeOrder> {
        self.orders
            .lock()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| anyhow!("unknown order: {}", id))
    }

    async fn fetch_open_orders(&self, _symbol: Option<&str>) -> Result<Vec<Order>> {
        Ok(Vec::new())
    }

    async fn fetch_positions(&self, _symbols: Option<&[String]>) -> Result<Vec<Position>> {
        Ok(Vec::new())
    }

    async fn fetch_balance(&self) -> Result<Balance> {
        let mut totals = HashMap::new();
        totals.insert("USDT".to_string(), self.equity);
        Ok(Balance { totals })
    }

    async fn fetch_ticker(&self, symbol: &str) -> Result<Option<Ticker>> {
        Ok(self.tickers.lock().await.get(symbol).map(|last| Ticker {
            symbol: symbol.to_string(),
            last: *last,
        }))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::trading::{OrderSide, OrderType};
    use crate::infrastructure::exchange::OrderParams;

    fn request() -> OrderRequest {
        OrderRequest {
            symbol: "BTC-USD".to_string(),
            order_type: OrderType::Limit,
            side: OrderSide::Buy,
            amount: dec!(0.005),
            price: Some(dec!(68000)),
            params: OrderParams {
                time_in_force: "GTC".to_string(),
                leverage: 1,
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn test_create_then_cancel() {
        let exchange = PaperExchange::new("paper", dec!(1000));
        let created = exchange.create_order(&request()).await.unwrap();
        assert_eq!(created.status, OrderStatus::Open);
        assert_eq!(exchange.open_order_count().await, 1);

        let cancelled = exchange.cancel_order(&created.id, None).await.unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert_eq!(exchange.open_order_count().await, 0);
    }

    #[tokio::test]
    async fn test_simulated_failure() {
        let exchange = PaperExchange::new("paper", dec!(1000));
        exchange.set_fail_orders(true);
        assert!(exchange.create_order(&request()).await.is_err());
    }
}
