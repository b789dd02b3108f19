//! Exchange connector boundary. The trait mirrors the venue surface the
//! execution and monitoring services need; [`PaperExchange`] backs tests
//! and backtests, [`RestExchange`] talks to a real venue.

mod paper;
mod rest;

pub use paper::PaperExchange;
pub use rest::{RestExchange, RestExchangeConfig};

use crate::domain::trading::{Order, OrderSide, OrderStatus, OrderType, Position};
use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Venue-specific order parameters forwarded with a creation request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal_id: Option<String>,
    pub time_in_force: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_loss: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub take_profit: Option<Decimal>,
    pub leverage: u32,
    pub reduce_only: bool,
}

/// A fully-specified order ready for submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub order_type: OrderType,
    pub side: OrderSide,
    pub amount: Decimal,
    pub price: Option<Decimal>,
    pub params: OrderParams,
}

/// Decoded venue response for an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeOrder {
    pub id: String,
    pub symbol: String,
    pub status: OrderStatus,
    #[serde(default)]
    pub filled_size: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_fill_price: Option<Decimal>,
    #[serde(default)]
    pub fee: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    pub last: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    /// Per-currency totals as reported by the venue.
    pub totals: HashMap<String, Decimal>,
}

impl Balance {
    /// Account equity in quote terms, preferring stablecoins.
    pub fn total_equity(&self) -> Option<Decimal> {
        for currency in ["USDT", "USDC", "USD"] {
            if let Some(total) = self.totals.get(currency) {
                return Some(*total);
            }
        }
        None
    }
}

#[async_trait]
pub trait ExchangeConnector: Send + Sync {
    /// Stable venue identifier used in routing and cache keys.
    fn id(&self) -> &str;

    async fn initialize(&self) -> Result<()>;

    async fn create_order(&self, request: &OrderRequest) -> Result<ExchangeOrder>;

    async fn cancel_order(&self, id: &str, symbol: Option<&str>) -> Result<ExchangeOrder>;

    async fn fetch_order(&self, id: &str, symbol: Option<&str>) -> Result<ExchangeOrder>;

    async fn fetch_open_orders(&self, symbol: Option<&str>) -> Result<Vec<Order>>;

    async fn fetch_positions(&self, symbols: Option<&[String]>) -> Result<Vec<Position>>;

    async fn fetch_balance(&self) -> Result<Balance>;

    async fn fetch_ticker(&self, symbol: &str) -> Result<Option<Ticker>>;

    async fn close(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_balance_prefers_stablecoins() {
        let mut totals = HashMap::new();
        totals.insert("BTC".to_string(), dec!(0.5));
        totals.insert("USD".to_string(), dec!(500));
        totals.insert("USDT".to_string(), dec!(1000));
        let balance = Balance { totals };
        assert_eq!(balance.total_equity(), Some(dec!(1000)));
    }

    #[test]
    fn test_balance_without_quote_currency() {
        let mut totals = HashMap::new();
        totals.insert("BTC".to_string(), dec!(0.5));
        let balance = Balance { totals };
        assert_eq!(balance.total_equity(), None);
    }
}
