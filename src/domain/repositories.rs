//! Behavioral contracts of the persistence layer. Implementations live in
//! `infrastructure::persistence`; an in-memory set backs tests and the
//! backtest runner.

use crate::domain::indicators::OrderBlock;
use crate::domain::market::{Candle, Timeframe};
use crate::domain::trading::{Order, OrderStatus, Position, Signal};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

#[async_trait]
pub trait CandleRepository: Send + Sync {
    /// Insert or ignore on the `(exchange, symbol, timeframe, timestamp)`
    /// identity; returns the number of new rows.
    async fn upsert(&self, candles: &[Candle]) -> Result<u64>;

    async fn find_by(
        &self,
        exchange: &str,
        symbol: &str,
        timeframe: Timeframe,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: Option<i64>,
    ) -> Result<Vec<Candle>>;

    async fn latest(
        &self,
        exchange: &str,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<Option<Candle>>;
}

#[async_trait]
pub trait IndicatorRepository: Send + Sync {
    async fn save(&self, block: &OrderBlock) -> Result<()>;

    /// Active instances whose span overlaps `[min_price, max_price]` for
    /// any of the given timeframes.
    async fn find_active_in_price_range(
        &self,
        exchange: &str,
        symbol: &str,
        min_price: Decimal,
        max_price: Decimal,
        timeframes: &[Timeframe],
    ) -> Result<Vec<OrderBlock>>;

    /// Persist refreshed `touched` / `mitigation_percentage` / `status`.
    /// Returns false when the instance is unknown.
    async fn update_indicator_status(&self, block: &OrderBlock) -> Result<bool>;
}

#[async_trait]
pub trait SignalRepository: Send + Sync {
    async fn save(&self, signal: &Signal) -> Result<()>;
    async fn find_active(&self, exchange: &str, symbol: &str) -> Result<Vec<Signal>>;
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn save(&self, order: &Order) -> Result<()>;
    async fn find_by_status(&self, status: OrderStatus) -> Result<Vec<Order>>;
    async fn find_by_id(&self, id: &str) -> Result<Option<Order>>;
}

#[async_trait]
pub trait PositionRepository: Send + Sync {
    async fn find_open(&self, exchange: &str, symbol: Option<&str>) -> Result<Vec<Position>>;
    async fn save(&self, position: &Position) -> Result<()>;
}
