//! In-memory repository implementations backing unit tests and the
//! backtest runner.

use crate::domain::indicators::{IndicatorStatus, OrderBlock};
use crate::domain::market::{Candle, Timeframe};
use crate::domain::repositories::{
    CandleRepository, IndicatorRepository, OrderRepository, PositionRepository, SignalRepository,
};
use crate::domain::trading::{Order, OrderStatus, Position, PositionStatus, Signal};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use tokio::sync::Mutex;

#[derive(Default)]
pub struct InMemoryCandleRepository {
    candles: Mutex<HashMap<(String, String, Timeframe, i64), Candle>>,
}

impl InMemoryCandleRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CandleRepository for InMemoryCandleRepository {
    async fn upsert(&self, candles: &[Candle]) -> Result<u64> {
        let mut store = self.candles.lock().await;
        let mut inserted = 0;
        for candle in candles {
            let key = (
                candle.exchange.clone(),
                candle.symbol.clone(),
                candle.timeframe,
                candle.timestamp.timestamp_millis(),
            );
            if !store.contains_key(&key) {
                store.insert(key, candle.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn find_by(
        &self,
        exchange: &str,
        symbol: &str,
        timeframe: Timeframe,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: Option<i64>,
    ) -> Result<Vec<Candle>> {
        let store = self.candles.lock().await;
        let mut matches: Vec<Candle> = store
            .values()
            .filter(|c| {
                c.exchange == exchange
                    && c.symbol == symbol
                    && c.timeframe == timeframe
                    && start.map(|s| c.timestamp >= s).unwrap_or(true)
                    && end.map(|e| c.timestamp <= e).unwrap_or(true)
            })
            .cloned()
            .collect();
        matches.sort_by_key(|c| c.timestamp);
        if let Some(limit) = limit {
            matches.truncate(limit as usize);
        }
        Ok(matches)
    }

    async fn latest(
        &self,
        exchange: &str,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<Option<Candle>> {
        Ok(self
            .find_by(exchange, symbol, timeframe, None, None, None)
            .await?
            .into_iter()
            .last())
    }
}

#[derive(Default)]
pub struct InMemoryIndicatorRepository {
    blocks: Mutex<HashMap<String, OrderBlock>>,
}

impl InMemoryIndicatorRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all(&self) -> Vec<OrderBlock> {
        self.blocks.lock().await.values().cloned().collect()
    }
}

#[async_trait]
impl IndicatorRepository for InMemoryIndicatorRepository {
    async fn save(&self, block: &OrderBlock) -> Result<()> {
        let mut blocks = self.blocks.lock().await;
        blocks.entry(block.id.clone()).or_insert_with(|| block.clone());
        Ok(())
    }

    async fn find_active_in_price_range(
        &self,
        exchange: &str,
        symbol: &str,
        min_price: Decimal,
        max_price: Decimal,
        timeframes: &[Timeframe],
    ) -> Result<Vec<OrderBlock>> {
        let blocks = self.blocks.lock().await;
        Ok(blocks
            .values()
            .filter(|b| {
                b.exchange == exchange
                    && b.symbol == symbol
                    && b.status == IndicatorStatus::Active
                    && timeframes.contains(&b.timeframe)
                    && b.price_low <= max_price
                    && b.price_high >= min_price
            })
            .cloned()
            .collect())
    }

    async fn update_indicator_status(&self, block: &OrderBlock) -> Result<bool> {
        let mut blocks = self.blocks.lock().await;
        match blocks.get_mut(&block.id) {
            Some(existing) => {
                *existing = block.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[derive(Default)]
pub struct InMemorySignalRepository {
    signals: Mutex<HashMap<String, Signal>>,
}

impl InMemorySignalRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SignalRepository for InMemorySignalRepository {
    async fn save(&self, signal: &Signal) -> Result<()> {
        self.signals
            .lock()
            .await
            .insert(signal.id.clone(), signal.clone());
        Ok(())
    }

    async fn find_active(&self, exchange: &str, symbol: &str) -> Result<Vec<Signal>> {
        use crate::domain::trading::ExecutionStatus;
        Ok(self
            .signals
            .lock()
            .await
            .values()
            .filter(|s| {
                s.exchange == exchange
                    && s.symbol == symbol
                    && matches!(
                        s.execution_status,
                        ExecutionStatus::Pending | ExecutionStatus::Submitted
                    )
            })
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryOrderRepository {
    orders: Mutex<HashMap<String, Order>>,
}

impl InMemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn save(&self, order: &Order) -> Result<()> {
        self.orders
            .lock()
            .await
            .insert(order.id.clone(), order.clone());
        Ok(())
    }

    async fn find_by_status(&self, status: OrderStatus) -> Result<Vec<Order>> {
        Ok(self
            .orders
            .lock()
            .await
            .values()
            .filter(|o| o.status == status)
            .cloned()
            .collect())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Order>> {
        Ok(self.orders.lock().await.get(id).cloned())
    }
}

#[derive(Default)]
pub struct InMemoryPositionRepository {
    positions: Mutex<HashMap<String, Position>>,
}

impl InMemoryPositionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PositionRepository for InMemoryPositionRepository {
    async fn find_open(&self, exchange: &str, symbol: Option<&str>) -> Result<Vec<Position>> {
        Ok(self
            .positions
            .lock()
            .await
            .values()
            .filter(|p| {
                p.exchange == exchange
                    && p.status == PositionStatus::Open
                    && symbol.map(|s| p.symbol == s).unwrap_or(true)
            })
            .cloned()
            .collect())
    }

    async fn save(&self, position: &Position) -> Result<()> {
        self.positions
            .lock()
            .await
            .insert(position.id.clone(), position.clone());
        Ok(())
    }
}
