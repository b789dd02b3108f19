use crate::domain::indicators::OrderBlock;
use crate::domain::market::{Candle, Timeframe};
use crate::domain::repositories::{
    CandleRepository, IndicatorRepository, OrderRepository, PositionRepository, SignalRepository,
};
use crate::domain::trading::{Order, OrderStatus, Position, Signal};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

/// Candle rows store decimals as text to keep full precision; wide DTO
/// payloads (order blocks, signals, orders, positions) are stored as a
/// JSON column next to the indexed identity fields.
pub struct SqliteCandleRepository {
    pool: SqlitePool,
}

impl SqliteCandleRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn map_row(row: &sqlx::sqlite::SqliteRow) -> Result<Candle> {
        let timeframe: String = row.try_get("timeframe")?;
        let ts_ms: i64 = row.try_get("timestamp")?;
        Ok(Candle {
            exchange: row.try_get("exchange")?,
            symbol: row.try_get("symbol")?,
            timeframe: Timeframe::from_str(&timeframe)?,
            timestamp: Utc
                .timestamp_millis_opt(ts_ms)
                .single()
                .context("invalid candle timestamp")?,
            open: Decimal::from_str(row.try_get::<String, _>("open")?.as_str())?,
            high: Decimal::from_str(row.try_get::<String, _>("high")?.as_str())?,
            low: Decimal::from_str(row.try_get::<String, _>("low")?.as_str())?,
            close: Decimal::from_str(row.try_get::<String, _>("close")?.as_str())?,
            volume: Decimal::from_str(row.try_get::<String, _>("volume")?.as_str())?,
            is_closed: row.try_get("is_closed")?,
        })
    }
}

#[async_trait]
impl CandleRepository for SqliteCandleRepository {
    async fn upsert(&self, candles: &[Candle]) -> Result<u64> {
        let mut inserted = 0;
        for candle in candles {
            let result = sqlx::query(
                r#"
                INSERT INTO candles
                    (exchange, symbol, timeframe, timestamp, open, high, low, close, volume, is_closed)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(exchange, symbol, timeframe, timestamp) DO NOTHING
                "#,
            )
            .bind(&candle.exchange)
            .bind(&candle.symbol)
            .bind(candle.timeframe.as_str())
            .bind(candle.timestamp.timestamp_millis())
            .bind(candle.open.to_string())
            .bind(candle.high.to_string())
            .bind(candle.low.to_string())
            .bind(candle.close.to_string())
            .bind(candle.volume.to_string())
            .bind(candle.is_closed)
            .execute(&self.pool)
            .await
            .context("Failed to upsert candle")?;
            inserted += result.rows_affected();
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
        let rows = sqlx::query(
            r#"
            SELECT * FROM candles
            WHERE exchange = ? AND symbol = ? AND timeframe = ?
              AND timestamp >= ? AND timestamp <= ?
            ORDER BY timestamp ASC
            LIMIT ?
            "#,
        )
        .bind(exchange)
        .bind(symbol)
        .bind(timeframe.as_str())
        .bind(start.map(|t| t.timestamp_millis()).unwrap_or(i64::MIN))
        .bind(end.map(|t| t.timestamp_millis()).unwrap_or(i64::MAX))
        .bind(limit.unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::map_row).collect()
    }

    async fn latest(
        &self,
        exchange: &str,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<Option<Candle>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM candles
            WHERE exchange = ? AND symbol = ? AND timeframe = ?
            ORDER BY timestamp DESC
            LIMIT 1
            "#,
        )
        .bind(exchange)
        .bind(symbol)
        .bind(timeframe.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::map_row).transpose()
    }
}

pub struct SqliteIndicatorRepository {
    pool: SqlitePool,
}

impl SqliteIndicatorRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn map_row(row: &sqlx::sqlite::SqliteRow) -> Result<OrderBlock> {
        let payload: String = row.try_get("payload_json")?;
        serde_json::from_str(&payload).context("Failed to decode order block payload")
    }
}

#[async_trait]
impl IndicatorRepository for SqliteIndicatorRepository {
    async fn save(&self, block: &OrderBlock) -> Result<()> {
        let payload = serde_json::to_string(block)?;
        sqlx::query(
            r#"
            INSERT INTO order_blocks
                (id, exchange, symbol, timeframe, kind, price_high, price_low,
                 status, touched, mitigation_percentage, strength, timestamp,
                 payload_json, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(&block.id)
        .bind(&block.exchange)
        .bind(&block.symbol)
        .bind(block.timeframe.as_str())
        .bind(if block.is_demand() { "demand" } else { "supply" })
        .bind(block.price_high.to_string())
        .bind(block.price_low.to_string())
        .bind(block.status.to_string())
        .bind(block.touched)
        .bind(block.mitigation_percentage.to_string())
        .bind(block.strength.to_string())
        .bind(block.timestamp.timestamp_millis())
        .bind(payload)
        .bind(block.created_at.timestamp_millis())
        .bind(block.updated_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .context("Failed to save order block")?;
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
        // Price columns are text; filter the coarse set in SQL by identity
        // and status, then apply the numeric range in code.
        let rows = sqlx::query(
            r#"
            SELECT payload_json FROM order_blocks
            WHERE exchange = ? AND symbol = ? AND status = 'active'
            "#,
        )
        .bind(exchange)
        .bind(symbol)
        .fetch_all(&self.pool)
        .await?;

        let mut blocks = Vec::new();
        for row in &rows {
            let block = Self::map_row(row)?;
            let overlaps = block.price_low <= max_price && block.price_high >= min_price;
            if overlaps && timeframes.contains(&block.timeframe) {
                blocks.push(block);
            }
        }
        Ok(blocks)
    }

    async fn update_indicator_status(&self, block: &OrderBlock) -> Result<bool> {
        let payload = serde_json::to_string(block)?;
        let result = sqlx::query(
            r#"
            UPDATE order_blocks
            SET status = ?, touched = ?, mitigation_percentage = ?,
                strength = ?, payload_json = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(block.status.to_string())
        .bind(block.touched)
        .bind(block.mitigation_percentage.to_string())
        .bind(block.strength.to_string())
        .bind(payload)
        .bind(block.updated_at.timestamp_millis())
        .bind(&block.id)
        .execute(&self.pool)
        .await
        .context("Failed to update order block status")?;
        Ok(result.rows_affected() > 0)
    }
}

pub struct SqliteSignalRepository {
    pool: SqlitePool,
}

impl SqliteSignalRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SignalRepository for SqliteSignalRepository {
    async fn save(&self, signal: &Signal) -> Result<()> {
        let payload = serde_json::to_string(signal)?;
        sqlx::query(
            r#"
            INSERT INTO signals
                (id, exchange, symbol, timeframe, strategy_name, direction,
                 execution_status, payload_json, timestamp)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                execution_status = excluded.execution_status,
                payload_json = excluded.payload_json
            "#,
        )
        .bind(&signal.id)
        .bind(&signal.exchange)
        .bind(&signal.symbol)
        .bind(signal.timeframe.as_str())
        .bind(&signal.strategy_name)
        .bind(signal.direction.to_string())
        .bind(match signal.execution_status {
            crate::domain::trading::ExecutionStatus::Pending => "pending",
            crate::domain::trading::ExecutionStatus::Submitted => "submitted",
            crate::domain::trading::ExecutionStatus::Rejected => "rejected",
            crate::domain::trading::ExecutionStatus::Filled => "filled",
            crate::domain::trading::ExecutionStatus::Cancelled => "cancelled",
        })
        .bind(payload)
        .bind(signal.timestamp.timestamp_millis())
        .execute(&self.pool)
        .await
        .context("Failed to save signal")?;
        Ok(())
    }

    async fn find_active(&self, exchange: &str, symbol: &str) -> Result<Vec<Signal>> {
        let rows = sqlx::query(
            r#"
            SELECT payload_json FROM signals
            WHERE exchange = ? AND symbol = ?
              AND execution_status IN ('pending', 'submitted')
            ORDER BY timestamp ASC
            "#,
        )
        .bind(exchange)
        .bind(symbol)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let payload: String = row.try_get("payload_json")?;
                serde_json::from_str(&payload).context("Failed to decode signal payload")
            })
            .collect()
    }
}

pub struct SqliteOrderRepository {
    pool: SqlitePool,
}

impl SqliteOrderRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderRepository for SqliteOrderRepository {
    async fn save(&self, order: &Order) -> Result<()> {
        let payload = serde_json::to_string(order)?;
        sqlx::query(
            r#"
            INSERT INTO orders
                (id, exchange, symbol, side, status, payload_json, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                payload_json = excluded.payload_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&order.id)
        .bind(&order.exchange)
        .bind(&order.symbol)
        .bind(order.side.to_string())
        .bind(order.status.to_string())
        .bind(payload)
        .bind(order.created_at.timestamp_millis())
        .bind(order.updated_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .context("Failed to save order")?;
        Ok(())
    }

    async fn find_by_status(&self, status: OrderStatus) -> Result<Vec<Order>> {
        let rows = sqlx::query("SELECT payload_json FROM orders WHERE status = ?")
            .bind(status.to_string())
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                let payload: String = row.try_get("payload_json")?;
                serde_json::from_str(&payload).context("Failed to decode order payload")
            })
            .collect()
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Order>> {
        let row = sqlx::query("SELECT payload_json FROM orders WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| {
            let payload: String = row.try_get("payload_json")?;
            serde_json::from_str(&payload).context("Failed to decode order payload")
        })
        .transpose()
    }
}

pub struct SqlitePositionRepository {
    pool: SqlitePool,
}

impl SqlitePositionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PositionRepository for SqlitePositionRepository {
    async fn find_open(&self, exchange: &str, symbol: Option<&str>) -> Result<Vec<Position>> {
        let rows = match symbol {
            Some(symbol) => {
                sqlx::query(
                    "SELECT payload_json FROM positions WHERE exchange = ? AND symbol = ? AND status = 'open'",
                )
                .bind(exchange)
                .bind(symbol)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT payload_json FROM positions WHERE exchange = ? AND status = 'open'",
                )
                .bind(exchange)
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter()
            .map(|row| {
                let payload: String = row.try_get("payload_json")?;
                serde_json::from_str(&payload).context("Failed to decode position payload")
            })
            .collect()
    }

    async fn save(&self, position: &Position) -> Result<()> {
        let payload = serde_json::to_string(position)?;
        sqlx::query(
            r#"
            INSERT INTO positions (id, exchange, symbol, status, payload_json, opened_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                payload_json = excluded.payload_json
            "#,
        )
        .bind(&position.id)
        .bind(&position.exchange)
        .bind(&position.symbol)
        .bind(match position.status {
            crate::domain::trading::PositionStatus::Open => "open",
            crate::domain::trading::PositionStatus::Closed => "closed",
        })
        .bind(payload)
        .bind(position.opened_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .context("Failed to save position")?;
        Ok(())
    }
}
