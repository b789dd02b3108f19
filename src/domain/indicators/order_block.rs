use crate::domain::indicators::{Doji, Fvg, IndicatorStatus, StructureBreak};
use crate::domain::market::{Candle, Timeframe};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderBlockKind {
    /// Bullish block below price, formed by a bearish candle before a
    /// bullish imbalance.
    Demand,
    /// Bearish block above price.
    Supply,
}

/// A price region interpreted as prior institutional activity. Created by
/// the order-block indicator, persisted, and progressively invalidated by
/// the mitigation engine as price trades back into it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBlock {
    pub id: String,
    pub exchange: String,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub kind: OrderBlockKind,
    pub price_high: Decimal,
    pub price_low: Decimal,
    pub index: usize,
    pub timestamp: DateTime<Utc>,
    pub status: IndicatorStatus,
    pub touched: bool,
    /// How much of the block's span price has covered since creation,
    /// 0..=100. Never decreases.
    pub mitigation_percentage: Decimal,
    pub strength: Decimal,
    pub candle: Candle,
    pub related_fvg: Fvg,
    pub is_doji: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doji: Option<Doji>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structure_break: Option<StructureBreak>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invalidated_at: Option<DateTime<Utc>>,
}

impl OrderBlock {
    pub fn is_demand(&self) -> bool {
        self.kind == OrderBlockKind::Demand
    }

    pub fn span(&self) -> Decimal {
        self.price_high - self.price_low
    }

    pub fn mid_price(&self) -> Decimal {
        (self.price_high + self.price_low) / dec!(2)
    }

    pub fn is_active(&self) -> bool {
        self.status == IndicatorStatus::Active
    }

    /// Overlap of the block span with a candle's range, if any.
    pub fn intersection(&self, candle: &Candle) -> Option<(Decimal, Decimal)> {
        let lo = self.price_low.max(candle.low);
        let hi = self.price_high.min(candle.high);
        if lo <= hi {
            Some((lo, hi))
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OrderBlockResult {
    pub demand_blocks: Vec<OrderBlock>,
    pub supply_blocks: Vec<OrderBlock>,
}

impl OrderBlockResult {
    pub fn all_blocks(&self) -> impl Iterator<Item = &OrderBlock> {
        self.demand_blocks.iter().chain(self.supply_blocks.iter())
    }

    /// Most recent block across both sides, by candle index.
    pub fn latest(&self) -> Option<&OrderBlock> {
        self.all_blocks().max_by_key(|b| b.index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::indicators::FvgKind;

    fn candle(low: Decimal, high: Decimal) -> Candle {
        Candle {
            exchange: "hyperliquid".to_string(),
            symbol: "BTC-USD".to_string(),
            timeframe: Timeframe::OneHour,
            timestamp: "2024-01-01T01:00:00Z".parse().unwrap(),
            open: low,
            high,
            low,
            close: high,
            volume: dec!(1),
            is_closed: true,
        }
    }

    fn block(low: Decimal, high: Decimal) -> OrderBlock {
        let c = candle(low, high);
        OrderBlock {
            id: "ob-1".to_string(),
            exchange: "hyperliquid".to_string(),
            symbol: "BTC-USD".to_string(),
            timeframe: Timeframe::OneHour,
            kind: OrderBlockKind::Demand,
            price_high: high,
            price_low: low,
            index: 0,
            timestamp: c.timestamp,
            status: IndicatorStatus::Active,
            touched: false,
            mitigation_percentage: Decimal::ZERO,
            strength: Decimal::ZERO,
            candle: c.clone(),
            related_fvg: Fvg {
                kind: FvgKind::Bullish,
                top: high,
                bottom: low,
                size: high - low,
                size_percent: dec!(1),
                candle_index: 1,
                filled: false,
                timestamp: c.timestamp,
                candle: c,
            },
            is_doji: false,
            doji: None,
            structure_break: None,
            created_at: "2024-01-01T01:00:00Z".parse().unwrap(),
            updated_at: "2024-01-01T01:00:00Z".parse().unwrap(),
            invalidated_at: None,
        }
    }

    #[test]
    fn test_intersection() {
        let b = block(dec!(100), dec!(105));
        assert_eq!(
            b.intersection(&candle(dec!(99), dec!(103))),
            Some((dec!(100), dec!(103)))
        );
        assert_eq!(b.intersection(&candle(dec!(106), dec!(110))), None);
    }

    #[test]
    fn test_json_round_trip() {
        let b = block(dec!(100), dec!(105));
        let json = serde_json::to_string(&b).unwrap();
        let back: OrderBlock = serde_json::from_str(&json).unwrap();
        assert_eq!(back, b);
    }
}
