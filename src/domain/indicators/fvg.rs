use crate::domain::market::Candle;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FvgKind {
    Bullish,
    Bearish,
}

/// A three-candle imbalance: candle n-2's range and candle n's range do
/// not overlap, leaving a gap the market may later return to fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fvg {
    pub kind: FvgKind,
    pub top: Decimal,
    pub bottom: Decimal,
    pub size: Decimal,
    pub size_percent: Decimal,
    /// Index of the middle candle whose body spans the gap.
    pub candle_index: usize,
    pub filled: bool,
    pub timestamp: DateTime<Utc>,
    pub candle: Candle,
}

impl Fvg {
    pub fn contains(&self, price: Decimal) -> bool {
        price >= self.bottom && price <= self.top
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FvgResult {
    pub bullish: Vec<Fvg>,
    pub bearish: Vec<Fvg>,
}

impl FvgResult {
    pub fn is_empty(&self) -> bool {
        self.bullish.is_empty() && self.bearish.is_empty()
    }
}
