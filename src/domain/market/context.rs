use crate::domain::market::Timeframe;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A local price extremum inside the recent window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwingPoint {
    pub price: Decimal,
    pub index: usize,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Bullish,
    Bearish,
    Ranging,
}

/// The swing-to-swing range a market is trading inside.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeInfo {
    pub high: Decimal,
    pub low: Decimal,
    pub equilibrium: Decimal,
    pub size: Decimal,
    /// 0..1, how cleanly price has respected the range.
    pub strength: Decimal,
}

/// A fibonacci retracement/extension level derived from the swing range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FibLevel {
    pub price: Decimal,
    pub level: Decimal,
    pub kind: String,
}

/// Market-structure snapshot for one `(exchange, symbol, timeframe)`.
/// Produced by the context provider; read-only in the strategy core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketContext {
    pub exchange: String,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub timestamp: DateTime<Utc>,
    pub current_price: Decimal,
    pub swing_high: Option<SwingPoint>,
    pub swing_low: Option<SwingPoint>,
    pub trend: Trend,
    pub range: Option<RangeInfo>,
    #[serde(default)]
    pub support_levels: Vec<FibLevel>,
    #[serde(default)]
    pub resistance_levels: Vec<FibLevel>,
}

impl MarketContext {
    pub fn has_swing_points(&self) -> bool {
        self.swing_high.is_some() && self.swing_low.is_some()
    }
}
