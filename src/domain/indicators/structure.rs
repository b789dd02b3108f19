use crate::domain::market::Candle;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakKind {
    HigherHigh,
    HigherLow,
    LowerLow,
    LowerHigh,
}

impl BreakKind {
    pub fn is_bullish(&self) -> bool {
        matches!(self, BreakKind::HigherHigh | BreakKind::HigherLow)
    }
}

/// A close or wick beyond a prior swing point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureBreak {
    pub index: usize,
    pub kind: BreakKind,
    pub break_value: Decimal,
    pub break_percentage: Decimal,
    /// The swing price that was broken.
    pub swing_reference: Decimal,
    pub timestamp: DateTime<Utc>,
    pub candle: Candle,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StructureBreakResult {
    pub bullish: Vec<StructureBreak>,
    pub bearish: Vec<StructureBreak>,
}

impl StructureBreakResult {
    pub fn all(&self) -> impl Iterator<Item = &StructureBreak> {
        self.bullish.iter().chain(self.bearish.iter())
    }
}
