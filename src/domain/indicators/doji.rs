use crate::domain::market::Candle;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A candle whose body is small relative to its range, signalling
/// indecision. Strength grows as the body shrinks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Doji {
    pub index: usize,
    pub body_to_range_ratio: Decimal,
    pub total_wick_size: Decimal,
    pub strength: Decimal,
    pub timestamp: DateTime<Utc>,
    pub candle: Candle,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DojiResult {
    /// Detected dojis, most recent first.
    pub dojis: Vec<Doji>,
}

impl DojiResult {
    pub fn has_doji(&self) -> bool {
        !self.dojis.is_empty()
    }

    pub fn latest(&self) -> Option<&Doji> {
        self.dojis.first()
    }

    pub fn at_index(&self, index: usize) -> Option<&Doji> {
        self.dojis.iter().find(|d| d.index == index)
    }
}
