use crate::application::strategy::indicators::{
    Indicator, IndicatorData, IndicatorOutcome, IndicatorRequirements,
};
use crate::domain::errors::IndicatorError;
use crate::domain::indicators::{Doji, DojiResult, IndicatorType};
use crate::domain::market::{Candle, Timeframe};
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::warn;

/// Detects doji candles: a body small relative to the range, with the
/// range itself significant relative to price (filters out flat bars).
pub struct DojiIndicator {
    max_body_to_range_ratio: Decimal,
    min_range_to_price_ratio: Decimal,
    lookback: usize,
}

impl DojiIndicator {
    pub fn new(
        max_body_to_range_ratio: Decimal,
        min_range_to_price_ratio: Decimal,
        lookback: usize,
    ) -> Self {
        Self {
            max_body_to_range_ratio,
            min_range_to_price_ratio,
            lookback,
        }
    }

    fn detect(&self, candles: &[Candle]) -> DojiResult {
        let lookback = self.lookback.min(candles.len());
        let mut dojis = Vec::new();

        for offset in 1..=lookback {
            let index = candles.len() - offset;
            let candle = &candles[index];

            let body = candle.body();
            let range = candle.range();
            if range.is_zero() {
                continue;
            }

            let body_to_range = body / range;
            let avg_price = (candle.high + candle.low) / dec!(2);
            if avg_price.is_zero() {
                continue;
            }
            let range_to_price = range / avg_price;

            if body_to_range <= self.max_body_to_range_ratio
                && range_to_price >= self.min_range_to_price_ratio
            {
                dojis.push(Doji {
                    index,
                    body_to_range_ratio: body_to_range,
                    total_wick_size: range - body,
                    strength: Decimal::ONE - body_to_range,
                    timestamp: candle.timestamp,
                    candle: candle.clone(),
                });
            }
        }

        // Most recent first.
        dojis.sort_by(|a, b| b.index.cmp(&a.index));
        DojiResult { dojis }
    }
}

impl Default for DojiIndicator {
    fn default() -> Self {
        Self::new(dec!(0.1), dec!(0.005), 20)
    }
}

#[async_trait]
impl Indicator for DojiIndicator {
    fn indicator_type(&self) -> IndicatorType {
        IndicatorType::DojiCandle
    }

    fn requirements(&self) -> IndicatorRequirements {
        IndicatorRequirements {
            indicators: vec![],
            lookback: self.lookback,
            timeframes: Timeframe::all(),
        }
    }

    async fn calculate(&self, data: &IndicatorData) -> Result<IndicatorOutcome, IndicatorError> {
        if data.candles.len() < 3 {
            warn!("Not enough candles to detect doji patterns (minimum 3 required)");
            return Ok(IndicatorOutcome::Dojis(DojiResult::default()));
        }
        Ok(IndicatorOutcome::Dojis(self.detect(&data.candles)))
    }
}
