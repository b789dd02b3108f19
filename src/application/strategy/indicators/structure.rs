use crate::application::strategy::indicators::{
    Indicator, IndicatorData, IndicatorOutcome, IndicatorRequirements,
};
use crate::domain::errors::IndicatorError;
use crate::domain::indicators::{BreakKind, IndicatorType, StructureBreak, StructureBreakResult};
use crate::domain::market::{Candle, Timeframe};
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{info, warn};

/// Detects breaks of structure against the swing points carried by the
/// current market context: confirmed higher highs / lower lows, plus
/// higher lows / lower highs (which need no confirmation, not being
/// actual breaks).
pub struct StructureBreakIndicator {
    lookback: usize,
    confirmation_candles: usize,
    /// Minimum break beyond the swing as a fraction of the swing price.
    min_break_percentage: Decimal,
}

impl StructureBreakIndicator {
    pub fn new(lookback: usize, confirmation_candles: usize, min_break_percentage: Decimal) -> Self {
        Self {
            lookback,
            confirmation_candles,
            min_break_percentage,
        }
    }

    /// A high break is confirmed when the following `confirmation_candles`
    /// closes stay above the broken swing (mirrored for lows).
    fn is_confirmed(&self, candles: &[Candle], index: usize, high_break: bool, swing: Decimal) -> bool {
        let following = &candles[index + 1..];
        if following.len() < self.confirmation_candles {
            return false;
        }
        following
            .iter()
            .take(self.confirmation_candles)
            .all(|c| if high_break { c.close > swing } else { c.close < swing })
    }

    fn detect(&self, candles: &[Candle], swing_high: Decimal, swing_low: Decimal) -> StructureBreakResult {
        let mut result = StructureBreakResult::default();
        let min_break_high = swing_high * self.min_break_percentage;
        let min_break_low = swing_low * self.min_break_percentage;

        let lookback = self.lookback.min(candles.len());
        for offset in 1..=lookback {
            let index = candles.len() - offset;
            let candle = &candles[index];

            if candle.high > swing_high + min_break_high
                && self.is_confirmed(candles, index, true, swing_high)
            {
                result.bullish.push(StructureBreak {
                    index,
                    kind: BreakKind::HigherHigh,
                    break_value: candle.high - swing_high,
                    break_percentage: (candle.high - swing_high) / swing_high,
                    swing_reference: swing_high,
                    timestamp: candle.timestamp,
                    candle: candle.clone(),
                });
            }

            if candle.low < swing_low - min_break_low
                && self.is_confirmed(candles, index, false, swing_low)
            {
                result.bearish.push(StructureBreak {
                    index,
                    kind: BreakKind::LowerLow,
                    break_value: swing_low - candle.low,
                    break_percentage: (swing_low - candle.low) / swing_low,
                    swing_reference: swing_low,
                    timestamp: candle.timestamp,
                    candle: candle.clone(),
                });
            }

            if candle.low > swing_low + min_break_low {
                result.bullish.push(StructureBreak {
                    index,
                    kind: BreakKind::HigherLow,
                    break_value: candle.low - swing_low,
                    break_percentage: (candle.low - swing_low) / swing_low,
                    swing_reference: swing_low,
                    timestamp: candle.timestamp,
                    candle: candle.clone(),
                });
            }

            if candle.high < swing_high - min_break_high {
                result.bearish.push(StructureBreak {
                    index,
                    kind: BreakKind::LowerHigh,
                    break_value: swing_high - candle.high,
                    break_percentage: (swing_high - candle.high) / swing_high,
                    swing_reference: swing_high,
                    timestamp: candle.timestamp,
                    candle: candle.clone(),
                });
            }
        }

        result
    }
}

impl Default for StructureBreakIndicator {
    fn default() -> Self {
        Self::new(10, 1, dec!(0.0005))
    }
}

#[async_trait]
impl Indicator for StructureBreakIndicator {
    fn indicator_type(&self) -> IndicatorType {
        IndicatorType::StructureBreak
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
            warn!("Not enough candles to detect structure breaks (minimum 3 required)");
            return Ok(IndicatorOutcome::StructureBreaks(
                StructureBreakResult::default(),
            ));
        }

        let Some(context) = data.market_contexts.first() else {
            warn!("No market context provided, cannot detect structure breaks");
            return Ok(IndicatorOutcome::StructureBreaks(
                StructureBreakResult::default(),
            ));
        };

        let (Some(swing_high), Some(swing_low)) = (&context.swing_high, &context.swing_low) else {
            info!("No swing points available in market context");
            return Ok(IndicatorOutcome::StructureBreaks(
                StructureBreakResult::default(),
            ));
        };

        Ok(IndicatorOutcome::StructureBreaks(self.detect(
            &data.candles,
            swing_high.price,
            swing_low.price,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::{MarketContext, SwingPoint, Trend};
    use chrono::{DateTime, Duration, Utc};

    fn candle(i: i64, high: Decimal, low: Decimal, close: Decimal) -> Candle {
        let base: DateTime<Utc> = "2024-01-01T00:00:00Z".parse().unwrap();
        Candle {
            exchange: "hyperliquid".to_string(),
            symbol: "BTC-USD".to_string(),
            timeframe: Timeframe::OneHour,
            timestamp: base + Duration::hours(i),
            open: close,
            high,
            low,
            close,
            volume: dec!(1),
            is_closed: true,
        }
    }

    fn context(swing_high: Decimal, swing_low: Decimal) -> MarketContext {
        let ts: DateTime<Utc> = "2024-01-01T00:00:00Z".parse().unwrap();
        MarketContext {
            exchange: "hyperliquid".to_string(),
            symbol: "BTC-USD".to_string(),
            timeframe: Timeframe::OneHour,
            timestamp: ts,
            current_price: (swing_high + swing_low) / dec!(2),
            swing_high: Some(SwingPoint {
                price: swing_high,
                index: 0,
                timestamp: ts,
            }),
            swing_low: Some(SwingPoint {
                price: swing_low,
                index: 0,
                timestamp: ts,
            }),
            trend: Trend::Ranging,
            range: None,
            support_levels: vec![],
            resistance_levels: vec![],
        }
    }

    async fn run(candles: Vec<Candle>, ctx: MarketContext) -> StructureBreakResult {
        let data = IndicatorData::new(candles, vec![ctx]).unwrap();
        StructureBreakIndicator::default()
            .calculate(&data)
            .await
            .unwrap()
            .as_structure_breaks()
            .unwrap()
            .clone()
    }

    #[tokio::test]
    async fn test_confirmed_higher_high() {
        let result = run(
            vec![
                candle(0, dec!(100), dec!(95), dec!(98)),
                // Breaks the 100 swing high...
                candle(1, dec!(103), dec!(99), dec!(102)),
                // ...and the next close stays above it.
                candle(2, dec!(104), dec!(101), dec!(103)),
            ],
            context(dec!(100), dec!(90)),
        )
        .await;

        assert!(result
            .bullish
            .iter()
            .any(|b| b.kind == BreakKind::HigherHigh && b.index == 1));
    }

    #[tokio::test]
    async fn test_unconfirmed_break_ignored() {
        let result = run(
            vec![
                candle(0, dec!(100), dec!(95), dec!(98)),
                candle(1, dec!(103), dec!(99), dec!(102)),
                // Close falls back below the swing: no confirmation.
                candle(2, dec!(103), dec!(97), dec!(98)),
            ],
            context(dec!(100), dec!(90)),
        )
        .await;

        assert!(!result.bullish.iter().any(|b| b.kind == BreakKind::HigherHigh));
    }

    #[tokio::test]
    async fn test_lower_low_detected() {
        let result = run(
            vec![
                candle(0, dec!(100), dec!(92), dec!(95)),
                candle(1, dec!(95), dec!(88), dec!(89)),
                candle(2, dec!(90), dec!(86), dec!(87)),
            ],
            context(dec!(100), dec!(90)),
        )
        .await;

        assert!(result.bearish.iter().any(|b| b.kind == BreakKind::LowerLow));
    }

    #[tokio::test]
    async fn test_missing_swing_points_yields_empty() {
        let mut ctx = context(dec!(100), dec!(90));
        ctx.swing_high = None;
        let result = run(
            vec![
                candle(0, dec!(100), dec!(95), dec!(98)),
                candle(1, dec!(103), dec!(99), dec!(102)),
                candle(2, dec!(104), dec!(101), dec!(103)),
            ],
            ctx,
        )
        .await;
        assert_eq!(result.all().count(), 0);
    }
}
