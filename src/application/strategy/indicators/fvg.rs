use crate::application::strategy::indicators::{
    Indicator, IndicatorData, IndicatorOutcome, IndicatorRequirements,
};
use crate::domain::errors::IndicatorError;
use crate::domain::indicators::{Fvg, FvgKind, FvgResult, IndicatorType};
use crate::domain::market::{Candle, Timeframe};
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::warn;

/// Detects Fair Value Gaps: a candle whose range does not overlap the
/// range of the candle two positions back, leaving an imbalance.
///
/// Bullish: `low[i] > high[i-2]` (gap up). Bearish: `high[i] < low[i-2]`.
/// The gap is attributed to the middle candle (`i-1`).
pub struct FvgIndicator {
    /// Minimum gap size in percent of the reference price.
    min_gap_size: Decimal,
}

impl FvgIndicator {
    pub fn new(min_gap_size: Decimal) -> Self {
        Self { min_gap_size }
    }

    fn detect(&self, candles: &[Candle]) -> FvgResult {
        let mut result = FvgResult::default();
        let min_gap_pct = self.min_gap_size / dec!(100);

        for i in 2..candles.len() {
            let current = &candles[i];
            let before_previous = &candles[i - 2];
            let candle_index = i - 1;

            if current.low > before_previous.high {
                let gap = current.low - before_previous.high;
                let gap_pct = gap / before_previous.high;
                if gap_pct < min_gap_pct {
                    continue;
                }
                result.bullish.push(Fvg {
                    kind: FvgKind::Bullish,
                    top: current.low,
                    bottom: before_previous.high,
                    size: gap,
                    size_percent: gap_pct * dec!(100),
                    candle_index,
                    filled: false,
                    timestamp: current.timestamp,
                    candle: current.clone(),
                });
            } else if current.high < before_previous.low {
                let gap = before_previous.low - current.high;
                let gap_pct = gap / before_previous.low;
                if gap_pct < min_gap_pct {
                    continue;
                }
                result.bearish.push(Fvg {
                    kind: FvgKind::Bearish,
                    top: before_previous.low,
                    bottom: current.high,
                    size: gap,
                    size_percent: gap_pct * dec!(100),
                    candle_index,
                    filled: false,
                    timestamp: current.timestamp,
                    candle: current.clone(),
                });
            }
        }

        Self::mark_filled(candles, &mut result);
        result
    }

    /// Flag gaps that later price action has traded back into. The candle
    /// right after the gap is part of its formation and is skipped.
    fn mark_filled(candles: &[Candle], result: &mut FvgResult) {
        for fvg in &mut result.bullish {
            for candle in candles.iter().skip(fvg.candle_index + 2) {
                if candle.low <= fvg.top {
                    fvg.filled = true;
                    break;
                }
            }
        }
        for fvg in &mut result.bearish {
            for candle in candles.iter().skip(fvg.candle_index + 2) {
                if candle.high >= fvg.bottom {
                    fvg.filled = true;
                    break;
                }
            }
        }
    }
}

impl Default for FvgIndicator {
    fn default() -> Self {
        // 0.2% minimum gap.
        Self::new(dec!(0.2))
    }
}

#[async_trait]
impl Indicator for FvgIndicator {
    fn indicator_type(&self) -> IndicatorType {
        IndicatorType::Fvg
    }

    fn requirements(&self) -> IndicatorRequirements {
        IndicatorRequirements {
            indicators: vec![],
            lookback: 30,
            timeframes: Timeframe::all(),
        }
    }

    async fn calculate(&self, data: &IndicatorData) -> Result<IndicatorOutcome, IndicatorError> {
        if data.candles.len() < 3 {
            warn!("Not enough candles to detect FVGs (minimum 3 required)");
            return Ok(IndicatorOutcome::Fvg(FvgResult::default()));
        }
        Ok(IndicatorOutcome::Fvg(self.detect(&data.candles)))
    }
}
