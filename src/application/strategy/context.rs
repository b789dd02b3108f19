use crate::domain::constants::{cache_keys, ttl};
use crate::domain::market::{
    timeframe_hierarchy, Candle, FibLevel, MarketContext, RangeInfo, SwingPoint, Timeframe, Trend,
};
use crate::infrastructure::cache::{get_json, set_json, Cache};
use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tracing::debug;

/// Produces and serves market-structure snapshots. The computation itself
/// (swings, ranges, fib levels) is outside the strategy core; this seam
/// lets deployments plug in a richer producer.
#[async_trait]
pub trait MarketContextProvider: Send + Sync {
    /// Refresh the context for the bar's own timeframe from the candle
    /// window.
    async fn update_context(
        &self,
        exchange: &str,
        symbol: &str,
        timeframe: Timeframe,
        candles: &[Candle],
    ) -> Result<MarketContext>;

    /// The multi-timeframe context set for an analysis timeframe, ordered
    /// low to high. `None` when any required context is missing: signals
    /// must not be produced from an incomplete MTF picture.
    async fn multi_timeframe_contexts(
        &self,
        exchange: &str,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<Option<Vec<MarketContext>>>;
}

/// Default provider: derives swings and fib levels from the candle window
/// and keeps the per-timeframe snapshots under `market:{...}:state`.
pub struct CacheContextProvider {
    cache: Arc<dyn Cache>,
    swing_window: usize,
}

impl CacheContextProvider {
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        Self {
            cache,
            swing_window: 50,
        }
    }

    fn build_context(
        &self,
        exchange: &str,
        symbol: &str,
        timeframe: Timeframe,
        candles: &[Candle],
    ) -> Option<MarketContext> {
        let last = candles.last()?;
        let window_start = candles.len().saturating_sub(self.swing_window);
        let window = &candles[window_start..];

        let (high_offset, swing_high_candle) = window
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.high.cmp(&b.1.high))?;
        let (low_offset, swing_low_candle) = window
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.low.cmp(&b.1.low))?;

        let swing_high = SwingPoint {
            price: swing_high_candle.high,
            index: window_start + high_offset,
            timestamp: swing_high_candle.timestamp,
        };
        let swing_low = SwingPoint {
            price: swing_low_candle.low,
            index: window_start + low_offset,
            timestamp: swing_low_candle.timestamp,
        };

        let range_size = swing_high.price - swing_low.price;
        let equilibrium = (swing_high.price + swing_low.price) / dec!(2);

        // Trend from the swing ordering and where price sits in the range.
        let trend = if range_size.is_zero() {
            Trend::Ranging
        } else if swing_high.index > swing_low.index && last.close > equilibrium {
            Trend::Bullish
        } else if swing_low.index > swing_high.index && last.close < equilibrium {
            Trend::Bearish
        } else {
            Trend::Ranging
        };

        let mut support_levels = Vec::new();
        let mut resistance_levels = Vec::new();
        for level in [dec!(0.382), dec!(0.5), dec!(0.618), dec!(0.786)] {
            support_levels.push(FibLevel {
                price: swing_high.price - range_size * level,
                level,
                kind: "retracement".to_string(),
            });
            resistance_levels.push(FibLevel {
                price: swing_low.price + range_size * level,
                level,
                kind: "retracement".to_string(),
            });
        }

        let range = RangeInfo {
            high: swing_high.price,
            low: swing_low.price,
            equilibrium,
            size: range_size,
            strength: dec!(0.5),
        };

        Some(MarketContext {
            exchange: exchange.to_string(),
            symbol: symbol.to_string(),
            timeframe,
            timestamp: last.timestamp,
            current_price: last.close,
            swing_high: Some(swing_high),
            swing_low: Some(swing_low),
            trend,
            range: Some(range),
            support_levels,
            resistance_levels,
        })
    }
}

#[async_trait]
impl MarketContextProvider for CacheContextProvider {
    async fn update_context(
        &self,
        exchange: &str,
        symbol: &str,
        timeframe: Timeframe,
        candles: &[Candle],
    ) -> Result<MarketContext> {
        let context = self
            .build_context(exchange, symbol, timeframe, candles)
            .ok_or_else(|| anyhow::anyhow!("cannot build context from empty candle window"))?;

        let key = cache_keys::market_state(exchange, symbol, timeframe);
        set_json(self.cache.as_ref(), &key, &context, Some(ttl::MARKET_STATE)).await;
        debug!("Updated market context at {}", key);
        Ok(context)
    }

    async fn multi_timeframe_contexts(
        &self,
        exchange: &str,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<Option<Vec<MarketContext>>> {
        let mut contexts = Vec::new();
        for tf in timeframe_hierarchy(timeframe) {
            let key = cache_keys::market_state(exchange, symbol, tf);
            match get_json::<MarketContext>(self.cache.as_ref(), &key).await {
                Some(context) => contexts.push(context),
                None => {
                    debug!("Missing market context for {} in MTF set", tf);
                    return Ok(None);
                }
            }
        }
        Ok(Some(contexts))
    }
}
