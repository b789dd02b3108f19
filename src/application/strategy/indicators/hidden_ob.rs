use crate::application::strategy::indicators::{
    Indicator, IndicatorData, IndicatorOutcome, IndicatorRequirements,
};
use crate::domain::errors::IndicatorError;
use crate::domain::indicators::{IndicatorType, OrderBlock, OrderBlockKind, OrderBlockResult};
use crate::domain::market::Timeframe;
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::warn;

/// Selects hidden order blocks out of the standard detection results: a
/// block hugging a context swing point whose related imbalance has
/// already been filled. Such zones no longer show up as fresh imbalances,
/// yet the swing keeps them relevant.
///
/// Depends on the order-block and FVG indicators; the blocks themselves
/// are already persisted by the upstream detector.
pub struct HiddenOrderBlockIndicator {
    /// Maximum distance from the swing as a fraction of the swing price.
    swing_tolerance: Decimal,
}

impl HiddenOrderBlockIndicator {
    pub fn new(swing_tolerance: Decimal) -> Self {
        Self { swing_tolerance }
    }

    fn near_swing(&self, block: &OrderBlock, data: &IndicatorData) -> bool {
        data.market_contexts.iter().any(|context| {
            let swing = match block.kind {
                OrderBlockKind::Demand => context.swing_low.as_ref(),
                OrderBlockKind::Supply => context.swing_high.as_ref(),
            };
            let Some(swing) = swing else { return false };
            if swing.price.is_zero() {
                return false;
            }
            if block.price_low <= swing.price && swing.price <= block.price_high {
                return true;
            }
            let distance = (block.price_low - swing.price)
                .abs()
                .min((block.price_high - swing.price).abs());
            distance / swing.price <= self.swing_tolerance
        })
    }
}

impl Default for HiddenOrderBlockIndicator {
    fn default() -> Self {
        Self::new(dec!(0.01))
    }
}

#[async_trait]
impl Indicator for HiddenOrderBlockIndicator {
    fn indicator_type(&self) -> IndicatorType {
        IndicatorType::HiddenOrderBlock
    }

    fn requirements(&self) -> IndicatorRequirements {
        IndicatorRequirements {
            indicators: vec![IndicatorType::OrderBlock, IndicatorType::Fvg],
            lookback: 100,
            timeframes: vec![Timeframe::OneHour, Timeframe::FourHour, Timeframe::OneDay],
        }
    }

    async fn calculate(&self, data: &IndicatorData) -> Result<IndicatorOutcome, IndicatorError> {
        let Some(blocks) = data
            .dependency(IndicatorType::OrderBlock)
            .and_then(|o| o.as_order_blocks())
        else {
            warn!("Missing order block data for hidden order block detection");
            return Ok(IndicatorOutcome::OrderBlocks(OrderBlockResult::default()));
        };

        let mut result = OrderBlockResult::default();
        for block in blocks.all_blocks() {
            if block.is_active() && block.related_fvg.filled && self.near_swing(block, data) {
                match block.kind {
                    OrderBlockKind::Demand => result.demand_blocks.push(block.clone()),
                    OrderBlockKind::Supply => result.supply_blocks.push(block.clone()),
                }
            }
        }

        Ok(IndicatorOutcome::OrderBlocks(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::indicators::{Fvg, FvgKind, IndicatorStatus};
    use crate::domain::market::{Candle, MarketContext, SwingPoint, Trend};
    use chrono::Utc;

    fn candle(low: Decimal, high: Decimal) -> Candle {
        Candle {
            exchange: "hyperliquid".to_string(),
            symbol: "BTC-USD".to_string(),
            timeframe: Timeframe::OneHour,
            timestamp: "2024-01-01T00:00:00Z".parse().unwrap(),
            open: low,
            high,
            low,
            close: high,
            volume: dec!(1),
            is_closed: true,
        }
    }

    fn block(low: Decimal, high: Decimal, fvg_filled: bool) -> OrderBlock {
        let c = candle(low, high);
        OrderBlock {
            id: "ob-hidden".to_string(),
            exchange: "hyperliquid".to_string(),
            symbol: "BTC-USD".to_string(),
            timeframe: Timeframe::OneHour,
            kind: OrderBlockKind::Demand,
            price_high: high,
            price_low: low,
            index: 2,
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
                candle_index: 3,
                filled: fvg_filled,
                timestamp: c.timestamp,
                candle: c,
            },
            is_doji: false,
            doji: None,
            structure_break: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            invalidated_at: None,
        }
    }

    fn context(swing_low: Decimal) -> MarketContext {
        let ts = "2024-01-01T00:00:00Z".parse().unwrap();
        MarketContext {
            exchange: "hyperliquid".to_string(),
            symbol: "BTC-USD".to_string(),
            timeframe: Timeframe::OneHour,
            timestamp: ts,
            current_price: dec!(105),
            swing_high: Some(SwingPoint {
                price: dec!(120),
                index: 0,
                timestamp: ts,
            }),
            swing_low: Some(SwingPoint {
                price: swing_low,
                index: 4,
                timestamp: ts,
            }),
            trend: Trend::Ranging,
            range: None,
            support_levels: vec![],
            resistance_levels: vec![],
        }
    }

    async fn run(block: OrderBlock, ctx: MarketContext) -> OrderBlockResult {
        let candles = vec![
            candle(dec!(99), dec!(101)),
            candle(dec!(99), dec!(101)),
            candle(dec!(99), dec!(101)),
        ];
        let mut data = IndicatorData::new(candles, vec![ctx]).unwrap();
        data.store_result(
            IndicatorType::OrderBlock,
            IndicatorOutcome::OrderBlocks(OrderBlockResult {
                demand_blocks: vec![block],
                supply_blocks: vec![],
            }),
        );
        HiddenOrderBlockIndicator::default()
            .calculate(&data)
            .await
            .unwrap()
            .as_order_blocks()
            .unwrap()
            .clone()
    }

    #[tokio::test]
    async fn test_filled_fvg_block_on_swing_is_hidden() {
        // Swing low 100.5 sits inside the block [100, 101].
        let result = run(block(dec!(100), dec!(101), true), context(dec!(100.5))).await;
        assert_eq!(result.demand_blocks.len(), 1);
    }

    #[tokio::test]
    async fn test_unfilled_fvg_is_not_hidden() {
        let result = run(block(dec!(100), dec!(101), false), context(dec!(100.5))).await;
        assert!(result.demand_blocks.is_empty());
    }

    #[tokio::test]
    async fn test_block_far_from_swing_is_not_hidden() {
        let result = run(block(dec!(100), dec!(101), true), context(dec!(80))).await;
        assert!(result.demand_blocks.is_empty());
    }
}
