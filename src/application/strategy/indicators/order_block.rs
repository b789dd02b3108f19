use crate::application::strategy::indicators::{
    Indicator, IndicatorData, IndicatorOutcome, IndicatorRequirements,
};
use crate::domain::decimal::quantize_percent;
use crate::domain::errors::IndicatorError;
use crate::domain::indicators::{
    Doji, DojiResult, Fvg, FvgResult, IndicatorStatus, IndicatorType, OrderBlock, OrderBlockKind,
    OrderBlockResult, StructureBreak, StructureBreakResult,
};
use crate::domain::market::{Candle, Timeframe};
use crate::domain::repositories::IndicatorRepository;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct OrderBlockParams {
    pub max_body_to_range_ratio: Decimal,
    pub min_wick_to_body_ratio: Decimal,
    pub lookback: usize,
    /// How many candles after a wick candle an FVG may appear.
    pub max_ob_detection_candles: usize,
    pub require_doji: bool,
    pub require_bos: bool,
    /// Coverage percentage at which a block counts as mitigated.
    pub mitigation_threshold: Decimal,
}

impl Default for OrderBlockParams {
    fn default() -> Self {
        Self {
            max_body_to_range_ratio: dec!(0.4),
            min_wick_to_body_ratio: dec!(1.5),
            lookback: 50,
            max_ob_detection_candles: 5,
            require_doji: false,
            require_bos: false,
            mitigation_threshold: dec!(80),
        }
    }
}

/// Composite indicator: an order block is a wick-heavy candle followed
/// within a few bars by an imbalance in the opposite direction of the
/// candle, optionally confirmed by a doji and a break of structure.
///
/// Bearish wick candle + bullish FVG => demand block `[close, open]`.
/// Bullish wick candle + bearish FVG => supply block `[open, close]`.
///
/// Newly detected blocks are persisted as active instances; this type
/// also owns the mitigation rule that later retires them.
pub struct OrderBlockIndicator {
    params: OrderBlockParams,
    repository: Arc<dyn IndicatorRepository>,
}

impl OrderBlockIndicator {
    pub fn new(params: OrderBlockParams, repository: Arc<dyn IndicatorRepository>) -> Self {
        Self { params, repository }
    }

    fn build_block(
        &self,
        data: &IndicatorData,
        candle: &Candle,
        index: usize,
        kind: OrderBlockKind,
        fvg: &Fvg,
        doji: Option<&Doji>,
        structure_break: Option<&StructureBreak>,
    ) -> OrderBlock {
        let (price_high, price_low) = match kind {
            // The block spans the wick candle's body.
            OrderBlockKind::Demand => (candle.open, candle.close),
            OrderBlockKind::Supply => (candle.close, candle.open),
        };
        let now = Utc::now();
        OrderBlock {
            id: Uuid::new_v4().to_string(),
            exchange: data.exchange.clone(),
            symbol: data.symbol.clone(),
            timeframe: data.timeframe,
            kind,
            price_high,
            price_low,
            index,
            timestamp: candle.timestamp,
            status: IndicatorStatus::Active,
            touched: false,
            mitigation_percentage: Decimal::ZERO,
            strength: Decimal::ZERO,
            candle: candle.clone(),
            related_fvg: fvg.clone(),
            is_doji: doji.is_some(),
            doji: doji.cloned(),
            structure_break: structure_break.cloned(),
            created_at: now,
            updated_at: now,
            invalidated_at: None,
        }
    }

    fn detect(
        &self,
        data: &IndicatorData,
        fvgs: &FvgResult,
        dojis: &DojiResult,
        breaks: &StructureBreakResult,
    ) -> OrderBlockResult {
        let mut result = OrderBlockResult::default();
        let candles = &data.candles;
        let lookback = self.params.lookback.min(candles.len());

        let bullish_bos: Vec<&StructureBreak> = breaks
            .bullish
            .iter()
            .filter(|b| b.kind.is_bullish())
            .collect();
        let bearish_bos: Vec<&StructureBreak> =
            breaks.bearish.iter().filter(|b| !b.kind.is_bullish()).collect();

        for offset in 1..=lookback {
            let index = candles.len() - offset;
            let candle = &candles[index];

            let doji = dojis.at_index(index);
            if self.params.require_doji && doji.is_none() {
                continue;
            }

            let range = candle.range();
            if range.is_zero() {
                continue;
            }
            // A flat bar still has wicks; avoid dividing by a zero body.
            let body = candle.body().max(dec!(0.0001));

            let upper_wick = (candle.high - candle.open).max(candle.high - candle.close);
            let lower_wick = (candle.open - candle.low).max(candle.close - candle.low);
            let body_to_range = body / range;
            let wick_to_body = (upper_wick + lower_wick) / body;

            if body_to_range > self.params.max_body_to_range_ratio
                || wick_to_body < self.params.min_wick_to_body_ratio
            {
                continue;
            }

            if candle.is_bearish() {
                if let Some(fvg) = self.matching_fvg(&fvgs.bullish, index) {
                    let bos = bullish_bos.iter().find(|b| b.index > fvg.candle_index);
                    if self.params.require_bos && bos.is_none() {
                        continue;
                    }
                    result.demand_blocks.push(self.build_block(
                        data,
                        candle,
                        index,
                        OrderBlockKind::Demand,
                        fvg,
                        doji,
                        bos.copied(),
                    ));
                }
            } else if candle.is_bullish() {
                if let Some(fvg) = self.matching_fvg(&fvgs.bearish, index) {
                    let bos = bearish_bos.iter().find(|b| b.index > fvg.candle_index);
                    if self.params.require_bos && bos.is_none() {
                        continue;
                    }
                    result.supply_blocks.push(self.build_block(
                        data,
                        candle,
                        index,
                        OrderBlockKind::Supply,
                        fvg,
                        doji,
                        bos.copied(),
                    ));
                }
            }
        }

        result
    }

    /// First FVG forming within the detection window after the candle.
    fn matching_fvg<'a>(&self, fvgs: &'a [Fvg], index: usize) -> Option<&'a Fvg> {
        fvgs.iter().find(|fvg| {
            fvg.candle_index > index
                && fvg.candle_index - index <= self.params.max_ob_detection_candles
        })
    }

    fn empty() -> IndicatorOutcome {
        IndicatorOutcome::OrderBlocks(OrderBlockResult::default())
    }
}

#[async_trait]
impl Indicator for OrderBlockIndicator {
    fn indicator_type(&self) -> IndicatorType {
        IndicatorType::OrderBlock
    }

    fn requirements(&self) -> IndicatorRequirements {
        IndicatorRequirements {
            indicators: vec![
                IndicatorType::StructureBreak,
                IndicatorType::Fvg,
                IndicatorType::DojiCandle,
            ],
            lookback: self.params.lookback,
            timeframes: vec![
                Timeframe::FifteenMin,
                Timeframe::OneHour,
                Timeframe::FourHour,
                Timeframe::OneDay,
            ],
        }
    }

    async fn calculate(&self, data: &IndicatorData) -> Result<IndicatorOutcome, IndicatorError> {
        if data.candles.len() < 5 {
            warn!("Not enough candles to detect order blocks");
            return Ok(Self::empty());
        }

        // Degrade gracefully when a dependency failed or is missing.
        let empty_fvg = FvgResult::default();
        let fvgs = data
            .dependency(IndicatorType::Fvg)
            .and_then(|o| o.as_fvg())
            .unwrap_or(&empty_fvg);
        let empty_dojis = DojiResult::default();
        let dojis = data
            .dependency(IndicatorType::DojiCandle)
            .and_then(|o| o.as_dojis())
            .unwrap_or(&empty_dojis);
        let empty_breaks = StructureBreakResult::default();
        let breaks = data
            .dependency(IndicatorType::StructureBreak)
            .and_then(|o| o.as_structure_breaks())
            .unwrap_or(&empty_breaks);

        let result = self.detect(data, fvgs, dojis, breaks);

        for block in result.all_blocks() {
            if let Err(e) = self.repository.save(block).await {
                warn!("Failed to persist order block {}: {:#}", block.id, e);
            }
        }

        Ok(IndicatorOutcome::OrderBlocks(result))
    }

    /// Mitigation rule: every candle after block creation that trades into
    /// the block marks it touched and ratchets the covered share of its
    /// span; crossing the threshold retires it.
    async fn process_existing(
        &self,
        instances: Vec<OrderBlock>,
        candles: &[Candle],
    ) -> (Vec<OrderBlock>, Vec<OrderBlock>) {
        let mut updated = Vec::new();
        let mut still_valid = Vec::new();

        for mut block in instances {
            let span = block.span();
            if span <= Decimal::ZERO {
                still_valid.push(block);
                continue;
            }

            let before = (
                block.touched,
                block.mitigation_percentage,
                block.status,
            );

            for candle in candles.iter().filter(|c| c.timestamp > block.timestamp) {
                if let Some((lo, hi)) = block.intersection(candle) {
                    block.touched = true;
                    let covered = quantize_percent((hi - lo) / span * dec!(100));
                    if covered > block.mitigation_percentage {
                        block.mitigation_percentage = covered;
                    }
                    if block.mitigation_percentage >= self.params.mitigation_threshold
                        && block.status.can_transition_to(IndicatorStatus::Mitigated)
                    {
                        block.status = IndicatorStatus::Mitigated;
                        block.invalidated_at = Some(Utc::now());
                        debug!(
                            "Order block {} mitigated at {}%",
                            block.id, block.mitigation_percentage
                        );
                    }
                }
            }

            let changed = before
                != (
                    block.touched,
                    block.mitigation_percentage,
                    block.status,
                );
            if changed {
                block.updated_at = Utc::now();
                updated.push(block.clone());
            }
            if block.status == IndicatorStatus::Active {
                still_valid.push(block);
            }
        }

        (updated, still_valid)
    }

    fn repository(&self) -> Option<Arc<dyn IndicatorRepository>> {
        Some(Arc::clone(&self.repository))
    }
}
