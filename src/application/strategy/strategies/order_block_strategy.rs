use crate::application::strategy::strategies::Strategy;
use crate::application::strategy::DagRun;
use crate::domain::decimal::{quantize_percent, quantize_price};
use crate::domain::indicators::{IndicatorType, OrderBlock, OrderBlockKind};
use crate::domain::market::{timeframe_hierarchy, MarketContext, Timeframe};
use crate::domain::repositories::IndicatorRepository;
use crate::domain::trading::{Direction, ExecutionStatus, Signal, SignalType};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct OrderBlockStrategyParams {
    pub risk_reward_ratio: Decimal,
    pub min_risk_reward_ratio: Decimal,
    pub strength_threshold: Decimal,
    pub stop_loss_pct: Decimal,
    pub entry_buffer_pct: Decimal,
    pub timeframes: Vec<Timeframe>,
    pub lookback: usize,
}

impl Default for OrderBlockStrategyParams {
    fn default() -> Self {
        Self {
            risk_reward_ratio: dec!(2.0),
            min_risk_reward_ratio: dec!(1.5),
            strength_threshold: dec!(0.7),
            stop_loss_pct: dec!(0.02),
            entry_buffer_pct: dec!(0.005),
            timeframes: vec![
                Timeframe::FifteenMin,
                Timeframe::OneHour,
                Timeframe::FourHour,
                Timeframe::OneDay,
            ],
            lookback: 50,
        }
    }
}

/// Trades freshly detected order blocks: scores each active block by
/// swing proximity, fib confluence and higher-timeframe confluence, and
/// emits an entry signal for blocks clearing the strength threshold.
pub struct OrderBlockStrategy {
    params: OrderBlockStrategyParams,
    repository: Arc<dyn IndicatorRepository>,
}

impl OrderBlockStrategy {
    pub fn new(
        params: OrderBlockStrategyParams,
        repository: Arc<dyn IndicatorRepository>,
    ) -> Self {
        Self { params, repository }
    }

    /// Weight for a context timeframe's position in the block's hierarchy:
    /// 0.6 for the lowest, rising quadratically to 1.0 for the highest.
    fn timeframe_weight(hierarchy: &[Timeframe], timeframe: Timeframe) -> Decimal {
        match hierarchy.iter().position(|&tf| tf == timeframe) {
            Some(index) => {
                let span = (hierarchy.len().max(2) - 1) as i64;
                let position = Decimal::from(index as i64) / Decimal::from(span);
                dec!(0.6) + dec!(0.4) * position * position
            }
            None => dec!(0.5),
        }
    }

    /// Proximity of the block to the relevant swing point in each context,
    /// weighted toward higher timeframes; the best context wins.
    fn swing_proximity(&self, block: &OrderBlock, contexts: &[MarketContext]) -> Decimal {
        let hierarchy = timeframe_hierarchy(block.timeframe);
        let mut best = Decimal::ZERO;

        for context in contexts {
            let swing = match block.kind {
                OrderBlockKind::Demand => context.swing_low.as_ref(),
                OrderBlockKind::Supply => context.swing_high.as_ref(),
            };
            let Some(swing) = swing else { continue };
            if swing.price.is_zero() {
                continue;
            }

            let proximity = if block.price_low <= swing.price && swing.price <= block.price_high {
                Decimal::ONE
            } else {
                let distance = (block.price_low - swing.price)
                    .abs()
                    .min((block.price_high - swing.price).abs());
                let relative = distance / swing.price;
                (Decimal::ONE - relative / dec!(0.05)).max(Decimal::ZERO)
            };

            if proximity > Decimal::ZERO {
                let weighted = proximity * Self::timeframe_weight(&hierarchy, context.timeframe);
                best = best.max(weighted);
            }
        }
        best
    }

    /// Confluence with fib levels: a level inside the block is a direct
    /// hit (scaled by level importance); otherwise score decays with
    /// distance. Best weighted context wins.
    fn fib_confluence(&self, block: &OrderBlock, contexts: &[MarketContext]) -> Decimal {
        let hierarchy = timeframe_hierarchy(block.timeframe);
        let mut best = Decimal::ZERO;

        for context in contexts {
            let levels = match block.kind {
                OrderBlockKind::Demand => &context.support_levels,
                OrderBlockKind::Supply => &context.resistance_levels,
            };
            if levels.is_empty() {
                continue;
            }

            let mut max_level_score = Decimal::ZERO;
            for level in levels {
                let score = if block.price_low <= level.price && level.price <= block.price_high {
                    let weight = if (level.level - dec!(0.618)).abs() < dec!(0.001) {
                        Decimal::ONE
                    } else if (level.level - dec!(0.5)).abs() < dec!(0.001) {
                        dec!(0.95)
                    } else if (level.level - dec!(0.382)).abs() < dec!(0.001) {
                        dec!(0.9)
                    } else {
                        dec!(0.85)
                    };
                    weight
                } else {
                    let distance = (block.price_low - level.price)
                        .abs()
                        .min((block.price_high - level.price).abs());
                    let mid = block.mid_price();
                    if mid.is_zero() {
                        continue;
                    }
                    (Decimal::ONE - (distance / mid) / dec!(0.03)).max(Decimal::ZERO)
                };
                max_level_score = max_level_score.max(score);
            }

            if max_level_score > Decimal::ZERO {
                let weighted =
                    max_level_score * Self::timeframe_weight(&hierarchy, context.timeframe);
                best = best.max(weighted);
            }
        }
        best
    }

    /// Overlap with active blocks from higher timeframes, fetched from
    /// persistence over an expanded price band around the local blocks.
    async fn mtf_confluence(&self, block: &OrderBlock, local_blocks: &[OrderBlock]) -> Decimal {
        let higher: Vec<Timeframe> = timeframe_hierarchy(block.timeframe)
            .into_iter()
            .filter(|&tf| tf != block.timeframe)
            .collect();
        if higher.is_empty() {
            return Decimal::ZERO;
        }

        let mut min_price = block.price_low;
        let mut max_price = block.price_high;
        for other in local_blocks {
            min_price = min_price.min(other.price_low);
            max_price = max_price.max(other.price_high);
        }
        min_price *= dec!(0.9);
        max_price *= dec!(1.1);

        let mtf_blocks = match self
            .repository
            .find_active_in_price_range(&block.exchange, &block.symbol, min_price, max_price, &higher)
            .await
        {
            Ok(blocks) => blocks,
            Err(e) => {
                warn!("Error calculating multi-timeframe confluence: {:#}", e);
                return Decimal::ZERO;
            }
        };

        let span = (higher.len().max(2) - 1) as i64;
        let mut overlap_score = Decimal::ZERO;
        let mut max_possible = Decimal::ZERO;

        for other in &mtf_blocks {
            let Some(index) = higher.iter().position(|&tf| tf == other.timeframe) else {
                continue;
            };
            let position = Decimal::from(index as i64) / Decimal::from(span);
            let weight = dec!(0.4) + dec!(0.6) * position * position;
            max_possible += weight;

            let overlap_low = block.price_low.max(other.price_low);
            let overlap_high = block.price_high.min(other.price_high);
            if overlap_high > overlap_low {
                let reference = block.span().min(other.span());
                if reference > Decimal::ZERO {
                    overlap_score += weight * ((overlap_high - overlap_low) / reference);
                }
            }
        }

        if max_possible.is_zero() {
            Decimal::ZERO
        } else {
            (overlap_score / max_possible).min(Decimal::ONE)
        }
    }

    async fn strength(
        &self,
        block: &OrderBlock,
        contexts: &[MarketContext],
        local_blocks: &[OrderBlock],
    ) -> (Decimal, Decimal, Decimal, Decimal) {
        let swing = self.swing_proximity(block, contexts);
        let fib = self.fib_confluence(block, contexts);
        let mtf = self.mtf_confluence(block, local_blocks).await;
        let overall = dec!(0.4) * swing + dec!(0.3) * fib + dec!(0.3) * mtf;
        (overall, swing, fib, mtf)
    }

    fn build_signal(
        &self,
        block: &OrderBlock,
        strength: Decimal,
        swing: Decimal,
        fib: Decimal,
        mtf: Decimal,
    ) -> Signal {
        let (direction, trigger, stop_loss) = match block.kind {
            OrderBlockKind::Demand => {
                let trigger = block.price_low * (Decimal::ONE - self.params.entry_buffer_pct);
                let stop = block.price_low * (Decimal::ONE - self.params.stop_loss_pct);
                (Direction::Long, trigger, stop)
            }
            OrderBlockKind::Supply => {
                let trigger = block.price_low * (Decimal::ONE + self.params.entry_buffer_pct);
                let stop = block.price_high * (Decimal::ONE + self.params.stop_loss_pct);
                (Direction::Short, trigger, stop)
            }
        };

        let risk = (trigger - stop_loss).abs();
        let take_profit = match direction {
            Direction::Long => trigger + risk * self.params.risk_reward_ratio,
            Direction::Short => trigger - risk * self.params.risk_reward_ratio,
        };

        let mut metadata = HashMap::new();
        metadata.insert(
            "order_block_high".to_string(),
            serde_json::json!(block.price_high),
        );
        metadata.insert(
            "order_block_low".to_string(),
            serde_json::json!(block.price_low),
        );
        metadata.insert(
            "strength_details".to_string(),
            serde_json::json!({
                "swing_proximity": swing,
                "fib_confluence": fib,
                "mtf_confluence": mtf,
            }),
        );

        Signal {
            id: Uuid::new_v4().to_string(),
            strategy_name: self.name().to_string(),
            exchange: block.exchange.clone(),
            symbol: block.symbol.clone(),
            timeframe: block.timeframe,
            direction,
            signal_type: SignalType::Entry,
            price_target: Some(quantize_price(trigger)),
            stop_loss: Some(quantize_price(stop_loss)),
            take_profit: Some(quantize_price(take_profit)),
            risk_reward_ratio: Some(self.params.risk_reward_ratio),
            confidence_score: quantize_percent(strength),
            execution_status: ExecutionStatus::Pending,
            timestamp: Utc::now(),
            metadata,
            indicator_id: Some(block.id.clone()),
        }
    }
}

#[async_trait]
impl Strategy for OrderBlockStrategy {
    fn name(&self) -> &str {
        "OrderBlock"
    }

    fn required_indicators(&self) -> Vec<IndicatorType> {
        vec![
            IndicatorType::OrderBlock,
            IndicatorType::Fvg,
            IndicatorType::StructureBreak,
            IndicatorType::DojiCandle,
        ]
    }

    fn timeframes(&self) -> Vec<Timeframe> {
        self.params.timeframes.clone()
    }

    fn lookback(&self) -> usize {
        self.params.lookback
    }

    async fn analyze(&self, results: &DagRun) -> Vec<Signal> {
        let Some(blocks) = results
            .outcome(IndicatorType::OrderBlock)
            .and_then(|o| o.as_order_blocks())
        else {
            return Vec::new();
        };
        if results.market_contexts.is_empty() {
            return Vec::new();
        }

        let all_blocks: Vec<OrderBlock> = blocks.all_blocks().cloned().collect();
        let mut signals = Vec::new();

        for block in &all_blocks {
            if !block.is_active() {
                continue;
            }

            let (strength, swing, fib, mtf) = self
                .strength(block, &results.market_contexts, &all_blocks)
                .await;
            if strength < self.params.strength_threshold {
                debug!(
                    "Order block {} below strength threshold: {}",
                    block.id, strength
                );
                continue;
            }

            let mut signal = self.build_signal(block, strength, swing, fib, mtf);
            if self.validate(&mut signal) {
                info!(
                    "Generated {} signal from block {} (strength {})",
                    signal.direction, block.id, strength
                );
                signals.push(signal);
            }
        }

        signals
    }

    fn validate(&self, signal: &mut Signal) -> bool {
        if signal.symbol.is_empty() || signal.exchange.is_empty() {
            warn!("Signal missing required fields");
            return false;
        }

        if signal.price_target.is_none() {
            warn!("Signal missing entry price target");
            return false;
        }
        if signal.stop_loss.is_none() {
            warn!("Signal missing stop loss price");
            return false;
        }
        if signal.take_profit.is_none() {
            warn!("Signal missing take profit price");
            return false;
        }

        // Fill in the ratio from the price targets when the caller did not
        // provide one; either way the final value faces the minimum.
        if signal.risk_reward_ratio.is_none() {
            let Some((risk, reward)) = signal.risk_reward() else {
                return false;
            };
            if risk.is_zero() {
                warn!("Invalid signal: risk is zero");
                return false;
            }
            signal.risk_reward_ratio = Some(reward / risk);
        }

        match signal.risk_reward_ratio {
            Some(ratio) if ratio >= self.params.min_risk_reward_ratio => true,
            Some(ratio) => {
                info!(
                    "Signal R:R ratio {} below minimum {}",
                    ratio, self.params.min_risk_reward_ratio
                );
                false
            }
            None => false,
        }
    }
}
