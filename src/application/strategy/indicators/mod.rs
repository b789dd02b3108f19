//! Indicator seam: calculation over a shared data bag, dependency
//! declaration for the DAG, and mitigation hooks for persisted instances.

mod doji;
mod fvg;
mod hidden_ob;
mod order_block;
mod structure;

pub use doji::DojiIndicator;
pub use fvg::FvgIndicator;
pub use hidden_ob::HiddenOrderBlockIndicator;
pub use order_block::{OrderBlockIndicator, OrderBlockParams};
pub use structure::StructureBreakIndicator;

use crate::domain::errors::IndicatorError;
use crate::domain::indicators::{
    DojiResult, FvgResult, IndicatorType, OrderBlock, OrderBlockResult, StructureBreakResult,
};
use crate::domain::market::{Candle, MarketContext, Timeframe};
use crate::domain::repositories::IndicatorRepository;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Everything an indicator may consume for one bar: the candle window,
/// market contexts, and the results of indicators that already ran.
#[derive(Debug, Clone)]
pub struct IndicatorData {
    pub exchange: String,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub candles: Vec<Candle>,
    pub market_contexts: Vec<MarketContext>,
    pub current_price: Decimal,
    pub timestamp: DateTime<Utc>,
    results: HashMap<IndicatorType, IndicatorOutcome>,
}

impl IndicatorData {
    pub fn new(
        candles: Vec<Candle>,
        market_contexts: Vec<MarketContext>,
    ) -> Result<Self, IndicatorError> {
        let first = candles.first().ok_or(IndicatorError::InsufficientData {
            need: 1,
            got: 0,
        })?;
        let last = candles.last().expect("non-empty after first() check");
        Ok(Self {
            exchange: first.exchange.clone(),
            symbol: first.symbol.clone(),
            timeframe: first.timeframe,
            current_price: last.close,
            timestamp: Utc::now(),
            candles,
            market_contexts,
            results: HashMap::new(),
        })
    }

    /// Result slot of an already-executed indicator. Failed dependencies
    /// are visible here so dependents can degrade gracefully.
    pub fn dependency(&self, indicator_type: IndicatorType) -> Option<&IndicatorOutcome> {
        self.results.get(&indicator_type)
    }

    pub fn store_result(&mut self, indicator_type: IndicatorType, outcome: IndicatorOutcome) {
        self.results.insert(indicator_type, outcome);
    }

    pub fn into_results(self) -> HashMap<IndicatorType, IndicatorOutcome> {
        self.results
    }
}

/// Result of one indicator execution. A failed indicator stores its error
/// in place of a result so downstream indicators see the failure instead
/// of a missing slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IndicatorOutcome {
    OrderBlocks(OrderBlockResult),
    Fvg(FvgResult),
    Dojis(DojiResult),
    StructureBreaks(StructureBreakResult),
    Failed { error: String },
}

impl IndicatorOutcome {
    pub fn as_order_blocks(&self) -> Option<&OrderBlockResult> {
        match self {
            IndicatorOutcome::OrderBlocks(result) => Some(result),
            _ => None,
        }
    }

    pub fn as_fvg(&self) -> Option<&FvgResult> {
        match self {
            IndicatorOutcome::Fvg(result) => Some(result),
            _ => None,
        }
    }

    pub fn as_dojis(&self) -> Option<&DojiResult> {
        match self {
            IndicatorOutcome::Dojis(result) => Some(result),
            _ => None,
        }
    }

    pub fn as_structure_breaks(&self) -> Option<&StructureBreakResult> {
        match self {
            IndicatorOutcome::StructureBreaks(result) => Some(result),
            _ => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, IndicatorOutcome::Failed { .. })
    }
}

/// Data requirements declared by an indicator or strategy.
#[derive(Debug, Clone, Default)]
pub struct IndicatorRequirements {
    pub indicators: Vec<IndicatorType>,
    pub lookback: usize,
    pub timeframes: Vec<Timeframe>,
}

#[async_trait]
pub trait Indicator: Send + Sync {
    fn indicator_type(&self) -> IndicatorType;

    fn requirements(&self) -> IndicatorRequirements;

    async fn calculate(&self, data: &IndicatorData) -> Result<IndicatorOutcome, IndicatorError>;

    /// Reconcile persisted instances against recent candles; returns
    /// `(updated, still_valid)`. Only meaningful for mitigation-bearing
    /// indicator kinds; the default is a no-op.
    async fn process_existing(
        &self,
        instances: Vec<OrderBlock>,
        _candles: &[Candle],
    ) -> (Vec<OrderBlock>, Vec<OrderBlock>) {
        (Vec::new(), instances)
    }

    /// Price band worth fetching persisted instances for, given the
    /// current candle window: the window extent padded by 5%.
    fn relevant_price_range(&self, candles: &[Candle]) -> (Decimal, Decimal) {
        let highest = candles.iter().map(|c| c.high).max().unwrap_or_default();
        let lowest = candles.iter().map(|c| c.low).min().unwrap_or_default();
        let buffer = (highest - lowest) * dec!(0.05);
        (lowest - buffer, highest + buffer)
    }

    fn repository(&self) -> Option<Arc<dyn IndicatorRepository>> {
        None
    }
}
