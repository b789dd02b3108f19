mod order_block_strategy;

pub use order_block_strategy::{OrderBlockStrategy, OrderBlockStrategyParams};

use crate::application::strategy::DagRun;
use crate::domain::indicators::IndicatorType;
use crate::domain::market::Timeframe;
use crate::domain::trading::Signal;
use async_trait::async_trait;

/// A trading strategy: consumes indicator results for one bar and emits
/// zero or more signals.
#[async_trait]
pub trait Strategy: Send + Sync {
    fn name(&self) -> &str;

    /// Indicators this strategy needs the DAG to run.
    fn required_indicators(&self) -> Vec<IndicatorType>;

    /// Timeframes the strategy trades on.
    fn timeframes(&self) -> Vec<Timeframe>;

    /// Candle history needed for a meaningful analysis.
    fn lookback(&self) -> usize;

    async fn analyze(&self, results: &DagRun) -> Vec<Signal>;

    /// Gate a candidate signal before publication. May fill in derived
    /// fields (e.g. the risk/reward ratio) on the way through.
    fn validate(&self, signal: &mut Signal) -> bool;
}
