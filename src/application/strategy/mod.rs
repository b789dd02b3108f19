mod context;
mod dag;
mod mitigation;
mod runner;

pub mod indicators;
pub mod strategies;

pub use context::{CacheContextProvider, MarketContextProvider};
pub use dag::{DagRun, IndicatorDag};
pub use mitigation::{MitigationEngine, MitigationReport};
pub use runner::StrategyRunner;
