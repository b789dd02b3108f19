mod candle;
mod context;
mod timeframe;

pub use candle::{Candle, CandleEvent, CandleSource, LastUpdated};
pub use context::{FibLevel, MarketContext, RangeInfo, SwingPoint, Trend};
pub use timeframe::{calculate_candle_boundaries, timeframe_hierarchy, Timeframe};
