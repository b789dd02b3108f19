mod doji;
mod fvg;
mod order_block;
mod structure;
mod types;

pub use doji::{Doji, DojiResult};
pub use fvg::{Fvg, FvgKind, FvgResult};
pub use order_block::{OrderBlock, OrderBlockKind, OrderBlockResult};
pub use structure::{BreakKind, StructureBreak, StructureBreakResult};
pub use types::{IndicatorStatus, IndicatorType};
