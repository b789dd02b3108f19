mod order;
mod position;
mod signal;

pub use order::{Order, OrderEvent, OrderEventKind, OrderSide, OrderStatus, OrderType};
pub use position::{Position, PositionStatus};
pub use signal::{Direction, ExecutionStatus, Signal, SignalType};
