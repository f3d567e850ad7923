//! Data models for signals, leveraged positions, and execution records.

mod signal;
mod position;
mod execution;

pub use signal::{Signal, TradeAction};
pub use position::{OpenPosition, PositionStatus};
pub use execution::{ExecutionResult, ExecutionStatus, RejectKind, TradeEvent};
