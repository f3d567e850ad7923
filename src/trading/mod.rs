//! Trading logic: configuration, volatility assessment, leverage
//! decisions, position sizing, risk validation, shared state, and the
//! order execution pipeline.

mod config;
mod executor;
mod leverage;
mod risk;
mod sizer;
mod state;
mod volatility;

pub use config::{
    LeverageProfile, MarketCondition, PerformanceSnapshot, RiskLimits, RiskTier, TradingConfig,
    CORRELATION_GROUPS,
};
pub use executor::OrderExecutor;
pub use leverage::{decide_leverage, LeverageDecision};
pub use risk::{RiskValidator, RiskVerdict, TradeProposal};
pub use sizer::{size_position, RiskBudget};
pub use state::{RiskSnapshot, TradingState};
pub use volatility::{VolatilityRegime, VolatilitySnapshot};
