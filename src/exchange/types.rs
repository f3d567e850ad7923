//! Wire-level types and the typed error taxonomy for exchange calls.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::TradeAction;

/// Errors surfaced by exchange calls. Retryability drives the order
/// pipeline: transient failures get bounded retries, account-level
/// refusals are terminal.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("rate limited by exchange")]
    RateLimited,

    #[error("exchange error {code}: {message}")]
    Exchange { code: i64, message: String },

    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("invalid order: {0}")]
    InvalidOrder(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("unexpected response shape: {0}")]
    Parse(String),
}

impl ExchangeError {
    /// Whether a retry could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExchangeError::Network(_)
                | ExchangeError::Timeout
                | ExchangeError::RateLimited
                | ExchangeError::Exchange { .. }
        )
    }

    /// Account-level refusals: the order itself is unplaceable, so the
    /// signal is rejected rather than errored.
    pub fn is_fatal_account(&self) -> bool {
        matches!(
            self,
            ExchangeError::InsufficientFunds(_) | ExchangeError::InvalidOrder(_)
        )
    }

    /// Map a reqwest failure onto the taxonomy.
    pub fn from_http(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ExchangeError::Timeout
        } else {
            ExchangeError::Network(err.to_string())
        }
    }
}

/// One OHLCV candle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// Last-price ticker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    pub last_price: Decimal,
}

/// Futures account balance in the quote asset.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AccountBalance {
    pub total: Decimal,
    pub available: Decimal,
}

/// Order direction on the exchange wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }

    /// Entry side for a trade direction.
    pub fn entry_for(action: TradeAction) -> Self {
        match action {
            TradeAction::Long => OrderSide::Buy,
            TradeAction::Short => OrderSide::Sell,
        }
    }

    /// Closing side for a trade direction.
    pub fn exit_for(action: TradeAction) -> Self {
        match action {
            TradeAction::Long => OrderSide::Sell,
            TradeAction::Short => OrderSide::Buy,
        }
    }
}

/// Market order request.
#[derive(Debug, Clone, Serialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    /// Close-only orders never increase exposure
    pub reduce_only: bool,
}

/// Fill details returned by the exchange.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderFill {
    pub order_id: String,
    pub symbol: String,
    pub executed_quantity: Decimal,
    pub average_price: Decimal,
    pub fee: Decimal,
}

/// Open position as reported by the exchange.
#[derive(Debug, Clone, Deserialize)]
pub struct PositionInfo {
    pub symbol: String,
    /// Signed: negative for shorts
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub leverage: u32,
    pub unrealized_pnl: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryability() {
        assert!(ExchangeError::Timeout.is_retryable());
        assert!(ExchangeError::Network("reset".into()).is_retryable());
        assert!(ExchangeError::RateLimited.is_retryable());
        assert!(!ExchangeError::InsufficientFunds("margin".into()).is_retryable());
        assert!(!ExchangeError::InvalidOrder("bad qty".into()).is_retryable());
        assert!(!ExchangeError::Auth("bad key".into()).is_retryable());
    }

    #[test]
    fn test_fatal_account_classification() {
        assert!(ExchangeError::InsufficientFunds("margin".into()).is_fatal_account());
        assert!(ExchangeError::InvalidOrder("bad qty".into()).is_fatal_account());
        assert!(!ExchangeError::Timeout.is_fatal_account());
        assert!(!ExchangeError::Auth("bad key".into()).is_fatal_account());
    }

    #[test]
    fn test_order_sides() {
        assert_eq!(OrderSide::entry_for(TradeAction::Long), OrderSide::Buy);
        assert_eq!(OrderSide::exit_for(TradeAction::Long), OrderSide::Sell);
        assert_eq!(OrderSide::entry_for(TradeAction::Short), OrderSide::Sell);
        assert_eq!(OrderSide::exit_for(TradeAction::Short), OrderSide::Buy);
    }
}
