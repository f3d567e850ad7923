//! Execution records: one terminal outcome per processed signal.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::signal::TradeAction;

/// Terminal status of an execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Order placed and filled
    Filled,
    /// Deliberately not traded (validation, policy, or account state)
    Rejected,
    /// Infrastructure failure after exhausting retries
    Error,
}

/// Why a signal was rejected without trading. Rejections are terminal
/// and never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectKind {
    /// Signal failed provenance or field validation
    Validation,
    /// Risk policy blocked the trade
    Policy,
    /// Exchange refused the order for account reasons (funds, params)
    FatalAccount,
}

/// Record of one execution attempt, appended to the bounded history ring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Signal that triggered this attempt
    pub signal_id: Uuid,

    /// Futures symbol
    pub symbol: String,

    /// Requested direction
    pub side: TradeAction,

    /// Terminal outcome
    pub status: ExecutionStatus,

    /// Quantity we asked the exchange for
    pub requested_quantity: Decimal,

    /// Quantity actually filled (zero unless Filled)
    pub executed_quantity: Decimal,

    /// Price hint from the signal
    pub requested_price: Decimal,

    /// Average fill price (zero unless Filled)
    pub executed_price: Decimal,

    /// Signed slippage in percent. Positive means the fill was worse
    /// than requested for our side.
    pub slippage_pct: Decimal,

    /// Leverage applied to the order
    pub leverage: u32,

    /// Fees charged by the exchange
    pub fees: Decimal,

    /// Number of retries before the terminal outcome
    pub retry_count: u32,

    /// Wall-clock latency of the whole pipeline in milliseconds
    pub execution_time_ms: u64,

    /// Classification when status is Rejected
    pub reject_kind: Option<RejectKind>,

    /// Human-readable reason for Rejected/Error outcomes
    pub reason: Option<String>,

    /// When the outcome was recorded
    pub completed_at: DateTime<Utc>,
}

impl ExecutionResult {
    /// Signed slippage in percent between the requested and executed price.
    /// Longs suffer when fills come in above the request, shorts below it.
    pub fn calculate_slippage(
        side: TradeAction,
        requested: Decimal,
        executed: Decimal,
    ) -> Decimal {
        if requested.is_zero() {
            return Decimal::ZERO;
        }
        let hundred = Decimal::from(100);
        match side {
            TradeAction::Long => (executed - requested) / requested * hundred,
            TradeAction::Short => (requested - executed) / requested * hundred,
        }
    }

    pub fn is_filled(&self) -> bool {
        self.status == ExecutionStatus::Filled
    }
}

/// Events broadcast to notification/analytics collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TradeEvent {
    /// Entry order filled
    Filled {
        symbol: String,
        side: TradeAction,
        quantity: Decimal,
        price: Decimal,
        leverage: u32,
        slippage_pct: Decimal,
    },
    /// Signal rejected before reaching the exchange
    Rejected {
        symbol: String,
        kind: RejectKind,
        reason: String,
    },
    /// Order failed after exhausting retries
    Failed { symbol: String, reason: String },
    /// Position closed
    Closed {
        symbol: String,
        realized_pnl: Decimal,
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_slippage_long() {
        // Long filled above request: positive (adverse) slippage
        let slip =
            ExecutionResult::calculate_slippage(TradeAction::Long, dec!(100), dec!(100.5));
        assert_eq!(slip, dec!(0.5));

        // Long filled below request: favorable
        let slip = ExecutionResult::calculate_slippage(TradeAction::Long, dec!(100), dec!(99));
        assert_eq!(slip, dec!(-1));
    }

    #[test]
    fn test_slippage_short() {
        // Short filled below request: positive (adverse) slippage
        let slip =
            ExecutionResult::calculate_slippage(TradeAction::Short, dec!(100), dec!(99.5));
        assert_eq!(slip, dec!(0.5));
    }

    #[test]
    fn test_slippage_zero_request() {
        let slip = ExecutionResult::calculate_slippage(TradeAction::Long, dec!(0), dec!(100));
        assert_eq!(slip, Decimal::ZERO);
    }
}
