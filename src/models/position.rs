//! Position model representing a live leveraged futures position.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::signal::TradeAction;

/// Lifecycle status of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    Open,
    Closed,
}

/// An open leveraged position. At most one per symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenPosition {
    /// Futures symbol
    pub symbol: String,

    /// Position direction
    pub side: TradeAction,

    /// Executed entry price
    pub entry_price: Decimal,

    /// Contract quantity in base asset
    pub quantity: Decimal,

    /// Applied leverage
    pub leverage: u32,

    /// Position size as fraction of account balance at entry
    pub size_fraction: f64,

    /// Stop-loss trigger price
    pub stop_loss: Decimal,

    /// Take-profit trigger price
    pub take_profit: Decimal,

    /// When the entry order filled
    pub opened_at: DateTime<Utc>,

    /// Lifecycle status
    pub status: PositionStatus,

    /// Exchange order id of the entry fill
    pub entry_order_id: String,
}

impl OpenPosition {
    /// Notional value at a given mark price.
    pub fn notional(&self, price: Decimal) -> Decimal {
        self.quantity * price
    }

    /// Margin consumed by this position at its entry notional.
    pub fn margin(&self) -> Decimal {
        if self.leverage == 0 {
            return self.notional(self.entry_price);
        }
        self.notional(self.entry_price) / Decimal::from(self.leverage)
    }

    /// Unrealized P&L at a given mark price. Directional: shorts profit
    /// when price falls.
    pub fn unrealized_pnl(&self, mark_price: Decimal) -> Decimal {
        let diff = mark_price - self.entry_price;
        match self.side {
            TradeAction::Long => self.quantity * diff,
            TradeAction::Short => self.quantity * -diff,
        }
    }

    /// Realized P&L when closing the full quantity at `exit_price`.
    pub fn realized_pnl(&self, exit_price: Decimal) -> Decimal {
        self.unrealized_pnl(exit_price)
    }

    /// Whether the stop-loss would trigger at the given price.
    pub fn stop_hit(&self, price: Decimal) -> bool {
        match self.side {
            TradeAction::Long => price <= self.stop_loss,
            TradeAction::Short => price >= self.stop_loss,
        }
    }

    /// Whether the take-profit would trigger at the given price.
    pub fn take_profit_hit(&self, price: Decimal) -> bool {
        match self.side {
            TradeAction::Long => price >= self.take_profit,
            TradeAction::Short => price <= self.take_profit,
        }
    }
}
