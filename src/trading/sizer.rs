//! Position sizing: fraction of account balance committed per trade.
//!
//! Higher leverage means a smaller fraction for the same dollar risk.
//! The returned value is a rate, not money, so it stays in f64.

use serde::{Deserialize, Serialize};

/// Base fraction of the account committed before adjustments (2%).
const BASE_POSITION: f64 = 0.02;

/// Size the position for a trade as a fraction of account balance.
///
/// Deterministic. `leverage` is the decided leverage, `strength` the
/// signal strength in [0, 1], `balance` the account balance in quote
/// currency.
pub fn size_position(leverage: u32, strength: f64, balance: f64) -> f64 {
    let leverage = leverage.max(1);

    // Stronger signals earn larger positions
    let signal_multiplier = (0.8 + strength).min(1.5);

    // Inverse relationship with leverage
    let leverage_adjustment = (15.0 / leverage as f64).min(1.2);

    let account_adjustment = if balance > 15_000.0 {
        (1.0 + (balance - 15_000.0) / 100_000.0).min(1.1)
    } else {
        1.0
    };

    let size = BASE_POSITION * signal_multiplier * leverage_adjustment * account_adjustment;

    size.min(max_size_for_leverage(leverage))
}

/// Hard ceiling on position size keyed by leverage bracket.
pub fn max_size_for_leverage(leverage: u32) -> f64 {
    if leverage > 40 {
        0.015
    } else if leverage > 30 {
        0.025
    } else if leverage > 20 {
        0.035
    } else {
        0.05
    }
}

/// Loss-reactive size multiplier owned by the trading state.
///
/// Shrinks sharply after losing closes and recovers slowly after
/// winning ones, floored so the account keeps trading its way back.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RiskBudget {
    multiplier: f64,
}

const BUDGET_FLOOR: f64 = 0.25;
const BUDGET_CEILING: f64 = 1.0;
const LOSS_SCALE: f64 = 0.8;
const WIN_RECOVERY: f64 = 0.05;

impl Default for RiskBudget {
    fn default() -> Self {
        Self {
            multiplier: BUDGET_CEILING,
        }
    }
}

impl RiskBudget {
    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    pub fn record_loss(&mut self) {
        self.multiplier = (self.multiplier * LOSS_SCALE).max(BUDGET_FLOOR);
    }

    pub fn record_win(&mut self) {
        self.multiplier = (self.multiplier + WIN_RECOVERY).min(BUDGET_CEILING);
    }

    /// Restore the full budget (daily reset).
    pub fn reset(&mut self) {
        self.multiplier = BUDGET_CEILING;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_higher_leverage_smaller_size() {
        let low = size_position(10, 0.3, 10_000.0);
        let high = size_position(35, 0.3, 10_000.0);
        assert!(high < low);
    }

    #[test]
    fn test_tier_ceilings() {
        // Strong signal and big account push size to the cap in each bracket
        assert!(size_position(45, 1.0, 200_000.0) <= 0.015);
        assert!(size_position(35, 1.0, 200_000.0) <= 0.025);
        assert!(size_position(25, 1.0, 200_000.0) <= 0.035);
        assert!(size_position(10, 1.0, 200_000.0) <= 0.05);
    }

    #[test]
    fn test_bracket_boundaries() {
        assert_eq!(max_size_for_leverage(41), 0.015);
        assert_eq!(max_size_for_leverage(40), 0.025);
        assert_eq!(max_size_for_leverage(31), 0.025);
        assert_eq!(max_size_for_leverage(30), 0.035);
        assert_eq!(max_size_for_leverage(21), 0.035);
        assert_eq!(max_size_for_leverage(20), 0.05);
    }

    #[test]
    fn test_reference_scenario() {
        // $10k account, 20x, moderate strength: 0.02 * 1.1 * 0.75 = 0.0165
        let size = size_position(20, 0.3, 10_000.0);
        assert!((size - 0.0165).abs() < 1e-9);
    }

    #[test]
    fn test_account_bonus_only_above_15k() {
        let base = size_position(15, 0.3, 15_000.0);
        let bigger = size_position(15, 0.3, 65_000.0);
        assert!(bigger > base);

        let small_a = size_position(15, 0.3, 5_000.0);
        let small_b = size_position(15, 0.3, 14_000.0);
        assert_eq!(small_a, small_b);
    }

    #[test]
    fn test_risk_budget_shrinks_and_recovers() {
        let mut budget = RiskBudget::default();
        assert_eq!(budget.multiplier(), 1.0);

        budget.record_loss();
        assert!((budget.multiplier() - 0.8).abs() < 1e-9);
        budget.record_loss();
        assert!((budget.multiplier() - 0.64).abs() < 1e-9);

        budget.record_win();
        assert!((budget.multiplier() - 0.69).abs() < 1e-9);
    }

    #[test]
    fn test_risk_budget_floor() {
        let mut budget = RiskBudget::default();
        for _ in 0..50 {
            budget.record_loss();
        }
        assert_eq!(budget.multiplier(), 0.25);
    }

    #[test]
    fn test_risk_budget_ceiling() {
        let mut budget = RiskBudget::default();
        for _ in 0..10 {
            budget.record_win();
        }
        assert_eq!(budget.multiplier(), 1.0);
    }
}
