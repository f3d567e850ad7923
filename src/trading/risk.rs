//! Layered risk validation for proposed trades.
//!
//! Checks run in a fixed order; the first blocking failure stops
//! evaluation. Warnings accumulate and may shrink the proposal's
//! leverage or size. The caller runs this against a locked state
//! snapshot so exposure reads and the subsequent reservation are one
//! critical section.

use std::collections::HashMap;

use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::debug;

use crate::models::TradeAction;
use crate::trading::config::{correlation_group, RiskLimits};
use crate::trading::volatility::VolatilityRegime;

/// Trade proposal under evaluation. Produced by the leverage engine
/// and sizer, consumed here and by the executor.
#[derive(Debug, Clone)]
pub struct TradeProposal {
    pub symbol: String,
    pub action: TradeAction,
    pub leverage: u32,
    /// Profile floor, used when suggesting reduced leverage
    pub min_leverage: u32,
    pub size_fraction: f64,
    pub regime: VolatilityRegime,
}

/// Exposure attributed to one open position.
#[derive(Debug, Clone)]
pub struct PositionExposure {
    pub symbol: String,
    pub leverage: u32,
    pub size_fraction: f64,
    pub margin: Decimal,
}

/// Snapshot of account state the validator reads. Built under the
/// state lock.
#[derive(Debug, Clone)]
pub struct ExposureView {
    pub balance: Decimal,
    pub daily_pnl: Decimal,
    pub emergency: bool,
    pub open_positions: Vec<PositionExposure>,
    /// Cumulative size fraction per correlation group
    pub group_exposure: HashMap<String, f64>,
}

impl ExposureView {
    /// Sum of leverage * size fraction across open positions.
    pub fn portfolio_leverage_units(&self) -> f64 {
        self.open_positions
            .iter()
            .map(|p| p.leverage as f64 * p.size_fraction)
            .sum()
    }

    pub fn used_margin(&self) -> Decimal {
        self.open_positions.iter().map(|p| p.margin).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckSeverity {
    Warning,
    Blocking,
}

/// Outcome of one check in the sequence.
#[derive(Debug, Clone)]
pub struct RiskCheck {
    pub name: &'static str,
    pub passed: bool,
    pub severity: CheckSeverity,
    pub message: String,
}

impl RiskCheck {
    fn pass(name: &'static str) -> Self {
        Self {
            name,
            passed: true,
            severity: CheckSeverity::Warning,
            message: String::new(),
        }
    }

    fn warn(name: &'static str, message: String) -> Self {
        Self {
            name,
            passed: false,
            severity: CheckSeverity::Warning,
            message,
        }
    }

    fn block(name: &'static str, message: String) -> Self {
        Self {
            name,
            passed: false,
            severity: CheckSeverity::Blocking,
            message,
        }
    }
}

/// Final verdict. When allowed, `leverage` and `size_fraction` carry
/// any warning-driven adjustments.
#[derive(Debug, Clone)]
pub struct RiskVerdict {
    pub allowed: bool,
    pub reason: String,
    pub leverage: u32,
    pub size_fraction: f64,
    pub risk_score: f64,
    pub checks: Vec<RiskCheck>,
}

/// The risk validator. Stateless apart from its limits; all account
/// state arrives through the `ExposureView`.
pub struct RiskValidator {
    limits: RiskLimits,
}

impl RiskValidator {
    pub fn new(limits: RiskLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    /// Validate a proposal against the account snapshot. `now` is
    /// injected so time-of-day rules are testable.
    pub fn validate(
        &self,
        proposal: &TradeProposal,
        view: &ExposureView,
        now: DateTime<Utc>,
    ) -> RiskVerdict {
        let mut checks = Vec::new();
        let mut leverage = proposal.leverage;
        let mut size = proposal.size_fraction;

        let blocked = |checks: Vec<RiskCheck>, reason: String| RiskVerdict {
            allowed: false,
            reason,
            leverage: proposal.leverage,
            size_fraction: proposal.size_fraction,
            risk_score: 0.0,
            checks,
        };

        // 1. Emergency lockout
        if view.emergency {
            let msg = "emergency mode active, new entries locked out".to_string();
            checks.push(RiskCheck::block("emergency", msg.clone()));
            return blocked(checks, msg);
        }
        checks.push(RiskCheck::pass("emergency"));

        // 2. Daily loss limit
        let balance_f = view.balance.to_f64().unwrap_or(0.0);
        let daily_pnl_f = view.daily_pnl.to_f64().unwrap_or(0.0);
        let max_daily_loss = self.limits.max_daily_loss_pct * balance_f;
        if daily_pnl_f <= -max_daily_loss {
            let msg = format!(
                "daily loss {:.2} breaches limit {:.2}",
                daily_pnl_f, -max_daily_loss
            );
            checks.push(RiskCheck::block("daily_loss", msg.clone()));
            return blocked(checks, msg);
        }
        checks.push(RiskCheck::pass("daily_loss"));

        // 3. Portfolio leverage exposure
        let current_units = view.portfolio_leverage_units();
        let proposed_units = leverage as f64 * size;
        if current_units + proposed_units > self.limits.max_portfolio_leverage {
            let headroom = self.limits.max_portfolio_leverage - current_units;
            let reduced = if size > 0.0 {
                (headroom / size).floor() as i64
            } else {
                0
            };
            if reduced >= proposal.min_leverage as i64 {
                let msg = format!(
                    "portfolio leverage {:.2} + {:.2} over {:.1}, reducing leverage {} -> {}",
                    current_units,
                    proposed_units,
                    self.limits.max_portfolio_leverage,
                    leverage,
                    reduced
                );
                leverage = reduced as u32;
                checks.push(RiskCheck::warn("portfolio_leverage", msg));
            } else {
                let msg = format!(
                    "portfolio leverage exposure {:.2} leaves no room for entry",
                    current_units
                );
                checks.push(RiskCheck::block("portfolio_leverage", msg.clone()));
                return blocked(checks, msg);
            }
        } else {
            checks.push(RiskCheck::pass("portfolio_leverage"));
        }

        // 4. Correlated-asset exposure
        if let Some(group) = correlation_group(&proposal.symbol) {
            let group_size = view.group_exposure.get(group).copied().unwrap_or(0.0);
            if group_size >= self.limits.max_correlated_exposure {
                let msg = format!(
                    "correlation group '{}' already at exposure cap ({:.3})",
                    group, group_size
                );
                checks.push(RiskCheck::block("correlation", msg.clone()));
                return blocked(checks, msg);
            }
            if group_size + size > self.limits.max_correlated_exposure {
                let scaled = size * self.limits.correlation_size_scale;
                let msg = format!(
                    "correlation group '{}' exposure {:.3}, scaling size {:.4} -> {:.4}",
                    group, group_size, size, scaled
                );
                size = scaled.min(self.limits.max_correlated_exposure - group_size);
                checks.push(RiskCheck::warn("correlation", msg));
            } else {
                checks.push(RiskCheck::pass("correlation"));
            }
        } else {
            checks.push(RiskCheck::pass("correlation"));
        }

        // 5. High-leverage concentration
        if leverage > self.limits.high_leverage_threshold {
            let high_count = view
                .open_positions
                .iter()
                .filter(|p| p.leverage > self.limits.high_leverage_threshold)
                .count();
            if high_count >= self.limits.max_high_leverage_positions {
                let msg = format!(
                    "already {} positions above {}x",
                    high_count, self.limits.high_leverage_threshold
                );
                checks.push(RiskCheck::block("high_leverage_count", msg.clone()));
                return blocked(checks, msg);
            }
        }
        checks.push(RiskCheck::pass("high_leverage_count"));

        // 6. Margin sufficiency. A position's margin is size * balance,
        // since notional = size * balance * leverage.
        let new_margin = balance_f * size;
        let used_margin = view.used_margin().to_f64().unwrap_or(0.0);
        let margin_cap = self.limits.max_margin_usage * balance_f;
        let total_margin = used_margin + new_margin;
        if margin_cap <= 0.0 || total_margin > margin_cap {
            let msg = format!(
                "margin {:.2} would exceed cap {:.2}",
                total_margin, margin_cap
            );
            checks.push(RiskCheck::block("margin", msg.clone()));
            return blocked(checks, msg);
        }
        if total_margin >= 0.9 * margin_cap {
            checks.push(RiskCheck::warn(
                "margin",
                format!(
                    "margin usage {:.0}% of cap",
                    total_margin / margin_cap * 100.0
                ),
            ));
        } else {
            checks.push(RiskCheck::pass("margin"));
        }

        // 7. Time-of-day caps
        let is_weekend = matches!(now.weekday(), Weekday::Sat | Weekday::Sun);
        let hour = now.hour();
        let is_overnight = hour >= 23 || hour < 6;
        if is_weekend && leverage > self.limits.weekend_leverage_cap {
            let msg = format!(
                "weekend cap, reducing leverage {} -> {}",
                leverage, self.limits.weekend_leverage_cap
            );
            leverage = self.limits.weekend_leverage_cap;
            checks.push(RiskCheck::warn("time_of_day", msg));
        } else if is_overnight && leverage > self.limits.overnight_leverage_cap {
            let msg = format!(
                "overnight cap, reducing leverage {} -> {}",
                leverage, self.limits.overnight_leverage_cap
            );
            leverage = self.limits.overnight_leverage_cap;
            checks.push(RiskCheck::warn("time_of_day", msg));
        } else {
            checks.push(RiskCheck::pass("time_of_day"));
        }

        // 8. Aggregate risk score
        let risk_score = self.risk_score(leverage, size, view.open_positions.len(), proposal.regime);
        if risk_score > self.limits.max_risk_score {
            let msg = format!(
                "risk score {:.1} above {:.0}",
                risk_score, self.limits.max_risk_score
            );
            checks.push(RiskCheck::block("risk_score", msg.clone()));
            return blocked(checks, msg);
        }
        checks.push(RiskCheck::pass("risk_score"));

        let warnings = checks.iter().filter(|c| !c.passed).count();
        debug!(
            symbol = %proposal.symbol,
            leverage = leverage,
            size = size,
            risk_score = risk_score,
            warnings = warnings,
            "Trade passed risk validation"
        );

        RiskVerdict {
            allowed: true,
            reason: "all risk checks passed".to_string(),
            leverage,
            size_fraction: size,
            risk_score,
            checks,
        }
    }

    /// 0-100 composite risk score for an adjusted proposal.
    fn risk_score(
        &self,
        leverage: u32,
        size: f64,
        open_count: usize,
        regime: VolatilityRegime,
    ) -> f64 {
        let leverage_component = leverage as f64 / 50.0 * 30.0;
        let size_component = size / 0.05 * 20.0;
        let concentration_component = open_count as f64 / 5.0 * 15.0;
        let vol_component = match regime {
            VolatilityRegime::High => {
                let base = 35.0;
                if leverage > 25 {
                    base + 10.0
                } else {
                    base
                }
            }
            VolatilityRegime::Normal => 10.0,
            VolatilityRegime::Low => 5.0,
        };

        (leverage_component + size_component + concentration_component + vol_component).min(100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn make_proposal() -> TradeProposal {
        TradeProposal {
            symbol: "ETHUSDT".to_string(),
            action: TradeAction::Long,
            leverage: 20,
            min_leverage: 10,
            size_fraction: 0.02,
            regime: VolatilityRegime::Normal,
        }
    }

    fn make_view() -> ExposureView {
        ExposureView {
            balance: dec!(10000),
            daily_pnl: Decimal::ZERO,
            emergency: false,
            open_positions: Vec::new(),
            group_exposure: HashMap::new(),
        }
    }

    fn weekday_noon() -> DateTime<Utc> {
        // Wednesday
        "2026-08-26T12:00:00Z".parse().unwrap()
    }

    #[test]
    fn test_clean_proposal_passes() {
        let validator = RiskValidator::new(RiskLimits::default());
        let verdict = validator.validate(&make_proposal(), &make_view(), weekday_noon());
        assert!(verdict.allowed, "{}", verdict.reason);
        assert_eq!(verdict.leverage, 20);
        assert_eq!(verdict.size_fraction, 0.02);
    }

    #[test]
    fn test_emergency_blocks_first() {
        let validator = RiskValidator::new(RiskLimits::default());
        let mut view = make_view();
        view.emergency = true;
        // Daily loss also breached, but emergency must be the reported reason
        view.daily_pnl = dec!(-5000);

        let verdict = validator.validate(&make_proposal(), &view, weekday_noon());
        assert!(!verdict.allowed);
        assert!(verdict.reason.contains("emergency"));
        assert_eq!(verdict.checks.len(), 1);
    }

    #[test]
    fn test_daily_loss_blocks() {
        let validator = RiskValidator::new(RiskLimits::default());
        let mut view = make_view();
        // 15% of 10000 = 1500
        view.daily_pnl = dec!(-1500);

        let verdict = validator.validate(&make_proposal(), &view, weekday_noon());
        assert!(!verdict.allowed);
        assert!(verdict.reason.contains("daily loss"));
    }

    #[test]
    fn test_portfolio_leverage_suggests_reduction() {
        let validator = RiskValidator::new(RiskLimits::default());
        let mut view = make_view();
        // 2.7 units already committed; 20x * 0.02 = 0.4 would breach 3.0
        view.open_positions.push(PositionExposure {
            symbol: "BTCUSDT".to_string(),
            leverage: 27,
            size_fraction: 0.10,
            margin: dec!(1000),
        });

        let verdict = validator.validate(&make_proposal(), &view, weekday_noon());
        assert!(verdict.allowed, "{}", verdict.reason);
        // headroom 0.3 / size 0.02 = 15
        assert_eq!(verdict.leverage, 15);
        assert!(verdict
            .checks
            .iter()
            .any(|c| c.name == "portfolio_leverage" && !c.passed));
    }

    #[test]
    fn test_portfolio_leverage_blocks_when_min_does_not_fit() {
        let validator = RiskValidator::new(RiskLimits::default());
        let mut view = make_view();
        view.open_positions.push(PositionExposure {
            symbol: "BTCUSDT".to_string(),
            leverage: 29,
            size_fraction: 0.10,
            margin: dec!(1000),
        });

        // headroom = 3.0 - 2.9 = 0.1; 0.1 / 0.02 = 5 < min_leverage 10
        let verdict = validator.validate(&make_proposal(), &view, weekday_noon());
        assert!(!verdict.allowed);
        assert!(verdict.reason.contains("portfolio leverage"));
    }

    #[test]
    fn test_correlation_warning_scales_size() {
        let validator = RiskValidator::new(RiskLimits::default());
        let mut view = make_view();
        view.group_exposure.insert("majors".to_string(), 0.09);

        let verdict = validator.validate(&make_proposal(), &view, weekday_noon());
        assert!(verdict.allowed);
        assert!(verdict.size_fraction < 0.02);
        assert!(verdict
            .checks
            .iter()
            .any(|c| c.name == "correlation" && !c.passed));
    }

    #[test]
    fn test_correlation_blocks_at_cap() {
        let validator = RiskValidator::new(RiskLimits::default());
        let mut view = make_view();
        view.group_exposure.insert("majors".to_string(), 0.10);

        let verdict = validator.validate(&make_proposal(), &view, weekday_noon());
        assert!(!verdict.allowed);
        assert!(verdict.reason.contains("correlation"));
    }

    #[test]
    fn test_high_leverage_concentration_blocks() {
        let validator = RiskValidator::new(RiskLimits::default());
        let mut view = make_view();
        view.balance = dec!(100000);
        for symbol in ["SOLUSDT", "DOGEUSDT"] {
            view.open_positions.push(PositionExposure {
                symbol: symbol.to_string(),
                leverage: 35,
                size_fraction: 0.01,
                margin: dec!(500),
            });
        }

        let mut proposal = make_proposal();
        proposal.leverage = 35;
        proposal.size_fraction = 0.01;

        let verdict = validator.validate(&proposal, &view, weekday_noon());
        assert!(!verdict.allowed);
        assert!(verdict.reason.contains("positions above"));
    }

    #[test]
    fn test_margin_blocks_when_exhausted() {
        let validator = RiskValidator::new(RiskLimits::default());
        let mut view = make_view();
        view.open_positions.push(PositionExposure {
            symbol: "BTCUSDT".to_string(),
            leverage: 5,
            size_fraction: 0.05,
            margin: dec!(7990),
        });

        let verdict = validator.validate(&make_proposal(), &view, weekday_noon());
        assert!(!verdict.allowed);
        assert!(verdict.reason.contains("margin"));
    }

    #[test]
    fn test_weekend_cap_reduces_leverage() {
        let validator = RiskValidator::new(RiskLimits::default());
        let saturday: DateTime<Utc> = "2026-08-29T12:00:00Z".parse().unwrap();

        let mut proposal = make_proposal();
        proposal.symbol = "SOLUSDT".to_string();
        proposal.leverage = 30;
        proposal.size_fraction = 0.01;

        let verdict = validator.validate(&proposal, &make_view(), saturday);
        assert!(verdict.allowed, "{}", verdict.reason);
        assert_eq!(verdict.leverage, 25);
    }

    #[test]
    fn test_overnight_cap_reduces_leverage() {
        let validator = RiskValidator::new(RiskLimits::default());
        let late: DateTime<Utc> = "2026-08-26T23:30:00Z".parse().unwrap();

        let mut proposal = make_proposal();
        proposal.symbol = "SOLUSDT".to_string();
        proposal.leverage = 40;
        proposal.size_fraction = 0.01;

        let verdict = validator.validate(&proposal, &make_view(), late);
        assert!(verdict.allowed, "{}", verdict.reason);
        assert_eq!(verdict.leverage, 30);
    }

    #[test]
    fn test_risk_score_rejects_extremes() {
        let validator = RiskValidator::new(RiskLimits::default());
        let mut view = make_view();
        view.balance = dec!(100000);
        for symbol in ["BNBUSDT", "XRPUSDT", "ADAUSDT", "AVAXUSDT"] {
            view.open_positions.push(PositionExposure {
                symbol: symbol.to_string(),
                leverage: 5,
                size_fraction: 0.01,
                margin: dec!(1000),
            });
        }

        let mut proposal = make_proposal();
        proposal.symbol = "SOLUSDT".to_string();
        proposal.leverage = 30;
        proposal.size_fraction = 0.025;
        proposal.regime = VolatilityRegime::High;

        // 30/50*30=18 + 0.025/0.05*20=10 + 4/5*15=12 + 45 = 85 > 75
        let verdict = validator.validate(&proposal, &view, weekday_noon());
        assert!(!verdict.allowed);
        assert!(verdict.reason.contains("risk score"));
    }
}
