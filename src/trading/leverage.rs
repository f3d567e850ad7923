//! Leverage decision engine.
//!
//! Pure and deterministic: the same inputs always produce the same
//! decision. Starts from the symbol profile's base leverage and applies
//! signal strength, recent performance, market conditions, volatility,
//! and account size, then clamps to the profile bounds.

use std::collections::HashMap;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::trading::config::{
    LeverageProfile, MarketCondition, PerformanceSnapshot, RiskLimits,
};
use crate::trading::volatility::VolatilitySnapshot;

/// Outcome of a leverage decision, with the per-factor breakdown
/// retained for logging and diagnostics.
#[derive(Debug, Clone)]
pub struct LeverageDecision {
    pub leverage: u32,

    /// Multiplier applied per adjustment step, keyed by factor name
    pub breakdown: HashMap<&'static str, f64>,

    /// Set when very poor performance clamped the result
    pub emergency_override: bool,
}

/// Decide leverage for a signal.
///
/// `strength` is the signal's deviation magnitude in [0, 1];
/// `volatility` comes from the assessor (or its fallback); `balance`
/// is the current account balance.
pub fn decide_leverage(
    profile: &LeverageProfile,
    strength: f64,
    performance: &PerformanceSnapshot,
    conditions: &[MarketCondition],
    volatility: &VolatilitySnapshot,
    balance: Decimal,
    limits: &RiskLimits,
) -> LeverageDecision {
    let balance = balance.to_f64().unwrap_or(0.0);
    let mut breakdown = HashMap::new();

    let mut leverage = profile.base_leverage as f64;
    breakdown.insert("base", profile.base_leverage as f64);

    // Signal strength is the dominant factor, scaled from a 0.15 baseline
    let signal_multiplier = (1.0 + (strength - 0.15) * 1.5).clamp(0.7, 1.4);
    leverage *= signal_multiplier;
    breakdown.insert("signal_strength", signal_multiplier);

    let perf_multiplier = performance.tier_multiplier();
    leverage *= perf_multiplier;
    breakdown.insert("performance", perf_multiplier);

    let mut market_multiplier = 1.0;
    for condition in conditions {
        market_multiplier *= condition.multiplier();
    }
    leverage *= market_multiplier;
    breakdown.insert("market_conditions", market_multiplier);

    // Symbol's static volatility coefficient and the live assessment
    leverage *= profile.volatility_adjustment;
    breakdown.insert("volatility_profile", profile.volatility_adjustment);

    leverage *= volatility.adjustment_factor;
    breakdown.insert("volatility_market", volatility.adjustment_factor);

    // Larger accounts can absorb more leverage
    if balance > 10_000.0 {
        let size_multiplier = (1.0 + (balance - 10_000.0) / 50_000.0).min(1.15);
        leverage *= size_multiplier;
        breakdown.insert("account_size", size_multiplier);
    }

    let mut final_leverage =
        (leverage as u32).clamp(profile.min_leverage, profile.max_leverage);

    // Very poor recent performance overrides everything
    let emergency_override = performance.win_rate < limits.emergency_win_rate;
    if emergency_override {
        final_leverage = final_leverage.min(profile.min_leverage + 2);
        breakdown.insert("emergency_override", 1.0);
    }

    LeverageDecision {
        leverage: final_leverage,
        breakdown,
        emergency_override,
    }
}
