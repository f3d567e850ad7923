//! Static trading configuration: per-symbol leverage profiles,
//! market-condition multipliers, performance tiers, and risk limits.
//!
//! Built once at startup and treated as immutable afterwards.

use serde::{Deserialize, Serialize};

/// Risk appetite bucket for a symbol. Drives stop/take distances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    Conservative,
    Moderate,
    Aggressive,
}

impl RiskTier {
    /// Stop-loss distance as a fraction of entry price.
    pub fn stop_loss_pct(&self) -> f64 {
        match self {
            RiskTier::Conservative => 0.015,
            RiskTier::Moderate => 0.02,
            RiskTier::Aggressive => 0.025,
        }
    }

    /// Take-profit distance as a fraction of entry price.
    pub fn take_profit_pct(&self) -> f64 {
        match self {
            RiskTier::Conservative => 0.04,
            RiskTier::Moderate => 0.05,
            RiskTier::Aggressive => 0.06,
        }
    }
}

/// Per-symbol leverage envelope and adjustment coefficients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeverageProfile {
    pub symbol: String,

    /// Starting leverage before adjustments
    pub base_leverage: u32,

    /// Hard floor after all adjustments
    pub min_leverage: u32,

    /// Hard ceiling after all adjustments
    pub max_leverage: u32,

    /// Multiplier applied for this symbol's typical volatility
    pub volatility_adjustment: f64,

    /// Symbol-specific performance multiplier
    pub performance_multiplier: f64,

    /// Risk bucket for stop/take derivation
    pub risk_tier: RiskTier,
}

impl LeverageProfile {
    fn new(
        symbol: &str,
        base: u32,
        max: u32,
        min: u32,
        volatility_adjustment: f64,
        performance_multiplier: f64,
        risk_tier: RiskTier,
    ) -> Self {
        Self {
            symbol: symbol.to_string(),
            base_leverage: base,
            min_leverage: min,
            max_leverage: max,
            volatility_adjustment,
            performance_multiplier,
            risk_tier,
        }
    }

    /// Fallback profile for symbols without a seeded entry.
    pub fn conservative_default(symbol: &str) -> Self {
        Self::new(symbol, 10, 20, 5, 0.90, 0.95, RiskTier::Conservative)
    }
}

/// Observed market context at decision time. Each active condition
/// contributes a multiplier to the leverage decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketCondition {
    BullMarket,
    BearMarket,
    Sideways,
    HighVolatility,
    LowVolatility,
    Weekend,
    AsianSession,
    UsSession,
    LondonSession,
}

impl MarketCondition {
    /// Leverage multiplier contributed by this condition.
    pub fn multiplier(&self) -> f64 {
        match self {
            MarketCondition::BullMarket => 1.2,
            MarketCondition::BearMarket => 0.7,
            MarketCondition::Sideways => 1.0,
            MarketCondition::HighVolatility => 0.8,
            MarketCondition::LowVolatility => 1.1,
            MarketCondition::Weekend => 0.9,
            MarketCondition::AsianSession => 1.05,
            MarketCondition::UsSession => 0.95,
            MarketCondition::LondonSession => 1.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MarketCondition::BullMarket => "bull_market",
            MarketCondition::BearMarket => "bear_market",
            MarketCondition::Sideways => "sideways",
            MarketCondition::HighVolatility => "high_volatility",
            MarketCondition::LowVolatility => "low_volatility",
            MarketCondition::Weekend => "weekend",
            MarketCondition::AsianSession => "asian_session",
            MarketCondition::UsSession => "us_session",
            MarketCondition::LondonSession => "london_session",
        }
    }
}

/// Recent account performance, fed into the leverage decision.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PerformanceSnapshot {
    /// Win rate over the recent window (0.0 to 1.0)
    pub win_rate: f64,

    /// Return over the recent window as a fraction of balance
    pub recent_return: f64,
}

impl PerformanceSnapshot {
    /// Tier multiplier keyed by win rate AND return thresholds.
    pub fn tier_multiplier(&self) -> f64 {
        if self.win_rate >= 0.70 && self.recent_return >= 0.15 {
            1.25 // excellent
        } else if self.win_rate >= 0.60 && self.recent_return >= 0.10 {
            1.15 // good
        } else if self.win_rate >= 0.50 && self.recent_return >= 0.05 {
            1.0 // average
        } else if self.win_rate >= 0.40 {
            0.85 // poor
        } else {
            0.7 // terrible
        }
    }

    pub fn tier_name(&self) -> &'static str {
        if self.win_rate >= 0.70 && self.recent_return >= 0.15 {
            "excellent"
        } else if self.win_rate >= 0.60 && self.recent_return >= 0.10 {
            "good"
        } else if self.win_rate >= 0.50 && self.recent_return >= 0.05 {
            "average"
        } else if self.win_rate >= 0.40 {
            "poor"
        } else {
            "terrible"
        }
    }
}

/// The single authoritative set of risk limits. Both the leverage engine
/// and the risk validator read from here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskLimits {
    /// Daily realized loss that halts new entries (fraction of balance)
    pub max_daily_loss_pct: f64,

    /// Ceiling on portfolio-wide sum of leverage * size fraction
    pub max_portfolio_leverage: f64,

    /// Cumulative size-fraction cap per correlation group
    pub max_correlated_exposure: f64,

    /// Leverage above which a position counts as high-leverage
    pub high_leverage_threshold: u32,

    /// Maximum simultaneous high-leverage positions
    pub max_high_leverage_positions: usize,

    /// Fraction of balance usable as margin
    pub max_margin_usage: f64,

    /// Leverage ceiling on weekends
    pub weekend_leverage_cap: u32,

    /// Leverage ceiling during the overnight window (23:00-06:00 UTC)
    pub overnight_leverage_cap: u32,

    /// Aggregate risk score above which the trade is rejected
    pub max_risk_score: f64,

    /// Win rate below which the emergency leverage clamp engages
    pub emergency_win_rate: f64,

    /// Size multiplier applied when a correlation warning fires
    pub correlation_size_scale: f64,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_daily_loss_pct: 0.15,       // Halt at 15% daily loss
            max_portfolio_leverage: 3.0,    // Sum of leverage * size
            max_correlated_exposure: 0.10,  // 10% per correlation group
            high_leverage_threshold: 30,
            max_high_leverage_positions: 2,
            max_margin_usage: 0.80,         // 80% of balance as margin
            weekend_leverage_cap: 25,
            overnight_leverage_cap: 30,
            max_risk_score: 75.0,
            emergency_win_rate: 0.25,
            correlation_size_scale: 0.8,
        }
    }
}

/// Correlation buckets: symbols in the same bucket share an exposure cap.
pub const CORRELATION_GROUPS: &[(&str, &[&str])] = &[
    ("majors", &["BTCUSDT", "ETHUSDT"]),
    ("layer1", &["SOLUSDT", "ADAUSDT", "AVAXUSDT", "DOTUSDT"]),
    ("exchange", &["BNBUSDT"]),
    ("meme", &["DOGEUSDT"]),
];

/// Resolve the correlation group a symbol belongs to, if any.
pub fn correlation_group(symbol: &str) -> Option<&'static str> {
    CORRELATION_GROUPS
        .iter()
        .find(|(_, symbols)| symbols.contains(&symbol))
        .map(|(group, _)| *group)
}

/// Full trading configuration handed to the bot at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    /// Seeded per-symbol profiles
    pub profiles: Vec<LeverageProfile>,

    /// Risk limits shared by the leverage engine and risk validator
    pub limits: RiskLimits,

    /// Use the exchange testnet
    pub testnet: bool,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            profiles: vec![
                LeverageProfile::new("ETHUSDT", 20, 35, 10, 0.85, 1.15, RiskTier::Aggressive),
                LeverageProfile::new("SOLUSDT", 25, 45, 12, 0.80, 1.20, RiskTier::Aggressive),
                LeverageProfile::new("ADAUSDT", 18, 30, 8, 0.90, 1.10, RiskTier::Moderate),
                LeverageProfile::new("AVAXUSDT", 18, 30, 8, 0.88, 1.10, RiskTier::Moderate),
                LeverageProfile::new("BTCUSDT", 15, 25, 5, 0.95, 0.90, RiskTier::Conservative),
                LeverageProfile::new("BNBUSDT", 12, 22, 5, 0.92, 1.0, RiskTier::Conservative),
                LeverageProfile::new("XRPUSDT", 12, 22, 5, 0.90, 1.0, RiskTier::Conservative),
                LeverageProfile::new("DOGEUSDT", 10, 20, 5, 0.85, 0.95, RiskTier::Conservative),
            ],
            limits: RiskLimits::default(),
            testnet: true,
        }
    }
}

impl TradingConfig {
    /// Look up the profile for a symbol, falling back to the conservative
    /// default for anything unseeded.
    pub fn profile(&self, symbol: &str) -> LeverageProfile {
        self.profiles
            .iter()
            .find(|p| p.symbol == symbol)
            .cloned()
            .unwrap_or_else(|| LeverageProfile::conservative_default(symbol))
    }
}
