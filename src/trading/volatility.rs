//! Volatility assessment: regime classification and the bounded
//! leverage adjustment factor.
//!
//! Degrades to a conservative fallback on any data problem. A failed
//! candle fetch must never abort an execution pipeline.

use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use tracing::warn;

use crate::exchange::{Candle, ExchangeClient};

/// Candles requested per assessment (1h interval, last 24 hours).
const LOOKBACK_CANDLES: u32 = 24;

/// Minimum candles for a meaningful estimate.
const MIN_CANDLES: usize = 10;

/// Recent sub-window used for the regime ratio.
const SHORT_WINDOW: usize = 6;

/// Relative-volatility thresholds for regime classification.
const HIGH_VOL_RATIO: f64 = 1.5;
const LOW_VOL_RATIO: f64 = 0.7;

/// Bounds on the final adjustment factor.
const MIN_ADJUSTMENT: f64 = 0.5;
const MAX_ADJUSTMENT: f64 = 1.3;

/// Factor used when no usable data is available.
const FALLBACK_ADJUSTMENT: f64 = 0.9;

/// Assumed daily volatility when data is missing.
const FALLBACK_DAILY_VOL: f64 = 0.03;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolatilityRegime {
    High,
    Normal,
    Low,
}

impl VolatilityRegime {
    /// Leverage multiplier contributed by the regime alone.
    fn multiplier(&self) -> f64 {
        match self {
            VolatilityRegime::High => 0.8,
            VolatilityRegime::Normal => 1.0,
            VolatilityRegime::Low => 1.1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VolatilityRegime::High => "high",
            VolatilityRegime::Normal => "normal",
            VolatilityRegime::Low => "low",
        }
    }
}

/// Result of one volatility assessment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VolatilitySnapshot {
    /// Daily realized volatility (std dev of hourly returns, scaled)
    pub realized_volatility: f64,

    /// Mean high-low range as a fraction of close
    pub intraday_range: f64,

    /// Classified regime
    pub regime: VolatilityRegime,

    /// Leverage adjustment factor, clamped to [0.5, 1.3]
    pub adjustment_factor: f64,
}

impl VolatilitySnapshot {
    /// Conservative snapshot used when data is missing or malformed.
    pub fn fallback() -> Self {
        Self {
            realized_volatility: FALLBACK_DAILY_VOL,
            intraday_range: 0.0,
            regime: VolatilityRegime::Normal,
            adjustment_factor: FALLBACK_ADJUSTMENT,
        }
    }
}

/// Multiplier keyed by absolute daily volatility. Calm markets allow
/// more leverage, stressed markets less.
fn magnitude_multiplier(daily_vol: f64) -> f64 {
    if daily_vol < 0.01 {
        1.3
    } else if daily_vol < 0.025 {
        1.2
    } else if daily_vol < 0.05 {
        1.0
    } else if daily_vol < 0.08 {
        0.8
    } else {
        0.6
    }
}

/// Assess volatility from a candle series. Pure: same candles, same
/// snapshot. Falls back conservatively when the series is too short.
pub fn assess(candles: &[Candle]) -> VolatilitySnapshot {
    if candles.len() < MIN_CANDLES {
        return VolatilitySnapshot::fallback();
    }

    let closes: Vec<f64> = candles
        .iter()
        .filter_map(|c| c.close.to_f64())
        .filter(|c| *c > 0.0)
        .collect();
    if closes.len() < MIN_CANDLES {
        return VolatilitySnapshot::fallback();
    }

    let returns: Vec<f64> = closes
        .windows(2)
        .map(|pair| pair[1] / pair[0] - 1.0)
        .collect();

    let full_std = returns.clone().std_dev();
    if !full_std.is_finite() || full_std <= 0.0 {
        return VolatilitySnapshot::fallback();
    }

    // Hourly std dev scaled to daily (crypto trades around the clock)
    let realized_volatility = full_std * 24f64.sqrt();

    let short_start = returns.len().saturating_sub(SHORT_WINDOW);
    let short_std = returns[short_start..].to_vec().std_dev();

    let regime = if short_std.is_finite() && short_std > 0.0 {
        let ratio = short_std / full_std;
        if ratio > HIGH_VOL_RATIO {
            VolatilityRegime::High
        } else if ratio < LOW_VOL_RATIO {
            VolatilityRegime::Low
        } else {
            VolatilityRegime::Normal
        }
    } else {
        VolatilityRegime::Normal
    };

    let intraday_range = candles
        .iter()
        .filter_map(|c| {
            let close = c.close.to_f64()?;
            if close <= 0.0 {
                return None;
            }
            Some(((c.high - c.low).to_f64()? / close).abs())
        })
        .collect::<Vec<f64>>()
        .mean();
    let intraday_range = if intraday_range.is_finite() {
        intraday_range
    } else {
        0.0
    };

    let raw = (magnitude_multiplier(realized_volatility) + regime.multiplier()) / 2.0;
    let adjustment_factor = raw.clamp(MIN_ADJUSTMENT, MAX_ADJUSTMENT);

    VolatilitySnapshot {
        realized_volatility,
        intraday_range,
        regime,
        adjustment_factor,
    }
}

/// Fetch recent candles for a symbol and assess them. Any failure
/// degrades to the conservative fallback instead of erroring.
pub async fn assess_symbol(client: &dyn ExchangeClient, symbol: &str) -> VolatilitySnapshot {
    match client.fetch_ohlcv(symbol, "1h", LOOKBACK_CANDLES).await {
        Ok(candles) => assess(&candles),
        Err(e) => {
            warn!(symbol = %symbol, error = %e, "Candle fetch failed, using volatility fallback");
            VolatilitySnapshot::fallback()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use rust_decimal::prelude::FromPrimitive;

    fn candles_from_closes(closes: &[f64]) -> Vec<Candle> {
        closes
            .iter()
            .map(|&c| {
                let close = Decimal::from_f64(c).unwrap();
                Candle {
                    open_time: Utc::now(),
                    open: close,
                    high: close * Decimal::from_f64(1.005).unwrap(),
                    low: close * Decimal::from_f64(0.995).unwrap(),
                    close,
                    volume: Decimal::from(1000),
                }
            })
            .collect()
    }

    #[test]
    fn test_too_few_candles_falls_back() {
        let candles = candles_from_closes(&[100.0, 101.0, 102.0]);
        let snap = assess(&candles);
        assert_eq!(snap.regime, VolatilityRegime::Normal);
        assert_eq!(snap.adjustment_factor, 0.9);
    }

    #[test]
    fn test_flat_series_falls_back() {
        let candles = candles_from_closes(&[100.0; 24]);
        let snap = assess(&candles);
        assert_eq!(snap.adjustment_factor, 0.9);
    }

    #[test]
    fn test_calm_then_violent_classifies_high() {
        // Tiny moves for 18 candles, then large swings in the short window
        let mut closes: Vec<f64> = (0..18).map(|i| 100.0 + (i % 2) as f64 * 0.05).collect();
        closes.extend_from_slice(&[103.0, 97.0, 104.0, 96.0, 105.0, 95.0]);
        let snap = assess(&candles_from_closes(&closes));
        assert_eq!(snap.regime, VolatilityRegime::High);
        assert!(snap.adjustment_factor < 1.0);
    }

    #[test]
    fn test_violent_then_calm_classifies_low() {
        let mut closes: Vec<f64> = Vec::new();
        for i in 0..18 {
            closes.push(if i % 2 == 0 { 100.0 } else { 103.0 });
        }
        closes.extend_from_slice(&[101.0, 101.02, 101.01, 101.03, 101.02, 101.01]);
        let snap = assess(&candles_from_closes(&closes));
        assert_eq!(snap.regime, VolatilityRegime::Low);
    }

    #[test]
    fn test_adjustment_always_bounded() {
        let series: Vec<Vec<f64>> = vec![
            (0..24).map(|i| 100.0 + i as f64 * 0.01).collect(),
            (0..24)
                .map(|i| if i % 2 == 0 { 100.0 } else { 115.0 })
                .collect(),
            (0..24).map(|i| 100.0 * 1.002f64.powi(i)).collect(),
        ];
        for closes in series {
            let snap = assess(&candles_from_closes(&closes));
            assert!(snap.adjustment_factor >= 0.5);
            assert!(snap.adjustment_factor <= 1.3);
        }
    }

    #[test]
    fn test_assessment_is_deterministic() {
        let closes: Vec<f64> = (0..24).map(|i| 100.0 + (i as f64).sin()).collect();
        let candles = candles_from_closes(&closes);
        let a = assess(&candles);
        let b = assess(&candles);
        assert_eq!(a.realized_volatility, b.realized_volatility);
        assert_eq!(a.regime, b.regime);
        assert_eq!(a.adjustment_factor, b.adjustment_factor);
    }
}
