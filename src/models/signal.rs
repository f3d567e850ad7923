//! Signal model representing an inbound trading signal.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Direction requested by a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeAction {
    Long,
    Short,
}

impl TradeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeAction::Long => "LONG",
            TradeAction::Short => "SHORT",
        }
    }

    /// Parse the wire-level action string. Accepts the buy/sell aliases
    /// some upstream sources emit.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "long" | "buy" => Some(TradeAction::Long),
            "short" | "sell" => Some(TradeAction::Short),
            _ => None,
        }
    }
}

/// Immutable inbound trading signal. Signals are produced by an external
/// source (out of scope here) and consumed exactly once by the executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    /// Unique signal identifier
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,

    /// Futures symbol, e.g. "ETHUSDT"
    pub symbol: String,

    /// Requested direction
    pub action: TradeAction,

    /// Entry price hint from the signal source
    pub entry_price: Decimal,

    /// Signal strength / deviation magnitude (0.0 to 1.0)
    pub strength: f64,

    /// Correlation of the driving pair (-1.0 to 1.0)
    #[serde(default)]
    pub correlation: f64,

    /// Source confidence (0.5 to 1.0 for actionable signals)
    pub confidence: f64,

    /// When the signal was generated
    #[serde(default = "Utc::now")]
    pub generated_at: DateTime<Utc>,

    /// Identifier of the producing strategy/source
    #[serde(default)]
    pub source: String,
}

/// Symbols and source tags that indicate synthetic or test data.
const PLACEHOLDER_MARKERS: &[&str] = &["TEST", "DUMMY", "PLACEHOLDER", "SAMPLE", "FAKE", "MOCK"];

/// Signals older than this are considered stale at execution time.
const MAX_SIGNAL_AGE_SECS: i64 = 300;

impl Signal {
    /// Check that this signal looks like real market data rather than a
    /// synthetic placeholder. Returns the first problem found, if any.
    pub fn provenance_issue(&self, now: DateTime<Utc>) -> Option<String> {
        let symbol_upper = self.symbol.to_uppercase();
        for marker in PLACEHOLDER_MARKERS {
            if symbol_upper.contains(marker) {
                return Some(format!("placeholder marker '{}' in symbol", marker));
            }
        }

        let source_upper = self.source.to_uppercase();
        for marker in PLACEHOLDER_MARKERS {
            if source_upper.contains(marker) {
                return Some(format!("placeholder marker '{}' in source", marker));
            }
        }

        if self.entry_price <= Decimal::ZERO {
            return Some("non-positive entry price".to_string());
        }

        if self.generated_at > now + Duration::seconds(5) {
            return Some("timestamp is in the future".to_string());
        }

        let age = now - self.generated_at;
        if age > Duration::seconds(MAX_SIGNAL_AGE_SECS) {
            return Some(format!("signal is stale ({}s old)", age.num_seconds()));
        }

        None
    }

    /// Structural field validation, applied after provenance.
    /// Returns the first violated rule, if any.
    pub fn validation_issue(&self) -> Option<String> {
        if self.symbol.len() < 6 {
            return Some(format!("symbol '{}' too short", self.symbol));
        }

        if self.entry_price <= Decimal::ZERO {
            return Some("entry price must be positive".to_string());
        }

        if !(0.5..=1.0).contains(&self.confidence) {
            return Some(format!(
                "confidence {:.2} outside [0.50, 1.00]",
                self.confidence
            ));
        }

        if !(0.0..=1.0).contains(&self.strength) {
            return Some(format!("strength {:.2} outside [0.00, 1.00]", self.strength));
        }

        None
    }
}
