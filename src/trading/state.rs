//! Shared trading state: the single mutable owner of daily counters,
//! open positions, exposure reservations, and execution history.
//!
//! Everything lives behind one async mutex. Risk validation and
//! exposure reservation happen inside the same lock acquisition, so
//! two concurrent signals can never both pass validation against the
//! same headroom. No awaits occur while the lock is held.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::models::{ExecutionResult, OpenPosition};
use crate::trading::config::{correlation_group, PerformanceSnapshot};
use crate::trading::risk::{
    CheckSeverity, ExposureView, PositionExposure, RiskCheck, RiskValidator, RiskVerdict,
    TradeProposal,
};
use crate::trading::sizer::RiskBudget;

/// Executions kept in the in-memory history ring.
const HISTORY_CAPACITY: usize = 1000;

/// Closed-trade outcomes used for the rolling win rate.
const OUTCOME_WINDOW: usize = 20;

/// Win rate assumed before any trades have closed.
const DEFAULT_WIN_RATE: f64 = 0.5;

/// Exposure reserved for an order in flight. Counts against all
/// exposure checks until the fill is recorded or the order fails.
#[derive(Debug, Clone)]
struct Reservation {
    leverage: u32,
    size_fraction: f64,
}

#[derive(Debug)]
struct StateInner {
    day: NaiveDate,
    daily_pnl: Decimal,
    daily_trades: u32,
    emergency: bool,
    positions: HashMap<String, OpenPosition>,
    reservations: HashMap<String, Reservation>,
    history: VecDeque<ExecutionResult>,
    recent_outcomes: VecDeque<bool>,
    risk_budget: RiskBudget,
}

impl StateInner {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            day: now.date_naive(),
            daily_pnl: Decimal::ZERO,
            daily_trades: 0,
            emergency: false,
            positions: HashMap::new(),
            reservations: HashMap::new(),
            history: VecDeque::with_capacity(HISTORY_CAPACITY),
            recent_outcomes: VecDeque::with_capacity(OUTCOME_WINDOW),
            risk_budget: RiskBudget::default(),
        }
    }

    fn win_rate(&self) -> f64 {
        if self.recent_outcomes.is_empty() {
            return DEFAULT_WIN_RATE;
        }
        let wins = self.recent_outcomes.iter().filter(|w| **w).count();
        wins as f64 / self.recent_outcomes.len() as f64
    }

    /// Exposure view covering open positions AND in-flight
    /// reservations, so concurrent evaluations see each other.
    fn exposure_view(&self, balance: Decimal) -> ExposureView {
        let balance_f = balance.to_f64().unwrap_or(0.0);
        let mut open_positions = Vec::with_capacity(self.positions.len() + self.reservations.len());
        let mut group_exposure: HashMap<String, f64> = HashMap::new();

        for pos in self.positions.values() {
            open_positions.push(PositionExposure {
                symbol: pos.symbol.clone(),
                leverage: pos.leverage,
                size_fraction: pos.size_fraction,
                margin: pos.margin(),
            });
            if let Some(group) = correlation_group(&pos.symbol) {
                *group_exposure.entry(group.to_string()).or_insert(0.0) += pos.size_fraction;
            }
        }

        for (symbol, res) in &self.reservations {
            open_positions.push(PositionExposure {
                symbol: symbol.clone(),
                leverage: res.leverage,
                size_fraction: res.size_fraction,
                margin: Decimal::try_from(balance_f * res.size_fraction)
                    .unwrap_or(Decimal::ZERO),
            });
            if let Some(group) = correlation_group(symbol) {
                *group_exposure.entry(group.to_string()).or_insert(0.0) += res.size_fraction;
            }
        }

        ExposureView {
            balance,
            daily_pnl: self.daily_pnl,
            emergency: self.emergency,
            open_positions,
            group_exposure,
        }
    }

    fn roll_daily_if_needed(&mut self, now: DateTime<Utc>) {
        let today = now.date_naive();
        if today != self.day {
            info!(
                daily_pnl = %self.daily_pnl,
                daily_trades = self.daily_trades,
                emergency = self.emergency,
                "UTC day rollover, resetting daily counters"
            );
            self.day = today;
            self.daily_pnl = Decimal::ZERO;
            self.daily_trades = 0;
            self.emergency = false;
            self.risk_budget.reset();
        }
    }

    fn push_history(&mut self, result: ExecutionResult) {
        if self.history.len() >= HISTORY_CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back(result);
    }
}

/// Monitoring snapshot for external collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskSnapshot {
    pub daily_pnl: Decimal,
    pub daily_trades: u32,
    pub emergency_mode: bool,
    pub recent_win_rate: f64,
    /// Sum of leverage * size fraction across open positions
    pub portfolio_exposure: f64,
    pub open_positions: usize,
    pub risk_budget: f64,
}

/// The shared trading state.
pub struct TradingState {
    inner: Mutex<StateInner>,
}

impl TradingState {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StateInner::new(Utc::now())),
        }
    }

    /// Run risk validation and, if the trade is allowed, reserve its
    /// exposure in the same critical section. The reservation holds
    /// until `record_fill` or `release`.
    pub async fn evaluate_and_reserve(
        &self,
        proposal: &TradeProposal,
        validator: &RiskValidator,
        balance: Decimal,
        now: DateTime<Utc>,
    ) -> RiskVerdict {
        let mut inner = self.inner.lock().await;
        inner.roll_daily_if_needed(now);

        // One position per symbol, reservations included
        if inner.positions.contains_key(&proposal.symbol)
            || inner.reservations.contains_key(&proposal.symbol)
        {
            let msg = format!("position already open for {}", proposal.symbol);
            return RiskVerdict {
                allowed: false,
                reason: msg.clone(),
                leverage: proposal.leverage,
                size_fraction: proposal.size_fraction,
                risk_score: 0.0,
                checks: vec![RiskCheck {
                    name: "position_exists",
                    passed: false,
                    severity: CheckSeverity::Blocking,
                    message: msg,
                }],
            };
        }

        let view = inner.exposure_view(balance);
        let verdict = validator.validate(proposal, &view, now);

        if verdict.allowed {
            inner.reservations.insert(
                proposal.symbol.clone(),
                Reservation {
                    leverage: verdict.leverage,
                    size_fraction: verdict.size_fraction,
                },
            );
        }

        verdict
    }

    /// Drop the reservation for a symbol whose order did not fill.
    pub async fn release(&self, symbol: &str) {
        let mut inner = self.inner.lock().await;
        if inner.reservations.remove(symbol).is_none() {
            warn!(symbol = %symbol, "Release called without a reservation");
        }
    }

    /// Convert a reservation into an open position and record the
    /// execution.
    pub async fn record_fill(&self, position: OpenPosition, result: ExecutionResult) {
        let mut inner = self.inner.lock().await;
        inner.reservations.remove(&position.symbol);
        inner.positions.insert(position.symbol.clone(), position);
        inner.daily_trades += 1;
        inner.push_history(result);
    }

    /// Record a terminal rejection or error outcome.
    pub async fn record_outcome(&self, result: ExecutionResult) {
        let mut inner = self.inner.lock().await;
        inner.push_history(result);
    }

    /// Claim a position for closing, removing it from the open map.
    /// A concurrent close of the same symbol gets `None` and cannot
    /// double-submit or double-count the realized P&L.
    pub async fn claim_for_close(&self, symbol: &str) -> Option<OpenPosition> {
        self.inner.lock().await.positions.remove(symbol)
    }

    /// Put back a claimed position whose close order failed.
    pub async fn restore_position(&self, position: OpenPosition) {
        let mut inner = self.inner.lock().await;
        inner.positions.insert(position.symbol.clone(), position);
    }

    /// Record a finished close for a claimed position: realized P&L
    /// moves the daily total, the outcome feeds the win-rate window and
    /// risk budget.
    pub async fn record_close(&self, symbol: &str, realized_pnl: Decimal) {
        let mut inner = self.inner.lock().await;
        inner.daily_pnl += realized_pnl;

        let won = realized_pnl > Decimal::ZERO;
        if inner.recent_outcomes.len() >= OUTCOME_WINDOW {
            inner.recent_outcomes.pop_front();
        }
        inner.recent_outcomes.push_back(won);

        if won {
            inner.risk_budget.record_win();
        } else {
            inner.risk_budget.record_loss();
        }

        debug!(
            symbol = %symbol,
            realized_pnl = %realized_pnl,
            daily_pnl = %inner.daily_pnl,
            "Close recorded"
        );
    }

    pub async fn open_position(&self, symbol: &str) -> Option<OpenPosition> {
        self.inner.lock().await.positions.get(symbol).cloned()
    }

    pub async fn open_positions(&self) -> Vec<OpenPosition> {
        self.inner.lock().await.positions.values().cloned().collect()
    }

    pub async fn daily_pnl(&self) -> Decimal {
        self.inner.lock().await.daily_pnl
    }

    pub async fn is_emergency(&self) -> bool {
        self.inner.lock().await.emergency
    }

    pub async fn set_emergency(&self, on: bool) {
        let mut inner = self.inner.lock().await;
        if on && !inner.emergency {
            warn!("Emergency mode engaged, new entries locked out");
        }
        inner.emergency = on;
    }

    /// Apply the daily rollover if the UTC day has changed.
    pub async fn roll_daily_if_needed(&self, now: DateTime<Utc>) {
        self.inner.lock().await.roll_daily_if_needed(now);
    }

    /// Recent performance for the leverage engine. Win rate comes from
    /// the outcome window, return from today's realized P&L.
    pub async fn performance(&self, balance: Decimal) -> PerformanceSnapshot {
        let inner = self.inner.lock().await;
        let balance_f = balance.to_f64().unwrap_or(0.0);
        let recent_return = if balance_f > 0.0 {
            inner.daily_pnl.to_f64().unwrap_or(0.0) / balance_f
        } else {
            0.0
        };
        PerformanceSnapshot {
            win_rate: inner.win_rate(),
            recent_return,
        }
    }

    /// Risk-budget multiplier applied to computed position sizes.
    pub async fn risk_budget_multiplier(&self) -> f64 {
        self.inner.lock().await.risk_budget.multiplier()
    }

    /// Most recent executions, newest last.
    pub async fn recent_executions(&self, limit: usize) -> Vec<ExecutionResult> {
        let inner = self.inner.lock().await;
        inner
            .history
            .iter()
            .rev()
            .take(limit)
            .rev()
            .cloned()
            .collect()
    }

    pub async fn snapshot(&self) -> RiskSnapshot {
        let inner = self.inner.lock().await;
        let portfolio_exposure = inner
            .positions
            .values()
            .map(|p| p.leverage as f64 * p.size_fraction)
            .sum();
        RiskSnapshot {
            daily_pnl: inner.daily_pnl,
            daily_trades: inner.daily_trades,
            emergency_mode: inner.emergency,
            recent_win_rate: inner.win_rate(),
            portfolio_exposure,
            open_positions: inner.positions.len(),
            risk_budget: inner.risk_budget.multiplier(),
        }
    }
}

impl Default for TradingState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PositionStatus, TradeAction};
    use crate::trading::config::RiskLimits;
    use crate::trading::volatility::VolatilityRegime;
    use chrono::Duration;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn make_proposal(symbol: &str) -> TradeProposal {
        TradeProposal {
            symbol: symbol.to_string(),
            action: TradeAction::Long,
            leverage: 20,
            min_leverage: 10,
            size_fraction: 0.02,
            regime: VolatilityRegime::Normal,
        }
    }

    fn make_position(symbol: &str) -> OpenPosition {
        OpenPosition {
            symbol: symbol.to_string(),
            side: TradeAction::Long,
            entry_price: dec!(3000),
            quantity: dec!(1),
            leverage: 20,
            size_fraction: 0.02,
            stop_loss: dec!(2940),
            take_profit: dec!(3120),
            opened_at: Utc::now(),
            status: PositionStatus::Open,
            entry_order_id: "1".to_string(),
        }
    }

    fn weekday_noon() -> DateTime<Utc> {
        "2026-08-26T12:00:00Z".parse().unwrap()
    }

    #[tokio::test]
    async fn test_duplicate_symbol_rejected() {
        let state = TradingState::new();
        let validator = RiskValidator::new(RiskLimits::default());
        let proposal = make_proposal("ETHUSDT");

        let first = state
            .evaluate_and_reserve(&proposal, &validator, dec!(10000), weekday_noon())
            .await;
        assert!(first.allowed);

        let second = state
            .evaluate_and_reserve(&proposal, &validator, dec!(10000), weekday_noon())
            .await;
        assert!(!second.allowed);
        assert!(second.reason.contains("already open"));
    }

    #[tokio::test]
    async fn test_release_frees_symbol() {
        let state = TradingState::new();
        let validator = RiskValidator::new(RiskLimits::default());
        let proposal = make_proposal("ETHUSDT");

        assert!(state
            .evaluate_and_reserve(&proposal, &validator, dec!(10000), weekday_noon())
            .await
            .allowed);
        state.release("ETHUSDT").await;
        assert!(state
            .evaluate_and_reserve(&proposal, &validator, dec!(10000), weekday_noon())
            .await
            .allowed);
    }

    #[tokio::test]
    async fn test_concurrent_reservations_respect_portfolio_ceiling() {
        let state = Arc::new(TradingState::new());
        let validator = Arc::new(RiskValidator::new(RiskLimits::default()));

        // Each proposal is 30x * 0.035 = 1.05 units; the 3.0 ceiling
        // admits at most two at full leverage.
        let symbols = ["ETHUSDT", "SOLUSDT", "BTCUSDT", "ADAUSDT", "BNBUSDT"];
        let mut handles = Vec::new();
        for symbol in symbols {
            let state = state.clone();
            let validator = validator.clone();
            let mut proposal = make_proposal(symbol);
            proposal.leverage = 30;
            proposal.min_leverage = 25;
            proposal.size_fraction = 0.035;
            handles.push(tokio::spawn(async move {
                state
                    .evaluate_and_reserve(&proposal, &validator, dec!(100000), weekday_noon())
                    .await
            }));
        }

        let mut total_units = 0.0;
        for handle in handles {
            let verdict = handle.await.unwrap();
            if verdict.allowed {
                total_units += verdict.leverage as f64 * verdict.size_fraction;
            }
        }
        assert!(
            total_units <= 3.0 + 1e-9,
            "reserved {} units over ceiling",
            total_units
        );
    }

    #[tokio::test]
    async fn test_daily_rollover_clears_counters_and_emergency() {
        let state = TradingState::new();
        state.set_emergency(true).await;
        state.record_close("ETHUSDT", dec!(-500)).await;
        assert_eq!(state.daily_pnl().await, dec!(-500));
        assert!(state.is_emergency().await);

        state.roll_daily_if_needed(Utc::now() + Duration::days(1)).await;
        assert_eq!(state.daily_pnl().await, Decimal::ZERO);
        assert!(!state.is_emergency().await);
        assert_eq!(state.risk_budget_multiplier().await, 1.0);
    }

    #[tokio::test]
    async fn test_win_rate_window() {
        let state = TradingState::new();
        // Empty window reports the neutral default
        let perf = state.performance(dec!(10000)).await;
        assert_eq!(perf.win_rate, 0.5);

        state.record_close("A", dec!(100)).await;
        state.record_close("B", dec!(100)).await;
        state.record_close("C", dec!(-50)).await;
        state.record_close("D", dec!(100)).await;

        let perf = state.performance(dec!(10000)).await;
        assert!((perf.win_rate - 0.75).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_losses_shrink_risk_budget() {
        let state = TradingState::new();
        state.record_close("A", dec!(-100)).await;
        state.record_close("B", dec!(-100)).await;
        let budget = state.risk_budget_multiplier().await;
        assert!((budget - 0.64).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_claim_for_close_is_exclusive() {
        let state = TradingState::new();
        state.restore_position(make_position("ETHUSDT")).await;

        let claimed = state.claim_for_close("ETHUSDT").await;
        assert!(claimed.is_some());
        // A second claimant sees nothing to close
        assert!(state.claim_for_close("ETHUSDT").await.is_none());
        assert_eq!(state.open_positions().await.len(), 0);

        // A failed close puts the position back and it can be claimed again
        state.restore_position(claimed.unwrap()).await;
        assert!(state.claim_for_close("ETHUSDT").await.is_some());
    }

    #[tokio::test]
    async fn test_fill_converts_reservation_to_position() {
        let state = TradingState::new();
        let validator = RiskValidator::new(RiskLimits::default());
        let proposal = make_proposal("ETHUSDT");

        assert!(state
            .evaluate_and_reserve(&proposal, &validator, dec!(10000), weekday_noon())
            .await
            .allowed);

        let position = make_position("ETHUSDT");
        let result = crate::models::ExecutionResult {
            signal_id: uuid::Uuid::new_v4(),
            symbol: "ETHUSDT".to_string(),
            side: TradeAction::Long,
            status: crate::models::ExecutionStatus::Filled,
            requested_quantity: dec!(1),
            executed_quantity: dec!(1),
            requested_price: dec!(3000),
            executed_price: dec!(3001),
            slippage_pct: dec!(0.033),
            leverage: 20,
            fees: Decimal::ZERO,
            retry_count: 0,
            execution_time_ms: 42,
            reject_kind: None,
            reason: None,
            completed_at: Utc::now(),
        };
        state.record_fill(position, result).await;

        let snapshot = state.snapshot().await;
        assert_eq!(snapshot.open_positions, 1);
        assert_eq!(snapshot.daily_trades, 1);
        assert_eq!(state.recent_executions(10).await.len(), 1);

        // Still exactly one slot for the symbol
        let again = state
            .evaluate_and_reserve(&proposal, &validator, dec!(10000), weekday_noon())
            .await;
        assert!(!again.allowed);
    }
}
