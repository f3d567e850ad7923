//! Order execution pipeline.
//!
//! Drives one signal from provenance check through validation, leverage
//! and sizing, atomic risk reservation, order placement with bounded
//! retries, and state bookkeeping. Every signal ends in exactly one
//! terminal `ExecutionResult`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Timelike, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::exchange::{
    ExchangeClient, ExchangeError, OrderFill, OrderRequest, OrderSide, RetryPolicy, Sleeper,
};
use crate::models::{
    ExecutionResult, ExecutionStatus, OpenPosition, PositionStatus, RejectKind, Signal,
    TradeAction, TradeEvent,
};
use crate::trading::config::{MarketCondition, TradingConfig};
use crate::trading::leverage::decide_leverage;
use crate::trading::risk::{RiskValidator, TradeProposal};
use crate::trading::sizer::size_position;
use crate::trading::state::TradingState;
use crate::trading::volatility::{self, VolatilityRegime};

/// Executes signals against the exchange.
pub struct OrderExecutor {
    client: Arc<dyn ExchangeClient>,
    state: Arc<TradingState>,
    validator: RiskValidator,
    config: TradingConfig,
    retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    events: broadcast::Sender<TradeEvent>,
    shutdown: Arc<AtomicBool>,
}

/// Derive the active market conditions from the clock and the
/// volatility regime.
fn market_conditions(now: DateTime<Utc>, regime: VolatilityRegime) -> Vec<MarketCondition> {
    use chrono::Datelike;

    let mut conditions = Vec::new();

    if matches!(now.weekday(), chrono::Weekday::Sat | chrono::Weekday::Sun) {
        conditions.push(MarketCondition::Weekend);
    }

    let hour = now.hour();
    if hour < 8 {
        conditions.push(MarketCondition::AsianSession);
    } else if hour < 16 {
        conditions.push(MarketCondition::LondonSession);
    } else {
        conditions.push(MarketCondition::UsSession);
    }

    match regime {
        VolatilityRegime::High => conditions.push(MarketCondition::HighVolatility),
        VolatilityRegime::Low => conditions.push(MarketCondition::LowVolatility),
        VolatilityRegime::Normal => {}
    }

    conditions
}

impl OrderExecutor {
    pub fn new(
        client: Arc<dyn ExchangeClient>,
        state: Arc<TradingState>,
        config: TradingConfig,
        retry: RetryPolicy,
        sleeper: Arc<dyn Sleeper>,
        events: broadcast::Sender<TradeEvent>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        let validator = RiskValidator::new(config.limits.clone());
        Self {
            client,
            state,
            validator,
            config,
            retry,
            sleeper,
            events,
            shutdown,
        }
    }

    /// Run the full pipeline for one signal.
    pub async fn execute(&self, signal: &Signal) -> ExecutionResult {
        let started = Instant::now();
        let now = Utc::now();

        // Provenance: synthetic data must never reach the exchange
        if let Some(issue) = signal.provenance_issue(now) {
            return self
                .reject(signal, RejectKind::Validation, issue, 0, started)
                .await;
        }

        if let Some(issue) = signal.validation_issue() {
            return self
                .reject(signal, RejectKind::Validation, issue, 0, started)
                .await;
        }

        let balance = match self.client.fetch_balance().await {
            Ok(balance) => balance,
            Err(e) => {
                return self
                    .error(signal, format!("balance fetch failed: {}", e), 0, started)
                    .await;
            }
        };

        // Volatility degrades to a conservative fallback, never errors
        let vol = volatility::assess_symbol(self.client.as_ref(), &signal.symbol).await;

        let profile = self.config.profile(&signal.symbol);
        let performance = self.state.performance(balance.available).await;
        let conditions = market_conditions(now, vol.regime);

        let decision = decide_leverage(
            &profile,
            signal.strength,
            &performance,
            &conditions,
            &vol,
            balance.available,
            &self.config.limits,
        );

        let balance_f = balance.available.to_f64().unwrap_or(0.0);
        let base_size = size_position(decision.leverage, signal.strength, balance_f);
        let budget = self.state.risk_budget_multiplier().await;
        let size_fraction = base_size * budget;

        info!(
            symbol = %signal.symbol,
            leverage = decision.leverage,
            size = size_fraction,
            regime = vol.regime.as_str(),
            emergency_override = decision.emergency_override,
            "Leverage decided"
        );

        let proposal = TradeProposal {
            symbol: signal.symbol.clone(),
            action: signal.action,
            leverage: decision.leverage,
            min_leverage: profile.min_leverage,
            size_fraction,
            regime: vol.regime,
        };

        // Validation and exposure reservation in one critical section
        let verdict = self
            .state
            .evaluate_and_reserve(&proposal, &self.validator, balance.available, now)
            .await;

        if !verdict.allowed {
            return self
                .reject(signal, RejectKind::Policy, verdict.reason, 0, started)
                .await;
        }

        // Best effort: a leverage-setting failure is logged, not fatal
        if let Err(e) = self
            .client
            .set_leverage(&signal.symbol, verdict.leverage)
            .await
        {
            warn!(symbol = %signal.symbol, error = %e, "set_leverage failed, continuing");
        }

        let notional = balance_f * verdict.size_fraction * verdict.leverage as f64;
        let price_f = signal.entry_price.to_f64().unwrap_or(0.0);
        let quantity = if price_f > 0.0 {
            Decimal::from_f64(notional / price_f)
                .unwrap_or(Decimal::ZERO)
                .round_dp(3)
        } else {
            Decimal::ZERO
        };

        if quantity <= Decimal::ZERO {
            self.state.release(&signal.symbol).await;
            return self
                .reject(
                    signal,
                    RejectKind::Policy,
                    "computed quantity is zero".to_string(),
                    0,
                    started,
                )
                .await;
        }

        let order = OrderRequest {
            symbol: signal.symbol.clone(),
            side: OrderSide::entry_for(signal.action),
            quantity,
            reduce_only: false,
        };

        let (fill, retries) = match self.place_with_retries(&order).await {
            Ok(ok) => ok,
            Err((e, retries)) => {
                self.state.release(&signal.symbol).await;
                if e.is_fatal_account() {
                    return self
                        .reject(
                            signal,
                            RejectKind::FatalAccount,
                            e.to_string(),
                            retries,
                            started,
                        )
                        .await;
                }
                return self.error(signal, e.to_string(), retries, started).await;
            }
        };

        let slippage =
            ExecutionResult::calculate_slippage(signal.action, signal.entry_price, fill.average_price);

        let tier = profile.risk_tier;
        let stop_pct = Decimal::from_f64(tier.stop_loss_pct()).unwrap_or(Decimal::ZERO);
        let take_pct = Decimal::from_f64(tier.take_profit_pct()).unwrap_or(Decimal::ZERO);
        let one = Decimal::ONE;
        let (stop_loss, take_profit) = match signal.action {
            TradeAction::Long => (
                fill.average_price * (one - stop_pct),
                fill.average_price * (one + take_pct),
            ),
            TradeAction::Short => (
                fill.average_price * (one + stop_pct),
                fill.average_price * (one - take_pct),
            ),
        };

        let position = OpenPosition {
            symbol: signal.symbol.clone(),
            side: signal.action,
            entry_price: fill.average_price,
            quantity: fill.executed_quantity,
            leverage: verdict.leverage,
            size_fraction: verdict.size_fraction,
            stop_loss,
            take_profit,
            opened_at: Utc::now(),
            status: PositionStatus::Open,
            entry_order_id: fill.order_id.clone(),
        };

        let result = ExecutionResult {
            signal_id: signal.id,
            symbol: signal.symbol.clone(),
            side: signal.action,
            status: ExecutionStatus::Filled,
            requested_quantity: quantity,
            executed_quantity: fill.executed_quantity,
            requested_price: signal.entry_price,
            executed_price: fill.average_price,
            slippage_pct: slippage,
            leverage: verdict.leverage,
            fees: fill.fee,
            retry_count: retries,
            execution_time_ms: started.elapsed().as_millis() as u64,
            reject_kind: None,
            reason: None,
            completed_at: Utc::now(),
        };

        self.state.record_fill(position, result.clone()).await;

        info!(
            symbol = %signal.symbol,
            side = %signal.action.as_str(),
            quantity = %fill.executed_quantity,
            price = %fill.average_price,
            leverage = verdict.leverage,
            slippage = %slippage,
            retries = retries,
            "Order filled"
        );

        let _ = self.events.send(TradeEvent::Filled {
            symbol: signal.symbol.clone(),
            side: signal.action,
            quantity: fill.executed_quantity,
            price: fill.average_price,
            leverage: verdict.leverage,
            slippage_pct: slippage,
        });

        result
    }

    /// Place a market order with bounded exponential backoff. Returns
    /// the fill and the number of retries performed, or the final error
    /// and retry count.
    async fn place_with_retries(
        &self,
        order: &OrderRequest,
    ) -> Result<(OrderFill, u32), (ExchangeError, u32)> {
        let mut attempt: u32 = 0;
        loop {
            match self.client.create_market_order(order).await {
                Ok(fill) => return Ok((fill, attempt)),
                Err(e) => {
                    if e.is_fatal_account() || !e.is_retryable() {
                        return Err((e, attempt));
                    }
                    if attempt >= self.retry.max_retries {
                        return Err((e, attempt));
                    }
                    if self.shutdown.load(Ordering::SeqCst) {
                        warn!(symbol = %order.symbol, "Shutdown requested, abandoning retries");
                        return Err((e, attempt));
                    }
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        symbol = %order.symbol,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Order failed, retrying"
                    );
                    self.sleeper.sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Close an open position with an opposite-side reduce-only market
    /// order. Returns the realized P&L.
    pub async fn close_position(
        &self,
        symbol: &str,
        reason: &str,
    ) -> Result<Decimal, ExchangeError> {
        // Claiming removes the position from the open map, so a
        // concurrent close of the same symbol cannot double-submit.
        let position = self
            .state
            .claim_for_close(symbol)
            .await
            .ok_or_else(|| ExchangeError::InvalidOrder(format!("no open position for {}", symbol)))?;

        let order = OrderRequest {
            symbol: symbol.to_string(),
            side: OrderSide::exit_for(position.side),
            quantity: position.quantity,
            reduce_only: true,
        };

        let (fill, retries) = match self.place_with_retries(&order).await {
            Ok(ok) => ok,
            Err((e, _)) => {
                self.state.restore_position(position).await;
                return Err(e);
            }
        };

        let realized = position.realized_pnl(fill.average_price) - fill.fee;
        self.state.record_close(symbol, realized).await;

        info!(
            symbol = %symbol,
            exit_price = %fill.average_price,
            realized_pnl = %realized,
            reason = %reason,
            retries = retries,
            "Position closed"
        );

        let _ = self.events.send(TradeEvent::Closed {
            symbol: symbol.to_string(),
            realized_pnl: realized,
            reason: reason.to_string(),
        });

        Ok(realized)
    }

    /// Check every tracked position against its stop and take levels
    /// and close the ones that hit. Runs on the bot's monitor tick.
    pub async fn monitor_positions(&self) {
        for position in self.state.open_positions().await {
            let price = match self.client.last_price(&position.symbol).await {
                Ok(price) => price,
                Err(e) => {
                    warn!(symbol = %position.symbol, error = %e, "Price fetch failed, skipping check");
                    continue;
                }
            };

            if position.stop_hit(price) {
                if let Err(e) = self.close_position(&position.symbol, "stop_loss").await {
                    warn!(symbol = %position.symbol, error = %e, "Stop-loss close failed");
                }
            } else if position.take_profit_hit(price) {
                if let Err(e) = self.close_position(&position.symbol, "take_profit").await {
                    warn!(symbol = %position.symbol, error = %e, "Take-profit close failed");
                }
            } else {
                debug!(
                    symbol = %position.symbol,
                    price = %price,
                    unrealized_pnl = %position.unrealized_pnl(price),
                    "Position within bounds"
                );
            }
        }
    }

    /// Close all open positions concurrently. Partial failures are
    /// reported per symbol, not propagated.
    pub async fn close_all_positions(
        &self,
        reason: &str,
    ) -> Vec<(String, Result<Decimal, ExchangeError>)> {
        let symbols: Vec<String> = self
            .state
            .open_positions()
            .await
            .into_iter()
            .map(|p| p.symbol)
            .collect();

        let closes = symbols.iter().map(|symbol| async move {
            (symbol.clone(), self.close_position(symbol, reason).await)
        });
        let results = futures::future::join_all(closes).await;

        for (symbol, outcome) in &results {
            if let Err(e) = outcome {
                warn!(symbol = %symbol, error = %e, "Failed to close position");
            }
        }

        results
    }

    /// Close every position the exchange reports, whether or not this
    /// process opened it. Used by operational tooling.
    pub async fn close_all_exchange_positions(
        &self,
    ) -> Vec<(String, Result<Decimal, ExchangeError>)> {
        let positions = match self.client.fetch_positions().await {
            Ok(positions) => positions,
            Err(e) => {
                warn!(error = %e, "Failed to list exchange positions");
                return Vec::new();
            }
        };

        let closes = positions.into_iter().map(|info| async move {
            let side = if info.quantity >= Decimal::ZERO {
                OrderSide::Sell
            } else {
                OrderSide::Buy
            };
            let order = OrderRequest {
                symbol: info.symbol.clone(),
                side,
                quantity: info.quantity.abs(),
                reduce_only: true,
            };
            let outcome = self
                .place_with_retries(&order)
                .await
                .map(|_| info.unrealized_pnl)
                .map_err(|(e, _)| e);
            (info.symbol, outcome)
        });
        let results = futures::future::join_all(closes).await;

        for (symbol, outcome) in &results {
            match outcome {
                Ok(pnl) => info!(symbol = %symbol, unrealized_pnl = %pnl, "Position flattened"),
                Err(e) => warn!(symbol = %symbol, error = %e, "Failed to flatten position"),
            }
        }

        results
    }

    async fn reject(
        &self,
        signal: &Signal,
        kind: RejectKind,
        reason: String,
        retries: u32,
        started: Instant,
    ) -> ExecutionResult {
        info!(
            symbol = %signal.symbol,
            kind = ?kind,
            reason = %reason,
            "Signal rejected"
        );

        let result = ExecutionResult {
            signal_id: signal.id,
            symbol: signal.symbol.clone(),
            side: signal.action,
            status: ExecutionStatus::Rejected,
            requested_quantity: Decimal::ZERO,
            executed_quantity: Decimal::ZERO,
            requested_price: signal.entry_price,
            executed_price: Decimal::ZERO,
            slippage_pct: Decimal::ZERO,
            leverage: 0,
            fees: Decimal::ZERO,
            retry_count: retries,
            execution_time_ms: started.elapsed().as_millis() as u64,
            reject_kind: Some(kind),
            reason: Some(reason.clone()),
            completed_at: Utc::now(),
        };

        self.state.record_outcome(result.clone()).await;
        let _ = self.events.send(TradeEvent::Rejected {
            symbol: signal.symbol.clone(),
            kind,
            reason,
        });

        result
    }

    async fn error(
        &self,
        signal: &Signal,
        reason: String,
        retries: u32,
        started: Instant,
    ) -> ExecutionResult {
        warn!(
            symbol = %signal.symbol,
            reason = %reason,
            retries = retries,
            "Execution failed"
        );

        let result = ExecutionResult {
            signal_id: signal.id,
            symbol: signal.symbol.clone(),
            side: signal.action,
            status: ExecutionStatus::Error,
            requested_quantity: Decimal::ZERO,
            executed_quantity: Decimal::ZERO,
            requested_price: signal.entry_price,
            executed_price: Decimal::ZERO,
            slippage_pct: Decimal::ZERO,
            leverage: 0,
            fees: Decimal::ZERO,
            retry_count: retries,
            execution_time_ms: started.elapsed().as_millis() as u64,
            reject_kind: None,
            reason: Some(reason.clone()),
            completed_at: Utc::now(),
        };

        self.state.record_outcome(result.clone()).await;
        let _ = self.events.send(TradeEvent::Failed {
            symbol: signal.symbol.clone(),
            reason,
        });

        result
    }
}
