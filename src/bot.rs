//! Bot runner: main orchestration loop.
//!
//! Handles:
//! - Consuming signals from the intake channel
//! - Spawning one execution task per signal
//! - The UTC daily reset ticker
//! - Graceful ctrl-c shutdown (in-flight retries are abandoned after
//!   the current attempt; open positions are left open)

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::{broadcast, mpsc};
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::exchange::{ExchangeClient, RetryPolicy, TokioSleeper};
use crate::models::{ExecutionStatus, Signal, TradeEvent};
use crate::trading::{OrderExecutor, RiskSnapshot, TradingConfig, TradingState};

/// How often the daily-reset check runs.
const RESET_CHECK_INTERVAL_SECS: u64 = 60;

/// How often open positions are checked against stop/take levels.
const MONITOR_INTERVAL_SECS: u64 = 30;

/// Buffered signals on the intake channel.
const SIGNAL_CHANNEL_CAPACITY: usize = 64;

/// Buffered events on the broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Bot configuration.
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Trading configuration (profiles, limits, testnet flag)
    pub trading_config: TradingConfig,

    /// Retry schedule for order placement
    pub retry: RetryPolicy,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            trading_config: TradingConfig::default(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Main bot runner.
pub struct Bot {
    executor: Arc<OrderExecutor>,
    state: Arc<TradingState>,
    signals: mpsc::Receiver<Signal>,
    events: broadcast::Sender<TradeEvent>,
    shutdown: Arc<AtomicBool>,
}

impl Bot {
    /// Create a bot around an exchange client. Returns the bot and the
    /// sender half of the signal intake channel.
    pub fn new(
        client: Arc<dyn ExchangeClient>,
        config: BotConfig,
    ) -> (Self, mpsc::Sender<Signal>) {
        let (signal_tx, signal_rx) = mpsc::channel(SIGNAL_CHANNEL_CAPACITY);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let state = Arc::new(TradingState::new());
        let shutdown = Arc::new(AtomicBool::new(false));

        let executor = Arc::new(OrderExecutor::new(
            client,
            state.clone(),
            config.trading_config,
            config.retry,
            Arc::new(TokioSleeper),
            events.clone(),
            shutdown.clone(),
        ));

        let bot = Self {
            executor,
            state,
            signals: signal_rx,
            events,
            shutdown,
        };
        (bot, signal_tx)
    }

    /// Subscribe to trade events.
    pub fn subscribe(&self) -> broadcast::Receiver<TradeEvent> {
        self.events.subscribe()
    }

    /// Executor handle, for manual close operations.
    pub fn executor(&self) -> Arc<OrderExecutor> {
        self.executor.clone()
    }

    /// Main run loop. Returns once shutdown is requested and the
    /// intake channel has been drained of in-flight work.
    pub async fn run(&mut self) -> Result<()> {
        info!("Starting bot run loop");

        // Register shutdown handler
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutdown signal received");
            shutdown.store(true, Ordering::SeqCst);
        });

        let mut reset_ticker = interval(Duration::from_secs(RESET_CHECK_INTERVAL_SECS));
        let mut monitor_ticker = interval(Duration::from_secs(MONITOR_INTERVAL_SECS));
        let mut tasks = Vec::new();

        while !self.shutdown.load(Ordering::SeqCst) {
            tokio::select! {
                maybe_signal = self.signals.recv() => {
                    match maybe_signal {
                        Some(signal) => {
                            debug!(symbol = %signal.symbol, "Signal received");
                            let executor = self.executor.clone();
                            tasks.push(tokio::spawn(async move {
                                let result = executor.execute(&signal).await;
                                if result.status == ExecutionStatus::Error {
                                    error!(
                                        symbol = %result.symbol,
                                        reason = result.reason.as_deref().unwrap_or(""),
                                        "Execution ended in error"
                                    );
                                }
                            }));
                        }
                        None => {
                            info!("Signal channel closed, stopping");
                            break;
                        }
                    }
                }
                _ = reset_ticker.tick() => {
                    self.state.roll_daily_if_needed(Utc::now()).await;
                }
                _ = monitor_ticker.tick() => {
                    // Spawned so a close retrying against a slow exchange
                    // cannot stall signal intake or the daily reset.
                    let executor = self.executor.clone();
                    tasks.push(tokio::spawn(async move {
                        executor.monitor_positions().await;
                    }));
                }
            }

            tasks.retain(|t| !t.is_finished());
        }

        // Let spawned executions reach a terminal state; retries check
        // the shutdown flag themselves.
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Execution task panicked");
            }
        }

        let stats = self.stats().await;
        info!("Bot stopped");
        println!("\n{}", stats);

        Ok(())
    }

    /// Current statistics.
    pub async fn stats(&self) -> BotStats {
        let snapshot = self.state.snapshot().await;
        let recent = self.state.recent_executions(1000).await;
        let filled = recent.iter().filter(|r| r.is_filled()).count();
        let rejected = recent
            .iter()
            .filter(|r| r.status == ExecutionStatus::Rejected)
            .count();
        let errored = recent
            .iter()
            .filter(|r| r.status == ExecutionStatus::Error)
            .count();

        BotStats {
            snapshot,
            filled,
            rejected,
            errored,
        }
    }
}

/// Bot statistics.
#[derive(Debug, Clone)]
pub struct BotStats {
    pub snapshot: RiskSnapshot,
    pub filled: usize,
    pub rejected: usize,
    pub errored: usize,
}

impl std::fmt::Display for BotStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Bot Statistics ===")?;
        writeln!(f, "Daily P&L:        ${:.2}", self.snapshot.daily_pnl)?;
        writeln!(f, "Daily Trades:     {}", self.snapshot.daily_trades)?;
        writeln!(f, "Open Positions:   {}", self.snapshot.open_positions)?;
        writeln!(
            f,
            "Portfolio Units:  {:.2}",
            self.snapshot.portfolio_exposure
        )?;
        writeln!(
            f,
            "Recent Win Rate:  {:.1}%",
            self.snapshot.recent_win_rate * 100.0
        )?;
        writeln!(
            f,
            "Risk Budget:      {:.0}%",
            self.snapshot.risk_budget * 100.0
        )?;
        writeln!(
            f,
            "Executions:       {} filled, {} rejected, {} errored",
            self.filled, self.rejected, self.errored
        )?;
        writeln!(
            f,
            "Emergency Mode:   {}",
            if self.snapshot.emergency_mode {
                "ACTIVE"
            } else {
                "off"
            }
        )?;
        Ok(())
    }
}

/// Helper for operational tooling: total unrealized P&L across the
/// exchange's reported positions.
pub async fn total_unrealized(client: &dyn ExchangeClient) -> Result<Decimal> {
    let positions = client.fetch_positions().await?;
    Ok(positions.iter().map(|p| p.unrealized_pnl).sum())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{
        AccountBalance, Candle, ExchangeError, OrderFill, OrderRequest, PositionInfo, Ticker,
    };
    use crate::models::TradeAction;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::Mutex as StdMutex;
    use tokio::sync::Notify;
    use uuid::Uuid;

    /// Exchange whose price can be moved mid-test and whose reduce-only
    /// orders block until released, simulating a slow close.
    struct GatedExchange {
        price: StdMutex<Decimal>,
        close_started: Notify,
        close_release: Notify,
    }

    impl GatedExchange {
        fn new(price: Decimal) -> Self {
            Self {
                price: StdMutex::new(price),
                close_started: Notify::new(),
                close_release: Notify::new(),
            }
        }

        fn set_price(&self, price: Decimal) {
            *self.price.lock().unwrap() = price;
        }

        fn current_price(&self) -> Decimal {
            *self.price.lock().unwrap()
        }
    }

    #[async_trait]
    impl ExchangeClient for GatedExchange {
        async fn fetch_balance(&self) -> Result<AccountBalance, ExchangeError> {
            Ok(AccountBalance {
                total: dec!(10000),
                available: dec!(10000),
            })
        }

        async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker, ExchangeError> {
            Ok(Ticker {
                symbol: symbol.to_string(),
                last_price: self.current_price(),
            })
        }

        async fn fetch_ohlcv(
            &self,
            _symbol: &str,
            _interval: &str,
            _limit: u32,
        ) -> Result<Vec<Candle>, ExchangeError> {
            Ok(Vec::new())
        }

        async fn set_leverage(&self, _symbol: &str, _leverage: u32) -> Result<(), ExchangeError> {
            Ok(())
        }

        async fn create_market_order(
            &self,
            order: &OrderRequest,
        ) -> Result<OrderFill, ExchangeError> {
            if order.reduce_only {
                self.close_started.notify_one();
                self.close_release.notified().await;
            }
            Ok(OrderFill {
                order_id: "1001".to_string(),
                symbol: order.symbol.clone(),
                executed_quantity: order.quantity,
                average_price: self.current_price(),
                fee: Decimal::ZERO,
            })
        }

        async fn fetch_order(
            &self,
            _symbol: &str,
            _order_id: &str,
        ) -> Result<OrderFill, ExchangeError> {
            Err(ExchangeError::Parse("not scripted".to_string()))
        }

        async fn fetch_positions(&self) -> Result<Vec<PositionInfo>, ExchangeError> {
            Ok(Vec::new())
        }
    }

    fn make_signal(symbol: &str, entry_price: Decimal) -> Signal {
        Signal {
            id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            action: TradeAction::Long,
            entry_price,
            strength: 0.3,
            correlation: 0.8,
            confidence: 0.75,
            generated_at: Utc::now(),
            source: "pair-divergence".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_monitor_close_does_not_stall_intake() {
        let client = Arc::new(GatedExchange::new(dec!(3200)));
        let (mut bot, signal_tx) = Bot::new(client.clone(), BotConfig::default());
        let mut events = bot.subscribe();
        let run = tokio::spawn(async move { bot.run().await });

        signal_tx.send(make_signal("ETHUSDT", dec!(3200))).await.unwrap();
        match events.recv().await.unwrap() {
            TradeEvent::Filled { symbol, .. } => assert_eq!(symbol, "ETHUSDT"),
            other => panic!("expected fill, got {:?}", other),
        }

        // Drop through the 2.5% stop at 3120; the next monitor tick
        // starts a close that hangs inside the exchange.
        client.set_price(dec!(3000));
        client.close_started.notified().await;

        // A second signal still fills while that close is in flight.
        signal_tx.send(make_signal("LINKUSDT", dec!(3000))).await.unwrap();
        match events.recv().await.unwrap() {
            TradeEvent::Filled { symbol, .. } => assert_eq!(symbol, "LINKUSDT"),
            other => panic!("expected fill, got {:?}", other),
        }

        client.close_release.notify_one();
        match events.recv().await.unwrap() {
            TradeEvent::Closed {
                symbol,
                realized_pnl,
                reason,
            } => {
                assert_eq!(symbol, "ETHUSDT");
                assert_eq!(reason, "stop_loss");
                assert!(realized_pnl < Decimal::ZERO);
            }
            other => panic!("expected close, got {:?}", other),
        }

        drop(signal_tx);
        run.await.unwrap().unwrap();
    }
}
