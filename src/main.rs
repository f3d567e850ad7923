//! Leveraged Futures Trading Bot
//!
//! Sizes and executes leveraged futures entries from upstream signals,
//! with per-symbol leverage profiles, volatility-aware adjustment, and
//! layered risk validation.

mod bot;
mod exchange;
mod models;
mod trading;

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::bot::{Bot, BotConfig};
use crate::exchange::{BinanceFuturesClient, ExchangeClient};
use crate::trading::{TradingConfig, CORRELATION_GROUPS};

/// Leveraged futures trading bot CLI.
#[derive(Parser)]
#[command(name = "leverbot")]
#[command(about = "Dynamic-leverage futures trading bot", long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Use the exchange testnet
    #[arg(long, default_value_t = true)]
    testnet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the trading bot
    Run,

    /// Show current configuration
    Config,

    /// Close all open exchange positions
    CloseAll,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Run => {
            let client: Arc<dyn ExchangeClient> =
                Arc::new(BinanceFuturesClient::from_env(cli.testnet)?);

            let balance = client.fetch_balance().await?;

            let mut config = BotConfig::default();
            config.trading_config.testnet = cli.testnet;

            let (mut bot, _signal_tx) = Bot::new(client, config);

            // Mirror trade events into the log
            let mut events = bot.subscribe();
            tokio::spawn(async move {
                while let Ok(event) = events.recv().await {
                    info!(event = ?event, "Trade event");
                }
            });

            println!("\n=== Leverage Trading Bot ===");
            println!("Network:   {}", if cli.testnet { "TESTNET" } else { "MAINNET" });
            println!("Balance:   ${:.2} (${:.2} available)", balance.total, balance.available);
            println!("\nPress Ctrl+C to stop.\n");

            if let Err(e) = bot.run().await {
                tracing::error!(error = %e, "Bot error");
            }
        }

        Commands::Config => {
            let config = TradingConfig::default();

            println!("\n=== Leverage Profiles ===\n");
            println!(
                "{:<10} {:>5} {:>5} {:>5} {:>8} {:>8}  {}",
                "SYMBOL", "BASE", "MIN", "MAX", "VOL_ADJ", "PERF", "TIER"
            );
            println!("{}", "-".repeat(58));
            for p in &config.profiles {
                println!(
                    "{:<10} {:>5} {:>5} {:>5} {:>8.2} {:>8.2}  {:?}",
                    p.symbol,
                    p.base_leverage,
                    p.min_leverage,
                    p.max_leverage,
                    p.volatility_adjustment,
                    p.performance_multiplier,
                    p.risk_tier
                );
            }

            let limits = &config.limits;
            println!("\n=== Risk Limits ===\n");
            println!("Max Daily Loss:        {:.0}%", limits.max_daily_loss_pct * 100.0);
            println!("Max Portfolio Units:   {:.1}", limits.max_portfolio_leverage);
            println!("Max Group Exposure:    {:.0}%", limits.max_correlated_exposure * 100.0);
            println!(
                "High-Leverage Slots:   {} above {}x",
                limits.max_high_leverage_positions, limits.high_leverage_threshold
            );
            println!("Max Margin Usage:      {:.0}%", limits.max_margin_usage * 100.0);
            println!("Weekend Cap:           {}x", limits.weekend_leverage_cap);
            println!("Overnight Cap:         {}x", limits.overnight_leverage_cap);
            println!("Max Risk Score:        {:.0}", limits.max_risk_score);
            println!("Emergency Win Rate:    {:.0}%", limits.emergency_win_rate * 100.0);

            println!("\n=== Correlation Groups ===\n");
            for (group, symbols) in CORRELATION_GROUPS {
                println!("  {:<10} {}", group, symbols.join(", "));
            }
        }

        Commands::CloseAll => {
            let client: Arc<dyn ExchangeClient> =
                Arc::new(BinanceFuturesClient::from_env(cli.testnet)?);

            let positions = client.fetch_positions().await?;
            if positions.is_empty() {
                println!("No open positions.");
                return Ok(());
            }

            let unrealized = bot::total_unrealized(client.as_ref()).await?;
            info!(
                count = positions.len(),
                unrealized = %unrealized,
                "Closing all open positions"
            );

            let mut config = BotConfig::default();
            config.trading_config.testnet = cli.testnet;
            let (bot, _signal_tx) = Bot::new(client, config);

            let results = bot.executor().close_all_exchange_positions().await;
            for (symbol, outcome) in results {
                match outcome {
                    Ok(pnl) => println!("  {} closed, realized ${:.2}", symbol, pnl),
                    Err(e) => println!("  {} FAILED: {}", symbol, e),
                }
            }
        }
    }

    Ok(())
}
