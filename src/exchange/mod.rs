//! Exchange client layer: capability trait, typed errors, request/response
//! models, retry policy, and the Binance USDT-M futures implementation.

mod binance;
mod client;
mod retry;
mod types;

pub use binance::BinanceFuturesClient;
pub use client::ExchangeClient;
pub use retry::{RetryPolicy, Sleeper, TokioSleeper};
pub use types::{
    AccountBalance, Candle, ExchangeError, OrderFill, OrderRequest, OrderSide, PositionInfo,
    Ticker,
};
