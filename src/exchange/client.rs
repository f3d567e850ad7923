//! Capability trait over the futures exchange. All calls are fallible
//! and may be slow; callers wrap them in the retry policy where needed.

use async_trait::async_trait;
use rust_decimal::Decimal;

use super::types::{
    AccountBalance, Candle, ExchangeError, OrderFill, OrderRequest, PositionInfo, Ticker,
};

#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Quote-asset balance of the futures account.
    async fn fetch_balance(&self) -> Result<AccountBalance, ExchangeError>;

    /// Last traded price for a symbol.
    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker, ExchangeError>;

    /// Recent candles, newest last.
    async fn fetch_ohlcv(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> Result<Vec<Candle>, ExchangeError>;

    /// Set the leverage used for subsequent orders on a symbol.
    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), ExchangeError>;

    /// Place a market order and return the fill.
    async fn create_market_order(&self, order: &OrderRequest) -> Result<OrderFill, ExchangeError>;

    /// Look up an order by id.
    async fn fetch_order(&self, symbol: &str, order_id: &str) -> Result<OrderFill, ExchangeError>;

    /// All open positions on the account.
    async fn fetch_positions(&self) -> Result<Vec<PositionInfo>, ExchangeError>;

    /// Convenience: last price as a bare Decimal.
    async fn last_price(&self, symbol: &str) -> Result<Decimal, ExchangeError> {
        Ok(self.fetch_ticker(symbol).await?.last_price)
    }
}
