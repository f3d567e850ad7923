//! Binance USDT-M futures REST client.
//!
//! Signed endpoints use HMAC-SHA256 over the query string with the
//! `X-MBX-APIKEY` header. The testnet flag switches the base URL.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha256;
use tracing::debug;

use super::client::ExchangeClient;
use super::types::{
    AccountBalance, Candle, ExchangeError, OrderFill, OrderRequest, PositionInfo, Ticker,
};

pub const MAINNET_URL: &str = "https://fapi.binance.com";
pub const TESTNET_URL: &str = "https://testnet.binancefuture.com";

/// Per-request timeout. Timeouts map to a retryable error.
const REQUEST_TIMEOUT_SECS: u64 = 5;

type HmacSha256 = Hmac<Sha256>;

/// REST client for Binance USDT-M futures.
pub struct BinanceFuturesClient {
    http: Client,
    api_key: String,
    api_secret: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: i64,
    msg: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BalanceEntry {
    asset: String,
    balance: String,
    available_balance: String,
}

#[derive(Debug, Deserialize)]
struct TickerResponse {
    symbol: String,
    price: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    order_id: i64,
    symbol: String,
    #[serde(default)]
    executed_qty: String,
    #[serde(default)]
    avg_price: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PositionRiskEntry {
    symbol: String,
    position_amt: String,
    entry_price: String,
    leverage: String,
    un_realized_profit: String,
}

impl BinanceFuturesClient {
    pub fn new(api_key: &str, api_secret: &str, testnet: bool) -> Result<Self, ExchangeError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(ExchangeError::from_http)?;

        let base_url = if testnet { TESTNET_URL } else { MAINNET_URL };

        Ok(Self {
            http,
            api_key: api_key.to_string(),
            api_secret: api_secret.to_string(),
            base_url: base_url.to_string(),
        })
    }

    /// Build from BINANCE_API_KEY / BINANCE_API_SECRET environment
    /// variables (loaded via dotenv by the CLI).
    pub fn from_env(testnet: bool) -> Result<Self, ExchangeError> {
        let api_key = std::env::var("BINANCE_API_KEY")
            .map_err(|_| ExchangeError::Auth("BINANCE_API_KEY not set".to_string()))?;
        let api_secret = std::env::var("BINANCE_API_SECRET")
            .map_err(|_| ExchangeError::Auth("BINANCE_API_SECRET not set".to_string()))?;
        Self::new(&api_key, &api_secret, testnet)
    }

    /// HMAC-SHA256 signature over the query string, hex-encoded.
    fn sign(&self, query: &str) -> Result<String, ExchangeError> {
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .map_err(|e| ExchangeError::Auth(e.to_string()))?;
        mac.update(query.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn signed_query(&self, params: &str) -> Result<String, ExchangeError> {
        let timestamp = Utc::now().timestamp_millis();
        let query = if params.is_empty() {
            format!("timestamp={}", timestamp)
        } else {
            format!("{}&timestamp={}", params, timestamp)
        };
        let signature = self.sign(&query)?;
        Ok(format!("{}&signature={}", query, signature))
    }

    /// Translate a non-success response into the error taxonomy using
    /// the exchange's numeric error codes.
    async fn error_from_response(resp: reqwest::Response) -> ExchangeError {
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();

        if let Ok(api_err) = serde_json::from_str::<ApiError>(&text) {
            return match api_err.code {
                // -1003: too many requests
                -1003 => ExchangeError::RateLimited,
                // -2018/-2019: balance or margin insufficient
                // -2010: order rejected for insufficient balance
                -2018 | -2019 | -2010 => ExchangeError::InsufficientFunds(api_err.msg),
                // -1100..-1199: invalid request parameters
                // -4xxx: filter/position-mode violations
                code if (-1199..=-1100).contains(&code) || (-4999..=-4000).contains(&code) => {
                    ExchangeError::InvalidOrder(api_err.msg)
                }
                // -2014/-2015: API key problems
                -2014 | -2015 => ExchangeError::Auth(api_err.msg),
                code => ExchangeError::Exchange {
                    code,
                    message: api_err.msg,
                },
            };
        }

        if status.as_u16() == 429 {
            return ExchangeError::RateLimited;
        }

        ExchangeError::Exchange {
            code: status.as_u16() as i64,
            message: text,
        }
    }

    async fn get_signed<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        params: &str,
    ) -> Result<T, ExchangeError> {
        let query = self.signed_query(params)?;
        let url = format!("{}{}?{}", self.base_url, path, query);

        let resp = self
            .http
            .get(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(ExchangeError::from_http)?;

        if !resp.status().is_success() {
            return Err(Self::error_from_response(resp).await);
        }

        resp.json::<T>()
            .await
            .map_err(|e| ExchangeError::Parse(e.to_string()))
    }

    async fn post_signed<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        params: &str,
    ) -> Result<T, ExchangeError> {
        let query = self.signed_query(params)?;
        let url = format!("{}{}?{}", self.base_url, path, query);

        let resp = self
            .http
            .post(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(ExchangeError::from_http)?;

        if !resp.status().is_success() {
            return Err(Self::error_from_response(resp).await);
        }

        resp.json::<T>()
            .await
            .map_err(|e| ExchangeError::Parse(e.to_string()))
    }

    fn parse_decimal(s: &str, field: &str) -> Result<Decimal, ExchangeError> {
        Decimal::from_str(s)
            .map_err(|e| ExchangeError::Parse(format!("{}: '{}' ({})", field, s, e)))
    }
}

#[async_trait]
impl ExchangeClient for BinanceFuturesClient {
    async fn fetch_balance(&self) -> Result<AccountBalance, ExchangeError> {
        let entries: Vec<BalanceEntry> = self.get_signed("/fapi/v2/balance", "").await?;

        let usdt = entries
            .iter()
            .find(|e| e.asset == "USDT")
            .ok_or_else(|| ExchangeError::Parse("no USDT balance entry".to_string()))?;

        Ok(AccountBalance {
            total: Self::parse_decimal(&usdt.balance, "balance")?,
            available: Self::parse_decimal(&usdt.available_balance, "availableBalance")?,
        })
    }

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker, ExchangeError> {
        let url = format!("{}/fapi/v1/ticker/price?symbol={}", self.base_url, symbol);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(ExchangeError::from_http)?;

        if !resp.status().is_success() {
            return Err(Self::error_from_response(resp).await);
        }

        let ticker: TickerResponse = resp
            .json()
            .await
            .map_err(|e| ExchangeError::Parse(e.to_string()))?;

        Ok(Ticker {
            symbol: ticker.symbol,
            last_price: Self::parse_decimal(&ticker.price, "price")?,
        })
    }

    async fn fetch_ohlcv(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let url = format!(
            "{}/fapi/v1/klines?symbol={}&interval={}&limit={}",
            self.base_url, symbol, interval, limit
        );
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(ExchangeError::from_http)?;

        if !resp.status().is_success() {
            return Err(Self::error_from_response(resp).await);
        }

        // Klines arrive as heterogeneous arrays:
        // [open_time, open, high, low, close, volume, ...]
        let raw: Vec<serde_json::Value> = resp
            .json()
            .await
            .map_err(|e| ExchangeError::Parse(e.to_string()))?;

        let mut candles = Vec::with_capacity(raw.len());
        for row in &raw {
            let arr = row
                .as_array()
                .ok_or_else(|| ExchangeError::Parse("kline row is not an array".to_string()))?;
            if arr.len() < 6 {
                return Err(ExchangeError::Parse("kline row too short".to_string()));
            }

            let open_time_ms = arr[0]
                .as_i64()
                .ok_or_else(|| ExchangeError::Parse("kline open_time".to_string()))?;
            let open_time = Utc
                .timestamp_millis_opt(open_time_ms)
                .single()
                .ok_or_else(|| ExchangeError::Parse("kline open_time range".to_string()))?;

            let field = |i: usize, name: &str| -> Result<Decimal, ExchangeError> {
                let s = arr[i]
                    .as_str()
                    .ok_or_else(|| ExchangeError::Parse(format!("kline {}", name)))?;
                Self::parse_decimal(s, name)
            };

            candles.push(Candle {
                open_time,
                open: field(1, "open")?,
                high: field(2, "high")?,
                low: field(3, "low")?,
                close: field(4, "close")?,
                volume: field(5, "volume")?,
            });
        }

        Ok(candles)
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), ExchangeError> {
        let params = format!("symbol={}&leverage={}", symbol, leverage);
        let _: serde_json::Value = self.post_signed("/fapi/v1/leverage", &params).await?;
        debug!(symbol = %symbol, leverage = leverage, "Leverage set");
        Ok(())
    }

    async fn create_market_order(&self, order: &OrderRequest) -> Result<OrderFill, ExchangeError> {
        let mut params = format!(
            "symbol={}&side={}&type=MARKET&quantity={}&newOrderRespType=RESULT",
            order.symbol,
            order.side.as_str(),
            order.quantity
        );
        if order.reduce_only {
            params.push_str("&reduceOnly=true");
        }

        let resp: OrderResponse = self.post_signed("/fapi/v1/order", &params).await?;

        Ok(OrderFill {
            order_id: resp.order_id.to_string(),
            symbol: resp.symbol,
            executed_quantity: Self::parse_decimal(&resp.executed_qty, "executedQty")?,
            average_price: Self::parse_decimal(&resp.avg_price, "avgPrice")?,
            // Commission is reported on user trades, not the order ack
            fee: Decimal::ZERO,
        })
    }

    async fn fetch_order(&self, symbol: &str, order_id: &str) -> Result<OrderFill, ExchangeError> {
        let params = format!("symbol={}&orderId={}", symbol, order_id);
        let resp: OrderResponse = self.get_signed("/fapi/v1/order", &params).await?;

        Ok(OrderFill {
            order_id: resp.order_id.to_string(),
            symbol: resp.symbol,
            executed_quantity: Self::parse_decimal(&resp.executed_qty, "executedQty")?,
            average_price: Self::parse_decimal(&resp.avg_price, "avgPrice")?,
            fee: Decimal::ZERO,
        })
    }

    async fn fetch_positions(&self) -> Result<Vec<PositionInfo>, ExchangeError> {
        let entries: Vec<PositionRiskEntry> =
            self.get_signed("/fapi/v2/positionRisk", "").await?;

        let mut positions = Vec::new();
        for entry in entries {
            let quantity = Self::parse_decimal(&entry.position_amt, "positionAmt")?;
            if quantity.is_zero() {
                continue;
            }
            positions.push(PositionInfo {
                symbol: entry.symbol,
                quantity,
                entry_price: Self::parse_decimal(&entry.entry_price, "entryPrice")?,
                leverage: entry.leverage.parse::<u32>().unwrap_or(1),
                unrealized_pnl: Self::parse_decimal(&entry.un_realized_profit, "unRealizedProfit")?,
            });
        }

        Ok(positions)
    }
}
