//! Bybit v5 spot market data.
//!
//! API docs: https://bybit-exchange.github.io/docs/v5/market/kline
//! Klines:   GET /v5/market/kline?category=spot&symbol=BTCUSDT&interval=60&limit=200
//! Listing:  GET /v5/market/instruments-info?category=spot
//!
//! Responses are wrapped in `{retCode, retMsg, result}`; kline lists come
//! newest first and are reversed here.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use std::time::Duration;
use tracing::debug;

use super::universe::ListingSource;
use super::{get_json, http_client, parse_kline_rows, CandleSource, MAX_BAR_LIMIT};
use crate::types::{CandleSeries, FetchError, Timeframe};

pub const SOURCE_ID: &str = "bybit";

/// Kline row: [start time, open, high, low, close, volume, turnover].
const TURNOVER_COL: usize = 6;

/// retCode for "too many visits".
const RATE_LIMIT_CODE: i64 = 10006;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope<T> {
    ret_code: i64,
    #[serde(default)]
    ret_msg: String,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct KlineResult {
    #[serde(default)]
    list: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct InstrumentsResult {
    #[serde(default)]
    list: Vec<Instrument>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Instrument {
    symbol: String,
    #[serde(default)]
    quote_coin: String,
    #[serde(default)]
    status: String,
}

/// Bybit spot kline client.
pub struct BybitSource {
    http: Client,
    base_url: String,
}

impl BybitSource {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: http_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn interval(timeframe: Timeframe) -> &'static str {
        match timeframe {
            Timeframe::M15 => "15",
            Timeframe::H1 => "60",
            Timeframe::H4 => "240",
            Timeframe::D1 => "D",
        }
    }

    fn klines_url(&self, symbol: &str, timeframe: Timeframe, bar_limit: usize) -> String {
        format!(
            "{}/v5/market/kline?category=spot&symbol={}&interval={}&limit={}",
            self.base_url,
            urlencoding::encode(symbol),
            Self::interval(timeframe),
            bar_limit.clamp(1, MAX_BAR_LIMIT),
        )
    }

    /// Unwrap the v5 envelope, mapping non-zero return codes.
    fn unwrap_envelope<T: serde::de::DeserializeOwned>(body: Value) -> Result<T, FetchError> {
        let env: Envelope<T> = serde_json::from_value(body)
            .map_err(|e| FetchError::MalformedResponse(e.to_string()))?;
        match env.ret_code {
            0 => env.result.ok_or(FetchError::EmptyResponse),
            RATE_LIMIT_CODE => Err(FetchError::RateLimited),
            code => Err(FetchError::MalformedResponse(format!("retCode {code}: {}", env.ret_msg))),
        }
    }

    fn parse_klines(body: Value) -> Result<CandleSeries, FetchError> {
        let mut result: KlineResult = Self::unwrap_envelope(body)?;
        result.list.reverse();
        parse_kline_rows(&result.list, Some(TURNOVER_COL))
    }

    fn parse_listing(body: Value) -> Result<HashSet<String>, FetchError> {
        let result: InstrumentsResult = Self::unwrap_envelope(body)?;
        Ok(result
            .list
            .into_iter()
            .filter(|i| i.quote_coin == "USDT" && i.status == "Trading")
            .map(|i| i.symbol)
            .collect())
    }
}

#[async_trait]
impl CandleSource for BybitSource {
    async fn fetch(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        bar_limit: usize,
    ) -> Result<CandleSeries, FetchError> {
        let url = self.klines_url(symbol, timeframe, bar_limit);
        let body = get_json(&self.http, &url).await?;
        let series = Self::parse_klines(body)?;
        debug!(symbol, %timeframe, bars = series.len(), "Bybit klines fetched");
        Ok(series)
    }
}

#[async_trait]
impl ListingSource for BybitSource {
    fn id(&self) -> &str {
        SOURCE_ID
    }

    async fn usdt_symbols(&self) -> Result<HashSet<String>, FetchError> {
        let url = format!("{}/v5/market/instruments-info?category=spot", self.base_url);
        let body = get_json(&self.http, &url).await?;
        Self::parse_listing(body)
    }
}
