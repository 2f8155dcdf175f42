//! Binance spot market data.
//!
//! API docs: https://developers.binance.com/docs/binance-spot-api-docs/rest-api
//! Klines:   GET /api/v3/klines?symbol=BTCUSDT&interval=1h&limit=200
//! Listing:  GET /api/v3/exchangeInfo
//! Rate limit: weight-based; HTTP 429 on excess, 418 once IP-banned.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;
use tracing::debug;

use super::universe::ListingSource;
use super::{get_json, http_client, parse_kline_rows, CandleSource, MAX_BAR_LIMIT};
use crate::types::{CandleSeries, FetchError, Timeframe};

pub const SOURCE_ID: &str = "binance";

/// Kline row: [open time, open, high, low, close, volume, close time,
/// quote asset volume, trades, taker base, taker quote, ignore].
const QUOTE_VOLUME_COL: usize = 7;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolInfo {
    symbol: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    quote_asset: String,
}

/// Binance spot kline client.
pub struct BinanceSource {
    http: Client,
    base_url: String,
}

impl BinanceSource {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: http_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn interval(timeframe: Timeframe) -> &'static str {
        match timeframe {
            Timeframe::M15 => "15m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
        }
    }

    fn klines_url(&self, symbol: &str, timeframe: Timeframe, bar_limit: usize) -> String {
        format!(
            "{}/api/v3/klines?symbol={}&interval={}&limit={}",
            self.base_url,
            urlencoding::encode(symbol),
            Self::interval(timeframe),
            bar_limit.clamp(1, MAX_BAR_LIMIT),
        )
    }

    fn parse_klines(body: &serde_json::Value) -> Result<CandleSeries, FetchError> {
        let rows = body
            .as_array()
            .ok_or_else(|| FetchError::MalformedResponse("klines body is not an array".into()))?;
        parse_kline_rows(rows, Some(QUOTE_VOLUME_COL))
    }

    /// Actively trading USDT-quoted pairs.
    fn parse_listing(body: serde_json::Value) -> Result<HashSet<String>, FetchError> {
        let info: ExchangeInfo = serde_json::from_value(body)
            .map_err(|e| FetchError::MalformedResponse(e.to_string()))?;
        Ok(info
            .symbols
            .into_iter()
            .filter(|s| s.quote_asset == "USDT" && s.status == "TRADING")
            .map(|s| s.symbol)
            .collect())
    }
}

#[async_trait]
impl CandleSource for BinanceSource {
    async fn fetch(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        bar_limit: usize,
    ) -> Result<CandleSeries, FetchError> {
        let url = self.klines_url(symbol, timeframe, bar_limit);
        let body = get_json(&self.http, &url).await?;
        let series = Self::parse_klines(&body)?;
        debug!(symbol, %timeframe, bars = series.len(), "Binance klines fetched");
        Ok(series)
    }
}

#[async_trait]
impl ListingSource for BinanceSource {
    fn id(&self) -> &str {
        SOURCE_ID
    }

    async fn usdt_symbols(&self) -> Result<HashSet<String>, FetchError> {
        let url = format!("{}/api/v3/exchangeInfo", self.base_url);
        let body = get_json(&self.http, &url).await?;
        Self::parse_listing(body)
    }
}
