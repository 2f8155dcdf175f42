//! MEXC spot market data.
//!
//! API docs: https://mexcdevelop.github.io/apidocs/spot_v3_en/
//! Klines:   GET /api/v3/klines?symbol=BTCUSDT&interval=60m&limit=200
//! Listing:  GET /api/v3/ticker/24hr
//!
//! Mirrors the Binance v3 layout except for the interval labels and an
//! eight-column kline row.

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

pub const SOURCE_ID: &str = "mexc";

/// Kline row: [open time, open, high, low, close, volume, close time,
/// quote asset volume].
const QUOTE_VOLUME_COL: usize = 7;

#[derive(Debug, Deserialize)]
struct Ticker {
    symbol: String,
}

/// MEXC spot kline client.
pub struct MexcSource {
    http: Client,
    base_url: String,
}

impl MexcSource {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: http_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn interval(timeframe: Timeframe) -> &'static str {
        match timeframe {
            Timeframe::M15 => "15m",
            Timeframe::H1 => "60m",
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

    fn parse_listing(body: serde_json::Value) -> Result<HashSet<String>, FetchError> {
        let tickers: Vec<Ticker> = serde_json::from_value(body)
            .map_err(|e| FetchError::MalformedResponse(e.to_string()))?;
        Ok(tickers
            .into_iter()
            .map(|t| t.symbol.to_uppercase())
            .filter(|s| s.ends_with("USDT"))
            .collect())
    }
}

#[async_trait]
impl CandleSource for MexcSource {
    async fn fetch(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        bar_limit: usize,
    ) -> Result<CandleSeries, FetchError> {
        let url = self.klines_url(symbol, timeframe, bar_limit);
        let body = get_json(&self.http, &url).await?;
        let series = Self::parse_klines(&body)?;
        debug!(symbol, %timeframe, bars = series.len(), "MEXC klines fetched");
        Ok(series)
    }
}

#[async_trait]
impl ListingSource for MexcSource {
    fn id(&self) -> &str {
        SOURCE_ID
    }

    async fn usdt_symbols(&self) -> Result<HashSet<String>, FetchError> {
        let url = format!("{}/api/v3/ticker/24hr", self.base_url);
        let body = get_json(&self.http, &url).await?;
        Self::parse_listing(body)
    }
}
