//! Market-wide overview for the report header.
//!
//! CoinGecko: GET /global (total cap change, BTC and USDT dominance)
//! Binance:   GET /api/v3/ticker/24hr?symbol=BTCUSDT (BTC 24h change)

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use super::{cell_f64, get_json, http_client};
use crate::types::{FetchError, MarketOverview};

/// Supplies the market-wide figures shown in the report header.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketOverviewProvider: Send + Sync {
    async fn overview(&self) -> Result<MarketOverview, FetchError>;
}

#[derive(Debug, Deserialize)]
struct GlobalResponse {
    data: GlobalData,
}

#[derive(Debug, Deserialize)]
struct GlobalData {
    market_cap_change_percentage_24h_usd: f64,
    market_cap_percentage: HashMap<String, f64>,
}

pub struct CoinGeckoOverview {
    http: Client,
    coingecko_url: String,
    binance_url: String,
}

impl CoinGeckoOverview {
    pub fn new(coingecko_url: &str, binance_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: http_client(timeout)?,
            coingecko_url: coingecko_url.trim_end_matches('/').to_string(),
            binance_url: binance_url.trim_end_matches('/').to_string(),
        })
    }

    /// Global figures with the BTC change still unset.
    fn parse_global(body: serde_json::Value) -> Result<MarketOverview, FetchError> {
        let global: GlobalResponse = serde_json::from_value(body)
            .map_err(|e| FetchError::MalformedResponse(e.to_string()))?;
        let dominance = |coin: &str| {
            global
                .data
                .market_cap_percentage
                .get(coin)
                .copied()
                .ok_or_else(|| FetchError::MalformedResponse(format!("missing {coin} dominance")))
        };

        Ok(MarketOverview {
            total_cap_change_pct: global.data.market_cap_change_percentage_24h_usd,
            btc_dominance_pct: dominance("btc")?,
            usdt_dominance_pct: dominance("usdt")?,
            btc_change_pct: None,
        })
    }

    fn parse_ticker(body: &serde_json::Value) -> Result<f64, FetchError> {
        body.get("priceChangePercent")
            .and_then(cell_f64)
            .ok_or_else(|| FetchError::MalformedResponse("missing priceChangePercent".into()))
    }
}

#[async_trait]
impl MarketOverviewProvider for CoinGeckoOverview {
    async fn overview(&self) -> Result<MarketOverview, FetchError> {
        let body = get_json(&self.http, &format!("{}/global", self.coingecko_url)).await?;
        let mut overview = Self::parse_global(body)?;

        // The BTC ticker only refines the arrows; its absence is not fatal.
        let ticker_url = format!("{}/api/v3/ticker/24hr?symbol=BTCUSDT", self.binance_url);
        overview.btc_change_pct = match get_json(&self.http, &ticker_url).await {
            Ok(body) => Self::parse_ticker(&body).ok(),
            Err(e) => {
                warn!(error = %e, "BTC ticker unavailable");
                None
            }
        };

        debug!(?overview, "Market overview fetched");
        Ok(overview)
    }
}
