//! Symbol universe providers.
//!
//! - `StaticUniverse`: the configured `{symbol, source}` list, in order.
//! - `CoinGeckoUniverse`: top coins by market cap, each resolved to the
//!   first exchange (in priority order) that lists its USDT pair.
//!
//! CoinGecko API: GET /coins/markets?vs_currency=usd&order=market_cap_desc
//! Rate limit: ~30 requests/minute on the public tier.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{get_json, http_client, SymbolUniverseProvider};
use crate::types::{FetchError, ScanError, SymbolEntry};

/// CoinGecko page size cap.
const MAX_PER_PAGE: usize = 250;

/// USDT pair used to match a coin ticker against exchange listings.
const QUOTE: &str = "USDT";

// ---------------------------------------------------------------------------
// Static
// ---------------------------------------------------------------------------

pub struct StaticUniverse {
    entries: Vec<SymbolEntry>,
}

impl StaticUniverse {
    pub fn new(entries: Vec<SymbolEntry>) -> Self {
        Self { entries }
    }
}

#[async_trait]
impl SymbolUniverseProvider for StaticUniverse {
    async fn list(&self, max_count: usize) -> Result<Vec<SymbolEntry>, ScanError> {
        if self.entries.is_empty() {
            return Err(ScanError::UniverseUnavailable("static symbol list is empty".into()));
        }
        Ok(self.entries.iter().take(max_count).cloned().collect())
    }
}

// ---------------------------------------------------------------------------
// Exchange listings
// ---------------------------------------------------------------------------

/// An exchange that can report which USDT pairs it lists.
#[async_trait]
pub trait ListingSource: Send + Sync {
    /// Data-source id assigned to symbols resolved on this exchange.
    fn id(&self) -> &str;

    async fn usdt_symbols(&self) -> Result<HashSet<String>, FetchError>;
}

/// Assign each ranked ticker to the first listing that carries its USDT
/// pair. Tickers listed nowhere are dropped; duplicates keep their first
/// (highest-ranked) occurrence.
pub fn resolve_symbols(
    ranked_tickers: &[String],
    listings: &[(String, HashSet<String>)],
    max_count: usize,
) -> Vec<SymbolEntry> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for ticker in ranked_tickers {
        let pair = format!("{}{QUOTE}", ticker.to_uppercase());
        if seen.contains(&pair) {
            continue;
        }
        if let Some((source, _)) = listings.iter().find(|(_, set)| set.contains(&pair)) {
            seen.insert(pair.clone());
            out.push(SymbolEntry::new(pair, source.clone()));
            if out.len() == max_count {
                break;
            }
        }
    }

    out
}

// ---------------------------------------------------------------------------
// CoinGecko
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CoinMarket {
    symbol: String,
}

pub struct CoinGeckoUniverse {
    http: Client,
    base_url: String,
    /// Listing sources in routing priority order.
    listings: Vec<Arc<dyn ListingSource>>,
}

impl CoinGeckoUniverse {
    pub fn new(base_url: &str, timeout: Duration, listings: Vec<Arc<dyn ListingSource>>) -> Result<Self> {
        Ok(Self {
            http: http_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            listings,
        })
    }

    fn markets_url(&self, per_page: usize, page: usize) -> String {
        format!(
            "{}/coins/markets?vs_currency=usd&order=market_cap_desc&per_page={per_page}&page={page}",
            self.base_url
        )
    }

    fn parse_markets(body: serde_json::Value) -> Result<Vec<String>, FetchError> {
        let coins: Vec<CoinMarket> = serde_json::from_value(body)
            .map_err(|e| FetchError::MalformedResponse(e.to_string()))?;
        Ok(coins.into_iter().map(|c| c.symbol).collect())
    }

    /// Ranked tickers, most valuable first.
    async fn ranked_tickers(&self, max_count: usize) -> Result<Vec<String>, FetchError> {
        let per_page = max_count.clamp(1, MAX_PER_PAGE);
        let pages = max_count.div_ceil(per_page).max(1);
        let mut tickers = Vec::with_capacity(max_count);

        for page in 1..=pages {
            let body = get_json(&self.http, &self.markets_url(per_page, page)).await?;
            let batch = Self::parse_markets(body)?;
            let last_page = batch.len() < per_page;
            tickers.extend(batch);
            if last_page {
                break;
            }
        }

        Ok(tickers)
    }

    /// Listings for every exchange; a failing exchange contributes nothing.
    async fn collect_listings(&self) -> Vec<(String, HashSet<String>)> {
        let fetches = self.listings.iter().map(|l| async move {
            let set = l.usdt_symbols().await.unwrap_or_else(|e| {
                warn!(source = l.id(), error = %e, "Exchange listing unavailable, skipping");
                HashSet::new()
            });
            (l.id().to_string(), set)
        });
        futures::future::join_all(fetches).await
    }
}

#[async_trait]
impl SymbolUniverseProvider for CoinGeckoUniverse {
    async fn list(&self, max_count: usize) -> Result<Vec<SymbolEntry>, ScanError> {
        let tickers = self
            .ranked_tickers(max_count)
            .await
            .map_err(|e| ScanError::UniverseUnavailable(format!("CoinGecko: {e}")))?;
        debug!(tickers = tickers.len(), "CoinGecko ranking fetched");

        let listings = self.collect_listings().await;
        let resolved = resolve_symbols(&tickers, &listings, max_count);

        if resolved.is_empty() {
            return Err(ScanError::UniverseUnavailable(
                "no ranked coin resolved to an exchange listing".into(),
            ));
        }

        info!(
            ranked = tickers.len(),
            resolved = resolved.len(),
            "Symbol universe resolved"
        );
        Ok(resolved)
    }
}
