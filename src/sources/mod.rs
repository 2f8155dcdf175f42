//! Market-data sources.
//!
//! Defines the `CandleSource` and `SymbolUniverseProvider` traits consumed
//! by the scan orchestrator and provides implementations for:
//! - Binance spot klines
//! - MEXC spot klines
//! - Bybit v5 spot klines
//! - Static and CoinGecko-ranked symbol universes
//! - CoinGecko market overview for the report header

pub mod binance;
pub mod bybit;
pub mod market;
pub mod mexc;
pub mod universe;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::types::{Candle, CandleSeries, FetchError, ScanError, SymbolEntry, Timeframe};

/// Exchanges cap a single kline request at 1000 bars.
pub const MAX_BAR_LIMIT: usize = 1000;

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Source of OHLCV history for one exchange.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CandleSource: Send + Sync {
    /// Fetch up to `bar_limit` most recent bars, oldest first.
    async fn fetch(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        bar_limit: usize,
    ) -> Result<CandleSeries, FetchError>;
}

/// Resolves which symbols to scan and which source serves each.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SymbolUniverseProvider: Send + Sync {
    /// Ordered list of at most `max_count` entries.
    /// Fails with `ScanError::UniverseUnavailable` when nothing answers.
    async fn list(&self, max_count: usize) -> Result<Vec<SymbolEntry>, ScanError>;
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Maps data-source ids ("binance", "mexc", ...) to their client.
#[derive(Clone, Default)]
pub struct SourceRouter {
    sources: HashMap<String, Arc<dyn CandleSource>>,
}

impl SourceRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style registration.
    pub fn with(mut self, id: &str, source: Arc<dyn CandleSource>) -> Self {
        self.register(id, source);
        self
    }

    pub fn register(&mut self, id: &str, source: Arc<dyn CandleSource>) {
        self.sources.insert(id.to_string(), source);
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn CandleSource>> {
        self.sources.get(id).cloned()
    }

    /// Registered ids, sorted.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.sources.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

// ---------------------------------------------------------------------------
// HTTP helpers
// ---------------------------------------------------------------------------

/// Shared client construction for every exchange.
pub(crate) fn http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .user_agent("MULTISCAN/0.1.0 (signal-scanner)")
        .build()
        .context("Failed to build HTTP client")
}

/// Map an HTTP status to a fetch error. `None` for success.
pub(crate) fn classify_status(status: StatusCode) -> Option<FetchError> {
    if status.is_success() {
        None
    } else if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() == 418 {
        Some(FetchError::RateLimited)
    } else if status.is_server_error() {
        Some(FetchError::Network(format!("server error {status}")))
    } else {
        Some(FetchError::MalformedResponse(format!("unexpected status {status}")))
    }
}

/// GET a URL and decode the body as JSON.
pub(crate) async fn get_json(http: &Client, url: &str) -> Result<Value, FetchError> {
    debug!(url = %url, "GET");

    let resp = http.get(url).send().await?;
    if let Some(err) = classify_status(resp.status()) {
        return Err(err);
    }

    let body = resp.text().await?;
    if body.trim().is_empty() {
        return Err(FetchError::EmptyResponse);
    }
    serde_json::from_str(&body).map_err(|e| FetchError::MalformedResponse(e.to_string()))
}

// ---------------------------------------------------------------------------
// Kline rows
// ---------------------------------------------------------------------------

/// Numeric cell that exchanges send either as a JSON number or a string.
pub(crate) fn cell_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Convert kline rows `[open_time_ms, open, high, low, close, volume, ...]`
/// into a series. `turnover_col` is the quote-volume column; when absent
/// turnover is derived as volume × close.
pub(crate) fn parse_kline_rows(
    rows: &[Value],
    turnover_col: Option<usize>,
) -> Result<CandleSeries, FetchError> {
    let mut candles = Vec::with_capacity(rows.len());

    for (i, row) in rows.iter().enumerate() {
        let cells = row
            .as_array()
            .ok_or_else(|| FetchError::MalformedResponse(format!("row {i} is not an array")))?;
        let num = |col: usize| -> Result<f64, FetchError> {
            cells
                .get(col)
                .and_then(cell_f64)
                .ok_or_else(|| FetchError::MalformedResponse(format!("row {i} column {col}")))
        };

        let ms = num(0)? as i64;
        let open_time = Utc
            .timestamp_millis_opt(ms)
            .single()
            .ok_or_else(|| FetchError::MalformedResponse(format!("row {i} bad timestamp {ms}")))?;

        let candle = match turnover_col {
            Some(col) => Candle {
                open_time,
                open: num(1)?,
                high: num(2)?,
                low: num(3)?,
                close: num(4)?,
                volume: num(5)?,
                turnover: num(col)?,
            },
            None => Candle::with_derived_turnover(open_time, num(1)?, num(2)?, num(3)?, num(4)?, num(5)?),
        };
        candles.push(candle);
    }

    Ok(CandleSeries::new(candles)?)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_rows_with_quote_volume() {
        let rows = json!([
            [1700000000000i64, "1.0", "2.0", "0.5", "1.5", "100", 1700000899999i64, "150.5"],
            [1700000900000i64, "1.5", "2.5", "1.0", "2.0", "200", 1700001799999i64, "390.0"]
        ]);
        let series = parse_kline_rows(rows.as_array().unwrap(), Some(7)).unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series.last().close, 2.0);
        assert_eq!(series.turnovers(), vec![150.5, 390.0]);
    }

    #[test]
    fn test_parse_rows_derives_turnover() {
        let rows = json!([[1700000000000i64, 1.0, 2.0, 0.5, 1.5, 100.0]]);
        let series = parse_kline_rows(rows.as_array().unwrap(), None).unwrap();
        assert!((series.last().turnover - 150.0).abs() < 1e-9);
    }

    #[test]
    fn test_parse_rows_errors() {
        let empty: Vec<Value> = vec![];
        assert_eq!(parse_kline_rows(&empty, Some(7)), Err(FetchError::EmptyResponse));

        let short = json!([[1700000000000i64, "1.0", "2.0"]]);
        assert!(matches!(
            parse_kline_rows(short.as_array().unwrap(), None),
            Err(FetchError::MalformedResponse(_))
        ));

        let garbage = json!([[1700000000000i64, "x", "2", "1", "1", "1"]]);
        assert!(matches!(
            parse_kline_rows(garbage.as_array().unwrap(), None),
            Err(FetchError::MalformedResponse(_))
        ));

        let unordered = json!([
            [1700000900000i64, "1", "1", "1", "1", "1"],
            [1700000000000i64, "1", "1", "1", "1", "1"]
        ]);
        assert!(matches!(
            parse_kline_rows(unordered.as_array().unwrap(), None),
            Err(FetchError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status(StatusCode::OK), None);
        assert_eq!(classify_status(StatusCode::TOO_MANY_REQUESTS), Some(FetchError::RateLimited));
        assert_eq!(
            classify_status(StatusCode::from_u16(418).unwrap()),
            Some(FetchError::RateLimited)
        );
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY),
            Some(FetchError::Network(_))
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST),
            Some(FetchError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_router_lookup() {
        let router = SourceRouter::new()
            .with("mexc", Arc::new(MockCandleSource::new()))
            .with("binance", Arc::new(MockCandleSource::new()));
        assert_eq!(router.ids(), vec!["binance", "mexc"]);
        assert!(router.get("binance").is_some());
        assert!(router.get("kraken").is_none());
    }
}
