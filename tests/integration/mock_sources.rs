//! Mock collaborators for integration testing.
//!
//! Deterministic candle, universe, market overview and notifier
//! implementations, all in-memory with no network access.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use multiscan::notify::Notifier;
use multiscan::sources::market::MarketOverviewProvider;
use multiscan::sources::{CandleSource, SymbolUniverseProvider};
use multiscan::types::*;

// ---------------------------------------------------------------------------
// Synthetic series
// ---------------------------------------------------------------------------

/// Linear drift of `step` per bar from 100.0, flat turnover except the
/// latest bar which is `spike ×` the baseline.
pub fn series(bars: usize, step: f64, turnover: f64, spike: f64) -> CandleSeries {
    let candles = (0..bars)
        .map(|i| {
            let close = 100.0 + step * i as f64;
            let t = if i + 1 == bars { turnover * spike } else { turnover };
            Candle {
                open_time: Utc.timestamp_opt(1_700_000_000 + i as i64 * 900, 0).unwrap(),
                open: close - step,
                high: close + 0.5,
                low: close - 0.5,
                close,
                volume: t / close,
                turnover: t,
            }
        })
        .collect();
    CandleSeries::new(candles).unwrap()
}

pub fn uptrend() -> CandleSeries {
    series(120, 0.4, 2_000_000.0, 2.5)
}

pub fn downtrend() -> CandleSeries {
    series(120, -0.4, 2_000_000.0, 2.5)
}

pub fn flat() -> CandleSeries {
    series(120, 0.0, 2_000_000.0, 1.0)
}

// ---------------------------------------------------------------------------
// Candle source
// ---------------------------------------------------------------------------

#[derive(Clone)]
enum Script {
    Series(CandleSeries),
    Error(FetchError),
    /// Fail `remaining` times with a retryable error, then succeed.
    Flaky { remaining: usize, series: CandleSeries },
}

/// A candle source answering from a per-symbol script.
#[derive(Clone, Default)]
pub struct ScriptedSource {
    scripts: Arc<Mutex<HashMap<String, Script>>>,
    calls: Arc<Mutex<Vec<(String, Timeframe)>>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_series(self, symbol: &str, series: CandleSeries) -> Self {
        self.set(symbol, Script::Series(series));
        self
    }

    pub fn with_error(self, symbol: &str, error: FetchError) -> Self {
        self.set(symbol, Script::Error(error));
        self
    }

    pub fn with_flaky(self, symbol: &str, failures: usize, series: CandleSeries) -> Self {
        self.set(symbol, Script::Flaky { remaining: failures, series });
        self
    }

    fn set(&self, symbol: &str, script: Script) {
        self.scripts.lock().unwrap().insert(symbol.to_string(), script);
    }

    /// Number of fetches issued for `symbol`, over all timeframes.
    pub fn calls(&self, symbol: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|(s, _)| s == symbol).count()
    }
}

#[async_trait]
impl CandleSource for ScriptedSource {
    async fn fetch(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        _bar_limit: usize,
    ) -> Result<CandleSeries, FetchError> {
        self.calls.lock().unwrap().push((symbol.to_string(), timeframe));

        let mut scripts = self.scripts.lock().unwrap();
        match scripts.get_mut(symbol) {
            None => Err(FetchError::EmptyResponse),
            Some(Script::Series(s)) => Ok(s.clone()),
            Some(Script::Error(e)) => Err(e.clone()),
            Some(Script::Flaky { remaining, series }) => {
                if *remaining > 0 {
                    *remaining -= 1;
                    Err(FetchError::Network("connection reset by peer".into()))
                } else {
                    Ok(series.clone())
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Universe
// ---------------------------------------------------------------------------

/// A universe provider that is always down.
pub struct DownUniverse;

#[async_trait]
impl SymbolUniverseProvider for DownUniverse {
    async fn list(&self, _max_count: usize) -> Result<Vec<SymbolEntry>, ScanError> {
        Err(ScanError::UniverseUnavailable("no provider responded".into()))
    }
}

// ---------------------------------------------------------------------------
// Market overview
// ---------------------------------------------------------------------------

/// Fixed overview, or a provider that is always down when `None`.
pub struct FixedOverview(pub Option<MarketOverview>);

#[async_trait]
impl MarketOverviewProvider for FixedOverview {
    async fn overview(&self) -> Result<MarketOverview, FetchError> {
        self.0
            .clone()
            .ok_or_else(|| FetchError::Network("api.coingecko.com unreachable".into()))
    }
}

// ---------------------------------------------------------------------------
// Notifier
// ---------------------------------------------------------------------------

/// Records every attempted message; optionally fails every send.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<String>>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            sent: Arc::default(),
            fail: true,
        }
    }

    pub fn messages(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, text: &str) -> Result<(), ScanError> {
        self.sent.lock().unwrap().push(text.to_string());
        if self.fail {
            return Err(ScanError::Notifier("chat not found".into()));
        }
        Ok(())
    }
}
