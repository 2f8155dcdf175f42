//! Shared types for the MULTISCAN scanner.
//!
//! These types form the data model used across all modules: candle
//! series coming in from the sources, indicator snapshots and signal
//! results flowing through the strategy, and the scan run handed to the
//! notifier. Nothing here outlives a single scan.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Timeframe
// ---------------------------------------------------------------------------

/// Candle interval. Ordered from shortest to longest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
}

impl Timeframe {
    /// All supported timeframes, shortest first.
    pub const ALL: &'static [Timeframe] = &[
        Timeframe::M15,
        Timeframe::H1,
        Timeframe::H4,
        Timeframe::D1,
    ];

    /// Canonical short label, also used as the config key.
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M15 => "15m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parse a timeframe label ("15m", "1h", "4h", "1d"), case-insensitive.
impl std::str::FromStr for Timeframe {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "15m" => Ok(Timeframe::M15),
            "1h" | "60m" => Ok(Timeframe::H1),
            "4h" => Ok(Timeframe::H4),
            "1d" | "d" => Ok(Timeframe::D1),
            other => {
                let known: Vec<&str> = Timeframe::ALL.iter().map(Timeframe::as_str).collect();
                Err(ScanError::Config(format!(
                    "unknown timeframe: {other} (expected one of {})",
                    known.join(", ")
                )))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Candles
// ---------------------------------------------------------------------------

/// One OHLCV bar. `turnover` is the quote-currency value traded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub turnover: f64,
}

impl Candle {
    /// Build a bar whose turnover is not reported by the venue;
    /// it is derived as volume × close.
    pub fn with_derived_turnover(
        open_time: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            open_time,
            open,
            high,
            low,
            close,
            volume,
            turnover: volume * close,
        }
    }
}

/// Why a set of bars could not become a [`CandleSeries`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SeriesError {
    #[error("series is empty")]
    Empty,

    #[error("timestamps not strictly increasing at bar {index}")]
    Unordered { index: usize },

    #[error("non-finite value at bar {index}")]
    NonFinite { index: usize },
}

/// An ordered, immutable sequence of bars with strictly increasing
/// timestamps. Owned by the task that fetched it.
#[derive(Debug, Clone, PartialEq)]
pub struct CandleSeries {
    candles: Vec<Candle>,
}

impl CandleSeries {
    pub fn new(candles: Vec<Candle>) -> Result<Self, SeriesError> {
        if candles.is_empty() {
            return Err(SeriesError::Empty);
        }
        for (index, c) in candles.iter().enumerate() {
            let values = [c.open, c.high, c.low, c.close, c.volume, c.turnover];
            if values.iter().any(|v| !v.is_finite()) {
                return Err(SeriesError::NonFinite { index });
            }
            if index > 0 && c.open_time <= candles[index - 1].open_time {
                return Err(SeriesError::Unordered { index });
            }
        }
        Ok(Self { candles })
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    /// The latest bar. A series is never empty.
    pub fn last(&self) -> &Candle {
        &self.candles[self.candles.len() - 1]
    }

    pub fn closes(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.close).collect()
    }

    pub fn highs(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.high).collect()
    }

    pub fn lows(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.low).collect()
    }

    pub fn turnovers(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.turnover).collect()
    }
}

// ---------------------------------------------------------------------------
// Universe
// ---------------------------------------------------------------------------

/// A symbol to scan plus the id of the data source that serves it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SymbolEntry {
    pub symbol: String,
    pub source: String,
}

impl SymbolEntry {
    pub fn new(symbol: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            source: source.into(),
        }
    }
}

impl fmt::Display for SymbolEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.symbol, self.source)
    }
}

// ---------------------------------------------------------------------------
// Signals
// ---------------------------------------------------------------------------

/// Directional classification of one (symbol, timeframe).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SignalSide {
    Buy,
    Sell,
    None,
}

impl SignalSide {
    pub fn is_directional(&self) -> bool {
        !matches!(self, SignalSide::None)
    }
}

impl fmt::Display for SignalSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalSide::Buy => write!(f, "BUY"),
            SignalSide::Sell => write!(f, "SELL"),
            SignalSide::None => write!(f, "NONE"),
        }
    }
}

/// Sustained-volume statistics over the cluster lookback window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClusterStats {
    /// Bars in the window whose own volume ratio met the hit threshold.
    pub hits: usize,
    /// Summed window turnover over `lookback × baseline`.
    pub sum_ratio: f64,
    pub passed: bool,
}

/// Indicator values at the latest bar of a series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndicatorSnapshot {
    pub close: f64,
    pub prev_close: f64,
    pub ema_fast: f64,
    pub ema_slow: f64,
    pub rsi: f64,
    pub adx: f64,
    pub volume_ratio: f64,
    /// Turnover of the latest bar.
    pub turnover: f64,
    pub cluster: Option<ClusterStats>,
}

impl IndicatorSnapshot {
    /// Absolute fractional move of the latest close from the previous one.
    pub fn gap_pct(&self) -> f64 {
        if self.prev_close.abs() < f64::EPSILON {
            return 0.0;
        }
        (self.close / self.prev_close - 1.0).abs()
    }
}

/// Labeled reason a (symbol, timeframe) did not produce a signal.
///
/// The rule-stage variants are declared in evaluation order, so the
/// derived `Ord` doubles as "how far did the evaluation get".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum RejectionReason {
    LowLiquidity,
    PriceGap,
    NoTrend,
    RsiOutOfBand,
    VolumeBelowFloor,
    WeakTrend,
    ClusterNotConfirmed,
    CloseAgainstSide,
    ConfirmationGate,
    GuardViolation,
    InsufficientData,
    TransientFetchError,
    BadResponse,
    UnknownSource,
    DeadlineExceeded,
}

impl RejectionReason {
    /// Short snake_case label used in logs and the report summary.
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionReason::LowLiquidity => "low_liquidity",
            RejectionReason::PriceGap => "price_gap",
            RejectionReason::NoTrend => "no_trend",
            RejectionReason::RsiOutOfBand => "rsi_band",
            RejectionReason::VolumeBelowFloor => "volume",
            RejectionReason::WeakTrend => "weak_trend",
            RejectionReason::ClusterNotConfirmed => "cluster",
            RejectionReason::CloseAgainstSide => "close_direction",
            RejectionReason::ConfirmationGate => "confirmation",
            RejectionReason::GuardViolation => "guard_violation",
            RejectionReason::InsufficientData => "insufficient_data",
            RejectionReason::TransientFetchError => "fetch_error",
            RejectionReason::BadResponse => "bad_response",
            RejectionReason::UnknownSource => "unknown_source",
            RejectionReason::DeadlineExceeded => "deadline_exceeded",
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of evaluating one (symbol, timeframe).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignalResult {
    pub symbol: String,
    pub source: String,
    pub timeframe: Timeframe,
    pub side: SignalSide,
    pub snapshot: IndicatorSnapshot,
    /// 0–100. Only defined for Buy / Sell.
    pub confidence: Option<f64>,
    /// Highest whale tier crossed by the latest bar's turnover.
    pub whale_tier: Option<String>,
    pub rejection: Option<RejectionReason>,
}

impl SignalResult {
    /// Confidence used for ranking; `None` ranks below everything.
    pub fn rank_score(&self) -> f64 {
        self.confidence.unwrap_or(f64::NEG_INFINITY)
    }
}

impl fmt::Display for SignalResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) | {} | {} | RSI:{:.0} | ADX:{:.0} | Volx:{:.2}",
            self.symbol,
            self.source,
            self.timeframe,
            self.side,
            self.snapshot.rsi,
            self.snapshot.adx,
            self.snapshot.volume_ratio,
        )?;
        if let Some(conf) = self.confidence {
            write!(f, " | Conf:{conf:.0}")?;
        }
        if let Some(tier) = &self.whale_tier {
            write!(f, " | Whale:{tier}")?;
        }
        Ok(())
    }
}

/// Typed result of one scan task. Failures are values, not panics.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    /// Indicators computed and rules applied (the side may still be `None`).
    Evaluated(SignalResult),
    /// The task stopped before classification.
    Skipped {
        symbol: String,
        timeframe: Timeframe,
        reason: RejectionReason,
    },
}

impl TaskOutcome {
    pub fn skipped(symbol: &str, timeframe: Timeframe, reason: RejectionReason) -> Self {
        TaskOutcome::Skipped {
            symbol: symbol.to_string(),
            timeframe,
            reason,
        }
    }

    /// The rejection category of this outcome, if any.
    pub fn rejection(&self) -> Option<RejectionReason> {
        match self {
            TaskOutcome::Evaluated(result) => result.rejection,
            TaskOutcome::Skipped { reason, .. } => Some(*reason),
        }
    }
}

// ---------------------------------------------------------------------------
// Market confirmation
// ---------------------------------------------------------------------------

/// Trend state of the reference symbol on the confirmation timeframe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MarketState {
    Strong,
    Weak,
    Neutral,
    Unavailable,
}

impl fmt::Display for MarketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketState::Strong => write!(f, "STRONG"),
            MarketState::Weak => write!(f, "WEAK"),
            MarketState::Neutral => write!(f, "NEUTRAL"),
            MarketState::Unavailable => write!(f, "UNAVAILABLE"),
        }
    }
}

/// Per-side permission computed once per scan and shared read-only
/// by every task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmationGate {
    pub buy: bool,
    pub sell: bool,
}

impl ConfirmationGate {
    /// No external confirmation configured: both sides allowed.
    pub const OPEN: ConfirmationGate = ConfirmationGate {
        buy: true,
        sell: true,
    };

    pub fn from_state(state: MarketState) -> Self {
        match state {
            MarketState::Strong => ConfirmationGate { buy: true, sell: false },
            MarketState::Weak => ConfirmationGate { buy: false, sell: true },
            MarketState::Neutral => ConfirmationGate { buy: false, sell: false },
            MarketState::Unavailable => ConfirmationGate::OPEN,
        }
    }

    pub fn allows(&self, side: SignalSide) -> bool {
        match side {
            SignalSide::Buy => self.buy,
            SignalSide::Sell => self.sell,
            SignalSide::None => false,
        }
    }
}

impl Default for ConfirmationGate {
    fn default() -> Self {
        Self::OPEN
    }
}

// ---------------------------------------------------------------------------
// Scan run
// ---------------------------------------------------------------------------

/// Trend state of one reference (symbol, timeframe), computed once per
/// scan before fan-out.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceState {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub state: MarketState,
}

/// Movement of a market figure, rendered as an arrow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    Flat,
}

impl Direction {
    fn of(value: f64) -> Self {
        if value > 0.0 {
            Direction::Up
        } else if value < 0.0 {
            Direction::Down
        } else {
            Direction::Flat
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => f.write_str("↑"),
            Direction::Down => f.write_str("↓"),
            Direction::Flat => f.write_str("→"),
        }
    }
}

/// Market-wide figures for the report header.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketOverview {
    /// 24h change of the total crypto market cap, in percent.
    pub total_cap_change_pct: f64,
    pub btc_dominance_pct: f64,
    pub usdt_dominance_pct: f64,
    /// 24h BTC price change; `None` when the ticker was unavailable.
    pub btc_change_pct: Option<f64>,
}

impl MarketOverview {
    /// USDT dominance at or above this reads as risk-off.
    pub const USDT_RISK_OFF: f64 = 7.0;
    /// USDT dominance at or below this reads as risk-on.
    pub const USDT_RISK_ON: f64 = 5.0;

    pub fn btc_direction(&self) -> Direction {
        self.btc_change_pct.map(Direction::of).unwrap_or(Direction::Flat)
    }

    /// BTC outperforming the total market means dominance is rising.
    pub fn dominance_direction(&self) -> Direction {
        self.btc_change_pct
            .map(|btc| Direction::of(btc - self.total_cap_change_pct))
            .unwrap_or(Direction::Flat)
    }

    /// Market cap excluding BTC: money rotating into alts when dominance
    /// falls in a non-negative market, leaving when it rises in a
    /// non-positive one.
    pub fn total2_direction(&self) -> Direction {
        match self.dominance_direction() {
            Direction::Down if self.total_cap_change_pct >= 0.0 => Direction::Up,
            Direction::Up if self.total_cap_change_pct <= 0.0 => Direction::Down,
            _ => Direction::Flat,
        }
    }

    pub fn usdt_sentiment(&self) -> Option<&'static str> {
        if self.usdt_dominance_pct >= Self::USDT_RISK_OFF {
            Some("risk-off")
        } else if self.usdt_dominance_pct <= Self::USDT_RISK_ON {
            Some("risk-on")
        } else {
            None
        }
    }
}

/// Outcome of the market overview fetch. Absent from the run when the
/// overview is disabled.
#[derive(Debug, Clone, PartialEq)]
pub enum MarketNote {
    Overview(MarketOverview),
    Unavailable,
}

/// Aggregate output of one scan invocation.
#[derive(Debug, Clone)]
pub struct ScanRun {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub universe_size: usize,
    pub timeframes: Vec<Timeframe>,
    pub task_count: usize,
    pub elapsed: Duration,
    /// Ranked Buy results, truncated to top-K.
    pub buys: Vec<SignalResult>,
    /// Ranked Sell results, truncated to top-K.
    pub sells: Vec<SignalResult>,
    pub rejection_counts: BTreeMap<RejectionReason, usize>,
    /// Reference trend states, empty when no confirmation is configured.
    pub references: Vec<ReferenceState>,
    /// The reference whose state gated BUY/SELL.
    pub gate: Option<ReferenceState>,
    pub market_note: Option<MarketNote>,
}

impl ScanRun {
    pub fn signal_count(&self) -> usize {
        self.buys.len() + self.sells.len()
    }

    pub fn rejected_total(&self) -> usize {
        self.rejection_counts.values().sum()
    }

    /// Tasks that never reached classification because data was missing.
    pub fn fetch_failures(&self) -> usize {
        [
            RejectionReason::TransientFetchError,
            RejectionReason::BadResponse,
            RejectionReason::UnknownSource,
            RejectionReason::DeadlineExceeded,
        ]
        .iter()
        .map(|r| self.rejection_counts.get(r).copied().unwrap_or(0))
        .sum()
    }
}

impl fmt::Display for ScanRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Scan {} | universe {} | tasks {} | BUY {} | SELL {} | rejected {} | {:.1}s",
            self.run_id,
            self.universe_size,
            self.task_count,
            self.buys.len(),
            self.sells.len(),
            self.rejected_total(),
            self.elapsed.as_secs_f64(),
        )
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Failure of a single candle fetch.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),

    #[error("rate limited")]
    RateLimited,

    #[error("empty response")]
    EmptyResponse,

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("fetch timed out")]
    Timeout,
}

impl FetchError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::Network(_) | FetchError::RateLimited | FetchError::Timeout
        )
    }
}

impl From<SeriesError> for FetchError {
    fn from(e: SeriesError) -> Self {
        match e {
            SeriesError::Empty => FetchError::EmptyResponse,
            other => FetchError::MalformedResponse(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout
        } else if e.is_decode() {
            FetchError::MalformedResponse(e.to_string())
        } else {
            FetchError::Network(e.to_string())
        }
    }
}

/// A series shorter than an indicator's warm-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("insufficient data: need {required} bars, have {available}")]
pub struct InsufficientData {
    pub required: usize,
    pub available: usize,
}

/// Domain-specific error types for MULTISCAN.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("Transient fetch error ({symbol} {timeframe}) after {attempts} attempts: {last}")]
    TransientFetch {
        symbol: String,
        timeframe: Timeframe,
        attempts: u32,
        last: FetchError,
    },

    #[error(transparent)]
    DataInsufficient(#[from] InsufficientData),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Notifier error: {0}")]
    Notifier(String),

    #[error("Guard violation ({symbol} {timeframe}): both BUY and SELL conditions held")]
    GuardViolation { symbol: String, timeframe: Timeframe },

    #[error("Symbol universe unavailable: {0}")]
    UniverseUnavailable(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
