//! Pure computation module for technical indicators.
//!
//! No I/O, no shared state. Every function takes price/turnover columns
//! of a [`CandleSeries`] and returns the value at the latest bar, or
//! [`InsufficientData`] when the input is shorter than that function's
//! own warm-up. A wrong number is never returned for a short series.
//!
//! Smoothing follows the recursive (non-adjusted) convention: the first
//! smoothed value is seeded with the first input and every later value is
//! `α·x + (1−α)·prev`.
//!
//! - EMA: `α = 2 / (span + 1)`
//! - RSI / ADX: Wilder smoothing, `α = 1 / period`
//! - Volume ratio: latest turnover over the EMA baseline as of the
//!   *previous* bar, so a spike never inflates its own reference.

use serde::Deserialize;

use crate::types::{CandleSeries, ClusterStats, IndicatorSnapshot, InsufficientData};

/// Denominator floor for ratios of smoothed quantities.
const EPS: f64 = 1e-12;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Lookback windows for the indicator set.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct IndicatorParams {
    pub ema_fast: usize,
    pub ema_slow: usize,
    pub rsi_period: usize,
    pub adx_period: usize,
    /// Span of the turnover baseline EMA (volume ratio and cluster).
    pub volume_ema_span: usize,
}

impl Default for IndicatorParams {
    fn default() -> Self {
        Self {
            ema_fast: 20,
            ema_slow: 50,
            rsi_period: 14,
            adx_period: 14,
            volume_ema_span: 10,
        }
    }
}

/// Sustained-volume confirmation thresholds.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ClusterParams {
    /// Number of most recent bars inspected.
    pub lookback: usize,
    /// Per-bar volume ratio that counts as a hit.
    pub hit_ratio: f64,
    pub min_hits: usize,
    /// Minimum summed window turnover over `lookback × baseline`.
    pub sum_ratio_floor: f64,
}

impl Default for ClusterParams {
    fn default() -> Self {
        Self {
            lookback: 4,
            hit_ratio: 1.5,
            min_hits: 2,
            sum_ratio_floor: 1.3,
        }
    }
}

/// Minimum series length for a full snapshot: the largest lookback used
/// by any indicator, plus one.
pub fn required_warmup(params: &IndicatorParams, cluster: Option<&ClusterParams>) -> usize {
    let cluster_window = cluster
        .map(|c| c.lookback + params.volume_ema_span)
        .unwrap_or(0);
    [
        params.ema_fast,
        params.ema_slow,
        params.rsi_period,
        2 * params.adx_period,
        params.volume_ema_span,
        cluster_window,
    ]
    .into_iter()
    .max()
    .unwrap_or(0)
        + 1
}

// ---------------------------------------------------------------------------
// Smoothing primitives
// ---------------------------------------------------------------------------

fn require(available: usize, required: usize) -> Result<(), InsufficientData> {
    if available < required {
        return Err(InsufficientData { required, available });
    }
    Ok(())
}

/// Recursive exponential smoothing with factor `alpha`, seeded with the
/// first value.
fn smooth(values: &[f64], alpha: f64) -> Vec<f64> {
    let mut out = Vec::with_capacity(values.len());
    let mut prev: Option<f64> = None;
    for &v in values {
        let next = match prev {
            None => v,
            Some(p) => alpha * v + (1.0 - alpha) * p,
        };
        out.push(next);
        prev = Some(next);
    }
    out
}

/// Full EMA series, `α = 2 / (span + 1)`.
pub fn ema_series(values: &[f64], span: usize) -> Vec<f64> {
    smooth(values, 2.0 / (span.max(1) as f64 + 1.0))
}

/// Full Wilder-smoothed series, `α = 1 / period`.
fn wilder_series(values: &[f64], period: usize) -> Vec<f64> {
    smooth(values, 1.0 / period.max(1) as f64)
}

// ---------------------------------------------------------------------------
// Indicators
// ---------------------------------------------------------------------------

/// Exponential moving average at the latest value. Needs `span` values.
pub fn ema(values: &[f64], span: usize) -> Result<f64, InsufficientData> {
    require(values.len(), span.max(1))?;
    Ok(*ema_series(values, span).last().unwrap_or(&0.0))
}

/// Relative Strength Index at the latest close. Needs `period + 1` closes.
///
/// A near-zero average loss yields 100 (maximum strength), including a
/// series with no movement at all.
pub fn rsi(closes: &[f64], period: usize) -> Result<f64, InsufficientData> {
    require(closes.len(), period.max(1) + 1)?;

    let (ups, downs): (Vec<f64>, Vec<f64>) = closes
        .windows(2)
        .map(|w| {
            let d = w[1] - w[0];
            (d.max(0.0), (-d).max(0.0))
        })
        .unzip();

    let avg_up = *wilder_series(&ups, period).last().unwrap_or(&0.0);
    let avg_down = *wilder_series(&downs, period).last().unwrap_or(&0.0);

    if avg_down < EPS {
        return Ok(100.0);
    }

    let rs = avg_up / avg_down;
    Ok((100.0 - 100.0 / (1.0 + rs)).clamp(0.0, 100.0))
}

/// Average Directional Index at the latest bar. Needs `2 × period + 1`
/// bars (one smoothing pass for the directional indicators, a second for
/// ADX itself).
pub fn adx(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> Result<f64, InsufficientData> {
    let n = highs.len().min(lows.len()).min(closes.len());
    require(n, 2 * period.max(1) + 1)?;

    let mut plus_dm = Vec::with_capacity(n);
    let mut minus_dm = Vec::with_capacity(n);
    let mut true_range = Vec::with_capacity(n);

    for i in 0..n {
        if i == 0 {
            plus_dm.push(0.0);
            minus_dm.push(0.0);
            true_range.push(highs[0] - lows[0]);
            continue;
        }
        let up = highs[i] - highs[i - 1];
        let down = lows[i - 1] - lows[i];
        plus_dm.push(if up > down && up > 0.0 { up } else { 0.0 });
        minus_dm.push(if down > up && down > 0.0 { down } else { 0.0 });

        let prev_close = closes[i - 1];
        let tr = (highs[i] - lows[i])
            .max((highs[i] - prev_close).abs())
            .max((lows[i] - prev_close).abs());
        true_range.push(tr);
    }

    let atr = wilder_series(&true_range, period);
    let plus_s = wilder_series(&plus_dm, period);
    let minus_s = wilder_series(&minus_dm, period);

    let dx: Vec<f64> = (0..n)
        .map(|i| {
            if atr[i] < EPS {
                return 0.0;
            }
            let plus_di = 100.0 * plus_s[i] / atr[i];
            let minus_di = 100.0 * minus_s[i] / atr[i];
            let sum = plus_di + minus_di;
            if sum < EPS {
                0.0
            } else {
                100.0 * (plus_di - minus_di).abs() / sum
            }
        })
        .collect();

    let value = *wilder_series(&dx, period).last().unwrap_or(&0.0);
    Ok(value.clamp(0.0, 100.0))
}

/// Latest turnover over the EMA baseline computed up to the previous bar.
/// Needs `span` bars (and at least two).
///
/// A zero baseline (no prior activity) yields 0.
pub fn volume_ratio(turnovers: &[f64], span: usize) -> Result<f64, InsufficientData> {
    require(turnovers.len(), span.max(2))?;

    let (last, prior) = match turnovers.split_last() {
        Some(split) => split,
        None => return Err(InsufficientData { required: 2, available: 0 }),
    };
    let baseline = *ema_series(prior, span).last().unwrap_or(&0.0);
    if baseline < EPS {
        return Ok(0.0);
    }
    Ok(last / baseline)
}

/// Sustained-volume check over the last `lookback` bars.
///
/// Counts bars whose own leave-one-out volume ratio reaches
/// `hit_threshold`, and compares the summed window turnover with
/// `lookback × baseline`, where the baseline is the EMA as of the bar
/// before the window. Passes only if both `hits ≥ min_hits` and
/// `sum_ratio ≥ sum_ratio_threshold`. Needs `lookback + ema_span` bars.
pub fn cluster_pass(
    turnovers: &[f64],
    lookback: usize,
    ema_span: usize,
    hit_threshold: f64,
    min_hits: usize,
    sum_ratio_threshold: f64,
) -> Result<ClusterStats, InsufficientData> {
    let lookback = lookback.max(1);
    require(turnovers.len(), lookback + ema_span.max(1))?;

    let n = turnovers.len();
    let start = n - lookback;
    let base = ema_series(turnovers, ema_span);

    let hits = (start..n)
        .filter(|&i| base[i - 1] >= EPS && turnovers[i] / base[i - 1] >= hit_threshold)
        .count();

    let window_baseline = base[start - 1];
    let window_sum: f64 = turnovers[start..].iter().sum();
    let sum_ratio = if window_baseline < EPS {
        0.0
    } else {
        window_sum / (lookback as f64 * window_baseline)
    };

    Ok(ClusterStats {
        hits,
        sum_ratio,
        passed: hits >= min_hits && sum_ratio >= sum_ratio_threshold,
    })
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Derive every indicator at the latest bar of `series`.
///
/// Gated on [`required_warmup`]; a shorter series yields
/// `InsufficientData` and no partial snapshot.
pub fn compute_snapshot(
    series: &CandleSeries,
    params: &IndicatorParams,
    cluster: Option<&ClusterParams>,
) -> Result<IndicatorSnapshot, InsufficientData> {
    require(series.len(), required_warmup(params, cluster))?;

    let closes = series.closes();
    let turnovers = series.turnovers();

    let cluster = match cluster {
        Some(c) => Some(cluster_pass(
            &turnovers,
            c.lookback,
            params.volume_ema_span,
            c.hit_ratio,
            c.min_hits,
            c.sum_ratio_floor,
        )?),
        None => None,
    };

    Ok(IndicatorSnapshot {
        close: closes[closes.len() - 1],
        prev_close: closes[closes.len() - 2],
        ema_fast: ema(&closes, params.ema_fast)?,
        ema_slow: ema(&closes, params.ema_slow)?,
        rsi: rsi(&closes, params.rsi_period)?,
        adx: adx(&series.highs(), &series.lows(), &closes, params.adx_period)?,
        volume_ratio: volume_ratio(&turnovers, params.volume_ema_span)?,
        turnover: series.last().turnover,
        cluster,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
