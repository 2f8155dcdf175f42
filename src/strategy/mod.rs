//! Strategy engine: indicator snapshot, rule classification and
//! confidence scoring for one (symbol, timeframe).

pub mod confidence;
pub mod rules;

use tracing::{debug, warn};

use crate::config::AppConfig;
use crate::indicators::{self, ClusterParams, IndicatorParams};
use crate::types::{
    CandleSeries, ConfirmationGate, InsufficientData, MarketState, RejectionReason, ScanError,
    SignalResult, SymbolEntry, TaskOutcome, Timeframe,
};
use confidence::{ConfidenceScorer, ScoringConfig};
use rules::{RuleEvaluator, RuleSet};

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Pipelines snapshot → classification → score.
///
/// Holds only immutable configuration, so one instance is shared by
/// every task in a scan.
pub struct SignalPipeline {
    indicators: IndicatorParams,
    cluster: Option<ClusterParams>,
    warmup_bars: usize,
    evaluator: RuleEvaluator,
    scorer: ConfidenceScorer,
}

impl SignalPipeline {
    pub fn new(
        indicators: IndicatorParams,
        cluster: Option<ClusterParams>,
        warmup_bars: usize,
        rules: RuleSet,
        scoring: ScoringConfig,
    ) -> Self {
        let min_hits = cluster.as_ref().map(|c| c.min_hits).unwrap_or(0);
        Self {
            indicators,
            cluster,
            warmup_bars,
            evaluator: RuleEvaluator::new(rules),
            scorer: ConfidenceScorer::new(scoring, min_hits),
        }
    }

    pub fn from_config(cfg: &AppConfig) -> Self {
        Self::new(
            cfg.indicators.clone(),
            cfg.cluster.clone(),
            cfg.scan.warmup_bars,
            cfg.rules.clone(),
            cfg.scoring.clone(),
        )
    }

    /// Effective warm-up: the configured value, never below what the
    /// indicator set needs.
    pub fn warmup_bars(&self) -> usize {
        self.warmup_bars
            .max(indicators::required_warmup(&self.indicators, self.cluster.as_ref()))
    }

    /// Evaluate one fetched series. Never fails: a short series becomes
    /// an `insufficient_data` skip.
    pub fn evaluate(
        &self,
        entry: &SymbolEntry,
        timeframe: Timeframe,
        series: &CandleSeries,
        gate: &ConfirmationGate,
    ) -> TaskOutcome {
        let warmup = self.warmup_bars();
        if series.len() < warmup {
            debug!(
                symbol = %entry.symbol,
                %timeframe,
                bars = series.len(),
                warmup,
                "Series shorter than warm-up, skipping"
            );
            return TaskOutcome::skipped(&entry.symbol, timeframe, RejectionReason::InsufficientData);
        }

        let snapshot = match indicators::compute_snapshot(series, &self.indicators, self.cluster.as_ref()) {
            Ok(s) => s,
            Err(e) => {
                debug!(symbol = %entry.symbol, %timeframe, error = %e, "Snapshot unavailable");
                return TaskOutcome::skipped(&entry.symbol, timeframe, RejectionReason::InsufficientData);
            }
        };

        let class = self.evaluator.classify(&snapshot, timeframe, gate);
        if class.is_guard_violation() {
            let err = ScanError::GuardViolation {
                symbol: entry.symbol.clone(),
                timeframe,
            };
            warn!(error = %err, "Signal suppressed");
        }

        let confidence = self
            .evaluator
            .rules()
            .side(class.side)
            .and_then(|rules| self.scorer.score(&snapshot, class.side, rules));
        let whale_tier = self.scorer.whale_tier(snapshot.turnover).map(|t| t.label.clone());

        debug!(
            symbol = %entry.symbol,
            %timeframe,
            side = %class.side,
            rsi = snapshot.rsi,
            adx = snapshot.adx,
            volume_ratio = snapshot.volume_ratio,
            confidence = ?confidence,
            rejection = ?class.rejection,
            "Evaluated"
        );

        TaskOutcome::Evaluated(SignalResult {
            symbol: entry.symbol.clone(),
            source: entry.source.clone(),
            timeframe,
            side: class.side,
            snapshot,
            confidence,
            whale_tier,
            rejection: class.rejection,
        })
    }

    /// Trend state of a reference series: STRONG when the fast EMA is
    /// above the slow one and RSI is above 50, WEAK for the mirror image,
    /// NEUTRAL otherwise.
    pub fn market_state(&self, series: &CandleSeries) -> Result<MarketState, InsufficientData> {
        let snap = indicators::compute_snapshot(series, &self.indicators, None)?;
        let state = if snap.ema_fast > snap.ema_slow && snap.rsi > 50.0 {
            MarketState::Strong
        } else if snap.ema_fast < snap.ema_slow && snap.rsi < 50.0 {
            MarketState::Weak
        } else {
            MarketState::Neutral
        };
        Ok(state)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
