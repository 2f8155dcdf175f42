//! Result aggregation: dedup, rank, truncate and count rejections.
//!
//! Runs once all task outcomes have arrived. Output order depends only on
//! the outcome set, never on task completion order.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use crate::types::{
    MarketNote, ReferenceState, RejectionReason, ScanRun, SignalResult, SignalSide, TaskOutcome,
    Timeframe,
};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// How qualifying results are deduplicated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupMode {
    /// One result per (symbol, timeframe).
    #[default]
    PerTimeframe,
    /// Only the highest-confidence result per symbol, across timeframes
    /// and sides.
    BestPerSymbol,
}

/// Run metadata collected by the orchestrator for the report header.
#[derive(Debug, Clone)]
pub struct RunHeader {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub universe_size: usize,
    pub timeframes: Vec<Timeframe>,
    pub task_count: usize,
    pub elapsed: Duration,
    pub references: Vec<ReferenceState>,
    pub gate: Option<ReferenceState>,
    pub market_note: Option<MarketNote>,
}

// ---------------------------------------------------------------------------
// Aggregator
// ---------------------------------------------------------------------------

pub struct ResultAggregator {
    dedup: DedupMode,
    top_k_per_side: usize,
}

impl ResultAggregator {
    pub fn new(dedup: DedupMode, top_k_per_side: usize) -> Self {
        Self {
            dedup,
            top_k_per_side,
        }
    }

    pub fn aggregate(&self, header: RunHeader, outcomes: Vec<TaskOutcome>) -> ScanRun {
        let mut rejection_counts: BTreeMap<RejectionReason, usize> = BTreeMap::new();
        let mut signals = Vec::new();

        for outcome in outcomes {
            if let Some(reason) = outcome.rejection() {
                *rejection_counts.entry(reason).or_default() += 1;
            }
            if let TaskOutcome::Evaluated(result) = outcome {
                if result.side.is_directional() && result.confidence.is_some() {
                    signals.push(result);
                }
            }
        }

        signals.sort_by(rank_order);
        let signals = self.dedup(signals);

        let (mut buys, mut sells): (Vec<_>, Vec<_>) =
            signals.into_iter().partition(|r| r.side == SignalSide::Buy);
        buys.truncate(self.top_k_per_side);
        sells.truncate(self.top_k_per_side);

        let run = ScanRun {
            run_id: header.run_id,
            started_at: header.started_at,
            universe_size: header.universe_size,
            timeframes: header.timeframes,
            task_count: header.task_count,
            elapsed: header.elapsed,
            buys,
            sells,
            rejection_counts,
            references: header.references,
            gate: header.gate,
            market_note: header.market_note,
        };

        info!(
            run_id = %run.run_id,
            buys = run.buys.len(),
            sells = run.sells.len(),
            rejected = run.rejected_total(),
            fetch_failures = run.fetch_failures(),
            "Results aggregated"
        );
        run
    }

    /// Keep the first (best-ranked) result per key. Input must be sorted.
    fn dedup(&self, sorted: Vec<SignalResult>) -> Vec<SignalResult> {
        let mut seen: HashSet<(String, Option<Timeframe>)> = HashSet::new();
        sorted
            .into_iter()
            .filter(|r| {
                let key = match self.dedup {
                    DedupMode::PerTimeframe => (r.symbol.clone(), Some(r.timeframe)),
                    DedupMode::BestPerSymbol => (r.symbol.clone(), None),
                };
                seen.insert(key)
            })
            .collect()
    }
}

/// Confidence descending, then symbol, timeframe, side and source
/// ascending. Total over distinct results, so sorting is stable under
/// any input permutation.
pub fn rank_order(a: &SignalResult, b: &SignalResult) -> Ordering {
    b.rank_score()
        .total_cmp(&a.rank_score())
        .then_with(|| a.symbol.cmp(&b.symbol))
        .then_with(|| a.timeframe.cmp(&b.timeframe))
        .then_with(|| a.side.cmp(&b.side))
        .then_with(|| a.source.cmp(&b.source))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::IndicatorSnapshot;

    fn snapshot() -> IndicatorSnapshot {
        IndicatorSnapshot {
            close: 1.0,
            prev_close: 1.0,
            ema_fast: 1.0,
            ema_slow: 1.0,
            rsi: 50.0,
            adx: 20.0,
            volume_ratio: 1.5,
            turnover: 1_000_000.0,
            cluster: None,
        }
    }

    fn signal(symbol: &str, tf: Timeframe, side: SignalSide, conf: f64) -> TaskOutcome {
        TaskOutcome::Evaluated(SignalResult {
            symbol: symbol.to_string(),
            source: "binance".to_string(),
            timeframe: tf,
            side,
            snapshot: snapshot(),
            confidence: Some(conf),
            whale_tier: None,
            rejection: None,
        })
    }

    fn rejected(symbol: &str, reason: RejectionReason) -> TaskOutcome {
        TaskOutcome::Evaluated(SignalResult {
            symbol: symbol.to_string(),
            source: "binance".to_string(),
            timeframe: Timeframe::H1,
            side: SignalSide::None,
            snapshot: snapshot(),
            confidence: None,
            whale_tier: None,
            rejection: Some(reason),
        })
    }

    fn header() -> RunHeader {
        RunHeader {
            run_id: Uuid::nil(),
            started_at: Utc::now(),
            universe_size: 5,
            timeframes: vec![Timeframe::M15, Timeframe::H1],
            task_count: 10,
            elapsed: Duration::from_secs(3),
            references: vec![],
            gate: None,
            market_note: None,
        }
    }

    fn sample() -> Vec<TaskOutcome> {
        vec![
            signal("ETHUSDT", Timeframe::H1, SignalSide::Buy, 60.0),
            signal("BTCUSDT", Timeframe::H1, SignalSide::Buy, 60.0),
            signal("SOLUSDT", Timeframe::M15, SignalSide::Buy, 80.0),
            signal("SOLUSDT", Timeframe::H1, SignalSide::Buy, 70.0),
            signal("XRPUSDT", Timeframe::H1, SignalSide::Sell, 55.0),
            signal("ADAUSDT", Timeframe::M15, SignalSide::Sell, 65.0),
            rejected("DOGEUSDT", RejectionReason::NoTrend),
            rejected("TRXUSDT", RejectionReason::NoTrend),
            TaskOutcome::skipped("LINKUSDT", Timeframe::M15, RejectionReason::TransientFetchError),
        ]
    }

    fn keys(results: &[SignalResult]) -> Vec<(String, Timeframe)> {
        results.iter().map(|r| (r.symbol.clone(), r.timeframe)).collect()
    }

    #[test]
    fn test_sorted_with_symbol_tiebreak() {
        let run = ResultAggregator::new(DedupMode::PerTimeframe, 10).aggregate(header(), sample());
        assert_eq!(
            keys(&run.buys),
            vec![
                ("SOLUSDT".to_string(), Timeframe::M15),
                ("SOLUSDT".to_string(), Timeframe::H1),
                ("BTCUSDT".to_string(), Timeframe::H1),
                ("ETHUSDT".to_string(), Timeframe::H1),
            ]
        );
        assert_eq!(run.sells[0].symbol, "ADAUSDT");
        assert!(run.buys.windows(2).all(|w| w[0].rank_score() >= w[1].rank_score()));
    }

    #[test]
    fn test_best_per_symbol_collapses() {
        let run = ResultAggregator::new(DedupMode::BestPerSymbol, 10).aggregate(header(), sample());
        let sol: Vec<_> = run.buys.iter().filter(|r| r.symbol == "SOLUSDT").collect();
        assert_eq!(sol.len(), 1);
        assert_eq!(sol[0].timeframe, Timeframe::M15);
    }

    #[test]
    fn test_best_per_symbol_across_sides() {
        let outcomes = vec![
            signal("BTCUSDT", Timeframe::M15, SignalSide::Sell, 40.0),
            signal("BTCUSDT", Timeframe::D1, SignalSide::Buy, 75.0),
        ];
        let run = ResultAggregator::new(DedupMode::BestPerSymbol, 10).aggregate(header(), outcomes);
        assert_eq!(run.buys.len(), 1);
        assert!(run.sells.is_empty());
    }

    #[test]
    fn test_top_k_per_side() {
        let run = ResultAggregator::new(DedupMode::PerTimeframe, 2).aggregate(header(), sample());
        assert_eq!(run.buys.len(), 2);
        assert_eq!(run.sells.len(), 2);
        assert_eq!(run.buys[0].symbol, "SOLUSDT");
    }

    #[test]
    fn test_rejection_counts() {
        let run = ResultAggregator::new(DedupMode::PerTimeframe, 10).aggregate(header(), sample());
        assert_eq!(run.rejection_counts.get(&RejectionReason::NoTrend), Some(&2));
        assert_eq!(run.rejection_counts.get(&RejectionReason::TransientFetchError), Some(&1));
        assert_eq!(run.rejected_total(), 3);
        assert_eq!(run.fetch_failures(), 1);
        assert_eq!(run.universe_size, 5);
        assert_eq!(run.signal_count(), 6);
    }

    #[test]
    fn test_invariant_to_arrival_order() {
        let agg = ResultAggregator::new(DedupMode::PerTimeframe, 3);
        let base = agg.aggregate(header(), sample());

        let mut outcomes = sample();
        // Every rotation plus the reversed order.
        for shift in 0..outcomes.len() {
            outcomes.rotate_left(1);
            let run = agg.aggregate(header(), outcomes.clone());
            assert_eq!(run.buys, base.buys, "rotation {shift}");
            assert_eq!(run.sells, base.sells, "rotation {shift}");
            assert_eq!(run.rejection_counts, base.rejection_counts);
        }
        outcomes.reverse();
        let run = agg.aggregate(header(), outcomes);
        assert_eq!(run.buys, base.buys);

        let agg = ResultAggregator::new(DedupMode::BestPerSymbol, 3);
        let mut shuffled = sample();
        shuffled.swap(0, 3);
        shuffled.swap(2, 5);
        assert_eq!(
            agg.aggregate(header(), sample()).buys,
            agg.aggregate(header(), shuffled).buys
        );
    }

    #[test]
    fn test_empty_outcomes() {
        let run = ResultAggregator::new(DedupMode::PerTimeframe, 5).aggregate(header(), vec![]);
        assert_eq!(run.signal_count(), 0);
        assert_eq!(run.rejected_total(), 0);
    }
}
