//! Confidence scoring.
//!
//! Maps a BUY/SELL snapshot to a bounded 0–100 score: the sum of clamped
//! per-feature contributions plus a stepped whale-tier bonus. Each term is
//! non-decreasing in its feature, so the total is too.

use serde::Deserialize;

use super::rules::SideRules;
use crate::types::{IndicatorSnapshot, SignalSide};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Turnover threshold that earns a labeled bonus.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WhaleTier {
    pub label: String,
    pub min_turnover: f64,
    pub bonus: f64,
}

impl WhaleTier {
    pub fn new(label: &str, min_turnover: f64, bonus: f64) -> Self {
        Self {
            label: label.to_string(),
            min_turnover,
            bonus,
        }
    }
}

/// Weights and caps for each score term.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Points per unit of volume ratio above 1.0.
    pub volume_weight: f64,
    pub volume_max: f64,
    /// Points per ADX point above the side's floor.
    pub adx_weight: f64,
    pub adx_max: f64,
    /// Points per RSI point beyond 50 in the side's direction.
    pub rsi_weight: f64,
    pub rsi_max: f64,
    /// Points per cluster hit above the configured minimum.
    pub cluster_weight: f64,
    pub cluster_max: f64,
    /// Sorted by ascending `min_turnover`.
    pub whale_tiers: Vec<WhaleTier>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            volume_weight: 25.0,
            volume_max: 40.0,
            adx_weight: 1.0,
            adx_max: 20.0,
            rsi_weight: 1.0,
            rsi_max: 20.0,
            cluster_weight: 5.0,
            cluster_max: 10.0,
            whale_tiers: vec![
                WhaleTier::new("large", 1_000_000.0, 5.0),
                WhaleTier::new("xl", 5_000_000.0, 10.0),
                WhaleTier::new("huge", 20_000_000.0, 15.0),
            ],
        }
    }
}

// ---------------------------------------------------------------------------
// Scorer
// ---------------------------------------------------------------------------

/// Individual contributions, kept for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScoreBreakdown {
    pub volume: f64,
    pub trend_strength: f64,
    pub momentum: f64,
    pub cluster: f64,
    pub whale: f64,
}

impl ScoreBreakdown {
    /// Sum of all terms, clamped to [0, 100].
    pub fn total(&self) -> f64 {
        (self.volume + self.trend_strength + self.momentum + self.cluster + self.whale)
            .clamp(0.0, 100.0)
    }
}

pub struct ConfidenceScorer {
    config: ScoringConfig,
    /// Minimum cluster hits; hits above it earn points.
    cluster_min_hits: usize,
}

impl ConfidenceScorer {
    pub fn new(config: ScoringConfig, cluster_min_hits: usize) -> Self {
        Self {
            config,
            cluster_min_hits,
        }
    }

    /// Score a classified snapshot. `None` for a `None` side.
    pub fn score(&self, snap: &IndicatorSnapshot, side: SignalSide, rules: &SideRules) -> Option<f64> {
        self.breakdown(snap, side, rules).map(|b| b.total())
    }

    /// Per-term contributions. `None` for a `None` side.
    pub fn breakdown(
        &self,
        snap: &IndicatorSnapshot,
        side: SignalSide,
        rules: &SideRules,
    ) -> Option<ScoreBreakdown> {
        let rsi_excess = match side {
            SignalSide::Buy => snap.rsi - 50.0,
            SignalSide::Sell => 50.0 - snap.rsi,
            SignalSide::None => return None,
        };
        let cfg = &self.config;

        let cluster_excess = snap
            .cluster
            .map(|c| c.hits.saturating_sub(self.cluster_min_hits) as f64)
            .unwrap_or(0.0);

        Some(ScoreBreakdown {
            volume: term(snap.volume_ratio - 1.0, cfg.volume_weight, cfg.volume_max),
            trend_strength: term(
                snap.adx - rules.adx_floor.unwrap_or(0.0),
                cfg.adx_weight,
                cfg.adx_max,
            ),
            momentum: term(rsi_excess, cfg.rsi_weight, cfg.rsi_max),
            cluster: term(cluster_excess, cfg.cluster_weight, cfg.cluster_max),
            whale: self.whale_tier(snap.turnover).map(|t| t.bonus).unwrap_or(0.0),
        })
    }

    /// Highest tier whose threshold the turnover reaches.
    pub fn whale_tier(&self, turnover: f64) -> Option<&WhaleTier> {
        self.config
            .whale_tiers
            .iter()
            .filter(|t| turnover >= t.min_turnover)
            .max_by(|a, b| a.min_turnover.total_cmp(&b.min_turnover))
    }
}

/// `excess × weight`, clamped to `[0, max]`.
fn term(excess: f64, weight: f64, max: f64) -> f64 {
    (excess.max(0.0) * weight).clamp(0.0, max.max(0.0))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ClusterStats;

    fn snap() -> IndicatorSnapshot {
        IndicatorSnapshot {
            close: 101.0,
            prev_close: 100.0,
            ema_fast: 100.0,
            ema_slow: 95.0,
            rsi: 60.0,
            adx: 25.0,
            volume_ratio: 1.8,
            turnover: 500_000.0,
            cluster: None,
        }
    }

    fn scorer() -> ConfidenceScorer {
        ConfidenceScorer::new(ScoringConfig::default(), 2)
    }

    #[test]
    fn test_none_side_has_no_score() {
        assert!(scorer().score(&snap(), SignalSide::None, &SideRules::buy_default()).is_none());
    }

    #[test]
    fn test_buy_breakdown() {
        let b = scorer()
            .breakdown(&snap(), SignalSide::Buy, &SideRules::buy_default())
            .unwrap();
        assert!((b.volume - 20.0).abs() < 1e-9); // 0.8 × 25
        assert!((b.trend_strength - 15.0).abs() < 1e-9); // 25 − 10
        assert!((b.momentum - 10.0).abs() < 1e-9); // 60 − 50
        assert_eq!(b.cluster, 0.0);
        assert_eq!(b.whale, 0.0);
        assert!((b.total() - 45.0).abs() < 1e-9);
    }

    #[test]
    fn test_sell_momentum_uses_weakness() {
        let s = IndicatorSnapshot { rsi: 30.0, ..snap() };
        let b = scorer()
            .breakdown(&s, SignalSide::Sell, &SideRules::sell_default())
            .unwrap();
        assert!((b.momentum - 20.0).abs() < 1e-9);

        // Strength counts for nothing on the SELL side.
        let s = IndicatorSnapshot { rsi: 70.0, ..snap() };
        let b = scorer()
            .breakdown(&s, SignalSide::Sell, &SideRules::sell_default())
            .unwrap();
        assert_eq!(b.momentum, 0.0);
    }

    #[test]
    fn test_score_is_bounded() {
        let extreme = IndicatorSnapshot {
            rsi: 100.0,
            adx: 100.0,
            volume_ratio: 50.0,
            turnover: 1e12,
            cluster: Some(ClusterStats { hits: 10, sum_ratio: 9.0, passed: true }),
            ..snap()
        };
        let s = scorer().score(&extreme, SignalSide::Buy, &SideRules::buy_default()).unwrap();
        assert_eq!(s, 100.0);

        let weak = IndicatorSnapshot { rsi: 0.0, adx: 0.0, volume_ratio: 0.0, turnover: 0.0, ..snap() };
        let s = scorer().score(&weak, SignalSide::Buy, &SideRules::buy_default()).unwrap();
        assert_eq!(s, 0.0);
    }

    #[test]
    fn test_monotonic_in_each_feature() {
        let sc = scorer();
        let rules = SideRules::buy_default();
        let score = |s: &IndicatorSnapshot| sc.score(s, SignalSide::Buy, &rules).unwrap();

        let mut prev = f64::NEG_INFINITY;
        for i in 0..40 {
            let s = IndicatorSnapshot { volume_ratio: i as f64 * 0.1, ..snap() };
            let v = score(&s);
            assert!(v >= prev, "volume ratio step {i}");
            prev = v;
        }

        let mut prev = f64::NEG_INFINITY;
        for adx in 0..=100 {
            let v = score(&IndicatorSnapshot { adx: adx as f64, ..snap() });
            assert!(v >= prev, "adx {adx}");
            prev = v;
        }

        let mut prev = f64::NEG_INFINITY;
        for rsi in 0..=100 {
            let v = score(&IndicatorSnapshot { rsi: rsi as f64, ..snap() });
            assert!(v >= prev, "rsi {rsi}");
            prev = v;
        }

        let mut prev = f64::NEG_INFINITY;
        for hits in 0..8 {
            let s = IndicatorSnapshot {
                cluster: Some(ClusterStats { hits, sum_ratio: 2.0, passed: true }),
                ..snap()
            };
            let v = score(&s);
            assert!(v >= prev, "hits {hits}");
            prev = v;
        }

        let mut prev = f64::NEG_INFINITY;
        for t in [0.0, 999_999.0, 1_000_000.0, 5_000_000.0, 20_000_000.0, 1e9] {
            let v = score(&IndicatorSnapshot { turnover: t, ..snap() });
            assert!(v >= prev, "turnover {t}");
            prev = v;
        }
    }

    #[test]
    fn test_whale_tiers_step() {
        let sc = scorer();
        assert!(sc.whale_tier(999_999.0).is_none());
        assert_eq!(sc.whale_tier(1_000_000.0).unwrap().label, "large");
        assert_eq!(sc.whale_tier(7_500_000.0).unwrap().label, "xl");
        assert_eq!(sc.whale_tier(25_000_000.0).unwrap().label, "huge");
    }

    #[test]
    fn test_cluster_hits_above_minimum() {
        let s = IndicatorSnapshot {
            cluster: Some(ClusterStats { hits: 3, sum_ratio: 2.0, passed: true }),
            ..snap()
        };
        let b = scorer().breakdown(&s, SignalSide::Buy, &SideRules::buy_default()).unwrap();
        assert!((b.cluster - 5.0).abs() < 1e-9);
    }
}
