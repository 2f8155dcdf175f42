//! Rule evaluation: classifies an indicator snapshot as BUY, SELL or
//! nothing.
//!
//! Each side runs the same ordered checks against its own thresholds:
//! liquidity floor, price gap, trend direction, RSI band, volume-ratio
//! floor, optional ADX floor, optional cluster confirmation, optional
//! confirming close, and finally the scan-wide confirmation gate. The
//! first failing check is the side's rejection reason.
//!
//! The two sides are evaluated independently. If both pass, the result
//! is forced to `None` and recorded as a guard violation.

use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use tracing::warn;

use crate::types::{ConfirmationGate, IndicatorSnapshot, RejectionReason, SignalSide, Timeframe};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Thresholds for one side.
#[derive(Debug, Clone, PartialEq)]
pub struct SideRules {
    /// Require fast EMA above (BUY) / below (SELL) slow EMA.
    pub require_trend: bool,
    /// BUY: RSI must be at least this. SELL: RSI must be at most this.
    pub rsi_bound: f64,
    pub volume_ratio_floor: f64,
    pub adx_floor: Option<f64>,
    /// Require the sustained-volume cluster check to pass.
    pub require_cluster: bool,
    /// Require the latest close to move in the signal's direction.
    pub require_confirming_close: bool,
}

impl SideRules {
    /// Reference BUY thresholds: strength above 52, volume 1.15× baseline.
    pub fn buy_default() -> Self {
        Self {
            require_trend: true,
            rsi_bound: 52.0,
            volume_ratio_floor: 1.15,
            adx_floor: Some(10.0),
            require_cluster: false,
            require_confirming_close: false,
        }
    }

    /// Reference SELL thresholds: weakness below 48, volume 1.10× baseline,
    /// down close required.
    pub fn sell_default() -> Self {
        Self {
            require_trend: true,
            rsi_bound: 48.0,
            volume_ratio_floor: 1.10,
            adx_floor: Some(10.0),
            require_cluster: false,
            require_confirming_close: true,
        }
    }
}

/// A `[rules.buy]` / `[rules.sell]` table as written. Fields left out
/// keep that side's reference value.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SideRulesTable {
    require_trend: Option<bool>,
    rsi_bound: Option<f64>,
    volume_ratio_floor: Option<f64>,
    adx_floor: Option<f64>,
    require_cluster: Option<bool>,
    require_confirming_close: Option<bool>,
}

impl SideRulesTable {
    fn over(self, base: SideRules) -> SideRules {
        SideRules {
            require_trend: self.require_trend.unwrap_or(base.require_trend),
            rsi_bound: self.rsi_bound.unwrap_or(base.rsi_bound),
            volume_ratio_floor: self.volume_ratio_floor.unwrap_or(base.volume_ratio_floor),
            adx_floor: self.adx_floor.or(base.adx_floor),
            require_cluster: self.require_cluster.unwrap_or(base.require_cluster),
            require_confirming_close: self
                .require_confirming_close
                .unwrap_or(base.require_confirming_close),
        }
    }
}

fn buy_table<'de, D: Deserializer<'de>>(d: D) -> Result<SideRules, D::Error> {
    Ok(SideRulesTable::deserialize(d)?.over(SideRules::buy_default()))
}

fn sell_table<'de, D: Deserializer<'de>>(d: D) -> Result<SideRules, D::Error> {
    Ok(SideRulesTable::deserialize(d)?.over(SideRules::sell_default()))
}

/// Full rule configuration for both sides.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RuleSet {
    /// Liquidity floor on the latest bar's turnover (inclusive).
    pub min_turnover: f64,
    /// Per-timeframe overrides of `min_turnover`, keyed by label ("1d").
    pub min_turnover_per_timeframe: HashMap<String, f64>,
    /// Maximum absolute close-to-close move on the latest bar.
    pub max_gap_pct: Option<f64>,
    #[serde(deserialize_with = "buy_table")]
    pub buy: SideRules,
    #[serde(deserialize_with = "sell_table")]
    pub sell: SideRules,
}

impl Default for RuleSet {
    fn default() -> Self {
        Self {
            min_turnover: 100_000.0,
            min_turnover_per_timeframe: HashMap::new(),
            max_gap_pct: Some(0.08),
            buy: SideRules::buy_default(),
            sell: SideRules::sell_default(),
        }
    }
}

impl RuleSet {
    /// Liquidity floor that applies to `timeframe`.
    pub fn turnover_floor(&self, timeframe: Timeframe) -> f64 {
        self.min_turnover_per_timeframe
            .get(timeframe.as_str())
            .copied()
            .unwrap_or(self.min_turnover)
    }

    /// Whether some RSI value satisfies both the BUY and SELL bands.
    pub fn rsi_bands_overlap(&self) -> bool {
        self.buy.rsi_bound <= self.sell.rsi_bound
    }

    pub fn side(&self, side: SignalSide) -> Option<&SideRules> {
        match side {
            SignalSide::Buy => Some(&self.buy),
            SignalSide::Sell => Some(&self.sell),
            SignalSide::None => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Evaluator
// ---------------------------------------------------------------------------

/// Classification of one snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub side: SignalSide,
    /// Why no side fired. `None` iff `side` is BUY or SELL.
    pub rejection: Option<RejectionReason>,
}

impl Classification {
    fn fired(side: SignalSide) -> Self {
        Self { side, rejection: None }
    }

    fn rejected(reason: RejectionReason) -> Self {
        Self {
            side: SignalSide::None,
            rejection: Some(reason),
        }
    }

    pub fn is_guard_violation(&self) -> bool {
        self.rejection == Some(RejectionReason::GuardViolation)
    }
}

pub struct RuleEvaluator {
    rules: RuleSet,
}

impl RuleEvaluator {
    pub fn new(rules: RuleSet) -> Self {
        Self { rules }
    }

    /// Access the rule configuration.
    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Classify a snapshot.
    ///
    /// When neither side fires, the reported reason is the one from the
    /// side whose evaluation got furthest (ties go to BUY), so an uptrend
    /// that fails on volume reports `volume`, not SELL's `no_trend`.
    pub fn classify(
        &self,
        snapshot: &IndicatorSnapshot,
        timeframe: Timeframe,
        gate: &ConfirmationGate,
    ) -> Classification {
        let buy = self.check_side(SignalSide::Buy, snapshot, timeframe, gate);
        let sell = self.check_side(SignalSide::Sell, snapshot, timeframe, gate);

        match (buy, sell) {
            (Ok(()), Ok(())) => {
                warn!(
                    %timeframe,
                    rsi = snapshot.rsi,
                    ema_fast = snapshot.ema_fast,
                    ema_slow = snapshot.ema_slow,
                    "Guard violation: BUY and SELL both satisfied, forcing NONE"
                );
                Classification::rejected(RejectionReason::GuardViolation)
            }
            (Ok(()), Err(_)) => Classification::fired(SignalSide::Buy),
            (Err(_), Ok(())) => Classification::fired(SignalSide::Sell),
            (Err(b), Err(s)) => Classification::rejected(if s > b { s } else { b }),
        }
    }

    /// Run the ordered checks for one side.
    fn check_side(
        &self,
        side: SignalSide,
        snap: &IndicatorSnapshot,
        timeframe: Timeframe,
        gate: &ConfirmationGate,
    ) -> Result<(), RejectionReason> {
        let rules = match self.rules.side(side) {
            Some(r) => r,
            None => return Err(RejectionReason::NoTrend),
        };
        let is_buy = side == SignalSide::Buy;

        // 1. Liquidity
        if snap.turnover < self.rules.turnover_floor(timeframe) {
            return Err(RejectionReason::LowLiquidity);
        }

        // 2. Price gap
        if let Some(max_gap) = self.rules.max_gap_pct {
            if snap.gap_pct() > max_gap {
                return Err(RejectionReason::PriceGap);
            }
        }

        // 3. Trend direction
        if rules.require_trend {
            let aligned = if is_buy {
                snap.ema_fast > snap.ema_slow
            } else {
                snap.ema_fast < snap.ema_slow
            };
            if !aligned {
                return Err(RejectionReason::NoTrend);
            }
        }

        // 4. RSI band
        let rsi_ok = if is_buy {
            snap.rsi >= rules.rsi_bound
        } else {
            snap.rsi <= rules.rsi_bound
        };
        if !rsi_ok {
            return Err(RejectionReason::RsiOutOfBand);
        }

        // 5. Volume ratio
        if snap.volume_ratio < rules.volume_ratio_floor {
            return Err(RejectionReason::VolumeBelowFloor);
        }

        // 6. Trend strength
        if let Some(floor) = rules.adx_floor {
            if snap.adx < floor {
                return Err(RejectionReason::WeakTrend);
            }
        }

        // 7. Cluster confirmation
        if rules.require_cluster && !snap.cluster.map(|c| c.passed).unwrap_or(false) {
            return Err(RejectionReason::ClusterNotConfirmed);
        }

        // 8. Confirming close
        if rules.require_confirming_close {
            let confirmed = if is_buy {
                snap.close > snap.prev_close
            } else {
                snap.close < snap.prev_close
            };
            if !confirmed {
                return Err(RejectionReason::CloseAgainstSide);
            }
        }

        // 9. Scan-wide confirmation
        if !gate.allows(side) {
            return Err(RejectionReason::ConfirmationGate);
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
