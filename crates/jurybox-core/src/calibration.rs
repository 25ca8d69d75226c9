//! Calibration tracker.
//!
//! Measures how far each evaluator's total lands from the panel consensus
//! and folds that into a rolling calibration score. Streaks over the
//! deviation threshold drive the trust-state machine in [`crate::trust`].

use serde::{Deserialize, Serialize};

use crate::model::{CalibrationState, TrustState, MAX_TOTAL};
use crate::statistics::{consensus, ewma, ConsensusMethod};
use crate::trust::TrustSignal;

/// Calibration thresholds.
///
/// Every numeric default here is a placeholder to be tuned by policy; none
/// of them is derived from data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationPolicy {
    /// How the panel consensus is aggregated.
    pub consensus: ConsensusMethod,
    /// Fraction trimmed from each end for `trimmed_mean` consensus.
    pub trim_fraction: f64,
    /// EWMA weight of the newest agreement delta.
    pub smoothing: f64,
    /// A delta at or below this counts towards the agreement rate.
    pub tolerance: f64,
    /// A calibration score above this counts as deviating.
    pub deviation_threshold: f64,
    /// Consecutive deviating tasks before Active moves to UnderReview.
    pub escalate_after: u32,
    /// Consecutive deviating tasks under review before suspension.
    pub suspend_after: u32,
    /// Consecutive good tasks under review before returning to Active.
    pub recover_after: u32,
}

impl Default for CalibrationPolicy {
    fn default() -> Self {
        Self {
            consensus: ConsensusMethod::Median,
            trim_fraction: 0.1,
            smoothing: 0.3,
            tolerance: 0.1,
            deviation_threshold: 0.15,
            escalate_after: 3,
            suspend_after: 3,
            recover_after: 3,
        }
    }
}

/// New calibration state for one evaluator plus any trust transition it
/// triggers.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationUpdate {
    pub delta: f64,
    pub calibration: CalibrationState,
    pub signal: Option<TrustSignal>,
    pub next_state: Option<TrustState>,
}

/// Applies [`CalibrationPolicy`] to score panels.
#[derive(Debug, Clone, Default)]
pub struct CalibrationTracker {
    policy: CalibrationPolicy,
}

impl CalibrationTracker {
    pub fn new(policy: CalibrationPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &CalibrationPolicy {
        &self.policy
    }

    /// Consensus of a panel's totals; `None` with fewer than two scores.
    pub fn consensus(&self, totals: &[f64]) -> Option<f64> {
        consensus(totals, self.policy.consensus, self.policy.trim_fraction)
    }

    /// Distance from consensus as a fraction of the maximum total.
    pub fn agreement_delta(total: f64, consensus: f64) -> f64 {
        (total - consensus).abs() / MAX_TOTAL as f64
    }

    /// Fold one agreement delta into an evaluator's calibration state.
    pub fn apply(
        &self,
        current: &CalibrationState,
        state: TrustState,
        delta: f64,
    ) -> CalibrationUpdate {
        let policy = &self.policy;
        let mut next = current.clone();

        let previous = (current.rated_tasks > 0).then_some(current.score);
        next.score = ewma(previous, delta, policy.smoothing);
        next.rated_tasks += 1;
        if delta <= policy.tolerance {
            next.in_tolerance_tasks += 1;
        }
        next.agreement_rate = next.in_tolerance_tasks as f64 / next.rated_tasks as f64;

        if next.score > policy.deviation_threshold {
            next.deviation_streak += 1;
            next.recovery_streak = 0;
        } else {
            next.recovery_streak += 1;
            next.deviation_streak = 0;
        }

        let signal = match state {
            TrustState::Active if next.deviation_streak >= policy.escalate_after => {
                Some(TrustSignal::SustainedDeviation)
            }
            TrustState::UnderReview if next.deviation_streak >= policy.suspend_after => {
                Some(TrustSignal::ContinuedDeviation)
            }
            TrustState::UnderReview if next.recovery_streak >= policy.recover_after => {
                Some(TrustSignal::SustainedRecovery)
            }
            _ => None,
        };
        let next_state = signal.and_then(|signal| state.on(signal));
        if next_state.is_some() {
            next.deviation_streak = 0;
            next.recovery_streak = 0;
        }

        CalibrationUpdate {
            delta,
            calibration: next,
            signal,
            next_state,
        }
    }
}
