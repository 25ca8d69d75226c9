//! Trust-state machine.
//!
//! Transitions are only ever taken through [`TrustState::on`], which keeps
//! the suspension policy auditable: every edge of the machine is listed in
//! one match.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{EvaluatorId, TrustState};

/// What drove a trust transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustSignal {
    /// Calibration stayed above the deviation threshold for the
    /// configured number of consecutive tasks.
    SustainedDeviation,
    /// Deviation continued while already under review.
    ContinuedDeviation,
    /// Calibration stayed within threshold long enough while under review.
    SustainedRecovery,
    /// Administrator restored the evaluator.
    AdminReinstate,
    /// Administrator suspended the evaluator.
    AdminSuspend,
}

impl TrustState {
    /// The state reached from `self` on `signal`, if that edge exists.
    pub fn on(self, signal: TrustSignal) -> Option<TrustState> {
        use TrustSignal::*;
        match (self, signal) {
            (TrustState::Active, SustainedDeviation) => Some(TrustState::UnderReview),
            (TrustState::UnderReview, ContinuedDeviation) => Some(TrustState::Suspended),
            (TrustState::UnderReview, SustainedRecovery) => Some(TrustState::Active),
            (TrustState::UnderReview | TrustState::Suspended, AdminReinstate) => {
                Some(TrustState::Active)
            }
            (TrustState::Active | TrustState::UnderReview, AdminSuspend) => {
                Some(TrustState::Suspended)
            }
            _ => None,
        }
    }
}

/// One entry of the append-only trust audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustTransition {
    pub evaluator_id: EvaluatorId,
    pub from: TrustState,
    pub to: TrustState,
    pub signal: TrustSignal,
    pub reason: String,
    pub at: DateTime<Utc>,
}
