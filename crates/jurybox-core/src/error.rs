//! Error types for the competency store and the assignment engine.
//!
//! Defined in `jurybox-core` so that callers can match on the exact
//! rejection reason instead of inspecting messages.

use thiserror::Error;
use uuid::Uuid;

use crate::eligibility::Ineligibility;
use crate::model::{AssignmentId, Dimension, EvaluatorId, TaskId, TrustState};

/// A score that breaks the dimension or total bounds.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScoreViolation {
    /// One dimension is above its maximum.
    #[error("{dimension} score {value} exceeds its maximum of {max}")]
    DimensionExceeded {
        dimension: Dimension,
        value: u32,
        max: u32,
    },

    /// The dimension total is above 100.
    #[error("total score {0} exceeds 100")]
    TotalExceeded(u32),
}

/// Failures of the competency store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("evaluator not found: {0}")]
    EvaluatorNotFound(EvaluatorId),

    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    /// The task has entered scoring and its requirements are frozen.
    #[error("task {0} has entered scoring and can no longer be modified")]
    TaskSealed(TaskId),

    /// The storage backend failed (I/O, serialization).
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Errors surfaced by the assignment and scoring engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A matcher gate rejected an explicit placement.
    #[error("evaluator {evaluator} is not eligible for task {task}: {reason}")]
    IneligibleAssignment {
        evaluator: EvaluatorId,
        task: TaskId,
        reason: Ineligibility,
    },

    /// Fewer than the minimum number of raters could be assigned.
    #[error("task {task} is under-covered: {assigned} of {required} required raters assigned")]
    UnderCoverage {
        task: TaskId,
        assigned: usize,
        required: usize,
    },

    /// Nobody is eligible to score the task.
    #[error("task {0} is unassignable: no eligible evaluators")]
    Unassignable(TaskId),

    /// The submitted scores break the bounds.
    #[error("invalid score: {0}")]
    InvalidScore(#[from] ScoreViolation),

    /// The assignment already has a score record.
    #[error("assignment {0} has already been scored")]
    DuplicateScore(AssignmentId),

    /// The evaluator lost eligibility between assignment and scoring.
    #[error("evaluator {evaluator} is no longer eligible to score task {task}: {reason}")]
    StaleEligibility {
        evaluator: EvaluatorId,
        task: TaskId,
        reason: Ineligibility,
    },

    #[error("assignment not found: {0}")]
    AssignmentNotFound(AssignmentId),

    #[error("assignment {0} has been revoked")]
    AssignmentRevoked(AssignmentId),

    /// Scored assignments are part of the audit trail and cannot be revoked.
    #[error("assignment {0} has been scored and cannot be revoked")]
    AssignmentScored(AssignmentId),

    #[error("assignment {0} has no score to correct")]
    ScoreNotFound(AssignmentId),

    /// Placing the evaluator would put a flagged collusion pair on one task.
    #[error("evaluator {evaluator} shares a collusion flag with {peer} on task {task}")]
    CollusionConflict {
        evaluator: EvaluatorId,
        peer: EvaluatorId,
        task: TaskId,
    },

    #[error("flag not found: {0}")]
    FlagNotFound(Uuid),

    #[error("flag {0} has already been resolved")]
    FlagAlreadyResolved(Uuid),

    /// The trust state machine has no such transition.
    #[error("evaluator {evaluator} cannot move from {from} to {to}")]
    InvalidTransition {
        evaluator: EvaluatorId,
        from: TrustState,
        to: TrustState,
    },

    /// A configured policy value cannot be applied.
    #[error("invalid policy: {0}")]
    InvalidPolicy(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EngineError {
    /// Returns `true` for the reasons a score submission is rejected
    /// (as opposed to infrastructure failures).
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            EngineError::InvalidScore(_)
                | EngineError::AssignmentNotFound(_)
                | EngineError::AssignmentRevoked(_)
                | EngineError::DuplicateScore(_)
                | EngineError::StaleEligibility { .. }
        )
    }
}
