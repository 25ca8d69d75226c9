//! Administrator review queue.
//!
//! Flags are advisory. They never block scoring or change trust state on
//! their own; they wait here until an administrator adjudicates them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EngineError;
use crate::model::{EvaluatorId, TaskId, TrustState};

/// What a flag is about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FlagKind {
    /// Fewer raters than the configured minimum could be assigned.
    UnderCoverage { assigned: usize, required: usize },
    /// No evaluator is eligible for the task.
    Unassignable,
    /// Self-stack evaluators score systematically higher on this stack.
    SelfStackBias {
        stack: String,
        mean_gap: f64,
        offset: f64,
        window_tasks: usize,
    },
    /// Correlated totals and tight submission timing between two evaluators.
    Collusion {
        correlation: f64,
        shared_tasks: usize,
        tight_gaps: usize,
    },
    /// The calibration tracker moved an evaluator between trust states.
    TrustTransition { from: TrustState, to: TrustState },
}

impl FlagKind {
    pub fn label(&self) -> &'static str {
        match self {
            FlagKind::UnderCoverage { .. } => "under_coverage",
            FlagKind::Unassignable => "unassignable",
            FlagKind::SelfStackBias { .. } => "self_stack_bias",
            FlagKind::Collusion { .. } => "collusion",
            FlagKind::TrustTransition { .. } => "trust_transition",
        }
    }
}

/// Administrator verdict on a flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    /// The concern was upheld.
    Confirmed,
    /// The concern was a false positive.
    Dismissed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FlagStatus {
    Open,
    Resolved {
        resolution: Resolution,
        note: String,
        at: DateTime<Utc>,
    },
}

/// One queued concern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flag {
    pub id: Uuid,
    pub kind: FlagKind,
    #[serde(default)]
    pub task_id: Option<TaskId>,
    #[serde(default)]
    pub evaluators: Vec<EvaluatorId>,
    pub raised_at: DateTime<Utc>,
    pub status: FlagStatus,
}

impl Flag {
    pub fn new(kind: FlagKind, task_id: Option<TaskId>, evaluators: Vec<EvaluatorId>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            task_id,
            evaluators,
            raised_at: Utc::now(),
            status: FlagStatus::Open,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == FlagStatus::Open
    }

    fn same_concern(&self, other: &Flag) -> bool {
        let same_kind = match (&self.kind, &other.kind) {
            (FlagKind::TrustTransition { .. }, FlagKind::TrustTransition { .. }) => {
                self.kind == other.kind
            }
            (a, b) => a.label() == b.label(),
        };
        same_kind
            && self.task_id == other.task_id
            && self.evaluators == other.evaluators
    }
}

/// Which flags to list.
#[derive(Debug, Clone, PartialEq)]
pub enum FlagFilter {
    All,
    Open,
    Task(TaskId),
    Evaluator(EvaluatorId),
}

impl FlagFilter {
    fn matches(&self, flag: &Flag) -> bool {
        match self {
            FlagFilter::All => true,
            FlagFilter::Open => flag.is_open(),
            FlagFilter::Task(task) => flag.task_id.as_ref() == Some(task),
            FlagFilter::Evaluator(evaluator) => flag.evaluators.contains(evaluator),
        }
    }
}

/// In-memory queue of flags awaiting adjudication.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReviewQueue {
    flags: Vec<Flag>,
}

impl ReviewQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a flag unless an identical concern is already open.
    pub fn raise(&mut self, flag: Flag) -> Option<Flag> {
        if self
            .flags
            .iter()
            .any(|existing| existing.is_open() && existing.same_concern(&flag))
        {
            return None;
        }
        tracing::info!(
            flag = %flag.id,
            kind = flag.kind.label(),
            task = ?flag.task_id,
            "flag queued for review"
        );
        self.flags.push(flag.clone());
        Some(flag)
    }

    pub fn list(&self, filter: &FlagFilter) -> Vec<Flag> {
        self.flags
            .iter()
            .filter(|flag| filter.matches(flag))
            .cloned()
            .collect()
    }

    pub fn get(&self, id: Uuid) -> Option<&Flag> {
        self.flags.iter().find(|flag| flag.id == id)
    }

    pub fn resolve(
        &mut self,
        id: Uuid,
        resolution: Resolution,
        note: &str,
    ) -> Result<Flag, EngineError> {
        let flag = self
            .flags
            .iter_mut()
            .find(|flag| flag.id == id)
            .ok_or(EngineError::FlagNotFound(id))?;
        if !flag.is_open() {
            return Err(EngineError::FlagAlreadyResolved(id));
        }
        flag.status = FlagStatus::Resolved {
            resolution,
            note: note.to_string(),
            at: Utc::now(),
        };
        Ok(flag.clone())
    }

    pub fn len(&self) -> usize {
        self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }
}

/// Somewhere flags are mirrored to (a webhook, a ticket system).
///
/// The [`ReviewQueue`] stays authoritative; a failed delivery is logged
/// and the flag remains queued.
#[async_trait]
pub trait FlagSink: Send + Sync {
    /// Human-readable sink name (e.g. "webhook").
    fn name(&self) -> &str;

    /// Deliver one newly raised flag.
    async fn deliver(&self, flag: &Flag) -> anyhow::Result<()>;
}
