//! Self-stack bias normalizer.
//!
//! Splits each task's scores into evaluators whose strongest stack matches
//! the task ("self-stack") and everyone else, tracks the gap between the
//! two groups over a sliding window of tasks per stack, and derives a
//! corrective offset once the gap is systematic. The offset is applied
//! only when scores are read for reporting; stored records never change.

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::model::{EvaluatorId, EvaluatorProfile, TaskId, TaskRequirement, MAX_TOTAL};
use crate::statistics::mean;

/// Bias thresholds. Defaults are placeholders to be tuned by policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BiasPolicy {
    /// Mean self-stack advantage, in points, above which bias is flagged.
    pub margin: f64,
    /// Number of most recent tasks per stack kept in the window.
    pub window: usize,
    /// Tasks with both groups present needed before any judgement.
    pub min_tasks: usize,
}

impl Default for BiasPolicy {
    fn default() -> Self {
        Self {
            margin: 5.0,
            window: 10,
            min_tasks: 3,
        }
    }
}

/// A task's scores split by stack affinity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StackGroups {
    pub self_stack: Vec<(EvaluatorId, f64)>,
    pub other_stack: Vec<(EvaluatorId, f64)>,
}

impl StackGroups {
    /// Self-stack mean minus other-stack mean, when both groups exist.
    pub fn gap(&self) -> Option<f64> {
        let own: Vec<f64> = self.self_stack.iter().map(|(_, s)| *s).collect();
        let other: Vec<f64> = self.other_stack.iter().map(|(_, s)| *s).collect();
        Some(mean(&own)? - mean(&other)?)
    }
}

/// Does the evaluator's strongest stack match the task?
pub fn is_self_stack(evaluator: &EvaluatorProfile, task: &TaskRequirement) -> bool {
    evaluator
        .strongest_stack()
        .is_some_and(|stack| task.matches_stack(&stack))
}

/// Partition `(evaluator, total)` pairs for one task.
pub fn partition(task: &TaskRequirement, scored: &[(&EvaluatorProfile, f64)]) -> StackGroups {
    let mut groups = StackGroups::default();
    for (evaluator, total) in scored {
        let entry = (evaluator.id.clone(), *total);
        if is_self_stack(evaluator, task) {
            groups.self_stack.push(entry);
        } else {
            groups.other_stack.push(entry);
        }
    }
    groups
}

/// Corrective offset for self-stack scores on one stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackAdjustment {
    pub stack: String,
    /// Mean self-stack advantage over the window.
    pub mean_gap: f64,
    /// Offset added to self-stack totals at read time.
    pub offset: f64,
    /// Tasks the judgement rests on.
    pub window_tasks: usize,
}

/// Outcome of observing a task.
#[derive(Debug, Clone, PartialEq)]
pub enum BiasUpdate {
    /// Bias newly crossed the margin; administrators should review.
    Raised(StackAdjustment),
    /// An existing adjustment was recomputed.
    Updated(StackAdjustment),
    /// The gap fell back within the margin and the adjustment was dropped.
    Cleared(String),
    Unchanged,
}

/// Tracks per-stack windows and the adjustments they produce.
#[derive(Debug, Clone, Default)]
pub struct BiasNormalizer {
    policy: BiasPolicy,
    windows: HashMap<String, VecDeque<(TaskId, f64)>>,
    adjustments: HashMap<String, StackAdjustment>,
}

impl BiasNormalizer {
    pub fn new(policy: BiasPolicy) -> Self {
        Self {
            policy,
            windows: HashMap::new(),
            adjustments: HashMap::new(),
        }
    }

    /// Record (or refresh) a task's group gap and re-evaluate its stack.
    pub fn observe(&mut self, task: &TaskRequirement, groups: &StackGroups) -> BiasUpdate {
        let Some(gap) = groups.gap() else {
            return BiasUpdate::Unchanged;
        };
        let stack = task.stack_key().to_string();
        let window = self.windows.entry(stack.clone()).or_default();

        if let Some(slot) = window.iter_mut().find(|(id, _)| *id == task.id) {
            slot.1 = gap;
        } else {
            window.push_back((task.id.clone(), gap));
            while window.len() > self.policy.window.max(1) {
                window.pop_front();
            }
        }

        if window.len() < self.policy.min_tasks {
            return BiasUpdate::Unchanged;
        }
        let gaps: Vec<f64> = window.iter().map(|(_, g)| *g).collect();
        let Some(mean_gap) = mean(&gaps) else {
            return BiasUpdate::Unchanged;
        };

        if mean_gap > self.policy.margin {
            let adjustment = StackAdjustment {
                stack: stack.clone(),
                mean_gap,
                offset: -mean_gap,
                window_tasks: gaps.len(),
            };
            let previous = self.adjustments.insert(stack, adjustment.clone());
            if previous.is_some() {
                BiasUpdate::Updated(adjustment)
            } else {
                tracing::warn!(
                    stack = %adjustment.stack,
                    mean_gap = adjustment.mean_gap,
                    "self-stack bias above margin"
                );
                BiasUpdate::Raised(adjustment)
            }
        } else if self.adjustments.remove(&stack).is_some() {
            BiasUpdate::Cleared(stack)
        } else {
            BiasUpdate::Unchanged
        }
    }

    pub fn adjustment(&self, stack: &str) -> Option<&StackAdjustment> {
        self.adjustments.get(stack)
    }

    pub fn adjustments(&self) -> impl Iterator<Item = &StackAdjustment> {
        self.adjustments.values()
    }

    /// Reported total for a raw score. Other-stack scores pass through;
    /// self-stack scores get the stack's offset, kept within 0..=100.
    pub fn normalize(&self, task: &TaskRequirement, self_stack: bool, raw_total: f64) -> f64 {
        if !self_stack {
            return raw_total;
        }
        match self.adjustments.get(task.stack_key()) {
            Some(adjustment) => (raw_total + adjustment.offset).clamp(0.0, MAX_TOTAL as f64),
            None => raw_total,
        }
    }
}
