//! Assignment scheduler.
//!
//! Chooses which eligible evaluators score a task. Selection is a pure
//! function of the candidates, the task's current assignees, workloads and
//! flagged collusion pairs; the engine owns locking and persistence.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::bias::is_self_stack;
use crate::collusion::EvaluatorPair;
use crate::model::{EvaluatorId, EvaluatorProfile, TaskRequirement};

/// Scheduling knobs. Defaults are placeholders to be tuned by policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerPolicy {
    /// Raters a task needs before it is considered scorable.
    pub min_raters: usize,
    /// Minimum delay, in seconds, between two assignees' start times.
    pub stagger_secs: i64,
    /// Include an other-stack evaluator whenever the pool allows it.
    pub require_diversity: bool,
}

impl Default for SchedulerPolicy {
    fn default() -> Self {
        Self {
            min_raters: 2,
            stagger_secs: 900,
            require_diversity: true,
        }
    }
}

impl SchedulerPolicy {
    /// The stagger as a duration; `None` when `stagger_secs` is negative
    /// or beyond what a timestamp offset can hold.
    pub fn stagger(&self) -> Option<Duration> {
        if self.stagger_secs < 0 {
            return None;
        }
        Duration::try_seconds(self.stagger_secs)
    }

    /// Reject values the scheduler cannot work with.
    pub fn validate(&self) -> Result<(), String> {
        if self.min_raters == 0 {
            return Err("min_raters must be at least 1".into());
        }
        if self.stagger().is_none() {
            return Err(format!("stagger_secs = {} is out of range", self.stagger_secs));
        }
        Ok(())
    }
}

/// Whether a task has its minimum number of raters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "coverage", rename_all = "snake_case")]
pub enum Coverage {
    Full,
    /// The eligible pool was smaller than the minimum; everyone available
    /// was assigned.
    UnderCovered { assigned: usize, required: usize },
}

impl Coverage {
    pub fn evaluate(assigned: usize, required: usize) -> Self {
        if assigned >= required {
            Coverage::Full
        } else {
            Coverage::UnderCovered { assigned, required }
        }
    }

    pub fn is_full(&self) -> bool {
        matches!(self, Coverage::Full)
    }
}

/// Evaluators picked for a task in one scheduling round.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub selected: Vec<EvaluatorId>,
    pub coverage: Coverage,
}

/// Pick new assignees for `task`.
///
/// `candidates` must already be eligible and exclude anyone holding an
/// assignment on the task; `current` are the task's active assignees.
/// Candidates are ranked by open workload, then calibration score (lower
/// is better), then id. Nobody is picked who shares a flagged pair with a
/// current or newly picked assignee.
pub fn select(
    task: &TaskRequirement,
    candidates: &[&EvaluatorProfile],
    current: &[&EvaluatorProfile],
    load: &HashMap<EvaluatorId, usize>,
    flagged: &HashSet<EvaluatorPair>,
    policy: &SchedulerPolicy,
) -> Selection {
    let needed = policy.min_raters.saturating_sub(current.len());

    let mut ranked: Vec<&EvaluatorProfile> = candidates.to_vec();
    ranked.sort_by(|a, b| {
        let load_a = load.get(&a.id).copied().unwrap_or(0);
        let load_b = load.get(&b.id).copied().unwrap_or(0);
        load_a
            .cmp(&load_b)
            .then_with(|| {
                a.calibration_score()
                    .partial_cmp(&b.calibration_score())
                    .unwrap_or(Ordering::Equal)
            })
            .then_with(|| a.id.cmp(&b.id))
    });

    let mut chosen: Vec<&EvaluatorProfile> = Vec::new();
    for candidate in &ranked {
        if chosen.len() >= needed {
            break;
        }
        let assignees = current.iter().chain(chosen.iter()).map(|p| &p.id);
        if conflicts(&candidate.id, assignees, flagged) {
            tracing::debug!(evaluator = %candidate.id, task = %task.id, "skipped: collusion flag");
            continue;
        }
        chosen.push(*candidate);
    }

    if policy.require_diversity && !chosen.is_empty() {
        diversify(task, &ranked, current, &mut chosen, flagged);
    }

    Selection {
        selected: chosen.iter().map(|p| p.id.clone()).collect(),
        coverage: Coverage::evaluate(current.len() + chosen.len(), policy.min_raters),
    }
}

/// If every assignee shares the task's stack, swap the last newly chosen
/// one for the best-ranked other-stack candidate that does not conflict.
fn diversify<'a>(
    task: &TaskRequirement,
    ranked: &[&'a EvaluatorProfile],
    current: &[&EvaluatorProfile],
    chosen: &mut Vec<&'a EvaluatorProfile>,
    flagged: &HashSet<EvaluatorPair>,
) {
    let all_self_stack = current
        .iter()
        .chain(chosen.iter())
        .all(|p| is_self_stack(p, task));
    if !all_self_stack {
        return;
    }
    let Some(last) = chosen.len().checked_sub(1) else {
        return;
    };
    let kept = &chosen[..last];
    let replacement = ranked.iter().copied().find(|candidate| {
        !is_self_stack(candidate, task)
            && !chosen.iter().any(|c| c.id == candidate.id)
            && !conflicts(
                &candidate.id,
                current.iter().chain(kept.iter()).map(|p| &p.id),
                flagged,
            )
    });
    if let Some(replacement) = replacement {
        tracing::debug!(
            task = %task.id,
            replaced = %chosen[last].id,
            with = %replacement.id,
            "swapped for stack diversity"
        );
        chosen[last] = replacement;
    }
}

fn conflicts<'a>(
    candidate: &EvaluatorId,
    mut assignees: impl Iterator<Item = &'a EvaluatorId>,
    flagged: &HashSet<EvaluatorPair>,
) -> bool {
    if flagged.is_empty() {
        return false;
    }
    assignees.any(|other| flagged.contains(&EvaluatorPair::new(candidate.clone(), other.clone())))
}

/// Start times for `count` new assignees.
///
/// The first starts at `now`, or one stagger after the latest existing
/// start if that is later; each following assignee one stagger after the
/// previous.
///
/// Returns `None` if a start time would fall outside the representable
/// date range.
pub fn stagger_schedule(
    now: DateTime<Utc>,
    last_start: Option<DateTime<Utc>>,
    count: usize,
    stagger: Duration,
) -> Option<Vec<DateTime<Utc>>> {
    let first = match last_start {
        Some(last) => now.max(last.checked_add_signed(stagger)?),
        None => now,
    };
    (0..count)
        .map(|i| {
            let offset = stagger.checked_mul(i32::try_from(i).ok()?)?;
            first.checked_add_signed(offset)
        })
        .collect()
}
