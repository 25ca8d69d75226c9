//! Integrity report types with JSON persistence and calibration drift
//! detection.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::bias::StackAdjustment;
use crate::flags::Flag;
use crate::model::{AssignmentId, Difficulty, EvaluatorId, ExperienceLevel, TaskId, TrustState};
use crate::scheduler::Coverage;
use crate::trust::TrustTransition;

/// One evaluator's score on a task, raw and as reported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedScore {
    pub evaluator_id: EvaluatorId,
    pub assignment_id: AssignmentId,
    /// Stored total, never adjusted.
    pub raw_total: u32,
    /// Whether the evaluator's strongest stack matches the task.
    pub self_stack: bool,
    /// Total after the stack's bias offset, if any.
    pub normalized_total: f64,
}

/// Read-time view of a task's current scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskScores {
    pub task_id: TaskId,
    pub consensus: Option<f64>,
    pub adjustment: Option<StackAdjustment>,
    pub scores: Vec<NormalizedScore>,
}

/// Per-task section of the report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSummary {
    pub task_id: TaskId,
    pub title: String,
    pub difficulty: Difficulty,
    pub stack: String,
    /// Active assignments.
    pub assigned: usize,
    /// Assignments with a current score record.
    pub scored: usize,
    /// `None` until the scheduler or an administrator first places
    /// someone on the task.
    #[serde(default)]
    pub coverage: Option<Coverage>,
    pub consensus: Option<f64>,
    pub adjustment: Option<StackAdjustment>,
    pub scores: Vec<NormalizedScore>,
}

/// Per-evaluator section of the report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluatorSummary {
    pub evaluator_id: EvaluatorId,
    pub name: String,
    pub level: ExperienceLevel,
    pub strongest_stack: Option<String>,
    pub trust_state: TrustState,
    pub calibration_score: f64,
    pub agreement_rate: f64,
    pub rated_tasks: u32,
    pub open_assignments: usize,
}

/// A submission the engine refused, kept so replays can show it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectedSubmission {
    pub task_id: TaskId,
    pub evaluator_id: EvaluatorId,
    pub reason: String,
}

/// Everything administrators need to audit a scoring round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    /// Competency store backend the engine ran against.
    pub store: String,
    pub tasks: Vec<TaskSummary>,
    pub evaluators: Vec<EvaluatorSummary>,
    pub flags: Vec<Flag>,
    pub transitions: Vec<TrustTransition>,
    #[serde(default)]
    pub rejections: Vec<RejectedSubmission>,
}

impl IntegrityReport {
    /// Save the report as JSON to a file.
    pub fn save_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("failed to serialize report")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)
            .with_context(|| format!("failed to write report to {}", path.display()))?;
        Ok(())
    }

    /// Load a report from a JSON file.
    pub fn load_json(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read report from {}", path.display()))?;
        let report: IntegrityReport =
            serde_json::from_str(&content).context("failed to parse report JSON")?;
        Ok(report)
    }

    pub fn open_flags(&self) -> usize {
        self.flags.iter().filter(|f| f.is_open()).count()
    }

    pub fn under_covered(&self) -> impl Iterator<Item = &TaskSummary> {
        self.tasks
            .iter()
            .filter(|t| matches!(t.coverage, Some(Coverage::UnderCovered { .. })))
    }

    /// Compare calibration against an earlier report. Calibration scores
    /// are lower-is-better, so a rise beyond `threshold` is drift.
    pub fn compare(&self, baseline: &IntegrityReport, threshold: f64) -> DriftReport {
        let before: HashMap<&EvaluatorId, &EvaluatorSummary> = baseline
            .evaluators
            .iter()
            .map(|e| (&e.evaluator_id, e))
            .collect();

        let mut drifted = Vec::new();
        let mut improved = Vec::new();
        let mut unchanged = 0usize;
        let mut new_evaluators = 0usize;

        for current in &self.evaluators {
            let Some(previous) = before.get(&current.evaluator_id) else {
                new_evaluators += 1;
                continue;
            };
            let change = CalibrationChange {
                evaluator_id: current.evaluator_id.clone(),
                baseline_score: previous.calibration_score,
                current_score: current.calibration_score,
                delta: current.calibration_score - previous.calibration_score,
                baseline_state: previous.trust_state,
                current_state: current.trust_state,
            };
            if change.delta > threshold {
                drifted.push(change);
            } else if change.delta < -threshold {
                improved.push(change);
            } else {
                unchanged += 1;
            }
        }

        DriftReport {
            drifted,
            improved,
            unchanged,
            new_evaluators,
        }
    }

    /// Format the report as markdown.
    pub fn to_markdown(&self) -> String {
        let mut md = String::new();

        md.push_str("# Integrity report\n\n");
        md.push_str(&format!(
            "**Summary:** {} tasks, {} evaluators, {} open flags, {} trust transitions\n\n",
            self.tasks.len(),
            self.evaluators.len(),
            self.open_flags(),
            self.transitions.len()
        ));

        md.push_str("## Tasks\n\n");
        md.push_str("| Task | Stack | Difficulty | Assigned | Scored | Coverage | Consensus |\n");
        md.push_str("|------|-------|------------|----------|--------|----------|-----------|\n");
        for t in &self.tasks {
            let coverage = match t.coverage {
                Some(Coverage::Full) => "full".to_string(),
                Some(Coverage::UnderCovered { assigned, required }) => {
                    format!("under ({assigned}/{required})")
                }
                None => "unscheduled".to_string(),
            };
            md.push_str(&format!(
                "| {} | {} | {} | {} | {} | {} | {} |\n",
                t.task_id,
                t.stack,
                t.difficulty,
                t.assigned,
                t.scored,
                coverage,
                t.consensus
                    .map(|c| format!("{c:.1}"))
                    .unwrap_or_else(|| "-".into())
            ));
        }
        md.push('\n');

        md.push_str("## Evaluators\n\n");
        md.push_str("| Evaluator | Level | Trust | Calibration | Agreement | Rated |\n");
        md.push_str("|-----------|-------|-------|-------------|-----------|-------|\n");
        for e in &self.evaluators {
            md.push_str(&format!(
                "| {} | {} | {} | {:.3} | {:.0}% | {} |\n",
                e.evaluator_id,
                e.level,
                e.trust_state,
                e.calibration_score,
                e.agreement_rate * 100.0,
                e.rated_tasks
            ));
        }
        md.push('\n');

        if !self.flags.is_empty() {
            md.push_str("## Flags\n\n");
            md.push_str("| Kind | Task | Evaluators | Status |\n");
            md.push_str("|------|------|------------|--------|\n");
            for f in &self.flags {
                let evaluators: Vec<&str> = f.evaluators.iter().map(|e| e.as_str()).collect();
                md.push_str(&format!(
                    "| {} | {} | {} | {} |\n",
                    f.kind.label(),
                    f.task_id.as_ref().map(|t| t.as_str()).unwrap_or("-"),
                    evaluators.join(", "),
                    if f.is_open() { "open" } else { "resolved" }
                ));
            }
            md.push('\n');
        }

        if !self.transitions.is_empty() {
            md.push_str("## Trust transitions\n\n");
            for t in &self.transitions {
                md.push_str(&format!(
                    "- {} `{}`: {} -> {} ({})\n",
                    t.at.format("%Y-%m-%d %H:%M"),
                    t.evaluator_id,
                    t.from,
                    t.to,
                    t.reason
                ));
            }
            md.push('\n');
        }

        if !self.rejections.is_empty() {
            md.push_str("## Rejected submissions\n\n");
            for r in &self.rejections {
                md.push_str(&format!(
                    "- `{}` on `{}`: {}\n",
                    r.evaluator_id, r.task_id, r.reason
                ));
            }
        }

        md
    }
}

/// Result of comparing two reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftReport {
    /// Evaluators whose calibration got worse.
    pub drifted: Vec<CalibrationChange>,
    /// Evaluators whose calibration got better.
    pub improved: Vec<CalibrationChange>,
    pub unchanged: usize,
    /// Evaluators absent from the baseline.
    pub new_evaluators: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationChange {
    pub evaluator_id: EvaluatorId,
    pub baseline_score: f64,
    pub current_score: f64,
    pub delta: f64,
    pub baseline_state: TrustState,
    pub current_state: TrustState,
}

impl DriftReport {
    pub fn has_drift(&self) -> bool {
        !self.drifted.is_empty()
    }

    pub fn to_markdown(&self) -> String {
        let mut md = format!(
            "**Calibration drift:** {} worse, {} better, {} unchanged\n\n",
            self.drifted.len(),
            self.improved.len(),
            self.unchanged
        );
        if !self.drifted.is_empty() {
            md.push_str("| Evaluator | Baseline | Current | Delta | Trust |\n");
            md.push_str("|-----------|----------|---------|-------|-------|\n");
            for c in &self.drifted {
                md.push_str(&format!(
                    "| {} | {:.3} | {:.3} | +{:.3} | {} -> {} |\n",
                    c.evaluator_id,
                    c.baseline_score,
                    c.current_score,
                    c.delta,
                    c.baseline_state,
                    c.current_state
                ));
            }
        }
        md
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::FlagKind;

    fn evaluator(id: &str, score: f64, state: TrustState) -> EvaluatorSummary {
        EvaluatorSummary {
            evaluator_id: EvaluatorId::new(id),
            name: String::new(),
            level: ExperienceLevel::Senior,
            strongest_stack: Some("rust".into()),
            trust_state: state,
            calibration_score: score,
            agreement_rate: 0.5,
            rated_tasks: 4,
            open_assignments: 0,
        }
    }

    fn make_report(evaluators: Vec<EvaluatorSummary>) -> IntegrityReport {
        IntegrityReport {
            id: Uuid::nil(),
            created_at: Utc::now(),
            store: "memory".into(),
            tasks: vec![TaskSummary {
                task_id: TaskId::new("t1"),
                title: "Rate limiter".into(),
                difficulty: Difficulty::Medium,
                stack: "rust".into(),
                assigned: 1,
                scored: 1,
                coverage: Some(Coverage::UnderCovered {
                    assigned: 1,
                    required: 2,
                }),
                consensus: None,
                adjustment: None,
                scores: vec![],
            }],
            evaluators,
            flags: vec![Flag::new(
                FlagKind::UnderCoverage {
                    assigned: 1,
                    required: 2,
                },
                Some(TaskId::new("t1")),
                vec![],
            )],
            transitions: vec![],
            rejections: vec![RejectedSubmission {
                task_id: TaskId::new("t1"),
                evaluator_id: EvaluatorId::new("zed"),
                reason: "evaluator not found: zed".into(),
            }],
        }
    }

    #[test]
    fn json_roundtrip() {
        let report = make_report(vec![evaluator("a", 0.1, TrustState::Active)]);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("report.json");

        report.save_json(&path).unwrap();
        let loaded = IntegrityReport::load_json(&path).unwrap();

        assert_eq!(loaded.tasks.len(), 1);
        assert_eq!(loaded.evaluators[0].evaluator_id, EvaluatorId::new("a"));
        assert_eq!(loaded.open_flags(), 1);
        assert_eq!(loaded.under_covered().count(), 1);
    }

    #[test]
    fn markdown_output() {
        let md = make_report(vec![evaluator("a", 0.1, TrustState::UnderReview)]).to_markdown();
        assert!(md.contains("| t1 | rust | medium | 1 | 1 | under (1/2) | - |"));
        assert!(md.contains("under_review"));
        assert!(md.contains("under_coverage"));
        assert!(md.contains("Rejected submissions"));
    }

    #[test]
    fn unscheduled_task_is_not_under_covered() {
        let mut report = make_report(vec![evaluator("a", 0.1, TrustState::Active)]);
        report.tasks[0].assigned = 0;
        report.tasks[0].scored = 0;
        report.tasks[0].coverage = None;

        assert_eq!(report.under_covered().count(), 0);
        assert!(report
            .to_markdown()
            .contains("| t1 | rust | medium | 0 | 0 | unscheduled | - |"));
    }

    #[test]
    fn compare_detects_calibration_drift() {
        let baseline = make_report(vec![
            evaluator("a", 0.05, TrustState::Active),
            evaluator("b", 0.30, TrustState::UnderReview),
            evaluator("c", 0.10, TrustState::Active),
        ]);
        let current = make_report(vec![
            evaluator("a", 0.25, TrustState::UnderReview),
            evaluator("b", 0.08, TrustState::Active),
            evaluator("c", 0.11, TrustState::Active),
            evaluator("d", 0.0, TrustState::Active),
        ]);

        let drift = current.compare(&baseline, 0.05);
        assert!(drift.has_drift());
        assert_eq!(drift.drifted.len(), 1);
        assert_eq!(drift.drifted[0].evaluator_id, EvaluatorId::new("a"));
        assert_eq!(drift.improved.len(), 1);
        assert_eq!(drift.unchanged, 1);
        assert_eq!(drift.new_evaluators, 1);
        assert!(drift.to_markdown().contains("active -> under_review"));
    }
}
