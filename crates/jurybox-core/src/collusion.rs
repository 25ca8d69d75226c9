//! Collusion detector.
//!
//! For every pair of evaluators that co-rated a task, keeps their totals
//! and the gap between their submission times. A pair is flagged only when
//! their totals are highly correlated *and* they repeatedly submitted
//! within a tight window; either signal alone is common among honest,
//! well-calibrated evaluators.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{EvaluatorId, TaskId};
use crate::statistics::{median, pearson};

/// Collusion thresholds. Defaults are placeholders to be tuned by policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollusionPolicy {
    /// Co-rated tasks required before a pair is judged at all.
    pub min_shared_tasks: usize,
    /// Pearson correlation of totals at or above which scoring is suspicious.
    pub correlation_threshold: f64,
    /// Submission gap, in seconds, at or below which timing is "tight".
    pub max_timing_gap_secs: i64,
    /// Co-rated tasks with a tight gap required to flag.
    pub min_tight_tasks: usize,
}

impl Default for CollusionPolicy {
    fn default() -> Self {
        Self {
            min_shared_tasks: 5,
            correlation_threshold: 0.95,
            max_timing_gap_secs: 120,
            min_tight_tasks: 3,
        }
    }
}

/// An unordered pair of evaluators, stored in sorted order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EvaluatorPair {
    pub first: EvaluatorId,
    pub second: EvaluatorId,
}

impl EvaluatorPair {
    pub fn new(a: EvaluatorId, b: EvaluatorId) -> Self {
        if a <= b {
            Self { first: a, second: b }
        } else {
            Self { first: b, second: a }
        }
    }

    pub fn contains(&self, id: &EvaluatorId) -> bool {
        self.first == *id || self.second == *id
    }
}

/// One evaluator's submission on a task, as seen by the detector.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionPoint {
    pub evaluator_id: EvaluatorId,
    pub total: f64,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
struct CoRating {
    first_total: f64,
    second_total: f64,
    gap_secs: i64,
}

#[derive(Debug, Clone, Default)]
struct PairHistory {
    tasks: BTreeMap<TaskId, CoRating>,
    flagged: bool,
}

/// Summary of a pair's co-rating history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairStats {
    pub pair: EvaluatorPair,
    pub shared_tasks: usize,
    pub correlation: Option<f64>,
    pub tight_gaps: usize,
    pub median_gap_secs: Option<f64>,
}

/// Tracks pair histories and the flags raised on them.
#[derive(Debug, Clone, Default)]
pub struct CollusionDetector {
    policy: CollusionPolicy,
    pairs: HashMap<EvaluatorPair, PairHistory>,
}

impl CollusionDetector {
    pub fn new(policy: CollusionPolicy) -> Self {
        Self {
            policy,
            pairs: HashMap::new(),
        }
    }

    /// Record the current submissions on a task and return the pairs that
    /// became suspicious as a result. Re-observing a task overwrites that
    /// task's entry rather than counting it twice.
    pub fn observe(&mut self, task_id: &TaskId, submissions: &[SubmissionPoint]) -> Vec<PairStats> {
        let mut raised = Vec::new();
        for (i, a) in submissions.iter().enumerate() {
            for b in &submissions[i + 1..] {
                if a.evaluator_id == b.evaluator_id {
                    continue;
                }
                let pair = EvaluatorPair::new(a.evaluator_id.clone(), b.evaluator_id.clone());
                let (first, second) = if pair.first == a.evaluator_id {
                    (a, b)
                } else {
                    (b, a)
                };
                let history = self.pairs.entry(pair.clone()).or_default();
                history.tasks.insert(
                    task_id.clone(),
                    CoRating {
                        first_total: first.total,
                        second_total: second.total,
                        gap_secs: (first.submitted_at - second.submitted_at)
                            .num_seconds()
                            .abs(),
                    },
                );

                if history.flagged {
                    continue;
                }
                let stats = summarize(&pair, history, &self.policy);
                if is_suspicious(&stats, &self.policy) {
                    history.flagged = true;
                    tracing::warn!(
                        first = %pair.first,
                        second = %pair.second,
                        correlation = stats.correlation,
                        tight_gaps = stats.tight_gaps,
                        "possible collusion"
                    );
                    raised.push(stats);
                }
            }
        }
        raised
    }

    pub fn stats(&self, a: &EvaluatorId, b: &EvaluatorId) -> Option<PairStats> {
        let pair = EvaluatorPair::new(a.clone(), b.clone());
        self.pairs
            .get(&pair)
            .map(|history| summarize(&pair, history, &self.policy))
    }

    pub fn is_flagged(&self, a: &EvaluatorId, b: &EvaluatorId) -> bool {
        let pair = EvaluatorPair::new(a.clone(), b.clone());
        self.pairs.get(&pair).is_some_and(|history| history.flagged)
    }

    /// Pairs that must not be placed on the same task.
    pub fn flagged_pairs(&self) -> HashSet<EvaluatorPair> {
        self.pairs
            .iter()
            .filter(|(_, history)| history.flagged)
            .map(|(pair, _)| pair.clone())
            .collect()
    }

    /// Administrator dismissed the flag: lift it and start the pair's
    /// history afresh so that old evidence cannot re-raise it.
    pub fn dismiss(&mut self, pair: &EvaluatorPair) -> bool {
        match self.pairs.get_mut(pair) {
            Some(history) if history.flagged => {
                history.flagged = false;
                history.tasks.clear();
                true
            }
            _ => false,
        }
    }
}

fn summarize(pair: &EvaluatorPair, history: &PairHistory, policy: &CollusionPolicy) -> PairStats {
    let firsts: Vec<f64> = history.tasks.values().map(|c| c.first_total).collect();
    let seconds: Vec<f64> = history.tasks.values().map(|c| c.second_total).collect();
    let gaps: Vec<f64> = history.tasks.values().map(|c| c.gap_secs as f64).collect();
    let tight_gaps = history
        .tasks
        .values()
        .filter(|c| c.gap_secs <= policy.max_timing_gap_secs)
        .count();

    PairStats {
        pair: pair.clone(),
        shared_tasks: history.tasks.len(),
        correlation: pearson(&firsts, &seconds),
        tight_gaps,
        median_gap_secs: median(&gaps),
    }
}

fn is_suspicious(stats: &PairStats, policy: &CollusionPolicy) -> bool {
    stats.shared_tasks >= policy.min_shared_tasks
        && stats
            .correlation
            .is_some_and(|r| r >= policy.correlation_threshold)
        && stats.tight_gaps >= policy.min_tight_tasks
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn point(id: &str, total: f64, secs: i64) -> SubmissionPoint {
        SubmissionPoint {
            evaluator_id: EvaluatorId::new(id),
            total,
            submitted_at: at(secs),
        }
    }

    fn policy() -> CollusionPolicy {
        CollusionPolicy {
            min_shared_tasks: 4,
            correlation_threshold: 0.9,
            max_timing_gap_secs: 60,
            min_tight_tasks: 3,
        }
    }

    #[test]
    fn pair_is_order_independent() {
        let ab = EvaluatorPair::new("a".into(), "b".into());
        let ba = EvaluatorPair::new("b".into(), "a".into());
        assert_eq!(ab, ba);
        assert!(ab.contains(&EvaluatorId::new("b")));
    }

    #[test]
    fn correlated_and_tight_pair_is_flagged_once() {
        let mut detector = CollusionDetector::new(policy());
        let totals = [(60.0, 61.0), (75.0, 74.0), (90.0, 91.0), (40.0, 42.0)];
        let mut raised = Vec::new();
        for (i, (a, b)) in totals.iter().enumerate() {
            let task = TaskId::new(format!("t{i}"));
            let base = i as i64 * 3600;
            raised.extend(detector.observe(
                &task,
                &[point("a", *a, base), point("b", *b, base + 20)],
            ));
        }
        assert_eq!(raised.len(), 1);
        assert_eq!(raised[0].shared_tasks, 4);
        assert!(raised[0].correlation.unwrap() > 0.99);
        assert!(detector.is_flagged(&"b".into(), &"a".into()));

        let again = detector.observe(
            &TaskId::new("t9"),
            &[point("a", 50.0, 90_000), point("b", 51.0, 90_010)],
        );
        assert!(again.is_empty());
    }

    #[test]
    fn correlation_without_tight_timing_is_not_flagged() {
        let mut detector = CollusionDetector::new(policy());
        for (i, total) in [60.0, 75.0, 90.0, 40.0, 55.0].iter().enumerate() {
            let base = i as i64 * 3600;
            let flagged = detector.observe(
                &TaskId::new(format!("t{i}")),
                &[point("a", *total, base), point("b", *total + 1.0, base + 1800)],
            );
            assert!(flagged.is_empty());
        }
        let stats = detector.stats(&"a".into(), &"b".into()).unwrap();
        assert_eq!(stats.shared_tasks, 5);
        assert_eq!(stats.tight_gaps, 0);
        assert_eq!(stats.median_gap_secs, Some(1800.0));
    }

    #[test]
    fn tight_timing_without_correlation_is_not_flagged() {
        let mut detector = CollusionDetector::new(policy());
        let totals = [(60.0, 90.0), (75.0, 40.0), (90.0, 70.0), (40.0, 85.0)];
        for (i, (a, b)) in totals.iter().enumerate() {
            let base = i as i64 * 3600;
            let flagged = detector.observe(
                &TaskId::new(format!("t{i}")),
                &[point("a", *a, base), point("b", *b, base + 5)],
            );
            assert!(flagged.is_empty());
        }
        assert!(detector.flagged_pairs().is_empty());
    }

    #[test]
    fn re_observing_a_task_does_not_double_count() {
        let mut detector = CollusionDetector::new(policy());
        let task = TaskId::new("t1");
        detector.observe(&task, &[point("a", 60.0, 0), point("b", 61.0, 10)]);
        detector.observe(
            &task,
            &[point("a", 60.0, 0), point("b", 61.0, 10), point("c", 20.0, 400)],
        );
        let stats = detector.stats(&"a".into(), &"b".into()).unwrap();
        assert_eq!(stats.shared_tasks, 1);
        assert_eq!(detector.stats(&"a".into(), &"c".into()).unwrap().shared_tasks, 1);
    }

    #[test]
    fn dismissal_clears_flag_and_history() {
        let mut detector = CollusionDetector::new(CollusionPolicy {
            min_shared_tasks: 2,
            correlation_threshold: 0.9,
            max_timing_gap_secs: 60,
            min_tight_tasks: 2,
        });
        detector.observe(&"t1".into(), &[point("a", 50.0, 0), point("b", 50.0, 5)]);
        let raised = detector.observe(&"t2".into(), &[point("a", 80.0, 0), point("b", 81.0, 5)]);
        assert_eq!(raised.len(), 1);

        let pair = EvaluatorPair::new("a".into(), "b".into());
        assert!(detector.dismiss(&pair));
        assert!(!detector.is_flagged(&"a".into(), &"b".into()));
        assert_eq!(detector.stats(&"a".into(), &"b".into()).unwrap().shared_tasks, 0);
        assert!(!detector.dismiss(&pair));
    }
}
