//! Review engine.
//!
//! Ties the store, matcher, scheduler and monitors together behind the
//! operations collaborators call: request assignments, submit scores,
//! read trust state and adjudicate flags.
//!
//! Each task's assignments and score records live in their own ledger
//! behind a per-task mutex, so different tasks proceed in parallel while
//! selection and score handling for one task are serialised. Calibration
//! read-modify-write on a profile is serialised per evaluator.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::bias::{is_self_stack, partition, BiasNormalizer, BiasPolicy, BiasUpdate};
use crate::calibration::{CalibrationPolicy, CalibrationTracker};
use crate::collusion::{CollusionDetector, CollusionPolicy, EvaluatorPair, SubmissionPoint};
use crate::eligibility::{check_eligibility, screen, EligibilityPolicy};
use crate::error::{EngineError, StoreError};
use crate::flags::{Flag, FlagFilter, FlagKind, FlagSink, Resolution, ReviewQueue};
use crate::model::{
    Assignment, AssignmentId, AssignmentStatus, DimensionScores, EvaluatorId, EvaluatorProfile,
    Proficiency, ScoreId, ScoreRecord, TaskId, TaskRequirement, TechKind, TrustState,
};
use crate::report::{
    EvaluatorSummary, IntegrityReport, NormalizedScore, TaskScores, TaskSummary,
};
use crate::scheduler::{self, Coverage, SchedulerPolicy};
use crate::store::{CompetencyStore, LedgerSnapshot};
use crate::trust::{TrustSignal, TrustTransition};

/// Policies for every component, usually loaded from `jurybox.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub eligibility: EligibilityPolicy,
    pub scheduler: SchedulerPolicy,
    pub calibration: CalibrationPolicy,
    pub bias: BiasPolicy,
    pub collusion: CollusionPolicy,
}

/// Result of [`ReviewEngine::request_assignment`].
#[derive(Debug, Clone, PartialEq)]
pub struct AssignmentOutcome {
    pub task_id: TaskId,
    /// Every active assignment on the task, oldest first.
    pub assignments: Vec<Assignment>,
    /// How many of those were created by this request.
    pub added: usize,
    pub coverage: Coverage,
}

impl AssignmentOutcome {
    /// Turn an under-covered outcome into [`EngineError::UnderCoverage`]
    /// for callers that cannot proceed without a full panel.
    pub fn require_full_coverage(self) -> Result<Self, EngineError> {
        match self.coverage {
            Coverage::Full => Ok(self),
            Coverage::UnderCovered { assigned, required } => Err(EngineError::UnderCoverage {
                task: self.task_id,
                assigned,
                required,
            }),
        }
    }
}

/// Result of an accepted score submission.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreReceipt {
    pub record: ScoreRecord,
    /// Task consensus after this submission, once two scores exist.
    pub consensus: Option<f64>,
    /// Trust transitions the submission triggered.
    pub transitions: Vec<TrustTransition>,
    /// Flags newly queued as a consequence.
    pub flags: Vec<Flag>,
}

/// Per-task state: the frozen requirement plus everything placed on it.
#[derive(Debug)]
struct TaskLedger {
    task: TaskRequirement,
    assignments: Vec<Assignment>,
    /// Every record ever accepted, including superseded ones.
    records: Vec<ScoreRecord>,
    /// Evaluators that already contributed a calibration sample here.
    calibrated: HashSet<EvaluatorId>,
    coverage: Option<Coverage>,
}

impl TaskLedger {
    fn new(task: TaskRequirement) -> Self {
        Self {
            task,
            assignments: Vec::new(),
            records: Vec::new(),
            calibrated: HashSet::new(),
            coverage: None,
        }
    }

    fn from_snapshot(snapshot: LedgerSnapshot) -> Self {
        Self {
            task: snapshot.task,
            assignments: snapshot.assignments,
            records: snapshot.records,
            calibrated: snapshot.calibrated.into_iter().collect(),
            coverage: snapshot.coverage,
        }
    }

    fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            task: self.task.clone(),
            assignments: self.assignments.clone(),
            records: self.records.clone(),
            calibrated: self.calibrated.iter().cloned().collect::<BTreeSet<_>>(),
            coverage: self.coverage,
        }
    }

    fn active(&self) -> impl Iterator<Item = &Assignment> {
        self.assignments.iter().filter(|a| !a.is_revoked())
    }

    fn assignment_mut(&mut self, id: AssignmentId) -> Result<&mut Assignment, EngineError> {
        self.assignments
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or(EngineError::AssignmentNotFound(id))
    }

    /// Latest record for an assignment.
    fn current_record(&self, id: AssignmentId) -> Option<&ScoreRecord> {
        self.records.iter().rev().find(|r| r.assignment_id == id)
    }

    /// Latest record per assignment, in first-submission order.
    fn current_records(&self) -> Vec<&ScoreRecord> {
        let superseded: HashSet<ScoreId> =
            self.records.iter().filter_map(|r| r.supersedes).collect();
        self.records
            .iter()
            .filter(|r| !superseded.contains(&r.id))
            .collect()
    }

    fn refresh_coverage(&mut self, required: usize) -> Coverage {
        let coverage = Coverage::evaluate(self.active().count(), required);
        self.coverage = Some(coverage);
        coverage
    }
}

/// The assignment and integrity-monitoring engine.
pub struct ReviewEngine {
    store: Arc<dyn CompetencyStore>,
    config: EngineConfig,
    calibration: CalibrationTracker,
    tasks: RwLock<HashMap<TaskId, Arc<Mutex<TaskLedger>>>>,
    assignment_index: RwLock<HashMap<AssignmentId, TaskId>>,
    evaluator_locks: Mutex<HashMap<EvaluatorId, Arc<Mutex<()>>>>,
    /// Open (unscored, unrevoked) assignments per evaluator.
    load: Mutex<HashMap<EvaluatorId, usize>>,
    bias: Mutex<BiasNormalizer>,
    collusion: Mutex<CollusionDetector>,
    queue: RwLock<ReviewQueue>,
    sinks: Vec<Arc<dyn FlagSink>>,
}

impl ReviewEngine {
    pub fn new(store: Arc<dyn CompetencyStore>, config: EngineConfig) -> Self {
        Self {
            store,
            calibration: CalibrationTracker::new(config.calibration.clone()),
            bias: Mutex::new(BiasNormalizer::new(config.bias.clone())),
            collusion: Mutex::new(CollusionDetector::new(config.collusion.clone())),
            config,
            tasks: RwLock::new(HashMap::new()),
            assignment_index: RwLock::new(HashMap::new()),
            evaluator_locks: Mutex::new(HashMap::new()),
            load: Mutex::new(HashMap::new()),
            queue: RwLock::new(ReviewQueue::new()),
            sinks: Vec::new(),
        }
    }

    /// Mirror every newly queued flag to `sink`.
    pub fn with_sink(mut self, sink: Arc<dyn FlagSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn CompetencyStore> {
        &self.store
    }

    /// Reload the task ledgers saved in the store by an earlier run.
    ///
    /// Assignments, score records and taken calibration samples come back
    /// as they were, so a replayed submission is a duplicate rather than a
    /// fresh score. Current scores are fed back through the bias and
    /// collusion monitors in submission order; flags this raises are
    /// queued but not sent to sinks again. Call before any other operation.
    pub async fn restore(&self) -> Result<usize, EngineError> {
        let mut saved = self.store.list_ledgers().await?;
        saved.sort_by_key(|l| l.records.iter().map(|r| r.submitted_at).min());

        let count = saved.len();
        for snapshot in saved {
            let mut ledger = TaskLedger::from_snapshot(snapshot);
            for assignment in &ledger.assignments {
                self.assignment_index
                    .write()
                    .await
                    .insert(assignment.id, assignment.task_id.clone());
                if assignment.status == AssignmentStatus::Active {
                    *self
                        .load
                        .lock()
                        .await
                        .entry(assignment.evaluator_id.clone())
                        .or_default() += 1;
                }
            }
            if !ledger.records.is_empty() {
                self.monitor(&mut ledger, false).await?;
            }
            self.tasks
                .write()
                .await
                .insert(ledger.task.id.clone(), Arc::new(Mutex::new(ledger)));
        }
        if count > 0 {
            tracing::info!(tasks = count, store = self.store.name(), "task ledgers restored");
        }
        Ok(count)
    }

    // -----------------------------------------------------------------
    // Assignment
    // -----------------------------------------------------------------

    /// Top a task up to `min_raters` assignees.
    pub async fn request_assignment(
        &self,
        task_id: &TaskId,
    ) -> Result<AssignmentOutcome, EngineError> {
        self.request_assignment_at(task_id, Utc::now()).await
    }

    /// [`Self::request_assignment`] with an explicit clock.
    pub async fn request_assignment_at(
        &self,
        task_id: &TaskId,
        now: DateTime<Utc>,
    ) -> Result<AssignmentOutcome, EngineError> {
        let ledger = self.ledger(task_id).await?;
        let mut ledger = ledger.lock().await;
        self.refresh_requirement(&mut ledger).await?;

        let profiles = self.store.list_profiles().await?;
        let screening = screen(&profiles, &ledger.task, &self.config.eligibility);

        // A revoked assignee may be picked again; only live holders are skipped.
        let holders: HashSet<&EvaluatorId> =
            ledger.active().map(|a| &a.evaluator_id).collect();
        let candidates: Vec<&EvaluatorProfile> = screening
            .eligible
            .into_iter()
            .filter(|p| !holders.contains(&p.id))
            .collect();
        let current: Vec<&EvaluatorProfile> = ledger
            .active()
            .filter_map(|a| profiles.iter().find(|p| p.id == a.evaluator_id))
            .collect();

        if candidates.is_empty() && current.is_empty() {
            tracing::warn!(task = %task_id, "no eligible evaluators");
            let flags: Vec<Flag> = self
                .enqueue(Flag::new(FlagKind::Unassignable, Some(task_id.clone()), vec![]))
                .await
                .into_iter()
                .collect();
            drop(ledger);
            self.dispatch(&flags).await;
            return Err(EngineError::Unassignable(task_id.clone()));
        }

        let load = self.load.lock().await.clone();
        let flagged = self.collusion.lock().await.flagged_pairs();
        let selection = scheduler::select(
            &ledger.task,
            &candidates,
            &current,
            &load,
            &flagged,
            &self.config.scheduler,
        );

        let last_start = ledger.active().map(|a| a.starts_at).max();
        let starts = self.schedule_starts(task_id, now, last_start, selection.selected.len())?;
        let added = selection.selected.len();
        for (evaluator_id, starts_at) in selection.selected.into_iter().zip(starts) {
            let assignment = Assignment::new(task_id.clone(), evaluator_id, now, starts_at);
            self.track(&assignment).await;
            ledger.assignments.push(assignment);
        }
        if ledger.active().next().is_some() {
            self.store.seal_task(task_id).await?;
        }

        let coverage = ledger.refresh_coverage(self.config.scheduler.min_raters);
        self.store.save_ledger(ledger.snapshot()).await?;
        let assignments: Vec<Assignment> = ledger.active().cloned().collect();
        drop(ledger);

        let mut flags = Vec::new();
        if let Coverage::UnderCovered { assigned, required } = coverage {
            tracing::warn!(task = %task_id, assigned, required, "task under-covered");
            flags.extend(
                self.enqueue(Flag::new(
                    FlagKind::UnderCoverage { assigned, required },
                    Some(task_id.clone()),
                    vec![],
                ))
                .await,
            );
        }
        self.dispatch(&flags).await;

        tracing::info!(task = %task_id, added, total = assignments.len(), "assignment complete");
        Ok(AssignmentOutcome {
            task_id: task_id.clone(),
            assignments,
            added,
            coverage,
        })
    }

    /// Run [`Self::request_assignment`] for every registered task
    /// concurrently. Results are sorted by task id.
    pub async fn assign_all(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<(TaskId, Result<AssignmentOutcome, EngineError>)>, EngineError> {
        let tasks = self.store.list_tasks().await?;
        let mut futures = FuturesUnordered::new();
        for task in tasks {
            futures.push(async move {
                let result = self.request_assignment_at(&task.id, now).await;
                (task.id, result)
            });
        }

        let mut results = Vec::new();
        while let Some(result) = futures.next().await {
            results.push(result);
        }
        results.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(results)
    }

    /// Administrator placement of a specific evaluator on a task.
    ///
    /// Runs every matcher gate and refuses to co-assign a flagged pair.
    /// Placing an evaluator who already holds an active assignment on the
    /// task returns that assignment.
    pub async fn place_assignment(
        &self,
        task_id: &TaskId,
        evaluator_id: &EvaluatorId,
        at: DateTime<Utc>,
    ) -> Result<Assignment, EngineError> {
        let ledger = self.ledger(task_id).await?;
        let mut ledger = ledger.lock().await;
        self.refresh_requirement(&mut ledger).await?;

        if let Some(existing) = ledger.active().find(|a| a.evaluator_id == *evaluator_id) {
            return Ok(existing.clone());
        }

        let profile = self.store.get_profile(evaluator_id).await?;
        check_eligibility(&profile, &ledger.task, &self.config.eligibility).map_err(|reason| {
            EngineError::IneligibleAssignment {
                evaluator: evaluator_id.clone(),
                task: task_id.clone(),
                reason,
            }
        })?;

        {
            let collusion = self.collusion.lock().await;
            if let Some(peer) = ledger
                .active()
                .find(|a| collusion.is_flagged(evaluator_id, &a.evaluator_id))
            {
                return Err(EngineError::CollusionConflict {
                    evaluator: evaluator_id.clone(),
                    peer: peer.evaluator_id.clone(),
                    task: task_id.clone(),
                });
            }
        }

        let last_start = ledger.active().map(|a| a.starts_at).max();
        let starts_at = self
            .schedule_starts(task_id, at, last_start, 1)?
            .into_iter()
            .next()
            .unwrap_or(at);
        let assignment = Assignment::new(task_id.clone(), evaluator_id.clone(), at, starts_at);
        self.track(&assignment).await;
        ledger.assignments.push(assignment.clone());
        self.store.seal_task(task_id).await?;
        ledger.refresh_coverage(self.config.scheduler.min_raters);
        self.store.save_ledger(ledger.snapshot()).await?;

        tracing::info!(task = %task_id, evaluator = %evaluator_id, "assignment placed");
        Ok(assignment)
    }

    /// Administrator override: revoke an unscored assignment and release
    /// its anonymisation token in one step under the task lock.
    pub async fn revoke_assignment(
        &self,
        assignment_id: AssignmentId,
        reason: &str,
    ) -> Result<Assignment, EngineError> {
        let ledger = self.ledger_for(assignment_id).await?;
        let mut ledger = ledger.lock().await;
        let assignment = ledger.assignment_mut(assignment_id)?;
        match assignment.status {
            AssignmentStatus::Scored => return Err(EngineError::AssignmentScored(assignment_id)),
            AssignmentStatus::Revoked { .. } => {
                return Err(EngineError::AssignmentRevoked(assignment_id))
            }
            AssignmentStatus::Active => {}
        }
        assignment.status = AssignmentStatus::Revoked {
            at: Utc::now(),
            reason: reason.to_string(),
        };
        assignment.token = None;
        let revoked = assignment.clone();
        self.release(&revoked.evaluator_id).await;
        ledger.refresh_coverage(self.config.scheduler.min_raters);
        self.store.save_ledger(ledger.snapshot()).await?;

        tracing::info!(
            task = %revoked.task_id,
            evaluator = %revoked.evaluator_id,
            reason,
            "assignment revoked"
        );
        Ok(revoked)
    }

    /// Active assignments on a task.
    pub async fn assignments(&self, task_id: &TaskId) -> Result<Vec<Assignment>, EngineError> {
        match self.existing_ledger(task_id).await {
            Some(ledger) => Ok(ledger.lock().await.active().cloned().collect()),
            None => {
                self.store.get_task(task_id).await?;
                Ok(Vec::new())
            }
        }
    }

    /// The active assignment of `evaluator_id` on `task_id`, if any.
    pub async fn find_assignment(
        &self,
        task_id: &TaskId,
        evaluator_id: &EvaluatorId,
    ) -> Option<Assignment> {
        let ledger = self.existing_ledger(task_id).await?;
        let ledger = ledger.lock().await;
        let found = ledger
            .active()
            .find(|a| a.evaluator_id == *evaluator_id)
            .cloned();
        found
    }

    // -----------------------------------------------------------------
    // Scoring
    // -----------------------------------------------------------------

    pub async fn submit_score(
        &self,
        assignment_id: AssignmentId,
        scores: DimensionScores,
        justification: &str,
    ) -> Result<ScoreReceipt, EngineError> {
        self.submit_score_at(assignment_id, scores, justification, Utc::now())
            .await
    }

    /// Accept a score, or reject it with the reason.
    ///
    /// Rejections, in the order they are checked: malformed score, unknown
    /// or revoked assignment, assignment already scored, evaluator no
    /// longer eligible.
    pub async fn submit_score_at(
        &self,
        assignment_id: AssignmentId,
        scores: DimensionScores,
        justification: &str,
        submitted_at: DateTime<Utc>,
    ) -> Result<ScoreReceipt, EngineError> {
        scores.validate()?;

        let ledger = self.ledger_for(assignment_id).await?;
        let mut ledger = ledger.lock().await;

        let assignment = ledger.assignment_mut(assignment_id)?.clone();
        if assignment.is_revoked() {
            return Err(EngineError::AssignmentRevoked(assignment_id));
        }
        if ledger.current_record(assignment_id).is_some() {
            return Err(EngineError::DuplicateScore(assignment_id));
        }

        let profile = self.store.get_profile(&assignment.evaluator_id).await?;
        check_eligibility(&profile, &ledger.task, &self.config.eligibility).map_err(|reason| {
            EngineError::StaleEligibility {
                evaluator: assignment.evaluator_id.clone(),
                task: assignment.task_id.clone(),
                reason,
            }
        })?;

        let record = ScoreRecord {
            id: ScoreId::new(),
            assignment_id,
            task_id: assignment.task_id.clone(),
            evaluator_id: assignment.evaluator_id.clone(),
            scores,
            justification: justification.to_string(),
            submitted_at,
            supersedes: None,
        };
        ledger.records.push(record.clone());
        ledger.assignment_mut(assignment_id)?.status = AssignmentStatus::Scored;
        self.release(&assignment.evaluator_id).await;
        tracing::info!(
            task = %record.task_id,
            evaluator = %record.evaluator_id,
            total = record.total(),
            "score accepted"
        );

        let (consensus, transitions, flags) = self.monitor(&mut ledger, true).await?;
        self.store.save_ledger(ledger.snapshot()).await?;
        drop(ledger);
        self.dispatch(&flags).await;

        Ok(ScoreReceipt {
            record,
            consensus,
            transitions,
            flags,
        })
    }

    /// Record a correction. The previous record stays in the history and
    /// the new one names it in `supersedes`.
    pub async fn correct_score(
        &self,
        assignment_id: AssignmentId,
        scores: DimensionScores,
        justification: &str,
    ) -> Result<ScoreRecord, EngineError> {
        scores.validate()?;

        let ledger = self.ledger_for(assignment_id).await?;
        let mut ledger = ledger.lock().await;
        let previous = ledger
            .current_record(assignment_id)
            .cloned()
            .ok_or(EngineError::ScoreNotFound(assignment_id))?;

        let record = ScoreRecord {
            id: ScoreId::new(),
            scores,
            justification: justification.to_string(),
            submitted_at: Utc::now(),
            supersedes: Some(previous.id),
            ..previous
        };
        ledger.records.push(record.clone());
        tracing::info!(
            task = %record.task_id,
            evaluator = %record.evaluator_id,
            supersedes = %previous.id,
            "score corrected"
        );

        let (_, _, flags) = self.monitor(&mut ledger, false).await?;
        self.store.save_ledger(ledger.snapshot()).await?;
        drop(ledger);
        self.dispatch(&flags).await;
        Ok(record)
    }

    /// Full score history of a task, superseded records included.
    pub async fn score_records(&self, task_id: &TaskId) -> Vec<ScoreRecord> {
        match self.existing_ledger(task_id).await {
            Some(ledger) => ledger.lock().await.records.clone(),
            None => Vec::new(),
        }
    }

    /// Bias-adjusted view of a task's current scores. Stored records are
    /// not touched.
    pub async fn normalized_scores(&self, task_id: &TaskId) -> Result<TaskScores, EngineError> {
        let Some(ledger) = self.existing_ledger(task_id).await else {
            let task = self.store.get_task(task_id).await?;
            return Ok(TaskScores {
                task_id: task.id,
                consensus: None,
                adjustment: None,
                scores: Vec::new(),
            });
        };
        let ledger = ledger.lock().await;
        let current = ledger.current_records();
        let totals: Vec<f64> = current.iter().map(|r| r.total() as f64).collect();
        let consensus = self.calibration.consensus(&totals);

        let bias = self.bias.lock().await;
        let mut scores = Vec::with_capacity(current.len());
        for record in current {
            let profile = self.store.get_profile(&record.evaluator_id).await?;
            let self_stack = is_self_stack(&profile, &ledger.task);
            let raw = record.total();
            scores.push(NormalizedScore {
                evaluator_id: record.evaluator_id.clone(),
                assignment_id: record.assignment_id,
                raw_total: raw,
                self_stack,
                normalized_total: bias.normalize(&ledger.task, self_stack, raw as f64),
            });
        }

        Ok(TaskScores {
            task_id: task_id.clone(),
            consensus,
            adjustment: bias.adjustment(ledger.task.stack_key()).cloned(),
            scores,
        })
    }

    /// Feed the task's current records to the monitors. Returns consensus,
    /// trust transitions and newly queued flags.
    async fn monitor(
        &self,
        ledger: &mut TaskLedger,
        calibrate: bool,
    ) -> Result<(Option<f64>, Vec<TrustTransition>, Vec<Flag>), EngineError> {
        let current: Vec<ScoreRecord> = ledger.current_records().into_iter().cloned().collect();
        let totals: Vec<f64> = current.iter().map(|r| r.total() as f64).collect();
        let consensus = self.calibration.consensus(&totals);
        let mut transitions = Vec::new();
        let mut flags = Vec::new();

        if let (true, Some(consensus)) = (calibrate, consensus) {
            for record in &current {
                if ledger.calibrated.contains(&record.evaluator_id) {
                    continue;
                }
                let delta = CalibrationTracker::agreement_delta(record.total() as f64, consensus);
                if let Some(transition) = self.calibrate(&record.evaluator_id, delta).await? {
                    flags.extend(
                        self.enqueue(Flag::new(
                            FlagKind::TrustTransition {
                                from: transition.from,
                                to: transition.to,
                            },
                            Some(ledger.task.id.clone()),
                            vec![transition.evaluator_id.clone()],
                        ))
                        .await,
                    );
                    transitions.push(transition);
                }
                ledger.calibrated.insert(record.evaluator_id.clone());
            }
        }

        let mut profiles = Vec::with_capacity(current.len());
        for record in &current {
            profiles.push((self.store.get_profile(&record.evaluator_id).await?, record.total() as f64));
        }
        let scored: Vec<(&EvaluatorProfile, f64)> = profiles.iter().map(|(p, t)| (p, *t)).collect();
        let groups = partition(&ledger.task, &scored);
        let update = self.bias.lock().await.observe(&ledger.task, &groups);
        match update {
            BiasUpdate::Raised(adjustment) => {
                let evaluators = groups.self_stack.iter().map(|(id, _)| id.clone()).collect();
                flags.extend(
                    self.enqueue(Flag::new(
                        FlagKind::SelfStackBias {
                            stack: adjustment.stack,
                            mean_gap: adjustment.mean_gap,
                            offset: adjustment.offset,
                            window_tasks: adjustment.window_tasks,
                        },
                        Some(ledger.task.id.clone()),
                        evaluators,
                    ))
                    .await,
                );
            }
            BiasUpdate::Cleared(stack) => {
                tracing::info!(%stack, "self-stack adjustment cleared");
            }
            BiasUpdate::Updated(_) | BiasUpdate::Unchanged => {}
        }

        let points: Vec<SubmissionPoint> = current
            .iter()
            .map(|r| SubmissionPoint {
                evaluator_id: r.evaluator_id.clone(),
                total: r.total() as f64,
                submitted_at: r.submitted_at,
            })
            .collect();
        let suspicious = self.collusion.lock().await.observe(&ledger.task.id, &points);
        for stats in suspicious {
            flags.extend(
                self.enqueue(Flag::new(
                    FlagKind::Collusion {
                        correlation: stats.correlation.unwrap_or_default(),
                        shared_tasks: stats.shared_tasks,
                        tight_gaps: stats.tight_gaps,
                    },
                    None,
                    vec![stats.pair.first, stats.pair.second],
                ))
                .await,
            );
        }

        Ok((consensus, transitions, flags))
    }

    /// Fold one agreement delta into a profile and apply any transition.
    async fn calibrate(
        &self,
        evaluator_id: &EvaluatorId,
        delta: f64,
    ) -> Result<Option<TrustTransition>, EngineError> {
        let lock = self.evaluator_lock(evaluator_id).await;
        let _guard = lock.lock().await;

        let profile = self.store.get_profile(evaluator_id).await?;
        let update = self
            .calibration
            .apply(&profile.calibration, profile.trust_state, delta);
        tracing::debug!(
            evaluator = %evaluator_id,
            delta,
            score = update.calibration.score,
            "calibration updated"
        );
        let score = update.calibration.score;
        let rated = update.calibration.rated_tasks;
        self.store
            .record_calibration(evaluator_id, update.calibration)
            .await?;

        match (update.signal, update.next_state) {
            (Some(signal), Some(next)) => {
                let reason = format!("calibration score {score:.3} after {rated} rated tasks");
                let transition = self
                    .store
                    .update_trust_state(evaluator_id, next, signal, &reason)
                    .await?;
                tracing::info!(
                    evaluator = %evaluator_id,
                    from = %transition.from,
                    to = %transition.to,
                    "trust state changed"
                );
                Ok(Some(transition))
            }
            _ => Ok(None),
        }
    }

    // -----------------------------------------------------------------
    // Trust and profiles
    // -----------------------------------------------------------------

    pub async fn trust_state(&self, evaluator_id: &EvaluatorId) -> Result<TrustState, EngineError> {
        Ok(self.store.get_profile(evaluator_id).await?.trust_state)
    }

    pub async fn trust_log(
        &self,
        evaluator_id: Option<&EvaluatorId>,
    ) -> Result<Vec<TrustTransition>, EngineError> {
        Ok(self.store.trust_log(evaluator_id).await?)
    }

    /// Administrator move back to Active. Clears the deviation streaks so
    /// the evaluator is judged afresh.
    pub async fn reinstate(
        &self,
        evaluator_id: &EvaluatorId,
        reason: &str,
    ) -> Result<TrustTransition, EngineError> {
        self.admin_transition(evaluator_id, TrustSignal::AdminReinstate, TrustState::Active, reason)
            .await
    }

    /// Administrator suspension.
    pub async fn suspend(
        &self,
        evaluator_id: &EvaluatorId,
        reason: &str,
    ) -> Result<TrustTransition, EngineError> {
        self.admin_transition(evaluator_id, TrustSignal::AdminSuspend, TrustState::Suspended, reason)
            .await
    }

    async fn admin_transition(
        &self,
        evaluator_id: &EvaluatorId,
        signal: TrustSignal,
        target: TrustState,
        reason: &str,
    ) -> Result<TrustTransition, EngineError> {
        let lock = self.evaluator_lock(evaluator_id).await;
        let _guard = lock.lock().await;

        let profile = self.store.get_profile(evaluator_id).await?;
        let next = profile
            .trust_state
            .on(signal)
            .ok_or_else(|| EngineError::InvalidTransition {
                evaluator: evaluator_id.clone(),
                from: profile.trust_state,
                to: target,
            })?;

        let mut calibration = profile.calibration.clone();
        calibration.deviation_streak = 0;
        calibration.recovery_streak = 0;
        self.store
            .record_calibration(evaluator_id, calibration)
            .await?;
        let transition = self
            .store
            .update_trust_state(evaluator_id, next, signal, reason)
            .await?;
        tracing::info!(
            evaluator = %evaluator_id,
            from = %transition.from,
            to = %transition.to,
            reason,
            "trust state changed by administrator"
        );
        Ok(transition)
    }

    /// Registration-surface proficiency update.
    pub async fn declare_proficiency(
        &self,
        evaluator_id: &EvaluatorId,
        kind: TechKind,
        technology: &str,
        level: Proficiency,
    ) -> Result<(), EngineError> {
        self.store
            .declare_proficiency(evaluator_id, kind, technology, level)
            .await?;
        tracing::info!(evaluator = %evaluator_id, %kind, technology, %level, "proficiency declared");
        Ok(())
    }

    // -----------------------------------------------------------------
    // Flags
    // -----------------------------------------------------------------

    pub async fn list_flags(&self, filter: &FlagFilter) -> Vec<Flag> {
        self.queue.read().await.list(filter)
    }

    /// Adjudicate a flag. Dismissing a collusion flag lifts the pair's
    /// co-assignment ban and restarts its history.
    pub async fn resolve_flag(
        &self,
        flag_id: Uuid,
        resolution: Resolution,
        note: &str,
    ) -> Result<Flag, EngineError> {
        let flag = self.queue.write().await.resolve(flag_id, resolution, note)?;
        if let (FlagKind::Collusion { .. }, Resolution::Dismissed, [first, second]) =
            (&flag.kind, resolution, flag.evaluators.as_slice())
        {
            let pair = EvaluatorPair::new(first.clone(), second.clone());
            self.collusion.lock().await.dismiss(&pair);
        }
        tracing::info!(flag = %flag_id, ?resolution, "flag resolved");
        Ok(flag)
    }

    async fn enqueue(&self, flag: Flag) -> Option<Flag> {
        self.queue.write().await.raise(flag)
    }

    /// Best-effort delivery to every sink. The queue stays authoritative.
    async fn dispatch(&self, flags: &[Flag]) {
        for flag in flags {
            for sink in &self.sinks {
                if let Err(e) = sink.deliver(flag).await {
                    tracing::warn!(
                        sink = sink.name(),
                        flag = %flag.id,
                        "flag delivery failed: {e:#}"
                    );
                }
            }
        }
    }

    // -----------------------------------------------------------------
    // Reporting
    // -----------------------------------------------------------------

    /// Snapshot of coverage, consensus, calibration, flags and the trust
    /// log across every registered task and evaluator.
    pub async fn integrity_report(&self) -> Result<IntegrityReport, EngineError> {
        let mut tasks = Vec::new();
        for task in self.store.list_tasks().await? {
            let (assigned, scored, coverage) = match self.existing_ledger(&task.id).await {
                Some(ledger) => {
                    let ledger = ledger.lock().await;
                    (
                        ledger.active().count(),
                        ledger.current_records().len(),
                        ledger.coverage,
                    )
                }
                None => (0, 0, None),
            };
            let scores = self.normalized_scores(&task.id).await?;
            tasks.push(TaskSummary {
                task_id: task.id.clone(),
                title: task.title.clone(),
                difficulty: task.difficulty,
                stack: task.stack_key().to_string(),
                assigned,
                scored,
                coverage,
                consensus: scores.consensus,
                adjustment: scores.adjustment,
                scores: scores.scores,
            });
        }

        let load = self.load.lock().await.clone();
        let evaluators = self
            .store
            .list_profiles()
            .await?
            .into_iter()
            .map(|p| EvaluatorSummary {
                open_assignments: load.get(&p.id).copied().unwrap_or(0),
                strongest_stack: p.strongest_stack(),
                evaluator_id: p.id,
                name: p.name,
                level: p.level,
                trust_state: p.trust_state,
                calibration_score: p.calibration.score,
                agreement_rate: p.calibration.agreement_rate,
                rated_tasks: p.calibration.rated_tasks,
            })
            .collect();

        Ok(IntegrityReport {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            store: self.store.name().to_string(),
            tasks,
            evaluators,
            flags: self.list_flags(&FlagFilter::All).await,
            transitions: self.store.trust_log(None).await?,
            rejections: Vec::new(),
        })
    }

    // -----------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------

    /// Start times for `count` new assignees on a task.
    fn schedule_starts(
        &self,
        task_id: &TaskId,
        now: DateTime<Utc>,
        last_start: Option<DateTime<Utc>>,
        count: usize,
    ) -> Result<Vec<DateTime<Utc>>, EngineError> {
        self.config
            .scheduler
            .stagger()
            .and_then(|stagger| scheduler::stagger_schedule(now, last_start, count, stagger))
            .ok_or_else(|| {
                EngineError::InvalidPolicy(format!(
                    "stagger_secs = {} cannot schedule {count} start(s) on task {task_id}",
                    self.config.scheduler.stagger_secs
                ))
            })
    }

    async fn existing_ledger(&self, task_id: &TaskId) -> Option<Arc<Mutex<TaskLedger>>> {
        self.tasks.read().await.get(task_id).cloned()
    }

    async fn ledger(&self, task_id: &TaskId) -> Result<Arc<Mutex<TaskLedger>>, EngineError> {
        if let Some(ledger) = self.existing_ledger(task_id).await {
            return Ok(ledger);
        }
        let task = self.store.get_task(task_id).await?;
        let mut tasks = self.tasks.write().await;
        Ok(Arc::clone(
            tasks
                .entry(task_id.clone())
                .or_insert_with(|| Arc::new(Mutex::new(TaskLedger::new(task)))),
        ))
    }

    async fn ledger_for(
        &self,
        assignment_id: AssignmentId,
    ) -> Result<Arc<Mutex<TaskLedger>>, EngineError> {
        let task_id = self
            .assignment_index
            .read()
            .await
            .get(&assignment_id)
            .cloned()
            .ok_or(EngineError::AssignmentNotFound(assignment_id))?;
        self.existing_ledger(&task_id)
            .await
            .ok_or(EngineError::AssignmentNotFound(assignment_id))
    }

    /// Until the first assignment the requirement may still change in the
    /// store; reload it so selection sees the latest version.
    async fn refresh_requirement(&self, ledger: &mut TaskLedger) -> Result<(), StoreError> {
        if ledger.assignments.is_empty() {
            ledger.task = self.store.get_task(&ledger.task.id).await?;
        }
        Ok(())
    }

    async fn evaluator_lock(&self, evaluator_id: &EvaluatorId) -> Arc<Mutex<()>> {
        let mut locks = self.evaluator_locks.lock().await;
        Arc::clone(locks.entry(evaluator_id.clone()).or_default())
    }

    async fn track(&self, assignment: &Assignment) {
        self.assignment_index
            .write()
            .await
            .insert(assignment.id, assignment.task_id.clone());
        *self
            .load
            .lock()
            .await
            .entry(assignment.evaluator_id.clone())
            .or_default() += 1;
    }

    async fn release(&self, evaluator_id: &EvaluatorId) {
        if let Some(open) = self.load.lock().await.get_mut(evaluator_id) {
            *open = open.saturating_sub(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Difficulty, ExperienceLevel, TaskCategory, TechRequirement};
    use crate::store::MemoryStore;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
    }

    fn rust_task(id: &str) -> TaskRequirement {
        TaskRequirement {
            id: TaskId::new(id),
            title: format!("task {id}"),
            difficulty: Difficulty::Medium,
            category: TaskCategory::Standard,
            language: TechRequirement::new("rust", Proficiency::Proficient),
            framework: None,
            domain: TechRequirement::new("web", Proficiency::Familiar),
        }
    }

    fn evaluator(id: &str, strongest: &str) -> EvaluatorProfile {
        EvaluatorProfile::new(id, ExperienceLevel::Senior)
            .with(TechKind::Language, "rust", Proficiency::Proficient)
            .with(TechKind::Language, strongest, Proficiency::Expert)
            .with(TechKind::Domain, "web", Proficiency::Proficient)
    }

    fn engine_with(
        profiles: Vec<EvaluatorProfile>,
        tasks: Vec<TaskRequirement>,
        config: EngineConfig,
    ) -> ReviewEngine {
        ReviewEngine::new(Arc::new(MemoryStore::with_roster(profiles, tasks)), config)
    }

    /// Scores summing to `total`, filled dimension by dimension.
    fn scores(total: u32) -> DimensionScores {
        let mut left = total;
        let mut take = |max: u32| {
            let v = left.min(max);
            left -= v;
            v
        };
        DimensionScores::new(take(35), take(20), take(25), take(15), take(5))
    }

    async fn place(engine: &ReviewEngine, task: &str, evaluator: &str) -> Assignment {
        engine
            .place_assignment(&task.into(), &evaluator.into(), t0())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn assignment_meets_coverage_with_unique_tokens() {
        let engine = engine_with(
            vec![evaluator("a", "rust"), evaluator("b", "go"), evaluator("c", "go")],
            vec![rust_task("t1")],
            EngineConfig::default(),
        );
        let outcome = engine
            .request_assignment_at(&"t1".into(), t0())
            .await
            .unwrap();
        assert_eq!(outcome.assignments.len(), 2);
        assert_eq!(outcome.coverage, Coverage::Full);

        let tokens: HashSet<_> = outcome
            .assignments
            .iter()
            .map(|a| a.token.clone().unwrap())
            .collect();
        assert_eq!(tokens.len(), 2);

        let mut starts: Vec<_> = outcome.assignments.iter().map(|a| a.starts_at).collect();
        starts.sort();
        assert_eq!(starts[1] - starts[0], Duration::seconds(900));

        let again = engine
            .request_assignment_at(&"t1".into(), t0())
            .await
            .unwrap();
        assert_eq!(again.added, 0);
        assert_eq!(again.assignments, outcome.assignments);
    }

    #[tokio::test]
    async fn small_pool_is_flagged_under_covered() {
        let engine = engine_with(
            vec![evaluator("a", "rust")],
            vec![rust_task("t1")],
            EngineConfig::default(),
        );
        let outcome = engine.request_assignment(&"t1".into()).await.unwrap();
        assert_eq!(outcome.assignments.len(), 1);
        assert!(matches!(
            outcome.clone().require_full_coverage(),
            Err(EngineError::UnderCoverage {
                assigned: 1,
                required: 2,
                ..
            })
        ));
        let flags = engine
            .list_flags(&FlagFilter::Task("t1".into()))
            .await;
        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0].kind.label(), "under_coverage");
    }

    #[tokio::test]
    async fn unassignable_task_is_surfaced() {
        let mut cobol = rust_task("t1");
        cobol.language = TechRequirement::new("cobol", Proficiency::Proficient);
        let engine = engine_with(vec![evaluator("a", "rust")], vec![cobol], EngineConfig::default());

        let err = engine.request_assignment(&"t1".into()).await.unwrap_err();
        assert!(matches!(err, EngineError::Unassignable(_)));
        let flags = engine.list_flags(&FlagFilter::Open).await;
        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0].kind, FlagKind::Unassignable);
    }

    #[tokio::test]
    async fn explicit_placement_reports_failing_gate() {
        let junior = EvaluatorProfile::new("j", ExperienceLevel::Junior)
            .with(TechKind::Language, "rust", Proficiency::Expert)
            .with(TechKind::Domain, "web", Proficiency::Expert);
        let mut hard = rust_task("t1");
        hard.difficulty = Difficulty::Hard;
        let engine = engine_with(vec![junior], vec![hard], EngineConfig::default());

        let err = engine
            .place_assignment(&"t1".into(), &"j".into(), t0())
            .await
            .unwrap_err();
        match err {
            EngineError::IneligibleAssignment { reason, .. } => {
                assert_eq!(reason.gate(), crate::eligibility::Gate::Difficulty)
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn duplicate_submission_leaves_first_record() {
        let engine = engine_with(
            vec![evaluator("a", "rust"), evaluator("b", "go")],
            vec![rust_task("t1")],
            EngineConfig::default(),
        );
        let assignment = place(&engine, "t1", "a").await;
        let receipt = engine
            .submit_score(assignment.id, scores(80), "solid")
            .await
            .unwrap();
        let before = engine.score_records(&"t1".into()).await;

        let err = engine
            .submit_score(assignment.id, scores(80), "solid")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::DuplicateScore(_)));
        assert!(err.is_rejection());
        let after = engine.score_records(&"t1".into()).await;
        assert_eq!(before, after);
        assert_eq!(after, vec![receipt.record]);
    }

    #[tokio::test]
    async fn malformed_scores_are_rejected_not_clamped() {
        let engine = engine_with(
            vec![evaluator("a", "rust")],
            vec![rust_task("t1")],
            EngineConfig::default(),
        );
        let assignment = place(&engine, "t1", "a").await;
        let err = engine
            .submit_score(assignment.id, DimensionScores::new(35, 20, 25, 15, 6), "")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidScore(_)));
        assert!(engine.score_records(&"t1".into()).await.is_empty());

        let err = engine
            .submit_score(AssignmentId::new(), scores(50), "")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::AssignmentNotFound(_)));
    }

    #[tokio::test]
    async fn suspension_after_assignment_makes_eligibility_stale() {
        let engine = engine_with(
            vec![evaluator("a", "rust")],
            vec![rust_task("t1")],
            EngineConfig::default(),
        );
        let assignment = place(&engine, "t1", "a").await;
        engine.suspend(&"a".into(), "manual review").await.unwrap();

        let err = engine
            .submit_score(assignment.id, scores(70), "")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::StaleEligibility { .. }));
    }

    #[tokio::test]
    async fn revocation_releases_token_and_blocks_scoring() {
        let engine = engine_with(
            vec![evaluator("a", "rust"), evaluator("b", "go")],
            vec![rust_task("t1")],
            EngineConfig::default(),
        );
        let a = place(&engine, "t1", "a").await;
        let b = place(&engine, "t1", "b").await;

        let revoked = engine.revoke_assignment(a.id, "conflict of interest").await.unwrap();
        assert!(revoked.token.is_none());
        assert!(revoked.is_revoked());
        assert!(matches!(
            engine.submit_score(a.id, scores(60), "").await,
            Err(EngineError::AssignmentRevoked(_))
        ));
        assert_eq!(engine.assignments(&"t1".into()).await.unwrap().len(), 1);

        engine.submit_score(b.id, scores(60), "").await.unwrap();
        assert!(matches!(
            engine.revoke_assignment(b.id, "late").await,
            Err(EngineError::AssignmentScored(_))
        ));
    }

    #[tokio::test]
    async fn correction_supersedes_without_erasing_history() {
        let engine = engine_with(
            vec![evaluator("a", "rust"), evaluator("b", "go")],
            vec![rust_task("t1")],
            EngineConfig::default(),
        );
        let a = place(&engine, "t1", "a").await;
        let first = engine.submit_score(a.id, scores(40), "typo").await.unwrap();

        let corrected = engine.correct_score(a.id, scores(70), "fixed").await.unwrap();
        assert_eq!(corrected.supersedes, Some(first.record.id));

        let history = engine.score_records(&"t1".into()).await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0], first.record);

        let view = engine.normalized_scores(&"t1".into()).await.unwrap();
        assert_eq!(view.scores.len(), 1);
        assert_eq!(view.scores[0].raw_total, 70);

        let b = place(&engine, "t1", "b").await;
        assert!(matches!(
            engine.correct_score(b.id, scores(10), "").await,
            Err(EngineError::ScoreNotFound(_))
        ));
    }

    #[tokio::test]
    async fn deltas_are_measured_against_consensus() {
        let engine = engine_with(
            vec![evaluator("a", "rust"), evaluator("b", "go")],
            vec![rust_task("t1")],
            EngineConfig::default(),
        );
        let a = place(&engine, "t1", "a").await;
        let b = place(&engine, "t1", "b").await;

        let first = engine.submit_score(a.id, scores(92), "").await.unwrap();
        assert_eq!(first.consensus, None);
        let second = engine.submit_score(b.id, scores(48), "").await.unwrap();
        assert_eq!(second.consensus, Some(70.0));

        let store = engine.store();
        let pa = store.get_profile(&"a".into()).await.unwrap();
        let pb = store.get_profile(&"b".into()).await.unwrap();
        assert!((pa.calibration.score - 0.22).abs() < 1e-9);
        assert_eq!(pa.calibration, pb.calibration);
    }

    #[tokio::test]
    async fn sustained_deviation_escalates_and_one_good_task_does_not_revert() {
        let engine = engine_with(
            vec![evaluator("a", "go"), evaluator("b", "go"), evaluator("d", "go")],
            (1..=4).map(|i| rust_task(&format!("t{i}"))).collect(),
            EngineConfig::default(),
        );
        let drifter = EvaluatorId::new("d");

        for i in 1..=4 {
            let task = format!("t{i}");
            let a = place(&engine, &task, "a").await;
            let b = place(&engine, &task, "b").await;
            let d = place(&engine, &task, "d").await;
            engine.submit_score(a.id, scores(80), "").await.unwrap();
            engine.submit_score(b.id, scores(80), "").await.unwrap();
            let drifted = if i < 4 { 20 } else { 80 };
            engine.submit_score(d.id, scores(drifted), "").await.unwrap();

            let expected = if i < 3 {
                TrustState::Active
            } else {
                TrustState::UnderReview
            };
            assert_eq!(engine.trust_state(&drifter).await.unwrap(), expected, "task {i}");
        }

        let log = engine.trust_log(Some(&drifter)).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].signal, TrustSignal::SustainedDeviation);
        let flags = engine
            .list_flags(&FlagFilter::Evaluator(drifter.clone()))
            .await;
        assert!(flags.iter().any(|f| f.kind.label() == "trust_transition"));

        assert_eq!(engine.trust_state(&"a".into()).await.unwrap(), TrustState::Active);
    }

    #[tokio::test]
    async fn reinstatement_is_logged() {
        let engine = engine_with(
            vec![evaluator("a", "rust")],
            vec![rust_task("t1")],
            EngineConfig::default(),
        );
        let a = EvaluatorId::new("a");
        assert!(matches!(
            engine.reinstate(&a, "nothing to lift").await,
            Err(EngineError::InvalidTransition { .. })
        ));
        engine.suspend(&a, "investigation").await.unwrap();
        let transition = engine.reinstate(&a, "cleared").await.unwrap();
        assert_eq!(transition.from, TrustState::Suspended);
        assert_eq!(transition.to, TrustState::Active);
        assert_eq!(engine.trust_log(Some(&a)).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn collusion_flag_blocks_co_assignment_until_dismissed() {
        let config = EngineConfig {
            collusion: CollusionPolicy {
                min_shared_tasks: 2,
                correlation_threshold: 0.9,
                max_timing_gap_secs: 60,
                min_tight_tasks: 2,
            },
            ..Default::default()
        };
        let engine = engine_with(
            vec![evaluator("a", "go"), evaluator("b", "go"), evaluator("c", "go")],
            (1..=4).map(|i| rust_task(&format!("t{i}"))).collect(),
            config,
        );

        for (task, (ta, tb)) in [("t1", (50, 52)), ("t2", (80, 81))] {
            let a = place(&engine, task, "a").await;
            let b = place(&engine, task, "b").await;
            engine.submit_score_at(a.id, scores(ta), "", t0()).await.unwrap();
            engine
                .submit_score_at(b.id, scores(tb), "", t0() + Duration::seconds(10))
                .await
                .unwrap();
        }

        let flags = engine.list_flags(&FlagFilter::Evaluator("a".into())).await;
        let collusion: Vec<_> = flags
            .iter()
            .filter(|f| f.kind.label() == "collusion")
            .collect();
        assert_eq!(collusion.len(), 1);

        place(&engine, "t3", "a").await;
        assert!(matches!(
            engine.place_assignment(&"t3".into(), &"b".into(), t0()).await,
            Err(EngineError::CollusionConflict { .. })
        ));

        let outcome = engine.request_assignment(&"t4".into()).await.unwrap();
        let ids: HashSet<_> = outcome
            .assignments
            .iter()
            .map(|a| a.evaluator_id.as_str().to_string())
            .collect();
        assert_eq!(ids.len(), 2);
        assert!(!(ids.contains("a") && ids.contains("b")));

        engine
            .resolve_flag(collusion[0].id, Resolution::Dismissed, "pair programming")
            .await
            .unwrap();
        place(&engine, "t3", "b").await;
    }

    #[tokio::test]
    async fn systematic_self_stack_gap_is_flagged_and_normalised() {
        let engine = engine_with(
            vec![evaluator("r", "rust"), evaluator("g", "go")],
            (1..=3).map(|i| rust_task(&format!("t{i}"))).collect(),
            EngineConfig::default(),
        );
        for i in 1..=3 {
            let task = format!("t{i}");
            let r = place(&engine, &task, "r").await;
            let g = place(&engine, &task, "g").await;
            engine.submit_score(r.id, scores(90), "").await.unwrap();
            engine.submit_score(g.id, scores(70), "").await.unwrap();
        }

        let flags = engine.list_flags(&FlagFilter::Task("t3".into())).await;
        assert!(flags.iter().any(|f| matches!(
            &f.kind,
            FlagKind::SelfStackBias { stack, .. } if stack == "rust"
        )));

        let view = engine.normalized_scores(&"t3".into()).await.unwrap();
        let own = view.scores.iter().find(|s| s.self_stack).unwrap();
        assert_eq!(own.raw_total, 90);
        assert!((own.normalized_total - 70.0).abs() < 1e-9);
        let records = engine.score_records(&"t3".into()).await;
        assert!(records.iter().any(|r| r.total() == 90));
    }

    #[tokio::test]
    async fn concurrent_submissions_calibrate_each_evaluator_once() {
        let engine = Arc::new(engine_with(
            vec![evaluator("a", "go"), evaluator("b", "go"), evaluator("c", "go")],
            vec![rust_task("t1")],
            EngineConfig::default(),
        ));
        let mut ids = Vec::new();
        for e in ["a", "b", "c"] {
            ids.push(place(&engine, "t1", e).await.id);
        }

        let handles: Vec<_> = ids
            .into_iter()
            .map(|id| {
                let engine = Arc::clone(&engine);
                tokio::spawn(async move { engine.submit_score(id, scores(75), "").await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        for e in ["a", "b", "c"] {
            let profile = engine.store().get_profile(&e.into()).await.unwrap();
            assert_eq!(profile.calibration.rated_tasks, 1, "{e}");
        }
    }

    #[tokio::test]
    async fn whole_roster_assignment_runs_every_task() {
        let mut cobol = rust_task("t3");
        cobol.language = TechRequirement::new("cobol", Proficiency::Proficient);
        let engine = engine_with(
            vec![evaluator("a", "rust"), evaluator("b", "go"), evaluator("c", "go")],
            vec![rust_task("t1"), rust_task("t2"), cobol],
            EngineConfig::default(),
        );
        let results = engine.assign_all(t0()).await.unwrap();
        assert_eq!(results.len(), 3);
        assert!(results[0].1.is_ok());
        assert!(results[1].1.is_ok());
        assert!(matches!(results[2].1, Err(EngineError::Unassignable(_))));

        let report = engine.integrity_report().await.unwrap();
        assert_eq!(report.tasks.len(), 3);
        assert_eq!(report.evaluators.len(), 3);
        let open: usize = report.evaluators.iter().map(|e| e.open_assignments).sum();
        assert_eq!(open, 4);
    }

    #[tokio::test]
    async fn revoked_evaluator_can_be_assigned_again() {
        let engine = engine_with(
            vec![evaluator("a", "rust")],
            vec![rust_task("t1")],
            EngineConfig::default(),
        );
        let first = engine
            .request_assignment_at(&"t1".into(), t0())
            .await
            .unwrap();
        engine
            .revoke_assignment(first.assignments[0].id, "conflict of interest")
            .await
            .unwrap();

        let again = engine
            .request_assignment_at(&"t1".into(), t0())
            .await
            .unwrap();
        assert_eq!(again.added, 1);
        assert_eq!(again.assignments.len(), 1);
        assert_eq!(again.assignments[0].evaluator_id, EvaluatorId::new("a"));
        assert_ne!(again.assignments[0].id, first.assignments[0].id);
        assert!(again.assignments[0].token.is_some());
        assert_eq!(
            again.coverage,
            Coverage::UnderCovered {
                assigned: 1,
                required: 2
            }
        );
        let flags = engine.list_flags(&FlagFilter::All).await;
        assert!(flags.iter().all(|f| f.kind != FlagKind::Unassignable));
    }

    #[tokio::test]
    async fn out_of_range_stagger_is_an_error() {
        let config = EngineConfig {
            scheduler: SchedulerPolicy {
                stagger_secs: i64::MAX,
                ..Default::default()
            },
            ..Default::default()
        };
        let engine = engine_with(
            vec![evaluator("a", "rust"), evaluator("b", "go")],
            vec![rust_task("t1")],
            config,
        );

        let err = engine
            .request_assignment_at(&"t1".into(), t0())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidPolicy(_)));
        assert!(err.to_string().contains("stagger_secs"));
        assert!(engine.assignments(&"t1".into()).await.unwrap().is_empty());

        let err = engine
            .place_assignment(&"t1".into(), &"a".into(), t0())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidPolicy(_)));
    }

    #[tokio::test]
    async fn find_assignment_skips_revoked() {
        let engine = engine_with(
            vec![evaluator("a", "rust")],
            vec![rust_task("t1")],
            EngineConfig::default(),
        );
        let (t1, a) = (TaskId::new("t1"), EvaluatorId::new("a"));
        assert_eq!(engine.find_assignment(&t1, &a).await, None);

        let assignment = place(&engine, "t1", "a").await;
        assert_eq!(
            engine.find_assignment(&t1, &a).await.map(|found| found.id),
            Some(assignment.id)
        );
        engine.revoke_assignment(assignment.id, "moved").await.unwrap();
        assert_eq!(engine.find_assignment(&t1, &a).await, None);
    }

    #[tokio::test]
    async fn report_leaves_unscheduled_tasks_without_coverage() {
        let engine = engine_with(
            vec![evaluator("a", "rust"), evaluator("b", "go")],
            vec![rust_task("t1"), rust_task("t2")],
            EngineConfig::default(),
        );
        engine
            .request_assignment_at(&"t1".into(), t0())
            .await
            .unwrap();

        let report = engine.integrity_report().await.unwrap();
        let coverage = |id: &str| {
            report
                .tasks
                .iter()
                .find(|t| t.task_id == TaskId::new(id))
                .map(|t| t.coverage)
                .unwrap()
        };
        assert_eq!(coverage("t1"), Some(Coverage::Full));
        assert_eq!(coverage("t2"), None);
        assert_eq!(report.under_covered().count(), 0);
    }

    #[tokio::test]
    async fn restored_ledgers_reject_replayed_scores() {
        let store = Arc::new(MemoryStore::with_roster(
            vec![evaluator("a", "rust"), evaluator("b", "go")],
            vec![rust_task("t1"), rust_task("t2")],
        ));

        let first = ReviewEngine::new(store.clone(), EngineConfig::default());
        let a = place(&first, "t1", "a").await;
        let b = place(&first, "t1", "b").await;
        first
            .submit_score_at(a.id, scores(80), "solid", t0())
            .await
            .unwrap();
        first
            .submit_score_at(b.id, scores(40), "thin", t0() + Duration::minutes(30))
            .await
            .unwrap();
        let open = place(&first, "t2", "a").await;
        drop(first);

        let second = ReviewEngine::new(store.clone(), EngineConfig::default());
        assert_eq!(second.restore().await.unwrap(), 2);

        let replayed = place(&second, "t1", "a").await;
        assert_eq!(replayed.id, a.id);
        let err = second
            .submit_score_at(replayed.id, scores(80), "solid", t0())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::DuplicateScore(_)));
        assert_eq!(second.score_records(&"t1".into()).await.len(), 2);
        for e in ["a", "b"] {
            let profile = second.store().get_profile(&e.into()).await.unwrap();
            assert_eq!(profile.calibration.rated_tasks, 1, "{e}");
        }

        let report = second.integrity_report().await.unwrap();
        let a_summary = report
            .evaluators
            .iter()
            .find(|e| e.evaluator_id == EvaluatorId::new("a"))
            .unwrap();
        assert_eq!(a_summary.open_assignments, 1);
        second
            .submit_score(open.id, scores(70), "fine")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn restore_on_fresh_store_is_a_no_op() {
        let engine = engine_with(
            vec![evaluator("a", "rust")],
            vec![rust_task("t1")],
            EngineConfig::default(),
        );
        assert_eq!(engine.restore().await.unwrap(), 0);
        assert!(engine.assignments(&"t1".into()).await.unwrap().is_empty());
    }
}
