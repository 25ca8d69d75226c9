//! Competency store.
//!
//! Pure data access for evaluator profiles, task requirements and the
//! trust audit log. Business rules (eligibility, transitions) live in the
//! engine; the store only records what it is told.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::model::{
    Assignment, CalibrationState, EvaluatorId, EvaluatorProfile, Proficiency, ScoreRecord,
    TaskId, TaskRequirement, TechKind, TrustState,
};
use crate::scheduler::Coverage;
use crate::trust::{TrustSignal, TrustTransition};

/// Storage backend for profiles, tasks and the trust log.
///
/// Every read returns a consistent snapshot; a partially applied write is
/// never observable.
#[async_trait]
pub trait CompetencyStore: Send + Sync {
    /// Human-readable backend name (e.g. "memory").
    fn name(&self) -> &str;

    async fn get_profile(&self, id: &EvaluatorId) -> Result<EvaluatorProfile, StoreError>;

    async fn list_profiles(&self) -> Result<Vec<EvaluatorProfile>, StoreError>;

    /// Insert or replace a profile.
    async fn upsert_profile(&self, profile: EvaluatorProfile) -> Result<(), StoreError>;

    /// Record a self-declared proficiency from the registration surface.
    async fn declare_proficiency(
        &self,
        id: &EvaluatorId,
        kind: TechKind,
        technology: &str,
        level: Proficiency,
    ) -> Result<(), StoreError>;

    async fn get_task(&self, id: &TaskId) -> Result<TaskRequirement, StoreError>;

    async fn list_tasks(&self) -> Result<Vec<TaskRequirement>, StoreError>;

    /// Register or replace a task. Fails once the task is sealed.
    async fn register_task(&self, task: TaskRequirement) -> Result<(), StoreError>;

    /// Freeze a task's requirements; called when it enters scoring.
    async fn seal_task(&self, id: &TaskId) -> Result<(), StoreError>;

    /// Set the trust state and append the transition to the audit log.
    async fn update_trust_state(
        &self,
        id: &EvaluatorId,
        to: TrustState,
        signal: TrustSignal,
        reason: &str,
    ) -> Result<TrustTransition, StoreError>;

    async fn record_calibration(
        &self,
        id: &EvaluatorId,
        calibration: CalibrationState,
    ) -> Result<(), StoreError>;

    /// Audit log, optionally restricted to one evaluator, oldest first.
    async fn trust_log(
        &self,
        id: Option<&EvaluatorId>,
    ) -> Result<Vec<TrustTransition>, StoreError>;

    /// Save a task's assignments and score history, replacing the
    /// previous copy.
    async fn save_ledger(&self, ledger: LedgerSnapshot) -> Result<(), StoreError>;

    async fn list_ledgers(&self) -> Result<Vec<LedgerSnapshot>, StoreError>;
}

/// Assignments and score records placed on one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    /// The requirement as frozen at the first assignment.
    pub task: TaskRequirement,
    #[serde(default)]
    pub assignments: Vec<Assignment>,
    /// Every accepted record, superseded ones included.
    #[serde(default)]
    pub records: Vec<ScoreRecord>,
    /// Evaluators whose calibration sample for this task was taken.
    #[serde(default)]
    pub calibrated: BTreeSet<EvaluatorId>,
    #[serde(default)]
    pub coverage: Option<Coverage>,
}

/// Serializable contents of a store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    #[serde(default)]
    pub profiles: BTreeMap<EvaluatorId, EvaluatorProfile>,
    #[serde(default)]
    pub tasks: BTreeMap<TaskId, TaskRequirement>,
    #[serde(default)]
    pub sealed: BTreeSet<TaskId>,
    #[serde(default)]
    pub trust_log: Vec<TrustTransition>,
    #[serde(default)]
    pub ledgers: BTreeMap<TaskId, LedgerSnapshot>,
}

impl StoreSnapshot {
    pub fn new(profiles: Vec<EvaluatorProfile>, tasks: Vec<TaskRequirement>) -> Self {
        Self {
            profiles: profiles.into_iter().map(|p| (p.id.clone(), p)).collect(),
            tasks: tasks.into_iter().map(|t| (t.id.clone(), t)).collect(),
            sealed: BTreeSet::new(),
            trust_log: Vec::new(),
            ledgers: BTreeMap::new(),
        }
    }

    fn profile_mut(&mut self, id: &EvaluatorId) -> Result<&mut EvaluatorProfile, StoreError> {
        self.profiles
            .get_mut(id)
            .ok_or_else(|| StoreError::EvaluatorNotFound(id.clone()))
    }

    fn apply_trust_state(
        &mut self,
        id: &EvaluatorId,
        to: TrustState,
        signal: TrustSignal,
        reason: &str,
    ) -> Result<TrustTransition, StoreError> {
        let profile = self.profile_mut(id)?;
        let transition = TrustTransition {
            evaluator_id: id.clone(),
            from: profile.trust_state,
            to,
            signal,
            reason: reason.to_string(),
            at: Utc::now(),
        };
        profile.trust_state = to;
        self.trust_log.push(transition.clone());
        Ok(transition)
    }
}

/// In-memory store. Also the engine's default backend in tests and the
/// CLI's replay mode.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<StoreSnapshot>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        Self {
            state: RwLock::new(snapshot),
        }
    }

    pub fn with_roster(profiles: Vec<EvaluatorProfile>, tasks: Vec<TaskRequirement>) -> Self {
        Self::from_snapshot(StoreSnapshot::new(profiles, tasks))
    }

    /// A consistent copy of the whole store.
    pub async fn snapshot(&self) -> StoreSnapshot {
        self.state.read().await.clone()
    }
}

#[async_trait]
impl CompetencyStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get_profile(&self, id: &EvaluatorId) -> Result<EvaluatorProfile, StoreError> {
        self.state
            .read()
            .await
            .profiles
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::EvaluatorNotFound(id.clone()))
    }

    async fn list_profiles(&self) -> Result<Vec<EvaluatorProfile>, StoreError> {
        Ok(self.state.read().await.profiles.values().cloned().collect())
    }

    async fn upsert_profile(&self, profile: EvaluatorProfile) -> Result<(), StoreError> {
        self.state
            .write()
            .await
            .profiles
            .insert(profile.id.clone(), profile);
        Ok(())
    }

    async fn declare_proficiency(
        &self,
        id: &EvaluatorId,
        kind: TechKind,
        technology: &str,
        level: Proficiency,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.profile_mut(id)?.declare(kind, technology, level);
        Ok(())
    }

    async fn get_task(&self, id: &TaskId) -> Result<TaskRequirement, StoreError> {
        self.state
            .read()
            .await
            .tasks
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::TaskNotFound(id.clone()))
    }

    async fn list_tasks(&self) -> Result<Vec<TaskRequirement>, StoreError> {
        Ok(self.state.read().await.tasks.values().cloned().collect())
    }

    async fn register_task(&self, task: TaskRequirement) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if state.sealed.contains(&task.id) {
            return Err(StoreError::TaskSealed(task.id));
        }
        state.tasks.insert(task.id.clone(), task);
        Ok(())
    }

    async fn seal_task(&self, id: &TaskId) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if !state.tasks.contains_key(id) {
            return Err(StoreError::TaskNotFound(id.clone()));
        }
        state.sealed.insert(id.clone());
        Ok(())
    }

    async fn update_trust_state(
        &self,
        id: &EvaluatorId,
        to: TrustState,
        signal: TrustSignal,
        reason: &str,
    ) -> Result<TrustTransition, StoreError> {
        self.state
            .write()
            .await
            .apply_trust_state(id, to, signal, reason)
    }

    async fn record_calibration(
        &self,
        id: &EvaluatorId,
        calibration: CalibrationState,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.profile_mut(id)?.calibration = calibration;
        Ok(())
    }

    async fn trust_log(
        &self,
        id: Option<&EvaluatorId>,
    ) -> Result<Vec<TrustTransition>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .trust_log
            .iter()
            .filter(|t| id.is_none_or(|id| t.evaluator_id == *id))
            .cloned()
            .collect())
    }

    async fn save_ledger(&self, ledger: LedgerSnapshot) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if !state.tasks.contains_key(&ledger.task.id) {
            return Err(StoreError::TaskNotFound(ledger.task.id));
        }
        state.ledgers.insert(ledger.task.id.clone(), ledger);
        Ok(())
    }

    async fn list_ledgers(&self) -> Result<Vec<LedgerSnapshot>, StoreError> {
        Ok(self.state.read().await.ledgers.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Difficulty, ExperienceLevel, TaskCategory, TechRequirement};

    fn task(id: &str) -> TaskRequirement {
        TaskRequirement {
            id: TaskId::new(id),
            title: String::new(),
            difficulty: Difficulty::Easy,
            category: TaskCategory::Standard,
            language: TechRequirement::new("go", Proficiency::Proficient),
            framework: None,
            domain: TechRequirement::new("web", Proficiency::Familiar),
        }
    }

    #[tokio::test]
    async fn missing_records_are_not_found() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.get_profile(&"ghost".into()).await,
            Err(StoreError::EvaluatorNotFound(_))
        ));
        assert!(matches!(
            store.get_task(&"ghost".into()).await,
            Err(StoreError::TaskNotFound(_))
        ));
    }

    #[tokio::test]
    async fn sealed_tasks_are_immutable() {
        let store = MemoryStore::with_roster(vec![], vec![task("t1")]);
        store.register_task(task("t1")).await.unwrap();
        store.seal_task(&"t1".into()).await.unwrap();
        assert!(matches!(
            store.register_task(task("t1")).await,
            Err(StoreError::TaskSealed(_))
        ));
        assert!(matches!(
            store.seal_task(&"t2".into()).await,
            Err(StoreError::TaskNotFound(_))
        ));
    }

    #[tokio::test]
    async fn trust_updates_are_logged_in_order() {
        let store = MemoryStore::with_roster(
            vec![
                EvaluatorProfile::new("a", ExperienceLevel::Senior),
                EvaluatorProfile::new("b", ExperienceLevel::Senior),
            ],
            vec![],
        );
        let a = EvaluatorId::new("a");
        store
            .update_trust_state(&a, TrustState::UnderReview, TrustSignal::SustainedDeviation, "drift")
            .await
            .unwrap();
        store
            .update_trust_state(
                &"b".into(),
                TrustState::Suspended,
                TrustSignal::AdminSuspend,
                "manual",
            )
            .await
            .unwrap();
        let transition = store
            .update_trust_state(&a, TrustState::Suspended, TrustSignal::ContinuedDeviation, "drift")
            .await
            .unwrap();
        assert_eq!(transition.from, TrustState::UnderReview);

        assert_eq!(store.trust_log(None).await.unwrap().len(), 3);
        let log = store.trust_log(Some(&a)).await.unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].to, TrustState::UnderReview);
        assert_eq!(log[1].to, TrustState::Suspended);
        assert_eq!(
            store.get_profile(&a).await.unwrap().trust_state,
            TrustState::Suspended
        );
    }

    #[tokio::test]
    async fn proficiency_declarations_update_profile() {
        let store =
            MemoryStore::with_roster(vec![EvaluatorProfile::new("a", ExperienceLevel::Middle)], vec![]);
        let a = EvaluatorId::new("a");
        store
            .declare_proficiency(&a, TechKind::Framework, "Axum", Proficiency::Proficient)
            .await
            .unwrap();
        let profile = store.get_profile(&a).await.unwrap();
        assert_eq!(
            profile.proficiency(TechKind::Framework, "axum"),
            Proficiency::Proficient
        );
        assert!(store
            .declare_proficiency(&"zed".into(), TechKind::Domain, "web", Proficiency::Expert)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn ledgers_are_replaced_per_task() {
        let store = MemoryStore::with_roster(vec![], vec![task("t1")]);
        let ledger = |evaluators: &[&str]| LedgerSnapshot {
            task: task("t1"),
            assignments: vec![],
            records: vec![],
            calibrated: evaluators.iter().map(|e| EvaluatorId::new(*e)).collect(),
            coverage: None,
        };
        store.save_ledger(ledger(&["a"])).await.unwrap();
        store.save_ledger(ledger(&["a", "b"])).await.unwrap();

        let saved = store.list_ledgers().await.unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].calibrated.len(), 2);

        let mut orphan = ledger(&[]);
        orphan.task = task("t9");
        assert!(matches!(
            store.save_ledger(orphan).await,
            Err(StoreError::TaskNotFound(_))
        ));
    }
}
