//! JSON-file competency store.
//!
//! Keeps the whole store in memory and rewrites the file after every
//! successful mutation. Writes go to a sibling temp file which is then
//! renamed over the original, so readers of the file never see a torn
//! document.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;

use jurybox_core::error::StoreError;
use jurybox_core::model::{
    CalibrationState, EvaluatorId, EvaluatorProfile, Proficiency, TaskId, TaskRequirement,
    TechKind, TrustState,
};
use jurybox_core::store::{CompetencyStore, LedgerSnapshot, MemoryStore, StoreSnapshot};
use jurybox_core::trust::{TrustSignal, TrustTransition};

pub struct JsonFileStore {
    path: PathBuf,
    inner: MemoryStore,
    persist_lock: Mutex<()>,
}

impl std::fmt::Debug for JsonFileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonFileStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

fn backend(e: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(e.to_string())
}

impl JsonFileStore {
    /// Open an existing state file, or start empty if it does not exist.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let snapshot = match tokio::fs::read_to_string(&path).await {
            Ok(content) => serde_json::from_str::<StoreSnapshot>(&content).map_err(|e| {
                StoreError::Backend(format!("corrupt state file {}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreSnapshot::default(),
            Err(e) => {
                return Err(StoreError::Backend(format!(
                    "failed to read state file {}: {e}",
                    path.display()
                )))
            }
        };
        tracing::debug!(
            path = %path.display(),
            profiles = snapshot.profiles.len(),
            tasks = snapshot.tasks.len(),
            ledgers = snapshot.ledgers.len(),
            "opened state file"
        );
        Ok(Self {
            path,
            inner: MemoryStore::from_snapshot(snapshot),
            persist_lock: Mutex::new(()),
        })
    }

    /// Open the state file and import a roster into it.
    ///
    /// Evaluators already present keep their stored trust state and
    /// calibration; only new evaluators are added. Tasks are registered
    /// unless already sealed.
    pub async fn open_with_roster(
        path: impl Into<PathBuf>,
        profiles: Vec<EvaluatorProfile>,
        tasks: Vec<TaskRequirement>,
    ) -> Result<Self, StoreError> {
        let store = Self::open(path).await?;
        let mut imported = 0usize;
        for profile in profiles {
            match store.inner.get_profile(&profile.id).await {
                Ok(_) => {}
                Err(StoreError::EvaluatorNotFound(_)) => {
                    store.inner.upsert_profile(profile).await?;
                    imported += 1;
                }
                Err(e) => return Err(e),
            }
        }
        for task in tasks {
            match store.inner.register_task(task).await {
                Ok(()) | Err(StoreError::TaskSealed(_)) => {}
                Err(e) => return Err(e),
            }
        }
        tracing::info!(path = %store.path.display(), imported, "roster imported");
        store.persist().await?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn snapshot(&self) -> StoreSnapshot {
        self.inner.snapshot().await
    }

    async fn persist(&self) -> Result<(), StoreError> {
        let _guard = self.persist_lock.lock().await;
        let snapshot = self.inner.snapshot().await;
        let json = serde_json::to_string_pretty(&snapshot).map_err(backend)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(backend)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await.map_err(backend)?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(backend)?;
        Ok(())
    }
}

#[async_trait]
impl CompetencyStore for JsonFileStore {
    fn name(&self) -> &str {
        "json-file"
    }

    async fn get_profile(&self, id: &EvaluatorId) -> Result<EvaluatorProfile, StoreError> {
        self.inner.get_profile(id).await
    }

    async fn list_profiles(&self) -> Result<Vec<EvaluatorProfile>, StoreError> {
        self.inner.list_profiles().await
    }

    async fn upsert_profile(&self, profile: EvaluatorProfile) -> Result<(), StoreError> {
        self.inner.upsert_profile(profile).await?;
        self.persist().await
    }

    async fn declare_proficiency(
        &self,
        id: &EvaluatorId,
        kind: TechKind,
        technology: &str,
        level: Proficiency,
    ) -> Result<(), StoreError> {
        self.inner
            .declare_proficiency(id, kind, technology, level)
            .await?;
        self.persist().await
    }

    async fn get_task(&self, id: &TaskId) -> Result<TaskRequirement, StoreError> {
        self.inner.get_task(id).await
    }

    async fn list_tasks(&self) -> Result<Vec<TaskRequirement>, StoreError> {
        self.inner.list_tasks().await
    }

    async fn register_task(&self, task: TaskRequirement) -> Result<(), StoreError> {
        self.inner.register_task(task).await?;
        self.persist().await
    }

    async fn seal_task(&self, id: &TaskId) -> Result<(), StoreError> {
        self.inner.seal_task(id).await?;
        self.persist().await
    }

    async fn update_trust_state(
        &self,
        id: &EvaluatorId,
        to: TrustState,
        signal: TrustSignal,
        reason: &str,
    ) -> Result<TrustTransition, StoreError> {
        let transition = self.inner.update_trust_state(id, to, signal, reason).await?;
        self.persist().await?;
        Ok(transition)
    }

    async fn record_calibration(
        &self,
        id: &EvaluatorId,
        calibration: CalibrationState,
    ) -> Result<(), StoreError> {
        self.inner.record_calibration(id, calibration).await?;
        self.persist().await
    }

    async fn trust_log(
        &self,
        id: Option<&EvaluatorId>,
    ) -> Result<Vec<TrustTransition>, StoreError> {
        self.inner.trust_log(id).await
    }

    async fn save_ledger(&self, ledger: LedgerSnapshot) -> Result<(), StoreError> {
        self.inner.save_ledger(ledger).await?;
        self.persist().await
    }

    async fn list_ledgers(&self) -> Result<Vec<LedgerSnapshot>, StoreError> {
        self.inner.list_ledgers().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jurybox_core::model::{Difficulty, ExperienceLevel, TaskCategory, TechRequirement};

    fn task(id: &str) -> TaskRequirement {
        TaskRequirement {
            id: TaskId::new(id),
            title: "Parser".into(),
            difficulty: Difficulty::Medium,
            category: TaskCategory::Standard,
            language: TechRequirement::new("rust", Proficiency::Proficient),
            framework: None,
            domain: TechRequirement::new("compilers", Proficiency::Familiar),
        }
    }

    fn profile(id: &str) -> EvaluatorProfile {
        EvaluatorProfile::new(id, ExperienceLevel::Senior)
            .with(TechKind::Language, "rust", Proficiency::Expert)
            .with(TechKind::Domain, "compilers", Proficiency::Proficient)
    }

    #[tokio::test]
    async fn missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path().join("state.json"))
            .await
            .unwrap();
        assert!(store.list_profiles().await.unwrap().is_empty());
        assert_eq!(store.name(), "json-file");
    }

    #[tokio::test]
    async fn mutations_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");
        let alice = EvaluatorId::new("alice");

        {
            let store = JsonFileStore::open_with_roster(&path, vec![profile("alice")], vec![task("t1")])
                .await
                .unwrap();
            store.seal_task(&TaskId::new("t1")).await.unwrap();
            store
                .update_trust_state(
                    &alice,
                    TrustState::UnderReview,
                    TrustSignal::SustainedDeviation,
                    "drift",
                )
                .await
                .unwrap();
            store
                .declare_proficiency(&alice, TechKind::Framework, "Tokio", Proficiency::Expert)
                .await
                .unwrap();
        }

        let reopened = JsonFileStore::open(&path).await.unwrap();
        let profile = reopened.get_profile(&alice).await.unwrap();
        assert_eq!(profile.trust_state, TrustState::UnderReview);
        assert_eq!(
            profile.proficiency(TechKind::Framework, "tokio"),
            Proficiency::Expert
        );
        assert_eq!(reopened.trust_log(Some(&alice)).await.unwrap().len(), 1);
        assert!(matches!(
            reopened.register_task(task("t1")).await,
            Err(StoreError::TaskSealed(_))
        ));
    }

    #[tokio::test]
    async fn roster_import_keeps_stored_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let alice = EvaluatorId::new("alice");

        let store = JsonFileStore::open_with_roster(&path, vec![profile("alice")], vec![task("t1")])
            .await
            .unwrap();
        store
            .update_trust_state(&alice, TrustState::Suspended, TrustSignal::AdminSuspend, "manual")
            .await
            .unwrap();
        store.seal_task(&TaskId::new("t1")).await.unwrap();
        drop(store);

        let store = JsonFileStore::open_with_roster(
            &path,
            vec![profile("alice"), profile("bob")],
            vec![task("t1"), task("t2")],
        )
        .await
        .unwrap();
        assert_eq!(
            store.get_profile(&alice).await.unwrap().trust_state,
            TrustState::Suspended
        );
        assert_eq!(store.list_profiles().await.unwrap().len(), 2);
        assert_eq!(store.list_tasks().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn task_ledgers_survive_reopen() {
        use chrono::Utc;
        use jurybox_core::model::{Assignment, DimensionScores, ScoreId, ScoreRecord};
        use jurybox_core::scheduler::Coverage;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let now = Utc::now();
        let assignment = Assignment::new(TaskId::new("t1"), EvaluatorId::new("alice"), now, now);
        let record = ScoreRecord {
            id: ScoreId::new(),
            assignment_id: assignment.id,
            task_id: TaskId::new("t1"),
            evaluator_id: EvaluatorId::new("alice"),
            scores: DimensionScores::new(30, 15, 20, 10, 5),
            justification: "handles bursts".into(),
            submitted_at: now,
            supersedes: None,
        };

        {
            let store = JsonFileStore::open_with_roster(&path, vec![profile("alice")], vec![task("t1")])
                .await
                .unwrap();
            store
                .save_ledger(LedgerSnapshot {
                    task: task("t1"),
                    assignments: vec![assignment.clone()],
                    records: vec![record.clone()],
                    calibrated: [EvaluatorId::new("alice")].into_iter().collect(),
                    coverage: Some(Coverage::UnderCovered {
                        assigned: 1,
                        required: 2,
                    }),
                })
                .await
                .unwrap();
        }

        let reopened = JsonFileStore::open(&path).await.unwrap();
        let ledgers = reopened.list_ledgers().await.unwrap();
        assert_eq!(ledgers.len(), 1);
        assert_eq!(ledgers[0].assignments, vec![assignment]);
        assert_eq!(ledgers[0].records, vec![record]);
        assert!(ledgers[0].calibrated.contains(&EvaluatorId::new("alice")));
    }

    #[tokio::test]
    async fn corrupt_file_is_a_backend_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = JsonFileStore::open(&path).await.unwrap_err();
        assert!(matches!(err, StoreError::Backend(msg) if msg.contains("corrupt")));
    }
}
