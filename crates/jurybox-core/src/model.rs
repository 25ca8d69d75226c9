//! Core data model types for jurybox.
//!
//! Evaluator profiles and task requirements persist across many
//! assignments. Assignments and score records are created per
//! task/evaluator pairing and are never edited in place once scored.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ScoreViolation;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Identifier of an evaluator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EvaluatorId(String);

impl EvaluatorId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EvaluatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EvaluatorId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Identifier of a benchmark task registered for evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Identifier of a single assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssignmentId(Uuid);

impl AssignmentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AssignmentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AssignmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a score record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScoreId(Uuid);

impl ScoreId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ScoreId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ScoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque per-task token standing in for an assignee's identity.
///
/// Minted from a random UUID so it carries nothing derivable from the
/// evaluator id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnonToken(String);

impl AnonToken {
    pub fn mint() -> Self {
        Self(format!("anon-{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AnonToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Ordered scales
// ---------------------------------------------------------------------------

/// Evaluator seniority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExperienceLevel {
    Junior,
    Middle,
    Senior,
}

impl fmt::Display for ExperienceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExperienceLevel::Junior => write!(f, "junior"),
            ExperienceLevel::Middle => write!(f, "middle"),
            ExperienceLevel::Senior => write!(f, "senior"),
        }
    }
}

impl FromStr for ExperienceLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "junior" => Ok(ExperienceLevel::Junior),
            "middle" | "mid" => Ok(ExperienceLevel::Middle),
            "senior" => Ok(ExperienceLevel::Senior),
            other => Err(format!("unknown experience level: {other}")),
        }
    }
}

/// Proficiency in a language, framework or domain.
///
/// Languages, frameworks and domains each word their scale differently
/// ("used", "familiar", "experienced", ...) but share one ordering, so
/// all of them map onto these four ranks.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Proficiency {
    #[default]
    None,
    #[serde(alias = "used", alias = "basic")]
    Familiar,
    #[serde(alias = "intermediate", alias = "experienced")]
    Proficient,
    Expert,
}

impl Proficiency {
    /// Numeric rank, 0 (none) to 3 (expert).
    pub fn rank(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for Proficiency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Proficiency::None => write!(f, "none"),
            Proficiency::Familiar => write!(f, "familiar"),
            Proficiency::Proficient => write!(f, "proficient"),
            Proficiency::Expert => write!(f, "expert"),
        }
    }
}

impl FromStr for Proficiency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(Proficiency::None),
            "familiar" | "used" | "basic" => Ok(Proficiency::Familiar),
            "proficient" | "intermediate" | "experienced" => Ok(Proficiency::Proficient),
            "expert" => Ok(Proficiency::Expert),
            other => Err(format!("unknown proficiency: {other}")),
        }
    }
}

/// Which proficiency map a technology belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TechKind {
    Language,
    Framework,
    Domain,
}

impl fmt::Display for TechKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TechKind::Language => write!(f, "language"),
            TechKind::Framework => write!(f, "framework"),
            TechKind::Domain => write!(f, "domain"),
        }
    }
}

impl FromStr for TechKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "language" | "lang" => Ok(TechKind::Language),
            "framework" => Ok(TechKind::Framework),
            "domain" => Ok(TechKind::Domain),
            other => Err(format!("unknown technology kind: {other}")),
        }
    }
}

/// Evaluator trust state. Only the calibration tracker and explicit
/// administrator actions move an evaluator between states.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustState {
    #[default]
    Active,
    UnderReview,
    Suspended,
}

impl fmt::Display for TrustState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrustState::Active => write!(f, "active"),
            TrustState::UnderReview => write!(f, "under_review"),
            TrustState::Suspended => write!(f, "suspended"),
        }
    }
}

impl FromStr for TrustState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "active" => Ok(TrustState::Active),
            "under_review" | "underreview" => Ok(TrustState::UnderReview),
            "suspended" => Ok(TrustState::Suspended),
            other => Err(format!("unknown trust state: {other}")),
        }
    }
}

/// Task difficulty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
    Expert,
}

impl Difficulty {
    /// Hard and Expert tasks are closed to junior evaluators.
    pub fn is_advanced(self) -> bool {
        self >= Difficulty::Hard
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Difficulty::Easy => write!(f, "easy"),
            Difficulty::Medium => write!(f, "medium"),
            Difficulty::Hard => write!(f, "hard"),
            Difficulty::Expert => write!(f, "expert"),
        }
    }
}

impl FromStr for Difficulty {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "easy" => Ok(Difficulty::Easy),
            "medium" => Ok(Difficulty::Medium),
            "hard" => Ok(Difficulty::Hard),
            "expert" => Ok(Difficulty::Expert),
            other => Err(format!("unknown difficulty: {other}")),
        }
    }
}

/// Task category. Niche tasks demand deeper domain knowledge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskCategory {
    #[default]
    Standard,
    Niche,
}

impl fmt::Display for TaskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskCategory::Standard => write!(f, "standard"),
            TaskCategory::Niche => write!(f, "niche"),
        }
    }
}

impl FromStr for TaskCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "standard" | "ordinary" => Ok(TaskCategory::Standard),
            "niche" => Ok(TaskCategory::Niche),
            other => Err(format!("unknown task category: {other}")),
        }
    }
}

/// Normalise a technology name for lookups.
pub fn tech_key(name: &str) -> String {
    name.trim().to_lowercase()
}

// ---------------------------------------------------------------------------
// Evaluator profiles
// ---------------------------------------------------------------------------

/// Rolling calibration state kept on each profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalibrationState {
    /// Exponentially weighted mean of agreement deltas (lower is better).
    pub score: f64,
    /// Fraction of calibrated tasks whose delta was within tolerance.
    pub agreement_rate: f64,
    /// Number of tasks that contributed a calibration sample.
    pub rated_tasks: u32,
    /// Number of those tasks within tolerance of consensus.
    pub in_tolerance_tasks: u32,
    /// Consecutive tasks with the score above the deviation threshold.
    pub deviation_streak: u32,
    /// Consecutive tasks with the score at or below the deviation threshold.
    pub recovery_streak: u32,
}

/// An evaluator and their declared competencies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluatorProfile {
    pub id: EvaluatorId,
    #[serde(default)]
    pub name: String,
    pub level: ExperienceLevel,
    /// Language proficiencies keyed by lowercase name.
    #[serde(default)]
    pub languages: BTreeMap<String, Proficiency>,
    /// Framework proficiencies keyed by lowercase name.
    #[serde(default)]
    pub frameworks: BTreeMap<String, Proficiency>,
    /// Domain proficiencies keyed by lowercase name.
    #[serde(default)]
    pub domains: BTreeMap<String, Proficiency>,
    /// Explicitly declared dominant stack, overriding the derived one.
    #[serde(default)]
    pub primary_stack: Option<String>,
    #[serde(default)]
    pub trust_state: TrustState,
    #[serde(default)]
    pub calibration: CalibrationState,
}

impl EvaluatorProfile {
    pub fn new(id: impl Into<String>, level: ExperienceLevel) -> Self {
        Self {
            id: EvaluatorId::new(id),
            name: String::new(),
            level,
            languages: BTreeMap::new(),
            frameworks: BTreeMap::new(),
            domains: BTreeMap::new(),
            primary_stack: None,
            trust_state: TrustState::Active,
            calibration: CalibrationState::default(),
        }
    }

    /// Builder-style proficiency declaration.
    pub fn with(mut self, kind: TechKind, technology: &str, level: Proficiency) -> Self {
        self.declare(kind, technology, level);
        self
    }

    /// Record a proficiency declaration, replacing any earlier one.
    pub fn declare(&mut self, kind: TechKind, technology: &str, level: Proficiency) {
        self.map_mut(kind).insert(tech_key(technology), level);
    }

    /// Declared proficiency, `None` when the technology was never declared.
    pub fn proficiency(&self, kind: TechKind, technology: &str) -> Proficiency {
        self.map(kind)
            .get(&tech_key(technology))
            .copied()
            .unwrap_or_default()
    }

    pub fn calibration_score(&self) -> f64 {
        self.calibration.score
    }

    pub fn agreement_rate(&self) -> f64 {
        self.calibration.agreement_rate
    }

    /// The evaluator's dominant declared stack.
    ///
    /// An explicit `primary_stack` wins; otherwise the highest declared
    /// language or framework, ties broken alphabetically.
    pub fn strongest_stack(&self) -> Option<String> {
        if let Some(stack) = &self.primary_stack {
            return Some(tech_key(stack));
        }
        self.languages
            .iter()
            .chain(self.frameworks.iter())
            .filter(|(_, level)| **level > Proficiency::None)
            .max_by(|(a_name, a), (b_name, b)| a.cmp(b).then_with(|| b_name.cmp(a_name)))
            .map(|(name, _)| name.clone())
    }

    fn map(&self, kind: TechKind) -> &BTreeMap<String, Proficiency> {
        match kind {
            TechKind::Language => &self.languages,
            TechKind::Framework => &self.frameworks,
            TechKind::Domain => &self.domains,
        }
    }

    fn map_mut(&mut self, kind: TechKind) -> &mut BTreeMap<String, Proficiency> {
        match kind {
            TechKind::Language => &mut self.languages,
            TechKind::Framework => &mut self.frameworks,
            TechKind::Domain => &mut self.domains,
        }
    }
}

// ---------------------------------------------------------------------------
// Task requirements
// ---------------------------------------------------------------------------

/// A required technology with its minimum proficiency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TechRequirement {
    pub name: String,
    pub min: Proficiency,
}

impl TechRequirement {
    pub fn new(name: &str, min: Proficiency) -> Self {
        Self {
            name: tech_key(name),
            min,
        }
    }
}

/// What an evaluator must know to score a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequirement {
    pub id: TaskId,
    #[serde(default)]
    pub title: String,
    pub difficulty: Difficulty,
    #[serde(default)]
    pub category: TaskCategory,
    pub language: TechRequirement,
    #[serde(default)]
    pub framework: Option<TechRequirement>,
    pub domain: TechRequirement,
}

impl TaskRequirement {
    /// Does `stack` match the task's primary language or framework?
    pub fn matches_stack(&self, stack: &str) -> bool {
        let stack = tech_key(stack);
        self.language.name == stack
            || self
                .framework
                .as_ref()
                .is_some_and(|framework| framework.name == stack)
    }

    /// Key under which self-stack bias is tracked for this task.
    pub fn stack_key(&self) -> &str {
        &self.language.name
    }
}

// ---------------------------------------------------------------------------
// Assignments
// ---------------------------------------------------------------------------

/// Lifecycle of an assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AssignmentStatus {
    Active,
    Scored,
    Revoked {
        at: DateTime<Utc>,
        reason: String,
    },
}

/// A task/evaluator pairing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub id: AssignmentId,
    pub task_id: TaskId,
    pub evaluator_id: EvaluatorId,
    /// Anonymisation token; released (set to `None`) on revocation.
    pub token: Option<AnonToken>,
    pub created_at: DateTime<Utc>,
    /// Staggered start time for this assignee.
    pub starts_at: DateTime<Utc>,
    pub status: AssignmentStatus,
}

impl Assignment {
    pub fn new(
        task_id: TaskId,
        evaluator_id: EvaluatorId,
        created_at: DateTime<Utc>,
        starts_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: AssignmentId::new(),
            task_id,
            evaluator_id,
            token: Some(AnonToken::mint()),
            created_at,
            starts_at,
            status: AssignmentStatus::Active,
        }
    }

    pub fn is_revoked(&self) -> bool {
        matches!(self.status, AssignmentStatus::Revoked { .. })
    }

    /// What the assignee is told about their own assignment. Carries no
    /// evaluator identity, so it is safe to show alongside peers' views.
    pub fn assignee_view(&self) -> AssigneeView {
        AssigneeView {
            assignment_id: self.id,
            task_id: self.task_id.clone(),
            token: self.token.clone(),
            starts_at: self.starts_at,
        }
    }
}

/// Identity-free view of an assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssigneeView {
    pub assignment_id: AssignmentId,
    pub task_id: TaskId,
    pub token: Option<AnonToken>,
    pub starts_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Scores
// ---------------------------------------------------------------------------

/// A scored dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Functionality,
    Completeness,
    Quality,
    EdgeCases,
    Performance,
}

impl Dimension {
    pub const ALL: [Dimension; 5] = [
        Dimension::Functionality,
        Dimension::Completeness,
        Dimension::Quality,
        Dimension::EdgeCases,
        Dimension::Performance,
    ];

    /// Maximum points for this dimension. The maxima sum to 100.
    pub fn max(self) -> u32 {
        match self {
            Dimension::Functionality => 35,
            Dimension::Completeness => 20,
            Dimension::Quality => 25,
            Dimension::EdgeCases => 15,
            Dimension::Performance => 5,
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dimension::Functionality => write!(f, "functionality"),
            Dimension::Completeness => write!(f, "completeness"),
            Dimension::Quality => write!(f, "quality"),
            Dimension::EdgeCases => write!(f, "edge_cases"),
            Dimension::Performance => write!(f, "performance"),
        }
    }
}

/// Maximum total score.
pub const MAX_TOTAL: u32 = 100;

/// Per-dimension scores for one submission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionScores {
    pub functionality: u32,
    pub completeness: u32,
    pub quality: u32,
    pub edge_cases: u32,
    pub performance: u32,
}

impl DimensionScores {
    pub fn new(
        functionality: u32,
        completeness: u32,
        quality: u32,
        edge_cases: u32,
        performance: u32,
    ) -> Self {
        Self {
            functionality,
            completeness,
            quality,
            edge_cases,
            performance,
        }
    }

    pub fn get(&self, dimension: Dimension) -> u32 {
        match dimension {
            Dimension::Functionality => self.functionality,
            Dimension::Completeness => self.completeness,
            Dimension::Quality => self.quality,
            Dimension::EdgeCases => self.edge_cases,
            Dimension::Performance => self.performance,
        }
    }

    /// Sum of all dimensions. Saturates rather than wrapping so that an
    /// absurd input still fails validation.
    pub fn total(&self) -> u32 {
        Dimension::ALL
            .iter()
            .fold(0u32, |acc, d| acc.saturating_add(self.get(*d)))
    }

    /// Reject (never clamp) any dimension above its maximum or a total
    /// above 100.
    pub fn validate(&self) -> Result<(), ScoreViolation> {
        for dimension in Dimension::ALL {
            let value = self.get(dimension);
            if value > dimension.max() {
                return Err(ScoreViolation::DimensionExceeded {
                    dimension,
                    value,
                    max: dimension.max(),
                });
            }
        }
        let total = self.total();
        if total > MAX_TOTAL {
            return Err(ScoreViolation::TotalExceeded(total));
        }
        Ok(())
    }
}

/// A submitted score. Never mutated; a correction is a new record that
/// names the record it supersedes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub id: ScoreId,
    pub assignment_id: AssignmentId,
    pub task_id: TaskId,
    pub evaluator_id: EvaluatorId,
    pub scores: DimensionScores,
    pub justification: String,
    pub submitted_at: DateTime<Utc>,
    #[serde(default)]
    pub supersedes: Option<ScoreId>,
}

impl ScoreRecord {
    pub fn total(&self) -> u32 {
        self.scores.total()
    }
}
