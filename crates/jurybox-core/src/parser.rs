//! TOML roster and score batch parser.
//!
//! Loads evaluator profiles and task requirements from roster files and
//! directories, score batches from the scoring-capture export, and
//! validates rosters for common mistakes.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::eligibility::{screen, EligibilityPolicy};
use crate::model::{
    tech_key, DimensionScores, EvaluatorId, EvaluatorProfile, Proficiency, TaskCategory, TaskId,
    TaskRequirement, TechRequirement, TrustState,
};

/// Evaluators and tasks loaded from one or more roster files.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Roster {
    pub evaluators: Vec<EvaluatorProfile>,
    pub tasks: Vec<TaskRequirement>,
}

impl Roster {
    pub fn merge(&mut self, other: Roster) {
        self.evaluators.extend(other.evaluators);
        self.tasks.extend(other.tasks);
    }

    pub fn task(&self, id: &TaskId) -> Option<&TaskRequirement> {
        self.tasks.iter().find(|t| t.id == *id)
    }
}

/// Intermediate TOML structure for roster files.
#[derive(Debug, Deserialize)]
struct TomlRosterFile {
    #[serde(default)]
    evaluators: Vec<TomlEvaluator>,
    #[serde(default)]
    tasks: Vec<TomlTask>,
}

#[derive(Debug, Deserialize)]
struct TomlEvaluator {
    id: String,
    #[serde(default)]
    name: String,
    level: String,
    #[serde(default)]
    primary_stack: Option<String>,
    #[serde(default)]
    trust_state: Option<String>,
    #[serde(default)]
    languages: BTreeMap<String, String>,
    #[serde(default)]
    frameworks: BTreeMap<String, String>,
    #[serde(default)]
    domains: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct TomlTask {
    id: String,
    #[serde(default)]
    title: String,
    difficulty: String,
    #[serde(default)]
    category: Option<String>,
    language: String,
    #[serde(default)]
    framework: Option<String>,
    domain: String,
    #[serde(default = "default_min_language")]
    min_language: String,
    #[serde(default = "default_min_familiar")]
    min_framework: String,
    #[serde(default = "default_min_familiar")]
    min_domain: String,
}

fn default_min_language() -> String {
    "proficient".to_string()
}

fn default_min_familiar() -> String {
    "familiar".to_string()
}

fn parse_field<T>(value: &str, what: &str, owner: &str) -> Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    value
        .parse()
        .map_err(|e: String| anyhow::anyhow!("{owner}: invalid {what}: {e}"))
}

fn parse_levels(
    raw: BTreeMap<String, String>,
    owner: &str,
) -> Result<BTreeMap<String, Proficiency>> {
    raw.into_iter()
        .map(|(tech, level)| {
            let level: Proficiency =
                parse_field(&level, &format!("proficiency for {tech}"), owner)?;
            Ok((tech_key(&tech), level))
        })
        .collect()
}

/// Parse a single roster TOML file.
pub fn parse_roster(path: &Path) -> Result<Roster> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read roster file: {}", path.display()))?;

    parse_roster_str(&content, path)
}

/// Parse a roster from a TOML string (useful for testing).
pub fn parse_roster_str(content: &str, source_path: &Path) -> Result<Roster> {
    let parsed: TomlRosterFile = toml::from_str(content)
        .with_context(|| format!("failed to parse TOML: {}", source_path.display()))?;

    let evaluators = parsed
        .evaluators
        .into_iter()
        .map(|e| {
            let owner = format!("evaluator {}", e.id);
            let trust_state = e
                .trust_state
                .map(|s| parse_field::<TrustState>(&s, "trust state", &owner))
                .transpose()?
                .unwrap_or_default();
            Ok(EvaluatorProfile {
                level: parse_field(&e.level, "level", &owner)?,
                languages: parse_levels(e.languages, &owner)?,
                frameworks: parse_levels(e.frameworks, &owner)?,
                domains: parse_levels(e.domains, &owner)?,
                primary_stack: e.primary_stack.map(|s| tech_key(&s)),
                trust_state,
                name: e.name,
                id: EvaluatorId::new(e.id),
                calibration: Default::default(),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let tasks = parsed
        .tasks
        .into_iter()
        .map(|t| {
            let owner = format!("task {}", t.id);
            let category = t
                .category
                .map(|c| parse_field::<TaskCategory>(&c, "category", &owner))
                .transpose()?
                .unwrap_or_default();
            let framework = t
                .framework
                .map(|name| -> Result<TechRequirement> {
                    let min = parse_field(&t.min_framework, "min_framework", &owner)?;
                    Ok(TechRequirement::new(&name, min))
                })
                .transpose()?;
            Ok(TaskRequirement {
                difficulty: parse_field(&t.difficulty, "difficulty", &owner)?,
                category,
                language: TechRequirement::new(
                    &t.language,
                    parse_field(&t.min_language, "min_language", &owner)?,
                ),
                framework,
                domain: TechRequirement::new(
                    &t.domain,
                    parse_field(&t.min_domain, "min_domain", &owner)?,
                ),
                title: t.title,
                id: TaskId::new(t.id),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Roster { evaluators, tasks })
}

/// Recursively load and merge every `.toml` roster in a directory.
pub fn load_roster_directory(dir: &Path) -> Result<Roster> {
    let mut roster = Roster::default();

    if !dir.is_dir() {
        anyhow::bail!("not a directory: {}", dir.display());
    }

    let mut entries: Vec<_> = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read directory: {}", dir.display()))?
        .collect::<std::io::Result<_>>()?;
    entries.sort_by_key(|e| e.path());

    for entry in entries {
        let path = entry.path();

        if path.is_dir() {
            roster.merge(load_roster_directory(&path)?);
        } else if path.extension().is_some_and(|ext| ext == "toml") {
            match parse_roster(&path) {
                Ok(parsed) => roster.merge(parsed),
                Err(e) => {
                    tracing::warn!("skipping {}: {:#}", path.display(), e);
                }
            }
        }
    }

    Ok(roster)
}

/// Load a roster from a file or a directory of files.
pub fn load_roster(path: &Path) -> Result<Roster> {
    if path.is_dir() {
        load_roster_directory(path)
    } else {
        parse_roster(path)
    }
}

/// One row of a score batch.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreEntry {
    pub task_id: TaskId,
    pub evaluator_id: EvaluatorId,
    pub scores: DimensionScores,
    pub justification: String,
    pub submitted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct TomlScoreFile {
    #[serde(default)]
    scores: Vec<TomlScore>,
}

#[derive(Debug, Deserialize)]
struct TomlScore {
    task: String,
    evaluator: String,
    functionality: u32,
    completeness: u32,
    quality: u32,
    edge_cases: u32,
    performance: u32,
    #[serde(default)]
    justification: String,
    /// RFC 3339 timestamp, quoted.
    #[serde(default)]
    submitted_at: Option<String>,
}

/// Parse a score batch file.
pub fn parse_score_batch(path: &Path) -> Result<Vec<ScoreEntry>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read score batch: {}", path.display()))?;

    parse_score_batch_str(&content, path)
}

/// Parse a score batch from a TOML string. Bounds are not checked here;
/// the engine rejects malformed scores on submission.
pub fn parse_score_batch_str(content: &str, source_path: &Path) -> Result<Vec<ScoreEntry>> {
    let parsed: TomlScoreFile = toml::from_str(content)
        .with_context(|| format!("failed to parse TOML: {}", source_path.display()))?;

    parsed
        .scores
        .into_iter()
        .map(|s| {
            let submitted_at = s
                .submitted_at
                .as_deref()
                .map(|ts| {
                    DateTime::parse_from_rfc3339(ts)
                        .map(|dt| dt.with_timezone(&Utc))
                        .with_context(|| {
                            format!("score {}/{}: invalid submitted_at '{ts}'", s.task, s.evaluator)
                        })
                })
                .transpose()?;
            Ok(ScoreEntry {
                task_id: TaskId::new(s.task),
                evaluator_id: EvaluatorId::new(s.evaluator),
                scores: DimensionScores::new(
                    s.functionality,
                    s.completeness,
                    s.quality,
                    s.edge_cases,
                    s.performance,
                ),
                justification: s.justification,
                submitted_at,
            })
        })
        .collect()
}

/// A warning from roster validation.
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    /// The evaluator or task id (if applicable).
    pub subject: Option<String>,
    /// Warning message.
    pub message: String,
}

/// Validate a roster for common issues.
pub fn validate_roster(
    roster: &Roster,
    policy: &EligibilityPolicy,
    min_raters: usize,
) -> Vec<ValidationWarning> {
    let mut warnings = Vec::new();

    // Check for duplicate ids
    let mut seen = HashSet::new();
    for e in &roster.evaluators {
        if !seen.insert(&e.id) {
            warnings.push(ValidationWarning {
                subject: Some(e.id.to_string()),
                message: format!("duplicate evaluator ID: {}", e.id),
            });
        }
    }
    let mut seen = HashSet::new();
    for t in &roster.tasks {
        if !seen.insert(&t.id) {
            warnings.push(ValidationWarning {
                subject: Some(t.id.to_string()),
                message: format!("duplicate task ID: {}", t.id),
            });
        }
    }

    for e in &roster.evaluators {
        if e.languages.values().all(|level| *level == Proficiency::None) {
            warnings.push(ValidationWarning {
                subject: Some(e.id.to_string()),
                message: "no language proficiency declared".into(),
            });
        }
        if let Some(stack) = &e.primary_stack {
            let declared = e.languages.contains_key(stack) || e.frameworks.contains_key(stack);
            if !declared {
                warnings.push(ValidationWarning {
                    subject: Some(e.id.to_string()),
                    message: format!(
                        "primary_stack '{stack}' is not a declared language or framework"
                    ),
                });
            }
        }
    }

    for t in &roster.tasks {
        let eligible = screen(&roster.evaluators, t, policy).eligible.len();
        if eligible == 0 {
            warnings.push(ValidationWarning {
                subject: Some(t.id.to_string()),
                message: "no eligible evaluators; task is unassignable".into(),
            });
        } else if eligible < min_raters {
            warnings.push(ValidationWarning {
                subject: Some(t.id.to_string()),
                message: format!(
                    "only {eligible} eligible evaluator(s), below min_raters = {min_raters}"
                ),
            });
        }
    }

    warnings
}
