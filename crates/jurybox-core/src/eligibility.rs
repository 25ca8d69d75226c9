//! Eligibility matcher.
//!
//! A pure decision over an evaluator profile and a task requirement. The
//! gates run in a fixed order and the first failing gate is reported, so
//! the same inputs always yield the same answer.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::{
    Difficulty, EvaluatorId, EvaluatorProfile, ExperienceLevel, Proficiency, TaskCategory,
    TaskRequirement, TechKind, TrustState,
};

/// Tunable knobs for the matcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EligibilityPolicy {
    /// Hardest difficulty an evaluator under review may still take.
    /// `None` closes every task to evaluators under review.
    pub under_review_max_difficulty: Option<Difficulty>,
    /// Domain floor applied to niche tasks on top of the task's own minimum.
    pub niche_domain_floor: Proficiency,
}

impl Default for EligibilityPolicy {
    fn default() -> Self {
        Self {
            under_review_max_difficulty: Some(Difficulty::Medium),
            niche_domain_floor: Proficiency::Proficient,
        }
    }
}

/// The individual eligibility checks, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gate {
    Difficulty,
    Language,
    Framework,
    Domain,
    Trust,
}

impl fmt::Display for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Gate::Difficulty => write!(f, "difficulty"),
            Gate::Language => write!(f, "language"),
            Gate::Framework => write!(f, "framework"),
            Gate::Domain => write!(f, "domain"),
            Gate::Trust => write!(f, "trust"),
        }
    }
}

/// Why an evaluator was turned away.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "gate", rename_all = "lowercase")]
pub enum Ineligibility {
    Difficulty {
        level: ExperienceLevel,
        difficulty: Difficulty,
    },
    Language {
        technology: String,
        required: Proficiency,
        actual: Proficiency,
    },
    Framework {
        technology: String,
        required: Proficiency,
        actual: Proficiency,
    },
    Domain {
        technology: String,
        required: Proficiency,
        actual: Proficiency,
        niche: bool,
    },
    Trust {
        state: TrustState,
        difficulty: Difficulty,
    },
}

impl Ineligibility {
    pub fn gate(&self) -> Gate {
        match self {
            Ineligibility::Difficulty { .. } => Gate::Difficulty,
            Ineligibility::Language { .. } => Gate::Language,
            Ineligibility::Framework { .. } => Gate::Framework,
            Ineligibility::Domain { .. } => Gate::Domain,
            Ineligibility::Trust { .. } => Gate::Trust,
        }
    }
}

impl fmt::Display for Ineligibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ineligibility::Difficulty { level, difficulty } => {
                write!(f, "difficulty gate: {level} evaluator on {difficulty} task")
            }
            Ineligibility::Language {
                technology,
                required,
                actual,
            } => write!(
                f,
                "language gate: {technology} requires {required}, declared {actual}"
            ),
            Ineligibility::Framework {
                technology,
                required,
                actual,
            } => write!(
                f,
                "framework gate: {technology} requires {required}, declared {actual}"
            ),
            Ineligibility::Domain {
                technology,
                required,
                actual,
                niche,
            } => {
                let scope = if *niche { " (niche)" } else { "" };
                write!(
                    f,
                    "domain gate: {technology}{scope} requires {required}, declared {actual}"
                )
            }
            Ineligibility::Trust { state, difficulty } => {
                write!(f, "trust gate: {state} evaluator on {difficulty} task")
            }
        }
    }
}

/// Run every gate in order and report the first failure.
pub fn check_eligibility(
    evaluator: &EvaluatorProfile,
    task: &TaskRequirement,
    policy: &EligibilityPolicy,
) -> Result<(), Ineligibility> {
    if task.difficulty.is_advanced() && evaluator.level == ExperienceLevel::Junior {
        return Err(Ineligibility::Difficulty {
            level: evaluator.level,
            difficulty: task.difficulty,
        });
    }

    let actual = evaluator.proficiency(TechKind::Language, &task.language.name);
    if actual < task.language.min {
        return Err(Ineligibility::Language {
            technology: task.language.name.clone(),
            required: task.language.min,
            actual,
        });
    }

    if let Some(framework) = &task.framework {
        let actual = evaluator.proficiency(TechKind::Framework, &framework.name);
        if actual < framework.min {
            return Err(Ineligibility::Framework {
                technology: framework.name.clone(),
                required: framework.min,
                actual,
            });
        }
    }

    let niche = task.category == TaskCategory::Niche;
    let required = if niche {
        task.domain.min.max(policy.niche_domain_floor)
    } else {
        task.domain.min
    };
    let actual = evaluator.proficiency(TechKind::Domain, &task.domain.name);
    if actual < required {
        return Err(Ineligibility::Domain {
            technology: task.domain.name.clone(),
            required,
            actual,
            niche,
        });
    }

    let trusted = match evaluator.trust_state {
        TrustState::Active => true,
        TrustState::UnderReview => policy
            .under_review_max_difficulty
            .is_some_and(|max| task.difficulty <= max),
        TrustState::Suspended => false,
    };
    if !trusted {
        return Err(Ineligibility::Trust {
            state: evaluator.trust_state,
            difficulty: task.difficulty,
        });
    }

    Ok(())
}

/// Boolean form of [`check_eligibility`].
pub fn is_eligible(
    evaluator: &EvaluatorProfile,
    task: &TaskRequirement,
    policy: &EligibilityPolicy,
) -> bool {
    check_eligibility(evaluator, task, policy).is_ok()
}

/// Result of screening a whole roster against one task.
#[derive(Debug, Clone, Default)]
pub struct Screening<'a> {
    pub eligible: Vec<&'a EvaluatorProfile>,
    pub rejected: Vec<(EvaluatorId, Ineligibility)>,
}

/// Split a roster into eligible evaluators and rejections with reasons.
pub fn screen<'a>(
    evaluators: &'a [EvaluatorProfile],
    task: &TaskRequirement,
    policy: &EligibilityPolicy,
) -> Screening<'a> {
    let mut screening = Screening::default();
    for evaluator in evaluators {
        match check_eligibility(evaluator, task, policy) {
            Ok(()) => screening.eligible.push(evaluator),
            Err(reason) => {
                tracing::debug!(
                    evaluator = %evaluator.id,
                    task = %task.id,
                    gate = %reason.gate(),
                    "evaluator screened out"
                );
                screening.rejected.push((evaluator.id.clone(), reason));
            }
        }
    }
    screening
}
