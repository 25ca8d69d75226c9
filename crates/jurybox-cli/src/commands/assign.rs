//! The `jurybox assign` command.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use comfy_table::{Cell, Color, Table};
use serde::Serialize;

use jurybox_backends::load_config_from;
use jurybox_core::flags::FlagFilter;
use jurybox_core::model::{Assignment, TaskId};
use jurybox_core::scheduler::Coverage;

/// The assignment plan written by `--output`.
#[derive(Debug, Serialize)]
struct AssignmentPlan {
    created_at: DateTime<Utc>,
    tasks: Vec<PlannedTask>,
}

#[derive(Debug, Serialize)]
struct PlannedTask {
    task_id: TaskId,
    #[serde(skip_serializing_if = "Option::is_none")]
    coverage: Option<Coverage>,
    assignments: Vec<Assignment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

pub async fn execute(
    roster_path: PathBuf,
    output: Option<PathBuf>,
    config_path: Option<PathBuf>,
) -> Result<()> {
    let config = load_config_from(config_path.as_deref())?;
    let roster = super::load_roster(&roster_path)?;
    let engine = super::build_engine(&config, roster).await?;

    let now = Utc::now();
    let results = engine.assign_all(now).await?;

    let mut table = Table::new();
    table.set_header(vec!["Task", "Evaluator", "Token", "Starts", "Coverage"]);

    let mut plan = AssignmentPlan {
        created_at: now,
        tasks: Vec::new(),
    };
    let mut failed = 0usize;

    for (task_id, result) in results {
        match result {
            Ok(outcome) => {
                let coverage_cell = |c: Coverage| match c {
                    Coverage::Full => Cell::new("full").fg(Color::Green),
                    Coverage::UnderCovered { assigned, required } => {
                        Cell::new(format!("{assigned}/{required}")).fg(Color::Yellow)
                    }
                };
                for a in &outcome.assignments {
                    let offset = (a.starts_at - now).num_minutes();
                    table.add_row(vec![
                        Cell::new(&task_id),
                        Cell::new(&a.evaluator_id),
                        Cell::new(a.token.as_ref().map(|t| t.as_str()).unwrap_or("-")),
                        Cell::new(format!("+{offset}m")),
                        coverage_cell(outcome.coverage),
                    ]);
                }
                plan.tasks.push(PlannedTask {
                    task_id,
                    coverage: Some(outcome.coverage),
                    assignments: outcome.assignments,
                    error: None,
                });
            }
            Err(e) => {
                failed += 1;
                table.add_row(vec![
                    Cell::new(&task_id),
                    Cell::new("-"),
                    Cell::new("-"),
                    Cell::new("-"),
                    Cell::new(e.to_string()).fg(Color::Red),
                ]);
                plan.tasks.push(PlannedTask {
                    task_id,
                    coverage: None,
                    assignments: Vec::new(),
                    error: Some(e.to_string()),
                });
            }
        }
    }

    println!("{table}");

    let flags = engine.list_flags(&FlagFilter::Open).await;
    println!(
        "\n{} task(s) planned, {} unassignable, {} open flag(s)",
        plan.tasks.len() - failed,
        failed,
        flags.len()
    );

    if let Some(path) = output {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&plan).context("failed to serialize plan")?;
        std::fs::write(&path, json)
            .with_context(|| format!("failed to write plan to {}", path.display()))?;
        eprintln!("Plan saved to: {}", path.display());
    }

    Ok(())
}
