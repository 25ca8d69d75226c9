//! The `jurybox eligibility` command.

use std::path::PathBuf;

use anyhow::Result;
use comfy_table::{Cell, Color, Table};

use jurybox_backends::load_config_from;
use jurybox_core::eligibility::{check_eligibility, screen};
use jurybox_core::model::TaskId;

pub fn execute(
    roster_path: PathBuf,
    task: Option<String>,
    config_path: Option<PathBuf>,
) -> Result<()> {
    let config = load_config_from(config_path.as_deref())?;
    let roster = super::load_roster(&roster_path)?;
    let policy = &config.eligibility;

    if let Some(task_id) = task {
        let task_id = TaskId::new(task_id);
        let Some(task) = roster.task(&task_id) else {
            anyhow::bail!("task '{task_id}' not found in roster");
        };

        let mut table = Table::new();
        table.set_header(vec!["Evaluator", "Level", "Trust", "Result"]);
        let screening = screen(&roster.evaluators, task, policy);
        for e in &roster.evaluators {
            let result = match screening.rejected.iter().find(|(id, _)| *id == e.id) {
                Some((_, reason)) => Cell::new(reason.to_string()).fg(Color::Red),
                None => Cell::new("eligible").fg(Color::Green),
            };
            table.add_row(vec![
                Cell::new(&e.id),
                Cell::new(e.level),
                Cell::new(e.trust_state),
                result,
            ]);
        }

        println!(
            "Task {} ({}, {} {}): {}/{} eligible",
            task.id,
            task.difficulty,
            task.language.name,
            task.category,
            screening.eligible.len(),
            roster.evaluators.len()
        );
        println!("{table}");
        return Ok(());
    }

    // Full matrix: one column per task, failing gate in each refused cell.
    let mut table = Table::new();
    let mut header = vec![Cell::new("Evaluator")];
    header.extend(roster.tasks.iter().map(|t| Cell::new(&t.id)));
    table.set_header(header);

    for e in &roster.evaluators {
        let mut row = vec![Cell::new(&e.id)];
        for t in &roster.tasks {
            row.push(match check_eligibility(e, t, policy) {
                Ok(()) => Cell::new("ok").fg(Color::Green),
                Err(reason) => Cell::new(reason.gate()).fg(Color::Red),
            });
        }
        table.add_row(row);
    }

    let mut footer = vec![Cell::new("eligible")];
    footer.extend(roster.tasks.iter().map(|t| {
        let count = screen(&roster.evaluators, t, policy).eligible.len();
        let cell = Cell::new(count);
        if count < config.scheduler.min_raters {
            cell.fg(Color::Yellow)
        } else {
            cell
        }
    }));
    table.add_row(footer);

    println!("{table}");
    Ok(())
}
