//! The `jurybox validate` command.

use std::path::PathBuf;

use anyhow::Result;

use jurybox_backends::load_config_from;

pub fn execute(roster_path: PathBuf, config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config_from(config_path.as_deref())?;
    let roster = super::load_roster(&roster_path)?;

    println!(
        "Roster: {} ({} evaluators, {} tasks)",
        roster_path.display(),
        roster.evaluators.len(),
        roster.tasks.len()
    );

    let warnings = jurybox_core::parser::validate_roster(
        &roster,
        &config.eligibility,
        config.scheduler.min_raters,
    );
    for w in &warnings {
        let prefix = w
            .subject
            .as_ref()
            .map(|id| format!("  [{id}]"))
            .unwrap_or_else(|| "  ".to_string());
        println!("{prefix} WARNING: {}", w.message);
    }

    if warnings.is_empty() {
        println!("Roster valid.");
    } else {
        println!("\n{} warning(s) found.", warnings.len());
    }

    Ok(())
}
