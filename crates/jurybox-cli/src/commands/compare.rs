//! The `jurybox compare` command.

use std::path::PathBuf;

use anyhow::Result;

use jurybox_core::report::IntegrityReport;

pub fn execute(
    baseline_path: PathBuf,
    current_path: PathBuf,
    threshold: f64,
    fail_on_drift: bool,
    format: String,
) -> Result<()> {
    anyhow::ensure!(threshold >= 0.0, "threshold must be non-negative");

    let baseline = IntegrityReport::load_json(&baseline_path)?;
    let current = IntegrityReport::load_json(&current_path)?;

    let drift = current.compare(&baseline, threshold);

    match format.as_str() {
        "markdown" | "md" => {
            println!("{}", drift.to_markdown());
        }
        "json" => {
            println!("{}", serde_json::to_string_pretty(&drift)?);
        }
        _ => {
            println!(
                "Comparison: {} drifted, {} improved, {} unchanged",
                drift.drifted.len(),
                drift.improved.len(),
                drift.unchanged
            );

            if !drift.drifted.is_empty() {
                println!("\nDrifted:");
                for c in &drift.drifted {
                    println!(
                        "  {} {:.3} -> {:.3} ({:+.3}) [{} -> {}]",
                        c.evaluator_id,
                        c.baseline_score,
                        c.current_score,
                        c.delta,
                        c.baseline_state,
                        c.current_state
                    );
                }
            }

            if !drift.improved.is_empty() {
                println!("\nImproved:");
                for c in &drift.improved {
                    println!(
                        "  {} {:.3} -> {:.3} ({:+.3})",
                        c.evaluator_id, c.baseline_score, c.current_score, c.delta
                    );
                }
            }

            if drift.new_evaluators > 0 {
                println!("\n{} new evaluator(s)", drift.new_evaluators);
            }
        }
    }

    if fail_on_drift && drift.has_drift() {
        std::process::exit(1);
    }

    Ok(())
}
