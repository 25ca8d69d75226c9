//! The `jurybox audit` command.
//!
//! Replays a score batch through the engine in submission order and writes
//! the resulting integrity report.

use std::path::PathBuf;

use anyhow::Result;
use chrono::Utc;
use comfy_table::{Cell, Color, Table};

use jurybox_backends::load_config_from;
use jurybox_core::engine::ReviewEngine;
use jurybox_core::error::EngineError;
use jurybox_core::model::TrustState;
use jurybox_core::parser::{parse_score_batch, ScoreEntry};
use jurybox_core::report::{IntegrityReport, RejectedSubmission};
use jurybox_report::html::write_html_report;

pub struct AuditArgs {
    pub roster: PathBuf,
    pub scores: PathBuf,
    pub output: PathBuf,
    pub format: String,
    pub baseline: Option<PathBuf>,
    pub threshold: f64,
    pub fail_on_drift: bool,
    pub config: Option<PathBuf>,
}

pub async fn execute(args: AuditArgs) -> Result<()> {
    anyhow::ensure!(
        args.threshold >= 0.0,
        "threshold must be non-negative"
    );

    let config = load_config_from(args.config.as_deref())?;
    let roster = super::load_roster(&args.roster)?;
    let mut entries = parse_score_batch(&args.scores)?;
    let engine = super::build_engine(&config, roster).await?;

    // Undated rows keep their file order after the dated ones.
    entries.sort_by_key(|e| (e.submitted_at.is_none(), e.submitted_at));

    eprintln!(
        "jurybox v{} — replaying {} score(s)",
        env!("CARGO_PKG_VERSION"),
        entries.len()
    );

    let mut rejections = Vec::new();
    let mut accepted = 0usize;
    for entry in &entries {
        match replay(&engine, entry).await {
            Ok(()) => accepted += 1,
            Err(e) => {
                tracing::warn!(
                    task = %entry.task_id,
                    evaluator = %entry.evaluator_id,
                    "submission rejected: {e}"
                );
                rejections.push(RejectedSubmission {
                    task_id: entry.task_id.clone(),
                    evaluator_id: entry.evaluator_id.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }

    let mut report = engine.integrity_report().await?;
    report.rejections = rejections;

    eprintln!(
        "\nReplay complete: {accepted}/{} accepted, {} rejected",
        entries.len(),
        report.rejections.len()
    );
    print_summary(&report);

    std::fs::create_dir_all(&args.output)?;
    let timestamp = report.created_at.format("%Y-%m-%dT%H%M%S");

    let formats: Vec<&str> = if args.format == "all" {
        vec!["json", "html", "markdown"]
    } else {
        args.format.split(',').map(|s| s.trim()).collect()
    };

    for fmt in &formats {
        match *fmt {
            "json" => {
                let path = args.output.join(format!("integrity-{timestamp}.json"));
                report.save_json(&path)?;
                eprintln!("Report saved to: {}", path.display());
            }
            "html" => {
                let path = args.output.join(format!("integrity-{timestamp}.html"));
                write_html_report(&report, &path)?;
                eprintln!("HTML report: {}", path.display());
            }
            "markdown" | "md" => {
                let path = args.output.join(format!("integrity-{timestamp}.md"));
                std::fs::write(&path, report.to_markdown())?;
                eprintln!("Markdown report: {}", path.display());
            }
            _ => {
                eprintln!("Unknown format: {fmt}");
            }
        }
    }

    if let Some(baseline_path) = &args.baseline {
        let baseline = IntegrityReport::load_json(baseline_path)?;
        let drift = report.compare(&baseline, args.threshold);
        println!("\n{}", drift.to_markdown());
        if args.fail_on_drift && drift.has_drift() {
            std::process::exit(1);
        }
    }

    Ok(())
}

/// Place the evaluator on the task if needed, then submit the score.
async fn replay(engine: &ReviewEngine, entry: &ScoreEntry) -> Result<(), EngineError> {
    let at = entry.submitted_at.unwrap_or_else(Utc::now);
    let assignment = engine
        .place_assignment(&entry.task_id, &entry.evaluator_id, at)
        .await?;
    engine
        .submit_score_at(assignment.id, entry.scores, &entry.justification, at)
        .await?;
    Ok(())
}

fn print_summary(report: &IntegrityReport) {
    let mut table = Table::new();
    table.set_header(vec![
        "Evaluator",
        "Trust",
        "Calibration",
        "Agreement",
        "Rated",
    ]);

    for e in &report.evaluators {
        let trust = Cell::new(e.trust_state).fg(match e.trust_state {
            TrustState::Active => Color::Green,
            TrustState::UnderReview => Color::Yellow,
            TrustState::Suspended => Color::Red,
        });
        table.add_row(vec![
            Cell::new(&e.evaluator_id),
            trust,
            Cell::new(format!("{:.3}", e.calibration_score)),
            Cell::new(format!("{:.0}%", e.agreement_rate * 100.0)),
            Cell::new(e.rated_tasks),
        ]);
    }
    eprintln!("\n{table}");

    let mut tasks = Table::new();
    tasks.set_header(vec!["Task", "Scored", "Consensus", "Bias offset"]);
    for t in &report.tasks {
        tasks.add_row(vec![
            Cell::new(&t.task_id),
            Cell::new(format!("{}/{}", t.scored, t.assigned)),
            Cell::new(
                t.consensus
                    .map(|c| format!("{c:.1}"))
                    .unwrap_or_else(|| "-".into()),
            ),
            Cell::new(
                t.adjustment
                    .as_ref()
                    .map(|a| format!("{:+.1}", a.offset))
                    .unwrap_or_else(|| "-".into()),
            ),
        ]);
    }
    eprintln!("{tasks}");

    let open = report.open_flags();
    if open > 0 {
        eprintln!("{open} open flag(s) awaiting review");
    }
}
