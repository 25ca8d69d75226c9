//! HTML report generator.
//!
//! Produces a self-contained HTML file with all CSS/JS inlined.

use anyhow::{Context, Result};
use std::path::Path;

use jurybox_core::model::TrustState;
use jurybox_core::report::{EvaluatorSummary, IntegrityReport};
use jurybox_core::scheduler::Coverage;

/// Escape a string for safe HTML insertion.
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

fn trust_class(state: TrustState) -> &'static str {
    match state {
        TrustState::Active => "pass",
        TrustState::UnderReview => "warn",
        TrustState::Suspended => "fail",
    }
}

fn fmt_opt(value: Option<f64>) -> String {
    value.map(|v| format!("{v:.1}")).unwrap_or_else(|| "-".into())
}

/// Generate an HTML report from an integrity report.
pub fn generate_html(report: &IntegrityReport) -> String {
    let mut html = String::new();

    html.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n");
    html.push_str("<meta charset=\"utf-8\">\n");
    html.push_str("<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n");
    html.push_str(&format!(
        "<title>jurybox integrity report {}</title>\n",
        report.created_at.format("%Y-%m-%d")
    ));
    html.push_str("<style>\n");
    html.push_str(CSS);
    html.push_str("</style>\n");
    html.push_str("</head>\n<body>\n");

    // Header
    html.push_str("<header>\n");
    html.push_str("<h1>jurybox integrity report</h1>\n");
    html.push_str(&format!(
        "<p class=\"meta\">Store: <strong>{}</strong> | {} tasks | {} evaluators | {} open flags | {}</p>\n",
        html_escape(&report.store),
        report.tasks.len(),
        report.evaluators.len(),
        report.open_flags(),
        report.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    html.push_str("</header>\n");

    // Calibration dashboard
    html.push_str("<section class=\"dashboard\">\n");
    html.push_str("<h2>Calibration</h2>\n");
    html.push_str("<p class=\"meta\">Lower is better. Bar colour follows trust state.</p>\n");
    if !report.evaluators.is_empty() {
        html.push_str(&generate_bar_chart(&report.evaluators));
    }
    html.push_str("<table class=\"summary\" id=\"evaluators\">\n");
    html.push_str("<thead><tr><th onclick=\"sortTable('evaluators', 0)\">Evaluator</th><th onclick=\"sortTable('evaluators', 1)\">Level</th><th onclick=\"sortTable('evaluators', 2)\">Stack</th><th onclick=\"sortTable('evaluators', 3)\">Trust</th><th onclick=\"sortTable('evaluators', 4)\">Calibration</th><th onclick=\"sortTable('evaluators', 5)\">Agreement</th><th onclick=\"sortTable('evaluators', 6)\">Rated</th><th onclick=\"sortTable('evaluators', 7)\">Open</th></tr></thead>\n");
    html.push_str("<tbody>\n");
    for e in &report.evaluators {
        html.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td><td class=\"{}\">{}</td><td>{:.3}</td><td>{:.0}%</td><td>{}</td><td>{}</td></tr>\n",
            html_escape(e.evaluator_id.as_str()),
            e.level,
            html_escape(e.strongest_stack.as_deref().unwrap_or("-")),
            trust_class(e.trust_state),
            e.trust_state,
            e.calibration_score,
            e.agreement_rate * 100.0,
            e.rated_tasks,
            e.open_assignments,
        ));
    }
    html.push_str("</tbody></table>\n");
    html.push_str("</section>\n");

    // Tasks
    html.push_str("<section class=\"results\">\n");
    html.push_str("<h2>Tasks</h2>\n");
    html.push_str("<table class=\"results-table\" id=\"tasks\">\n");
    html.push_str("<thead><tr><th onclick=\"sortTable('tasks', 0)\">Task</th><th onclick=\"sortTable('tasks', 1)\">Stack</th><th onclick=\"sortTable('tasks', 2)\">Difficulty</th><th onclick=\"sortTable('tasks', 3)\">Coverage</th><th onclick=\"sortTable('tasks', 4)\">Scored</th><th onclick=\"sortTable('tasks', 5)\">Consensus</th><th>Scores (raw / normalized)</th></tr></thead>\n");
    html.push_str("<tbody>\n");
    for t in &report.tasks {
        let (coverage_class, coverage_text) = match t.coverage {
            Some(Coverage::Full) => ("pass", format!("{}/{}", t.assigned, t.assigned)),
            Some(Coverage::UnderCovered { assigned, required }) => {
                ("fail", format!("{assigned}/{required}"))
            }
            None => ("warn", "unscheduled".to_string()),
        };
        let scores: Vec<String> = t
            .scores
            .iter()
            .map(|s| {
                let marker = if s.self_stack { "*" } else { "" };
                format!(
                    "{}{}: {} / {:.1}",
                    html_escape(s.evaluator_id.as_str()),
                    marker,
                    s.raw_total,
                    s.normalized_total
                )
            })
            .collect();
        html.push_str(&format!(
            "<tr><td title=\"{}\">{}</td><td>{}</td><td>{}</td><td class=\"{}\">{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
            html_escape(&t.title),
            html_escape(t.task_id.as_str()),
            html_escape(&t.stack),
            t.difficulty,
            coverage_class,
            coverage_text,
            t.scored,
            fmt_opt(t.consensus),
            scores.join("<br>"),
        ));
    }
    html.push_str("</tbody></table>\n");
    html.push_str("<p class=\"meta\">* self-stack evaluator</p>\n");
    html.push_str("</section>\n");

    // Flags
    if !report.flags.is_empty() {
        html.push_str("<section class=\"flags\">\n");
        html.push_str("<h2>Review queue</h2>\n");
        html.push_str("<table>\n");
        html.push_str("<thead><tr><th>Kind</th><th>Task</th><th>Evaluators</th><th>Raised</th><th>Status</th></tr></thead>\n");
        html.push_str("<tbody>\n");
        for f in &report.flags {
            let evaluators: Vec<String> = f
                .evaluators
                .iter()
                .map(|e| html_escape(e.as_str()))
                .collect();
            let (class, status) = if f.is_open() {
                ("warn", "open")
            } else {
                ("", "resolved")
            };
            html.push_str(&format!(
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td class=\"{}\">{}</td></tr>\n",
                f.kind.label(),
                html_escape(f.task_id.as_ref().map(|t| t.as_str()).unwrap_or("-")),
                evaluators.join(", "),
                f.raised_at.format("%Y-%m-%d %H:%M"),
                class,
                status,
            ));
        }
        html.push_str("</tbody></table>\n");
        html.push_str("</section>\n");
    }

    // Trust log
    if !report.transitions.is_empty() {
        html.push_str("<section class=\"transitions\">\n");
        html.push_str("<h2>Trust transitions</h2>\n<ul>\n");
        for t in &report.transitions {
            html.push_str(&format!(
                "<li>{} <code>{}</code>: {} &rarr; <span class=\"{}\">{}</span> ({})</li>\n",
                t.at.format("%Y-%m-%d %H:%M"),
                html_escape(t.evaluator_id.as_str()),
                t.from,
                trust_class(t.to),
                t.to,
                html_escape(&t.reason),
            ));
        }
        html.push_str("</ul>\n</section>\n");
    }

    if !report.rejections.is_empty() {
        html.push_str("<section class=\"rejections\">\n");
        html.push_str("<h2>Rejected submissions</h2>\n<ul>\n");
        for r in &report.rejections {
            html.push_str(&format!(
                "<li><code>{}</code> on <code>{}</code>: {}</li>\n",
                html_escape(r.evaluator_id.as_str()),
                html_escape(r.task_id.as_str()),
                html_escape(&r.reason),
            ));
        }
        html.push_str("</ul>\n</section>\n");
    }

    // Raw JSON
    html.push_str("<section class=\"raw-data\">\n");
    html.push_str("<details>\n<summary>Raw JSON Data</summary>\n");
    html.push_str("<pre><code>");
    html.push_str(
        &serde_json::to_string_pretty(report)
            .unwrap_or_default()
            .replace('&', "&amp;")
            .replace('<', "&lt;")
            .replace('>', "&gt;"),
    );
    html.push_str("</code></pre>\n");
    html.push_str("</details>\n</section>\n");

    html.push_str("<script>\n");
    html.push_str(JS);
    html.push_str("</script>\n");

    html.push_str("</body>\n</html>");
    html
}

/// Write an HTML report to a file.
pub fn write_html_report(report: &IntegrityReport, path: &Path) -> Result<()> {
    let html = generate_html(report);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, html)
        .with_context(|| format!("failed to write HTML report to {}", path.display()))?;
    Ok(())
}

fn generate_bar_chart(evaluators: &[EvaluatorSummary]) -> String {
    let bar_height = 24;
    let max_width = 400;
    let padding = 8;
    let label_width = 200;

    let total_height = evaluators.len() * (bar_height + padding) + padding;

    let mut svg = format!(
        "<svg width=\"{}\" height=\"{}\" xmlns=\"http://www.w3.org/2000/svg\">\n",
        label_width + max_width + 60,
        total_height
    );

    for (i, e) in evaluators.iter().enumerate() {
        let y = i * (bar_height + padding) + padding;
        let score = e.calibration_score.clamp(0.0, 1.0);
        let width = ((score * max_width as f64) as usize).max(2);

        let color = match e.trust_state {
            TrustState::Active => "#22c55e",
            TrustState::UnderReview => "#eab308",
            TrustState::Suspended => "#ef4444",
        };

        svg.push_str(&format!(
            "  <text x=\"{}\" y=\"{}\" font-size=\"14\" fill=\"currentColor\" text-anchor=\"end\" dominant-baseline=\"middle\">{}</text>\n",
            label_width - 10,
            y + bar_height / 2,
            html_escape(e.evaluator_id.as_str())
        ));
        svg.push_str(&format!(
            "  <rect x=\"{}\" y=\"{}\" width=\"{}\" height=\"{}\" fill=\"{}\" rx=\"4\"/>\n",
            label_width, y, width, bar_height, color
        ));
        svg.push_str(&format!(
            "  <text x=\"{}\" y=\"{}\" font-size=\"12\" fill=\"currentColor\" dominant-baseline=\"middle\">{:.3}</text>\n",
            label_width + width + 8,
            y + bar_height / 2,
            e.calibration_score
        ));
    }

    svg.push_str("</svg>\n");
    svg
}

const CSS: &str = r#"
:root { --bg: #fff; --fg: #1a1a1a; --border: #e5e7eb; --pass: #dcfce7; --warn: #fef9c3; --fail: #fde2e2; }
@media (prefers-color-scheme: dark) {
  :root { --bg: #111827; --fg: #f9fafb; --border: #374151; --pass: #064e3b; --warn: #713f12; --fail: #7f1d1d; }
}
body { font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', sans-serif; margin: 0; padding: 2rem; background: var(--bg); color: var(--fg); }
h1, h2 { margin-top: 2rem; }
.meta { color: #6b7280; }
table { border-collapse: collapse; width: 100%; margin: 1rem 0; }
th, td { border: 1px solid var(--border); padding: 0.5rem 1rem; text-align: left; vertical-align: top; }
th { background: var(--border); cursor: pointer; }
.pass { background: var(--pass); }
.warn { background: var(--warn); }
.fail { background: var(--fail); }
pre { overflow-x: auto; padding: 1rem; background: var(--border); border-radius: 8px; }
code { font-family: 'JetBrains Mono', 'Fira Code', monospace; font-size: 0.85rem; }
details { margin: 1rem 0; }
summary { cursor: pointer; font-weight: bold; }
svg { margin: 1rem 0; }
"#;

const JS: &str = r#"
function sortTable(id, col) {
  const table = document.getElementById(id);
  const tbody = table.querySelector('tbody');
  const rows = Array.from(tbody.querySelectorAll('tr'));
  const asc = table.dataset.sortCol == col && table.dataset.sortDir == 'asc' ? false : true;
  rows.sort((a, b) => {
    const va = a.cells[col].textContent;
    const vb = b.cells[col].textContent;
    return asc ? va.localeCompare(vb, undefined, {numeric: true}) : vb.localeCompare(va, undefined, {numeric: true});
  });
  table.dataset.sortCol = col;
  table.dataset.sortDir = asc ? 'asc' : 'desc';
  rows.forEach(r => tbody.appendChild(r));
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use jurybox_core::flags::{Flag, FlagKind};
    use jurybox_core::model::{
        AssignmentId, Difficulty, EvaluatorId, ExperienceLevel, TaskId,
    };
    use jurybox_core::report::{NormalizedScore, RejectedSubmission, TaskSummary};
    use jurybox_core::trust::{TrustSignal, TrustTransition};

    fn make_test_report() -> IntegrityReport {
        IntegrityReport {
            id: uuid::Uuid::nil(),
            created_at: chrono::Utc::now(),
            store: "memory".into(),
            tasks: vec![TaskSummary {
                task_id: TaskId::new("rate-limiter"),
                title: "Token <bucket> limiter".into(),
                difficulty: Difficulty::Hard,
                stack: "rust".into(),
                assigned: 2,
                scored: 2,
                coverage: Some(Coverage::Full),
                consensus: Some(72.5),
                adjustment: None,
                scores: vec![
                    NormalizedScore {
                        evaluator_id: EvaluatorId::new("alice"),
                        assignment_id: AssignmentId::new(),
                        raw_total: 80,
                        self_stack: true,
                        normalized_total: 80.0,
                    },
                    NormalizedScore {
                        evaluator_id: EvaluatorId::new("bob"),
                        assignment_id: AssignmentId::new(),
                        raw_total: 65,
                        self_stack: false,
                        normalized_total: 65.0,
                    },
                ],
            }],
            evaluators: vec![
                EvaluatorSummary {
                    evaluator_id: EvaluatorId::new("alice"),
                    name: "Alice".into(),
                    level: ExperienceLevel::Senior,
                    strongest_stack: Some("rust".into()),
                    trust_state: TrustState::Active,
                    calibration_score: 0.07,
                    agreement_rate: 0.9,
                    rated_tasks: 10,
                    open_assignments: 0,
                },
                EvaluatorSummary {
                    evaluator_id: EvaluatorId::new("bob"),
                    name: "Bob".into(),
                    level: ExperienceLevel::Middle,
                    strongest_stack: Some("go".into()),
                    trust_state: TrustState::UnderReview,
                    calibration_score: 0.21,
                    agreement_rate: 0.4,
                    rated_tasks: 8,
                    open_assignments: 1,
                },
            ],
            flags: vec![Flag::new(
                FlagKind::TrustTransition {
                    from: TrustState::Active,
                    to: TrustState::UnderReview,
                },
                None,
                vec![EvaluatorId::new("bob")],
            )],
            transitions: vec![TrustTransition {
                evaluator_id: EvaluatorId::new("bob"),
                from: TrustState::Active,
                to: TrustState::UnderReview,
                signal: TrustSignal::SustainedDeviation,
                reason: "calibration above threshold".into(),
                at: chrono::Utc::now(),
            }],
            rejections: vec![RejectedSubmission {
                task_id: TaskId::new("rate-limiter"),
                evaluator_id: EvaluatorId::new("mallory"),
                reason: "evaluator not found: mallory".into(),
            }],
        }
    }

    #[test]
    fn html_report_contains_required_elements() {
        let report = make_test_report();
        let html = generate_html(&report);

        assert!(html.contains("<html"));
        assert!(html.contains("</html>"));
        assert!(html.contains("rate-limiter"));
        assert!(html.contains("alice"));
        assert!(html.contains("under_review"));
        assert!(html.contains("trust_transition"));
        assert!(html.contains("Rejected submissions"));
        assert!(html.contains("72.5"));
        assert!(html.contains("<svg"));
    }

    #[test]
    fn unscheduled_task_is_labelled() {
        let mut report = make_test_report();
        report.tasks[0].coverage = None;
        let html = generate_html(&report);
        assert!(html.contains("<td class=\"warn\">unscheduled</td>"));
    }

    #[test]
    fn html_escapes_user_text() {
        let html = generate_html(&make_test_report());
        assert!(html.contains("Token &lt;bucket&gt; limiter"));
        assert!(!html.contains("Token <bucket> limiter"));
    }

    #[test]
    fn bar_chart_has_one_bar_per_evaluator() {
        let report = make_test_report();
        let svg = generate_bar_chart(&report.evaluators);
        assert_eq!(svg.matches("<rect").count(), 2);
        assert!(svg.contains("#eab308"));
    }

    #[test]
    fn html_report_write_to_file() {
        let report = make_test_report();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("report.html");

        write_html_report(&report, &path).unwrap();
        assert!(path.exists());

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("<html"));
    }
}
