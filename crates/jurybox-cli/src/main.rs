//! jurybox CLI — the user-facing command-line interface.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "jurybox",
    version,
    about = "Evaluator assignment and scoring integrity engine"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate roster TOML files
    Validate {
        /// Path to roster file or directory
        #[arg(long)]
        roster: PathBuf,

        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Show which evaluators may score which tasks
    Eligibility {
        /// Path to roster file or directory
        #[arg(long)]
        roster: PathBuf,

        /// Only show this task, with the full rejection reason
        #[arg(long)]
        task: Option<String>,

        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Assign evaluators to every task in a roster
    Assign {
        /// Path to roster file or directory
        #[arg(long)]
        roster: PathBuf,

        /// Write the assignment plan as JSON to this file
        #[arg(long)]
        output: Option<PathBuf>,

        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Replay a score batch through the engine and write an integrity report
    Audit {
        /// Path to roster file or directory
        #[arg(long)]
        roster: PathBuf,

        /// Score batch TOML
        #[arg(long)]
        scores: PathBuf,

        /// Output directory
        #[arg(long, default_value = "./jurybox-results")]
        output: PathBuf,

        /// Output format: json, html, markdown, all
        #[arg(long, default_value = "json")]
        format: String,

        /// Earlier report JSON to check calibration drift against
        #[arg(long)]
        baseline: Option<PathBuf>,

        /// Calibration drift threshold
        #[arg(long, default_value = "0.05")]
        threshold: f64,

        /// Exit code 1 if calibration drifted past the threshold
        #[arg(long)]
        fail_on_drift: bool,

        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Compare calibration between two integrity reports
    Compare {
        /// Baseline report JSON
        #[arg(long)]
        baseline: PathBuf,

        /// Current report JSON
        #[arg(long)]
        current: PathBuf,

        /// Calibration drift threshold
        #[arg(long, default_value = "0.05")]
        threshold: f64,

        /// Exit code 1 if calibration drifted past the threshold
        #[arg(long)]
        fail_on_drift: bool,

        /// Output format: text, json, markdown
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Create starter config, roster and score batch
    Init,
}

#[tokio::main]
async fn main() {
    let filter = match "jurybox=info".parse::<tracing_subscriber::filter::Directive>() {
        Ok(directive) => tracing_subscriber::EnvFilter::from_default_env().add_directive(directive),
        Err(_) => tracing_subscriber::EnvFilter::from_default_env(),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Validate { roster, config } => commands::validate::execute(roster, config),
        Commands::Eligibility {
            roster,
            task,
            config,
        } => commands::eligibility::execute(roster, task, config),
        Commands::Assign {
            roster,
            output,
            config,
        } => commands::assign::execute(roster, output, config).await,
        Commands::Audit {
            roster,
            scores,
            output,
            format,
            baseline,
            threshold,
            fail_on_drift,
            config,
        } => {
            commands::audit::execute(commands::audit::AuditArgs {
                roster,
                scores,
                output,
                format,
                baseline,
                threshold,
                fail_on_drift,
                config,
            })
            .await
        }
        Commands::Compare {
            baseline,
            current,
            threshold,
            fail_on_drift,
            format,
        } => commands::compare::execute(baseline, current, threshold, fail_on_drift, format),
        Commands::Init => commands::init::execute(),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}
