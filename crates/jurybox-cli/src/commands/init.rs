//! The `jurybox init` command.

use std::path::Path;

use anyhow::Result;

pub fn execute() -> Result<()> {
    write_once(Path::new("jurybox.toml"), SAMPLE_CONFIG)?;

    std::fs::create_dir_all("rosters")?;
    write_once(Path::new("rosters/example.toml"), EXAMPLE_ROSTER)?;

    std::fs::create_dir_all("scores")?;
    write_once(Path::new("scores/example.toml"), EXAMPLE_SCORES)?;

    println!("\nNext steps:");
    println!("  1. Edit jurybox.toml to tune thresholds and set a webhook");
    println!("  2. Run: jurybox validate --roster rosters/example.toml");
    println!("  3. Run: jurybox assign --roster rosters/example.toml");
    println!("  4. Run: jurybox audit --roster rosters/example.toml --scores scores/example.toml");

    Ok(())
}

fn write_once(path: &Path, content: &str) -> Result<()> {
    if path.exists() {
        println!("{} already exists, skipping.", path.display());
    } else {
        std::fs::write(path, content)?;
        println!("Created {}", path.display());
    }
    Ok(())
}

const SAMPLE_CONFIG: &str = r#"# jurybox configuration
#
# Every threshold below is a placeholder; tune it against your own data.

# Persist trust state and calibration between runs.
# state_file = "jurybox-state.json"

[eligibility]
# Hardest difficulty an evaluator under review may take. Remove to close all tasks.
under_review_max_difficulty = "medium"
niche_domain_floor = "proficient"

[scheduler]
min_raters = 2
stagger_secs = 900
require_diversity = true

[calibration]
consensus = "median"
smoothing = 0.3
tolerance = 0.1
deviation_threshold = 0.15
escalate_after = 3
suspend_after = 3
recover_after = 3

[bias]
margin = 5.0
window = 10
min_tasks = 3

[collusion]
min_shared_tasks = 5
correlation_threshold = 0.95
max_timing_gap_secs = 120
min_tight_tasks = 3

[notify]
# webhook_url = "${JURYBOX_WEBHOOK_URL}"
# token = "${JURYBOX_WEBHOOK_TOKEN}"
"#;

const EXAMPLE_ROSTER: &str = r#"# Example jurybox roster: five evaluators, three tasks.

[[evaluators]]
id = "alice"
name = "Alice"
level = "senior"
primary_stack = "rust"

[evaluators.languages]
rust = "expert"
python = "proficient"

[evaluators.domains]
web = "proficient"
bots = "familiar"

[[evaluators]]
id = "bob"
name = "Bob"
level = "middle"

[evaluators.languages]
go = "expert"
rust = "proficient"

[evaluators.domains]
web = "proficient"

[[evaluators]]
id = "carol"
name = "Carol"
level = "senior"

[evaluators.languages]
python = "expert"

[evaluators.frameworks]
django = "expert"

[evaluators.domains]
web = "expert"
ml = "proficient"

[[evaluators]]
id = "dave"
name = "Dave"
level = "junior"

[evaluators.languages]
python = "proficient"
rust = "used"

[evaluators.frameworks]
django = "familiar"

[evaluators.domains]
web = "familiar"

[[evaluators]]
id = "erin"
name = "Erin"
level = "middle"

[evaluators.languages]
typescript = "expert"
rust = "proficient"

[evaluators.domains]
bots = "proficient"
web = "proficient"

[[tasks]]
id = "rate-limiter"
title = "Token bucket rate limiter"
difficulty = "hard"
language = "rust"
domain = "web"

[[tasks]]
id = "todo-api"
title = "Todo REST API"
difficulty = "easy"
language = "python"
framework = "django"
domain = "web"

[[tasks]]
id = "mod-bot"
title = "Discord moderation bot"
difficulty = "medium"
category = "niche"
language = "typescript"
domain = "bots"
"#;

const EXAMPLE_SCORES: &str = r#"# Example score batch. Dimension maxima: functionality 35, completeness 20,
# quality 25, edge_cases 15, performance 5.

[[scores]]
task = "rate-limiter"
evaluator = "alice"
functionality = 30
completeness = 16
quality = 20
edge_cases = 10
performance = 4
justification = "Correct refill logic; no burst test."
submitted_at = "2026-03-02T10:00:00Z"

[[scores]]
task = "rate-limiter"
evaluator = "bob"
functionality = 28
completeness = 15
quality = 18
edge_cases = 9
performance = 4
justification = "Works, clock handling is fragile."
submitted_at = "2026-03-02T11:30:00Z"

[[scores]]
task = "rate-limiter"
evaluator = "erin"
functionality = 31
completeness = 17
quality = 19
edge_cases = 11
performance = 5
justification = "Solid, well tested."
submitted_at = "2026-03-02T13:00:00Z"

[[scores]]
task = "rate-limiter"
evaluator = "dave"
functionality = 35
completeness = 20
quality = 25
edge_cases = 15
performance = 5
justification = "Perfect."
submitted_at = "2026-03-02T13:05:00Z"

[[scores]]
task = "todo-api"
evaluator = "carol"
functionality = 25
completeness = 14
quality = 15
edge_cases = 6
performance = 3
justification = "Missing pagination."
submitted_at = "2026-03-03T09:00:00Z"

[[scores]]
task = "todo-api"
evaluator = "dave"
functionality = 27
completeness = 15
quality = 17
edge_cases = 7
performance = 3
justification = "Clean views."
submitted_at = "2026-03-03T09:40:00Z"
"#;
