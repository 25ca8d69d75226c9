pub mod assign;
pub mod audit;
pub mod compare;
pub mod eligibility;
pub mod init;
pub mod validate;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use jurybox_backends::{create_sink, JsonFileStore, JuryboxConfig};
use jurybox_core::engine::ReviewEngine;
use jurybox_core::parser::Roster;
use jurybox_core::store::{CompetencyStore, MemoryStore};

/// Load a roster and refuse one with nothing in it.
fn load_roster(path: &Path) -> Result<Roster> {
    let roster = jurybox_core::parser::load_roster(path)?;
    anyhow::ensure!(
        !roster.evaluators.is_empty() || !roster.tasks.is_empty(),
        "roster {} defines no evaluators or tasks",
        path.display()
    );
    Ok(roster)
}

/// Build an engine over the configured store, seeded with `roster`.
/// Ledgers saved in a state file by earlier runs are reloaded.
async fn build_engine(config: &JuryboxConfig, roster: Roster) -> Result<ReviewEngine> {
    let store: Arc<dyn CompetencyStore> = match &config.state_file {
        Some(path) => Arc::new(
            JsonFileStore::open_with_roster(path, roster.evaluators, roster.tasks)
                .await
                .with_context(|| format!("failed to open state file {}", path.display()))?,
        ),
        None => Arc::new(MemoryStore::with_roster(roster.evaluators, roster.tasks)),
    };

    let mut engine = ReviewEngine::new(store, config.engine_config());
    engine
        .restore()
        .await
        .context("failed to restore task ledgers")?;
    if let Some(sink) = create_sink(&config.notify)? {
        tracing::info!(sink = sink.name(), "mirroring flags");
        engine = engine.with_sink(sink);
    }
    Ok(engine)
}
