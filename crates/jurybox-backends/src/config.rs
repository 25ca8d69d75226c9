//! Configuration loading and backend factory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use jurybox_core::bias::BiasPolicy;
use jurybox_core::calibration::CalibrationPolicy;
use jurybox_core::collusion::CollusionPolicy;
use jurybox_core::eligibility::EligibilityPolicy;
use jurybox_core::engine::EngineConfig;
use jurybox_core::flags::FlagSink;
use jurybox_core::scheduler::SchedulerPolicy;

use crate::webhook::{WebhookSink, DEFAULT_TIMEOUT_SECS};

/// Where review flags are mirrored to.
///
/// Note: Custom Debug impl masks the token to prevent accidental exposure in logs.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Webhook receiving every newly raised flag. Unset disables delivery.
    pub webhook_url: Option<String>,
    /// Bearer token sent with each webhook request.
    pub token: Option<String>,
    /// Request timeout in seconds.
    pub timeout_secs: Option<u64>,
}

impl std::fmt::Debug for NotifyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotifyConfig")
            .field("webhook_url", &self.webhook_url)
            .field("token", &self.token.as_ref().map(|_| "***"))
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Top-level jurybox configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JuryboxConfig {
    pub eligibility: EligibilityPolicy,
    pub scheduler: SchedulerPolicy,
    pub calibration: CalibrationPolicy,
    pub bias: BiasPolicy,
    pub collusion: CollusionPolicy,
    pub notify: NotifyConfig,
    /// Persist the competency store to this JSON file. Unset keeps
    /// everything in memory for the duration of one command.
    pub state_file: Option<PathBuf>,
}

impl JuryboxConfig {
    /// The policy tables as an engine configuration.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            eligibility: self.eligibility.clone(),
            scheduler: self.scheduler.clone(),
            calibration: self.calibration.clone(),
            bias: self.bias.clone(),
            collusion: self.collusion.clone(),
        }
    }
}

/// Resolve environment variable references like `${VAR_NAME}` in a string.
fn resolve_env_vars(s: &str) -> String {
    let mut result = s.to_string();
    while let Some(start) = result.find("${") {
        if let Some(end) = result[start..].find('}') {
            let var_name = &result[start + 2..start + end];
            let value = std::env::var(var_name).unwrap_or_default();
            result = format!(
                "{}{}{}",
                &result[..start],
                value,
                &result[start + end + 1..]
            );
        } else {
            break;
        }
    }
    result
}

/// Load configuration from well-known paths.
///
/// Search order:
/// 1. `jurybox.toml` in the current directory
/// 2. `~/.config/jurybox/config.toml`
///
/// Environment variable overrides: `JURYBOX_WEBHOOK_URL`,
/// `JURYBOX_WEBHOOK_TOKEN`, `JURYBOX_STATE_FILE`.
pub fn load_config() -> Result<JuryboxConfig> {
    load_config_from(None)
}

/// Load config from an explicit path, or search the default locations.
pub fn load_config_from(path: Option<&Path>) -> Result<JuryboxConfig> {
    let config_path = if let Some(p) = path {
        if p.exists() {
            Some(p.to_path_buf())
        } else {
            anyhow::bail!("config file not found: {}", p.display());
        }
    } else {
        let local = PathBuf::from("jurybox.toml");
        if local.exists() {
            Some(local)
        } else {
            dirs_path()
                .map(|home| home.join("config.toml"))
                .filter(|global| global.exists())
        }
    };

    let config = match config_path {
        Some(path) => {
            tracing::debug!(path = %path.display(), "loading config");
            parse_config(&path)?
        }
        None => JuryboxConfig::default(),
    };

    let config = finish(config, |key| std::env::var(key).ok());
    config
        .scheduler
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid [scheduler] table: {e}"))?;
    Ok(config)
}

fn parse_config(path: &Path) -> Result<JuryboxConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config: {}", path.display()))?;
    toml::from_str::<JuryboxConfig>(&content)
        .with_context(|| format!("failed to parse config: {}", path.display()))
}

/// Apply env overrides, then resolve `${VAR}` references.
fn finish(mut config: JuryboxConfig, env: impl Fn(&str) -> Option<String>) -> JuryboxConfig {
    if let Some(url) = env("JURYBOX_WEBHOOK_URL") {
        config.notify.webhook_url = Some(url);
    }
    if let Some(token) = env("JURYBOX_WEBHOOK_TOKEN") {
        config.notify.token = Some(token);
    }
    if let Some(state) = env("JURYBOX_STATE_FILE") {
        config.state_file = Some(PathBuf::from(state));
    }

    config.notify.webhook_url = config
        .notify
        .webhook_url
        .as_deref()
        .map(resolve_env_vars)
        .filter(|u| !u.is_empty());
    config.notify.token = config
        .notify
        .token
        .as_deref()
        .map(resolve_env_vars)
        .filter(|t| !t.is_empty());
    config.state_file = config
        .state_file
        .as_ref()
        .map(|p| PathBuf::from(resolve_env_vars(&p.to_string_lossy())));
    config
}

fn dirs_path() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(|h| PathBuf::from(h).join(".config").join("jurybox"))
}

/// Create the flag sink described by `[notify]`, if any.
pub fn create_sink(notify: &NotifyConfig) -> Result<Option<Arc<dyn FlagSink>>> {
    let Some(url) = &notify.webhook_url else {
        return Ok(None);
    };
    let sink = WebhookSink::new(
        url.clone(),
        notify.token.clone(),
        notify.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
    )
    .context("failed to create webhook sink")?;
    Ok(Some(Arc::new(sink)))
}
