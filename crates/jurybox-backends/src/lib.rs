//! jurybox-backends — configuration and pluggable backends.
//!
//! Loads `jurybox.toml`, provides a JSON-file [`CompetencyStore`] and a
//! webhook [`FlagSink`] for mirroring review flags.
//!
//! [`CompetencyStore`]: jurybox_core::store::CompetencyStore
//! [`FlagSink`]: jurybox_core::flags::FlagSink

pub mod config;
pub mod error;
pub mod file_store;
pub mod webhook;

pub use config::{create_sink, load_config, load_config_from, JuryboxConfig, NotifyConfig};
pub use error::NotifyError;
pub use file_store::JsonFileStore;
pub use webhook::WebhookSink;
