//! Configuration management for orgdir services.
//!
//! Configuration is loaded from (in priority order):
//! 1. Environment variables (ORGDIR__ prefix, `__` separated)
//! 2. Config file (orgdir.toml)
//! 3. Defaults

use serde::Deserialize;

use crate::error::DirectoryError;

/// Top-level directory configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DirectoryConfig {
    #[serde(default)]
    pub store: StoreSettings,

    #[serde(default)]
    pub ids: IdSettings,

    #[serde(default)]
    pub live: LiveSettings,

    /// Load the sample directory on startup.
    #[serde(default = "default_true")]
    pub seed: bool,
}

/// Persistence settings.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreSettings {
    /// How long opening a transaction waits for the writer gate.
    #[serde(default = "default_writer_timeout")]
    pub writer_timeout_ms: u64,
}

/// Id allocation settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IdSettings {
    /// First value handed out by the process-wide id counter.
    #[serde(default)]
    pub start: u64,
}

/// Live connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct LiveSettings {
    /// Bound of each connection's notice channel.
    #[serde(default = "default_notice_capacity")]
    pub notice_capacity: usize,
}

fn default_true() -> bool {
    true
}

fn default_writer_timeout() -> u64 {
    5000
}

fn default_notice_capacity() -> usize {
    64
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            writer_timeout_ms: default_writer_timeout(),
        }
    }
}

impl Default for LiveSettings {
    fn default() -> Self {
        Self {
            notice_capacity: default_notice_capacity(),
        }
    }
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            store: StoreSettings::default(),
            ids: IdSettings::default(),
            live: LiveSettings::default(),
            seed: default_true(),
        }
    }
}

impl DirectoryConfig {
    /// Load from `<file_prefix>.toml` (optional) overlaid with `ORGDIR__*`
    /// environment variables.
    pub fn load(file_prefix: &str) -> Result<Self, DirectoryError> {
        let cfg = config::Config::builder()
            .add_source(config::File::with_name(file_prefix).required(false))
            .add_source(
                config::Environment::with_prefix("ORGDIR")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let loaded: Self = cfg.try_deserialize()?;
        tracing::debug!(
            writer_timeout_ms = loaded.store.writer_timeout_ms,
            notice_capacity = loaded.live.notice_capacity,
            id_start = loaded.ids.start,
            "Configuration loaded"
        );
        Ok(loaded)
    }
}
