use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::cli::Cli;
use crate::constant::{DEFAULT_DEBOUNCE_MS, DEFAULT_INTEGRITY_INTERVAL_SECS};

#[derive(Debug, Error)]
pub enum ConfigError {
    /// The user's home directory could not be determined and no explicit
    /// mods directory was given.
    #[error(
        "could not determine home directory location! \
        please specify the mods directory using --mods-dir"
    )]
    CouldNotDetermineHomeDirectory,
}

/// Startup configuration assembled from CLI flags and defaults. This is not
/// a config-file loader (that remains an external collaborator per the
/// spec's Non-goals) — it is just the in-process settings needed to start
/// the daemon before the manifest itself can be read.
#[derive(Debug, Clone)]
pub struct StartupConfig {
    /// Root directory holding the manifest and user-dropped mod files.
    mods_root: PathBuf,
    /// Log level to use until the manifest's `settings.log_level` applies.
    log_level: String,
    /// Watcher debounce window, in milliseconds.
    debounce_ms: u64,
    /// Integrity checker tick interval, in seconds.
    integrity_interval_secs: u64,
}

impl StartupConfig {
    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        let mods_root = match &cli.mods_dir {
            Some(dir) => dir.clone(),
            None => default_mods_root()?,
        };

        Ok(Self {
            mods_root,
            log_level: cli.log_level.as_str().to_string(),
            debounce_ms: cli.debounce_ms.unwrap_or(DEFAULT_DEBOUNCE_MS),
            integrity_interval_secs: cli
                .integrity_interval_secs
                .unwrap_or(DEFAULT_INTEGRITY_INTERVAL_SECS),
        })
    }

    /// Builds a config directly, bypassing CLI parsing. Used by tests.
    pub fn for_mods_root(mods_root: impl Into<PathBuf>) -> Self {
        Self {
            mods_root: mods_root.into(),
            log_level: "info".to_string(),
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            integrity_interval_secs: DEFAULT_INTEGRITY_INTERVAL_SECS,
        }
    }

    pub fn mods_root(&self) -> &Path {
        &self.mods_root
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn debounce_ms(&self) -> u64 {
        self.debounce_ms
    }

    pub fn integrity_interval_secs(&self) -> u64 {
        self.integrity_interval_secs
    }
}

/// Platform-specific default mods root, mirroring the way a resident
/// companion process would locate the user's own mods directory.
fn default_mods_root() -> Result<PathBuf, ConfigError> {
    std::env::home_dir()
        .map(|home| home.join(".config").join("vivaldi-mod-manager"))
        .ok_or(ConfigError::CouldNotDetermineHomeDirectory)
}
