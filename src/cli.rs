//! Command line interface for the resident daemon binary.
use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Log levels the daemon accepts on the command line before the manifest
/// (which carries its own persisted `log_level`) has been read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "lower")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Resident injection/healing supervisor.
#[derive(Debug, Parser)]
#[command(version, about = "Resident mod injection/healing supervisor", long_about = None)]
pub struct Cli {
    /// Directory holding the manifest and user-dropped mod files. Defaults
    /// to a platform-specific mods directory under the user's home.
    #[arg(short = 'd', long = "mods-dir", value_name = "DIR")]
    pub mods_dir: Option<PathBuf>,

    /// Log level to use until the manifest's own `log_level` takes over.
    #[arg(long, value_enum, default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,

    /// Debounce window (milliseconds) for the filesystem watcher. Intended
    /// for integration tests; production use should rely on defaults.
    #[arg(long)]
    pub debounce_ms: Option<u64>,

    /// Integrity checker tick interval, in seconds.
    #[arg(long)]
    pub integrity_interval_secs: Option<u64>,
}
