//! Tracing setup for the resident daemon.
//!
//! The daemon starts logging before the manifest is loaded (using the
//! `--log-level` flag, or `info` by default) and then lets the manifest's
//! `settings.log_level` take over once it is read, via a reload handle.
use tracing_subscriber::{
    EnvFilter,
    fmt,
    prelude::*,
    reload::{self, Handle},
};

const APP_NAME: &str = env!("CARGO_PKG_NAME");

pub type ReloadHandle = Handle<EnvFilter, tracing_subscriber::Registry>;

/// Initializes the global subscriber and returns a handle that lets later
/// code (the manifest store, after its first successful load) change the
/// active log level without restarting the process.
pub fn init(initial_level: &str) -> ReloadHandle {
    let filter = EnvFilter::try_new(format!("{APP_NAME}={initial_level}"))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let (filter, handle) = reload::Layer::new(filter);

    let fmt_layer = fmt::layer()
        .compact()
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(true)
        .with_target(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();

    handle
}

/// Applies a new log level string (e.g. from `Manifest.settings.log_level`).
/// Failures are logged and otherwise ignored — a bad level string should
/// never take the daemon down.
pub fn set_level(handle: &ReloadHandle, level: &str) {
    let directive = format!("{APP_NAME}={level}");
    match EnvFilter::try_new(&directive) {
        Ok(filter) => {
            if let Err(err) = handle.reload(filter) {
                tracing::warn!(?err, "failed to apply reloaded log level");
            }
        }
        Err(err) => tracing::warn!(?err, level, "invalid log level, keeping current filter"),
    }
}
