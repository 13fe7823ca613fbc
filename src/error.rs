use std::path::PathBuf;

use thiserror::Error;

/// Error taxonomy for the injection/healing core. Every fallible operation
/// in `vmm_core` returns one of these variants rather than an opaque string,
/// so callers (the heal supervisor, the IPC layer) can branch on kind.
#[derive(Debug, Error)]
pub enum Error {
    /// The manifest file, an injection target, or an installation entry is
    /// missing. The healer treats this as actionable rather than fatal.
    #[error("not found: {0}")]
    NotFound(String),

    /// The manifest file exists but could not be parsed.
    #[error("manifest at {path:?} is corrupted: {source}")]
    Corrupted {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The manifest declares a `schemaVersion` this build does not know how
    /// to read.
    #[error("manifest schema version {0} is not supported by this build")]
    SchemaUnsupported(u32),

    /// Propagated I/O error. Transient I/O during a heal is retried by the
    /// heal supervisor's backoff policy rather than surfaced directly.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// An injection post-condition was not met after a write (re-read
    /// mismatch, missing stub, etc). Triggers rollback of the current heal.
    #[error("validation failed for {target}: {reason}")]
    ValidationFailed { target: String, reason: String },

    /// Another instance already holds the IPC endpoint.
    #[error("another instance is already running (IPC endpoint in use)")]
    Duplicate,

    /// Shutdown was requested while this operation was in flight. Never
    /// reported to the user as a failure.
    #[error("operation cancelled")]
    Cancelled,

    /// A background task panicked instead of returning a value.
    #[error("task panicked: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),

    /// Wraps a filesystem watch backend failure.
    #[error("filesystem watch error: {0}")]
    Watch(#[from] notify::Error),

    /// The requested mod id already exists in the manifest.
    #[error("mod id '{0}' already exists")]
    DuplicateModId(String),

    /// The requested installation id already exists in the manifest.
    #[error("installation id '{0}' already exists")]
    DuplicateInstallationId(String),
}

pub type Result<T> = std::result::Result<T, Error>;
