/// Name of the canonical manifest document inside the mods root.
pub const MANIFEST_FILE_NAME: &str = "manifest.json";

/// Suffix appended to the manifest's sibling backup copy.
pub const MANIFEST_BACKUP_SUFFIX: &str = ".backup";

/// Relative directory (inside a browser's resources directory) the loader
/// and enabled-mod copies are written to.
pub const LOADER_DIR_NAME: &str = "vivaldi-mods";

/// Name of the generated loader script inside `LOADER_DIR_NAME`.
pub const LOADER_FILE_NAME: &str = "loader.js";

/// Subdirectory of `LOADER_DIR_NAME` holding copies of enabled mod sources.
pub const LOADER_MODS_SUBDIR: &str = "mods";

/// HTML entrypoints the injector targets, relative to a browser's
/// `Application/resources/vivaldi/` directory.
pub const INJECTION_TARGETS: &[&str] = &["window.html", "browser.html"];

/// Prefix used for pre-injection HTML backups, followed by a timestamp.
pub const BACKUP_PREFIX: &str = "vmm-backup";

/// Sentinel marking the start of an injected stub block.
pub const STUB_BEGIN_MARKER: &str = "<!-- VMM-STUB-BEGIN";
/// Sentinel marking the end of an injected stub block.
pub const STUB_END_MARKER: &str = "<!-- VMM-STUB-END -->";

/// Current tool version embedded into generated loaders and IPC responses.
pub const TOOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Manifest schema version this build writes and understands.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Debounce window for the filesystem watcher (default, §4.6).
pub const DEFAULT_DEBOUNCE_MS: u64 = 2_000;

/// Integrity checker tick interval (default, §4.7).
pub const DEFAULT_INTEGRITY_INTERVAL_SECS: u64 = 60;

/// Minimum time between heal attempts for the same installation (§4.8).
pub const DEFAULT_COOLDOWN_SECS: u64 = 30;

/// Maximum time a heal waits for injection targets to become openable
/// exclusively before proceeding anyway (§4.8).
pub const DEFAULT_STABILIZATION_MAX_WAIT_SECS: u64 = 30;

/// Retry backoff delays, in seconds, indexed by `retry_count` and clamped
/// to the last element once exhausted (§4.8).
pub const DEFAULT_BACKOFF_SECS: &[u64] = &[5, 30, 120];

/// Total number of attempts (not additional retries) made for a single heal
/// request before it is marked terminally failed (§4.8, §8 scenario S4).
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Maximum number of entries retained in the heal history (§3).
pub const DEFAULT_HISTORY_MAX_ENTRIES: usize = 50;

/// Maximum concurrent IPC clients (§4.9).
pub const MAX_IPC_CLIENTS: usize = 10;

/// Default IPC request handling timeout (§5).
pub const DEFAULT_IPC_TIMEOUT_SECS: u64 = 30;

/// Filename suffixes the watcher ignores as editor/temp-file noise (§4.6).
pub const IGNORED_SUFFIXES: &[&str] = &[".tmp", ".bak", ".swp"];

/// Extension recognized as a user-supplied mod source file.
pub const MOD_FILE_EXTENSION: &str = "js";
