//! C5 — HTML injection/removal and status validation (§4.5).
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, instrument, warn};

use crate::constant::{BACKUP_PREFIX, STUB_BEGIN_MARKER, STUB_END_MARKER};
use crate::error::Error;
use crate::fileutil::write_atomic_preserving_permissions;
use crate::hash::hash_bytes;
use crate::manifest::{TargetStatus, ValidationLevel};

/// Injects and removes the loader `<script>` stub into HTML entrypoints, and
/// reports on their current validation state (§4.5). A trait so tests can
/// substitute an in-memory target set (§9).
pub trait Injector: Send + Sync {
    /// Injects the stub referencing `loader_relative_src` into every target,
    /// tagged with `fingerprint`. All-or-nothing: if any target fails after
    /// some have already been modified, the already-modified targets are
    /// rolled back from their freshly taken backups (§4.5 "Transactional").
    fn inject(
        &self,
        targets: &HashMap<String, PathBuf>,
        loader_relative_src: &str,
        fingerprint: &str,
    ) -> Result<(), Error>;

    /// Removes a previously injected stub from every target, restoring the
    /// surrounding markup exactly (byte-identical modulo the stub block).
    fn remove_injection(&self, targets: &HashMap<String, PathBuf>) -> Result<(), Error>;

    /// Observes the current on-disk state of every target without mutating
    /// anything, classifying each against one of the five validation levels.
    fn get_injection_status(
        &self,
        targets: &HashMap<String, PathBuf>,
        expected_fingerprint: Option<&str>,
    ) -> InjectionObservation;
}

#[derive(Debug, Clone, Default)]
pub struct InjectionObservation {
    pub target_files: HashMap<String, TargetStatus>,
}

/// Strips trailing `\n` bytes, for hash comparisons that should tolerate a
/// trailing-newline difference between a target and its backup (§4.5
/// invariant 4 "modulo trailing newline normalization").
fn normalize_trailing_newline(bytes: &[u8]) -> &[u8] {
    let mut end = bytes.len();
    while end > 0 && bytes[end - 1] == b'\n' {
        end -= 1;
    }
    &bytes[..end]
}

/// Deletes injector backup siblings under `dir` older than `retention_days`.
/// Retention is advisory (§9 open question — eviction trigger unspecified);
/// this is invoked opportunistically at the start of each heal rather than
/// on its own schedule. Never removes the single backup [`FsInjector`]
/// would otherwise reuse for a target whose content hasn't changed, because
/// a deleted backup is simply recreated fresh on the next `inject` call —
/// pruning never breaks the single-backup-reuse invariant, only its history.
pub fn prune_backups(dir: &Path, retention_days: u32) -> Result<usize, Error> {
    if retention_days == 0 || !dir.exists() {
        return Ok(0);
    }

    let cutoff = Utc::now() - chrono::Duration::days(retention_days as i64);
    let mut pruned = 0;

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let is_backup = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.contains(BACKUP_PREFIX));
        if !is_backup || !path.is_file() {
            continue;
        }

        let modified = entry.metadata().and_then(|m| m.modified());
        if let Ok(modified) = modified {
            let modified: chrono::DateTime<Utc> = modified.into();
            if modified < cutoff {
                std::fs::remove_file(&path)?;
                pruned += 1;
            }
        }
    }

    Ok(pruned)
}

/// Real, filesystem-backed injector. Backups are taken before every mutating
/// operation and kept under the target's directory as
/// `<name>.<BACKUP_PREFIX>-<timestamp>` (§4.5 step 1, §6 filesystem layout).
#[derive(Debug, Default)]
pub struct FsInjector;

impl FsInjector {
    pub fn new() -> Self {
        Self
    }

    fn stub_block(loader_relative_src: &str, fingerprint: &str) -> String {
        format!(
            "{STUB_BEGIN_MARKER} fingerprint={fingerprint} -->\n<script type=\"module\" src=\"{loader_relative_src}\"></script>\n{STUB_END_MARKER}"
        )
    }

    /// Splits `html` into `(before, stub_block, after)` if a stub is present.
    fn find_stub(html: &str) -> Option<(&str, &str, &str)> {
        let begin = html.find(STUB_BEGIN_MARKER)?;
        let end_marker_start = html[begin..].find(STUB_END_MARKER)? + begin;
        let end = end_marker_start + STUB_END_MARKER.len();
        Some((&html[..begin], &html[begin..end], &html[end..]))
    }

    fn extract_fingerprint(stub: &str) -> Option<String> {
        let key = "fingerprint=";
        let start = stub.find(key)? + key.len();
        let rest = &stub[start..];
        let end = rest.find(|c: char| c == ' ' || c == '\n' || c == '-').unwrap_or(rest.len());
        Some(rest[..end].to_string())
    }

    /// `<target>.vmm-backup-<timestamp>`, per §6's filesystem layout contract.
    fn backup_path_for(target: &Path) -> PathBuf {
        let dir = target.parent().unwrap_or_else(|| Path::new("."));
        let name = target
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        dir.join(format!(
            "{name}.{BACKUP_PREFIX}-{}",
            Utc::now().format("%Y%m%dT%H%M%S%.3f")
        ))
    }

    /// Takes (or reuses) a pristine backup of `target`'s pre-stub content
    /// (`original` has already had any existing stub stripped by the
    /// caller). If a backup already exists whose content hash matches, it is
    /// reused rather than duplicated (§4.5 "backups are reused when their
    /// hash already matches").
    fn ensure_backup(target: &Path, original: &[u8]) -> Result<PathBuf, Error> {
        let dir = target.parent().unwrap_or_else(|| Path::new("."));
        let current_hash = hash_bytes(original);
        let target_name = target.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
        let backup_stem = format!("{target_name}.{BACKUP_PREFIX}-");

        if dir.exists() {
            for entry in std::fs::read_dir(dir)? {
                let entry = entry?;
                let path = entry.path();
                let is_backup_of_target = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(&backup_stem));
                if is_backup_of_target && path.is_file() {
                    if let Ok(existing) = std::fs::read(&path) {
                        if hash_bytes(&existing) == current_hash {
                            return Ok(path);
                        }
                    }
                }
            }
        }

        let backup = Self::backup_path_for(target);
        std::fs::write(&backup, original)?;
        Ok(backup)
    }
}

impl Injector for FsInjector {
    #[instrument(skip(self, targets))]
    fn inject(
        &self,
        targets: &HashMap<String, PathBuf>,
        loader_relative_src: &str,
        fingerprint: &str,
    ) -> Result<(), Error> {
        let mut rollback: Vec<(PathBuf, Vec<u8>)> = Vec::new();
        let stub = Self::stub_block(loader_relative_src, fingerprint);

        let result = (|| -> Result<(), Error> {
            for (name, path) in targets {
                let original = std::fs::read(path)?;

                let html = String::from_utf8_lossy(&original);
                let without_existing = match Self::find_stub(&html) {
                    Some((before, _, after)) => format!("{before}{after}"),
                    None => html.into_owned(),
                };

                // The backup stores the pre-stub content, not the raw
                // on-disk bytes, so a re-injection (stub already present,
                // fingerprint changing) still backs up the clean original
                // rather than a copy carrying the stale stub (§4.5 step 1).
                let backup_path = Self::ensure_backup(path, without_existing.as_bytes())?;
                let backup_hash = hash_bytes(normalize_trailing_newline(&std::fs::read(&backup_path)?));

                // Always append — the stub is never inserted before
                // `</body>`, so the result is exactly `original + stub`
                // (§6 "appended to each HTML target").
                let new_contents = format!("{without_existing}\n{stub}\n");

                rollback.push((path.clone(), original));
                write_atomic_preserving_permissions(path, new_contents.as_bytes())?;

                // Re-read and verify: the stub must be present, and the
                // content preceding it must still hash to the backup —
                // otherwise something clobbered the write and this target
                // is restored from backup on rollback (§4.5 step 6).
                let reread = std::fs::read(path)?;
                let reread_html = String::from_utf8_lossy(&reread);
                let verified = match Self::find_stub(&reread_html) {
                    Some((before, _, _)) => {
                        hash_bytes(normalize_trailing_newline(before.as_bytes())) == backup_hash
                    }
                    None => false,
                };
                if !verified {
                    return Err(Error::ValidationFailed {
                        target: name.clone(),
                        reason: "post-injection content verification failed".to_string(),
                    });
                }

                debug!(target = %name, "injected stub");
            }
            Ok(())
        })();

        if let Err(err) = result {
            warn!(?err, "injection failed mid-transaction, rolling back");
            for (path, original) in rollback {
                if let Err(rollback_err) = write_atomic_preserving_permissions(&path, &original) {
                    warn!(?rollback_err, ?path, "rollback write failed");
                }
            }
            return Err(err);
        }

        Ok(())
    }

    #[instrument(skip(self, targets))]
    fn remove_injection(&self, targets: &HashMap<String, PathBuf>) -> Result<(), Error> {
        let mut rollback: Vec<(PathBuf, Vec<u8>)> = Vec::new();

        let result = (|| -> Result<(), Error> {
            for (_, path) in targets {
                let original = std::fs::read(path)?;
                let html = String::from_utf8_lossy(&original);

                if let Some((before, _, after)) = Self::find_stub(&html) {
                    let new_contents = format!("{before}{after}");
                    rollback.push((path.clone(), original));
                    write_atomic_preserving_permissions(path, new_contents.as_bytes())?;
                }
            }
            Ok(())
        })();

        if let Err(err) = result {
            warn!(?err, "removal failed mid-transaction, rolling back");
            for (path, original) in rollback {
                let _ = write_atomic_preserving_permissions(&path, &original);
            }
            return Err(err);
        }

        Ok(())
    }

    fn get_injection_status(
        &self,
        targets: &HashMap<String, PathBuf>,
        expected_fingerprint: Option<&str>,
    ) -> InjectionObservation {
        let mut target_files = HashMap::new();

        for (name, path) in targets {
            let status = match std::fs::read(path) {
                Ok(bytes) => {
                    let html = String::from_utf8_lossy(&bytes);
                    match Self::find_stub(&html) {
                        Some((_, stub, _)) => {
                            let found = Self::extract_fingerprint(stub);
                            let validation = match (&found, expected_fingerprint) {
                                (Some(f), Some(expected)) if f == expected => ValidationLevel::Valid,
                                (Some(_), Some(_)) => ValidationLevel::FingerprintMismatch,
                                (Some(_), None) => ValidationLevel::Valid,
                                (None, _) => ValidationLevel::Invalid,
                            };
                            TargetStatus {
                                path: path.clone(),
                                is_injected: true,
                                fingerprint_found: found,
                                validation,
                            }
                        }
                        None => TargetStatus {
                            path: path.clone(),
                            is_injected: false,
                            fingerprint_found: None,
                            validation: ValidationLevel::NotInjected,
                        },
                    }
                }
                Err(err) => {
                    warn!(?err, ?path, "failed to read injection target for status check");
                    TargetStatus {
                        path: path.clone(),
                        is_injected: false,
                        fingerprint_found: None,
                        validation: ValidationLevel::ValidationFailed,
                    }
                }
            };
            target_files.insert(name.clone(), status);
        }

        InjectionObservation { target_files }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_html(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_inject_then_status_is_valid() {
        let dir = tempdir().unwrap();
        let path = write_html(dir.path(), "window.html", "<html><body>hi</body></html>");
        let mut targets = HashMap::new();
        targets.insert("window".to_string(), path.clone());

        let injector = FsInjector::new();
        injector.inject(&targets, "../vivaldi-mods/loader.js", "fp123").unwrap();

        let observation = injector.get_injection_status(&targets, Some("fp123"));
        let status = &observation.target_files["window"];
        assert!(status.is_injected);
        assert_eq!(status.validation, ValidationLevel::Valid);
        assert_eq!(status.fingerprint_found.as_deref(), Some("fp123"));
    }

    #[test]
    fn test_status_detects_fingerprint_mismatch() {
        let dir = tempdir().unwrap();
        let path = write_html(dir.path(), "window.html", "<html><body>hi</body></html>");
        let mut targets = HashMap::new();
        targets.insert("window".to_string(), path.clone());

        let injector = FsInjector::new();
        injector.inject(&targets, "../vivaldi-mods/loader.js", "old-fp").unwrap();

        let observation = injector.get_injection_status(&targets, Some("new-fp"));
        assert_eq!(
            observation.target_files["window"].validation,
            ValidationLevel::FingerprintMismatch
        );
    }

    #[test]
    fn test_remove_injection_restores_body() {
        let dir = tempdir().unwrap();
        let original = "<html><body>hi</body></html>";
        let path = write_html(dir.path(), "window.html", original);
        let mut targets = HashMap::new();
        targets.insert("window".to_string(), path.clone());

        let injector = FsInjector::new();
        injector.inject(&targets, "../vivaldi-mods/loader.js", "fp123").unwrap();
        injector.remove_injection(&targets).unwrap();

        let observation = injector.get_injection_status(&targets, None);
        assert!(!observation.target_files["window"].is_injected);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), original);
    }

    #[test]
    fn test_reinjection_reuses_matching_backup() {
        let dir = tempdir().unwrap();
        let path = write_html(dir.path(), "window.html", "<html><body>hi</body></html>");
        let mut targets = HashMap::new();
        targets.insert("window".to_string(), path.clone());

        let injector = FsInjector::new();
        injector.inject(&targets, "../vivaldi-mods/loader.js", "fp1").unwrap();
        injector.remove_injection(&targets).unwrap();
        injector.inject(&targets, "../vivaldi-mods/loader.js", "fp2").unwrap();

        let backups: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.file_name()
                    .to_str()
                    .is_some_and(|n| n.contains(BACKUP_PREFIX))
            })
            .collect();
        assert_eq!(backups.len(), 1);
    }

    #[test]
    fn test_prune_backups_removes_only_stale_entries() {
        let dir = tempdir().unwrap();
        let fresh = dir.path().join(format!("{BACKUP_PREFIX}-fresh-window.html"));
        let stale = dir.path().join(format!("{BACKUP_PREFIX}-stale-window.html"));
        std::fs::write(&fresh, b"fresh").unwrap();
        std::fs::write(&stale, b"stale").unwrap();

        let old_time = std::time::SystemTime::now() - std::time::Duration::from_secs(60 * 60 * 24 * 30);
        std::fs::File::open(&stale).unwrap().set_modified(old_time).unwrap();

        let pruned = prune_backups(dir.path(), 14).unwrap();

        assert_eq!(pruned, 1);
        assert!(fresh.exists());
        assert!(!stale.exists());
    }

    #[test]
    fn test_prune_backups_is_noop_when_retention_is_zero() {
        let dir = tempdir().unwrap();
        let backup = dir.path().join(format!("{BACKUP_PREFIX}-x-window.html"));
        std::fs::write(&backup, b"x").unwrap();

        let pruned = prune_backups(dir.path(), 0).unwrap();

        assert_eq!(pruned, 0);
        assert!(backup.exists());
    }

    #[test]
    fn test_status_not_injected_for_plain_html() {
        let dir = tempdir().unwrap();
        let path = write_html(dir.path(), "window.html", "<html><body>hi</body></html>");
        let mut targets = HashMap::new();
        targets.insert("window".to_string(), path);

        let injector = FsInjector::new();
        let observation = injector.get_injection_status(&targets, None);
        assert_eq!(
            observation.target_files["window"].validation,
            ValidationLevel::NotInjected
        );
    }
}
