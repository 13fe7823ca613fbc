//! C3 — installation discovery (§4.3).
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use chrono::Utc;
use tracing::{debug, warn};

use crate::constant::INJECTION_TARGETS;
use crate::manifest::{Installation, InstallationKind};

/// Probes the host filesystem for browser installations and their HTML
/// injection targets (§4.3). A trait so tests can substitute a fixed set of
/// fabricated installations (§9 "Dynamic dispatch").
pub trait InstallationDiscovery: Send + Sync {
    /// Enumerates installations. Errors for individual candidates are
    /// non-fatal — they are collected into the returned diagnostics list
    /// rather than aborting the whole scan (§4.3 "Failure").
    fn detect(&self) -> DiscoveryResult;

    /// Resolves the injection targets (HTML entrypoints) for an
    /// installation, keyed by logical name (`window`, `browser`).
    fn find_injection_targets(&self, install: &Installation) -> HashMap<String, PathBuf>;

    /// Extracts the browser version from its executable, if possible.
    fn get_version(&self, executable: &Path) -> Option<String>;
}

#[derive(Debug, Default)]
pub struct DiscoveryResult {
    pub installations: Vec<Installation>,
    pub diagnostics: Vec<String>,
}

/// Real, host-probing implementation. Candidate parent directories are
/// platform-conditional; each is scanned for an
/// `Application/resources/vivaldi/` suffix, which is how every supported
/// installation kind (Standard/Portable/Snapshot) exposes its entrypoints.
#[derive(Debug, Default)]
pub struct HostInstallationDiscovery {
    /// Extra candidate roots to scan, beyond the platform defaults. Used by
    /// tests to point discovery at a fabricated installation tree.
    pub extra_roots: Vec<PathBuf>,
}

impl HostInstallationDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    fn candidate_roots(&self) -> Vec<PathBuf> {
        let mut roots = Vec::new();

        if let Some(home) = std::env::home_dir() {
            #[cfg(target_os = "linux")]
            {
                roots.push(home.join(".config/vivaldi"));
                roots.push(PathBuf::from("/opt/vivaldi"));
            }
            #[cfg(target_os = "macos")]
            {
                roots.push(home.join("Library/Application Support/Vivaldi"));
                roots.push(PathBuf::from("/Applications/Vivaldi.app/Contents"));
            }
            #[cfg(target_os = "windows")]
            {
                roots.push(home.join("AppData/Local/Vivaldi"));
            }
        }

        roots.extend(self.extra_roots.iter().cloned());
        roots
    }

    fn classify(path: &Path) -> InstallationKind {
        let text = path.to_string_lossy().to_lowercase();
        if text.contains("snapshot") {
            InstallationKind::Snapshot
        } else if text.contains("portable") {
            InstallationKind::Portable
        } else {
            InstallationKind::Standard
        }
    }

    /// Locates the `Application/<version>/resources/vivaldi/` directory
    /// under an installation root, if one exists, returning the resources
    /// dir and the version directory name.
    fn locate_resources_dir(root: &Path) -> Option<(PathBuf, Option<String>)> {
        let application = root.join("Application");
        if !application.is_dir() {
            return None;
        }

        let mut entries: Vec<_> = std::fs::read_dir(&application)
            .ok()?
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .collect();
        entries.sort_by_key(|e| e.file_name());

        for entry in entries.into_iter().rev() {
            let candidate = entry.path().join("resources").join("vivaldi");
            if candidate.is_dir() {
                let version = entry.file_name().to_str().map(str::to_string);
                return Some((candidate, version));
            }
        }
        None
    }

    fn installation_id_for(path: &Path) -> String {
        crate::hash::hash_bytes(path.to_string_lossy().as_bytes())
    }
}

impl InstallationDiscovery for HostInstallationDiscovery {
    fn detect(&self) -> DiscoveryResult {
        let mut result = DiscoveryResult::default();

        for root in self.candidate_roots() {
            if !root.exists() {
                continue;
            }

            match Self::locate_resources_dir(&root) {
                Some((resources_dir, version_dir)) => {
                    let application_path = root.join("Application");
                    let id = Self::installation_id_for(&root);

                    let executable = application_path.join("vivaldi");
                    let version = self
                        .get_version(&executable)
                        .or(version_dir)
                        .map(normalize_version);

                    result.installations.push(Installation {
                        id,
                        name: root.file_name().map(|n| n.to_string_lossy().to_string()),
                        installation_path: root.clone(),
                        user_data_path: None,
                        application_path,
                        version,
                        installation_type: Self::classify(&root),
                        is_managed: true,
                        is_active: true,
                        detected_at: Utc::now(),
                        last_verified_at: None,
                        last_injection_at: None,
                        last_injection_status: None,
                        injection_fingerprint: None,
                        metadata: HashMap::from([(
                            "resourcesDir".to_string(),
                            resources_dir.display().to_string(),
                        )]),
                    });
                }
                None => {
                    debug!(?root, "candidate root has no resources/vivaldi directory");
                }
            }
        }

        result
    }

    fn find_injection_targets(&self, install: &Installation) -> HashMap<String, PathBuf> {
        let resources_dir = install
            .metadata
            .get("resourcesDir")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                install
                    .application_path
                    .join("resources")
                    .join("vivaldi")
            });

        INJECTION_TARGETS
            .iter()
            .map(|name| {
                let logical = name.trim_end_matches(".html").to_string();
                (logical, resources_dir.join(name))
            })
            .collect()
    }

    fn get_version(&self, executable: &Path) -> Option<String> {
        if !executable.exists() {
            return None;
        }

        let output = Command::new(executable).arg("--version").output().ok()?;
        if !output.status.success() {
            warn!(?executable, "version probe exited non-zero");
            return None;
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        extract_version_number(&stdout)
    }
}

/// Extracts the first `major.minor.patch[.build]` looking token from
/// arbitrary `--version` output.
fn extract_version_number(text: &str) -> Option<String> {
    text.split_whitespace()
        .find(|token| token.chars().next().is_some_and(|c| c.is_ascii_digit()))
        .map(normalize_version)
}

fn normalize_version(raw: String) -> String {
    raw.trim().to_string()
}

/// Parses a semver-like string into `(major, minor, patch)`, treating
/// missing components as 0 (§4.3).
fn parse_semver_precedence(version: &str) -> (u64, u64, u64) {
    let mut parts = version.split('.').map(|p| p.parse::<u64>().unwrap_or(0));
    (
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
    )
}

/// Whether `install`'s version is at least `min_version`, using semver
/// major.minor.patch precedence (§4.3).
pub fn is_compatible(install: &Installation, min_version: &str) -> bool {
    match &install.version {
        Some(version) => parse_semver_precedence(version) >= parse_semver_precedence(min_version),
        None => false,
    }
}
