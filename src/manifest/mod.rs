//! C2 data model — the persistent manifest document and its entities (§3, §6).
pub mod store;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constant::CURRENT_SCHEMA_VERSION;
use crate::error::Error;

/// One browser installation kind, per §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InstallationKind {
    Standard,
    Portable,
    Snapshot,
}

/// Outcome of the last injection attempt recorded against an installation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InjectionOutcome {
    Success,
    Failed,
    Unknown,
}

/// A dependency-style dependency entry isn't part of this spec's mod model
/// (mods are opaque JS files, not packages with their own dependency graph);
/// `ModEntry` below is intentionally flat.

/// The unit of user intent: one mod source file and its desired state (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModEntry {
    pub id: String,
    pub filename: String,
    pub enabled: bool,
    /// Together with `id`, totally orders the enabled set (ties broken by
    /// `id`). Non-negative by construction — there is no negative variant.
    pub order: u32,
    #[serde(default)]
    pub notes: Option<String>,
    /// Content hash of the file at last observation.
    pub checksum: String,
    #[serde(rename = "lastModified")]
    pub last_modified: DateTime<Utc>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(rename = "urlScopes", default)]
    pub url_scopes: Vec<String>,
    #[serde(rename = "lastKnownCompatibleVivaldi", default)]
    pub last_known_compatible_vivaldi: Option<String>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
    #[serde(rename = "fileSize")]
    pub file_size: u64,
    #[serde(rename = "isValidated", default)]
    pub is_validated: bool,
}

impl ModEntry {
    /// Sort key implementing the `(enabled, order)` ordering invariant:
    /// enabled mods sort before disabled ones, then by `order`, ties broken
    /// by `id`.
    pub fn sort_key(&self) -> (bool, u32, &str) {
        (!self.enabled, self.order, self.id.as_str())
    }
}

/// One browser installation on disk (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Installation {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "installationPath")]
    pub installation_path: std::path::PathBuf,
    #[serde(rename = "userDataPath", default)]
    pub user_data_path: Option<std::path::PathBuf>,
    #[serde(rename = "applicationPath")]
    pub application_path: std::path::PathBuf,
    pub version: Option<String>,
    #[serde(rename = "installationType")]
    pub installation_type: InstallationKind,
    #[serde(rename = "isManaged")]
    pub is_managed: bool,
    /// Whether this installation was found again on the most recent
    /// discovery pass. Absent installations are marked stale, not deleted.
    #[serde(rename = "isActive")]
    pub is_active: bool,
    #[serde(rename = "detectedAt")]
    pub detected_at: DateTime<Utc>,
    #[serde(rename = "lastVerifiedAt", default)]
    pub last_verified_at: Option<DateTime<Utc>>,
    #[serde(rename = "lastInjectionAt", default)]
    pub last_injection_at: Option<DateTime<Utc>>,
    #[serde(rename = "lastInjectionStatus", default)]
    pub last_injection_status: Option<InjectionOutcome>,
    #[serde(rename = "injectionFingerprint", default)]
    pub injection_fingerprint: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Process-wide settings, persisted as part of the manifest (§3, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(rename = "autoHealEnabled")]
    pub auto_heal_enabled: bool,
    #[serde(rename = "monitoringEnabled")]
    pub monitoring_enabled: bool,
    #[serde(rename = "backupRetentionDays")]
    pub backup_retention_days: u32,
    #[serde(rename = "logLevel")]
    pub log_level: String,
    #[serde(rename = "modsRootPath")]
    pub mods_root_path: std::path::PathBuf,
    #[serde(rename = "safeModeActive")]
    pub safe_mode_active: bool,
}

impl Settings {
    pub fn default_for(mods_root_path: std::path::PathBuf) -> Self {
        Self {
            auto_heal_enabled: true,
            monitoring_enabled: true,
            backup_retention_days: 14,
            log_level: "info".to_string(),
            mods_root_path,
            safe_mode_active: false,
        }
    }
}

/// The single persistent document (§3, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(rename = "schemaVersion")]
    pub schema_version: u32,
    pub settings: Settings,
    pub mods: Vec<ModEntry>,
    pub installations: Vec<Installation>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "lastUpdated")]
    pub last_updated: DateTime<Utc>,
    #[serde(rename = "createdByVersion")]
    pub created_by_version: String,
    #[serde(rename = "lastUpdatedByVersion")]
    pub last_updated_by_version: String,
}

impl Manifest {
    /// Constructs a fresh manifest with default values, as created on first
    /// start (§3 "Lifecycle summary").
    pub fn create_default(mods_root_path: std::path::PathBuf, now: DateTime<Utc>) -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            settings: Settings::default_for(mods_root_path),
            mods: Vec::new(),
            installations: Vec::new(),
            created_at: now,
            last_updated: now,
            created_by_version: crate::constant::TOOL_VERSION.to_string(),
            last_updated_by_version: crate::constant::TOOL_VERSION.to_string(),
        }
    }

    /// Returns enabled mods in load order: by `(enabled, order)`, ties
    /// broken by `id` (§3 invariant).
    pub fn enabled_mods_in_order(&self) -> Vec<&ModEntry> {
        let mut enabled: Vec<&ModEntry> = self.mods.iter().filter(|m| m.enabled).collect();
        enabled.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        enabled
    }

    /// Validates the uniqueness invariants enforced at save time (§4.2):
    /// `mods` unique by `id`; `installations` unique by `id`.
    pub fn validate_uniqueness(&self) -> Result<(), Error> {
        let mut seen_mod_ids = std::collections::HashSet::new();
        for m in &self.mods {
            if !seen_mod_ids.insert(&m.id) {
                return Err(Error::DuplicateModId(m.id.clone()));
            }
        }

        let mut seen_installation_ids = std::collections::HashSet::new();
        for i in &self.installations {
            if !seen_installation_ids.insert(&i.id) {
                return Err(Error::DuplicateInstallationId(i.id.clone()));
            }
        }

        Ok(())
    }

    pub fn find_installation(&self, id: &str) -> Option<&Installation> {
        self.installations.iter().find(|i| i.id == id)
    }

    pub fn find_installation_mut(&mut self, id: &str) -> Option<&mut Installation> {
        self.installations.iter_mut().find(|i| i.id == id)
    }

    pub fn managed_installations(&self) -> impl Iterator<Item = &Installation> {
        self.installations.iter().filter(|i| i.is_managed)
    }
}

/// Per-target injection status observed on disk (§3 `InjectionStatus`,
/// never persisted as canonical truth — it is always derived fresh).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ValidationLevel {
    NotInjected,
    Valid,
    FingerprintMismatch,
    Partial,
    Invalid,
    ValidationFailed,
}

#[derive(Debug, Clone, Serialize)]
pub struct TargetStatus {
    pub path: std::path::PathBuf,
    pub is_injected: bool,
    pub fingerprint_found: Option<String>,
    pub validation: ValidationLevel,
}

#[derive(Debug, Clone, Serialize)]
pub struct InjectionStatus {
    pub target_files: HashMap<String, TargetStatus>,
}

impl InjectionStatus {
    /// `is_fully_intact ⇔ all targets present, injected, fingerprints match`.
    pub fn is_fully_intact(&self) -> bool {
        !self.target_files.is_empty()
            && self
                .target_files
                .values()
                .all(|t| t.is_injected && t.validation == ValidationLevel::Valid)
    }

    /// Aggregate validation across all targets, used by the integrity
    /// checker and IPC status reporting.
    pub fn aggregate_validation(&self) -> ValidationLevel {
        if self.target_files.is_empty() {
            return ValidationLevel::NotInjected;
        }
        if self
            .target_files
            .values()
            .any(|t| t.validation == ValidationLevel::ValidationFailed)
        {
            return ValidationLevel::ValidationFailed;
        }
        let injected_count = self.target_files.values().filter(|t| t.is_injected).count();
        if injected_count == 0 {
            return ValidationLevel::NotInjected;
        }
        if injected_count < self.target_files.len() {
            return ValidationLevel::Partial;
        }
        if self
            .target_files
            .values()
            .all(|t| t.validation == ValidationLevel::Valid)
        {
            ValidationLevel::Valid
        } else if self
            .target_files
            .values()
            .any(|t| t.validation == ValidationLevel::FingerprintMismatch)
        {
            ValidationLevel::FingerprintMismatch
        } else {
            ValidationLevel::Invalid
        }
    }
}

/// A queued heal request (§3, transient — never persisted itself, only its
/// outcome via [`HealHistoryEntry`]).
#[derive(Debug, Clone, Serialize)]
pub struct HealRequest {
    pub installation_id: String,
    pub trigger_reason: String,
    pub enqueued_at: DateTime<Utc>,
    pub retry_count: u32,
}

/// One entry in the bounded, newest-first heal history (§3, §4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealHistoryEntry {
    pub installation_id: String,
    pub trigger_reason: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub success: bool,
    pub fingerprint: Option<String>,
    pub error: Option<String>,
}
