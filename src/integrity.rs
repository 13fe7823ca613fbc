//! C7 — periodic integrity checks across installations (§4.7).
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use tracing::{error, info, instrument, warn};

use crate::injector::Injector;
use crate::manifest::{Installation, ValidationLevel};

/// Per-installation consecutive-failure tally, used to escalate log severity
/// and to decide when a heal should be triggered (§4.7 "log level escalates
/// with consecutive failures: warn at 1-3, error at 4+").
#[derive(Debug, Default)]
pub struct FailureStreak {
    counts: HashMap<String, u32>,
}

const ESCALATE_AFTER: u32 = 4;

impl FailureStreak {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an observation for `installation_id`, returning the updated
    /// consecutive-failure count (0 after a success).
    pub fn record(&mut self, installation_id: &str, passed: bool) -> u32 {
        if passed {
            self.counts.remove(installation_id);
            0
        } else {
            let entry = self.counts.entry(installation_id.to_string()).or_insert(0);
            *entry += 1;
            *entry
        }
    }

    pub fn current(&self, installation_id: &str) -> u32 {
        self.counts.get(installation_id).copied().unwrap_or(0)
    }
}

/// Result of one integrity check against a single installation. `violations`
/// names every distinct problem found (stub mismatch, missing loader file,
/// missing enabled-mod source) so IPC callers and logs can report more than
/// just the aggregate validation level (§4.7 "a check covers: the injected
/// stub's fingerprint, the loader file's existence, and each enabled mod's
/// source file's existence").
#[derive(Debug, Clone)]
pub struct IntegrityCheckResult {
    pub installation_id: String,
    pub validation: ValidationLevel,
    pub passed: bool,
    pub violations: Vec<String>,
    pub consecutive_failures: u32,
}

/// Checks one installation's injection targets against its recorded
/// fingerprint, plus the loader file's existence and each enabled mod's
/// source file's existence, logging at a severity that escalates with
/// consecutive failures (§4.7).
#[instrument(skip(injector, streak, enabled_mod_filenames))]
pub fn check_installation<I: Injector>(
    injector: &I,
    installation: &Installation,
    targets: &HashMap<String, std::path::PathBuf>,
    loader_path: &Path,
    mods_root: &Path,
    enabled_mod_filenames: &[String],
    streak: &mut FailureStreak,
) -> IntegrityCheckResult {
    let observation =
        injector.get_injection_status(targets, installation.injection_fingerprint.as_deref());
    let validation = observation.aggregate();

    let mut violations = Vec::new();
    let mut target_names: Vec<&String> = observation.target_files.keys().collect();
    target_names.sort();
    for name in target_names {
        let status = &observation.target_files[name];
        let display_name = status
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| name.clone());
        match status.validation {
            ValidationLevel::Valid => {}
            ValidationLevel::NotInjected => violations.push(format!("Not injected: {display_name}")),
            ValidationLevel::FingerprintMismatch => {
                violations.push(format!("Fingerprint mismatch in {display_name}"))
            }
            ValidationLevel::Invalid => violations.push(format!("Invalid stub in {display_name}")),
            ValidationLevel::Partial => violations.push(format!("Partial injection in {display_name}")),
            ValidationLevel::ValidationFailed => {
                violations.push(format!("Validation failed for {display_name}"))
            }
        }
    }

    if !loader_path.exists() {
        violations.push(format!("loader file missing: {}", loader_path.display()));
    }

    for filename in enabled_mod_filenames {
        let source = mods_root.join(filename);
        if !source.exists() {
            violations.push(format!("enabled mod source missing: {filename}"));
        }
    }

    let passed = violations.is_empty();
    let consecutive = streak.record(&installation.id, passed);

    if !passed {
        if consecutive >= ESCALATE_AFTER {
            error!(
                installation_id = %installation.id,
                consecutive,
                ?violations,
                "integrity check failing repeatedly"
            );
        } else {
            warn!(installation_id = %installation.id, consecutive, ?violations, "integrity check failed");
        }
    } else {
        info!(installation_id = %installation.id, "integrity check passed");
    }

    IntegrityCheckResult {
        installation_id: installation.id.clone(),
        validation,
        passed,
        violations,
        consecutive_failures: consecutive,
    }
}

/// Staggers ticks across installations so a full sweep of N installations
/// spreads evenly across the configured interval rather than checking all of
/// them in the same instant (§4.7 "checks are staggered across
/// installations").
pub fn stagger_offset(index: usize, installation_count: usize, interval: Duration) -> Duration {
    if installation_count <= 1 {
        return Duration::ZERO;
    }
    let slice = interval.as_millis() as u64 / installation_count as u64;
    Duration::from_millis(slice * index as u64)
}

trait AggregateValidation {
    fn aggregate(&self) -> ValidationLevel;
}

impl AggregateValidation for crate::injector::InjectionObservation {
    fn aggregate(&self) -> ValidationLevel {
        crate::manifest::InjectionStatus {
            target_files: self.target_files.clone(),
        }
        .aggregate_validation()
    }
}
