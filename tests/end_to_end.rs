//! Boundary-scenario tests exercising the injector, loader, manifest,
//! integrity checker, and heal supervisor together against a fabricated
//! installation tree. These only reach the public `vmm_core` surface — the
//! binary's orchestration glue lives in `src/main.rs` and isn't part of the
//! library crate.
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use tempfile::{tempdir, TempDir};

use vmm_core::constant::{LOADER_DIR_NAME, LOADER_FILE_NAME};
use vmm_core::error::Error;
use vmm_core::hash::derive_fingerprint;
use vmm_core::heal::{HealAction, HealState, HealSupervisor};
use vmm_core::injector::{FsInjector, Injector};
use vmm_core::integrity::{check_installation, FailureStreak};
use vmm_core::loader::{generate_loader, reconcile_mod_copies, write_loader};
use vmm_core::manifest::{Installation, InstallationKind, Manifest, ModEntry};

fn mod_entry(id: &str, order: u32) -> ModEntry {
    let now = Utc::now();
    ModEntry {
        id: id.to_string(),
        filename: format!("{id}.js"),
        enabled: true,
        order,
        notes: None,
        checksum: "placeholder".to_string(),
        last_modified: now,
        version: None,
        url_scopes: Vec::new(),
        last_known_compatible_vivaldi: None,
        created_at: now,
        updated_at: now,
        file_size: 0,
        is_validated: true,
    }
}

fn installation(id: &str, application_path: PathBuf, version: &str) -> Installation {
    Installation {
        id: id.to_string(),
        name: None,
        installation_path: application_path.parent().unwrap().to_path_buf(),
        user_data_path: None,
        application_path,
        version: Some(version.to_string()),
        installation_type: InstallationKind::Standard,
        is_managed: true,
        is_active: true,
        detected_at: Utc::now(),
        last_verified_at: None,
        last_injection_at: None,
        last_injection_status: None,
        injection_fingerprint: None,
        metadata: HashMap::new(),
    }
}

/// Creates `<root>/Application/<version>/resources/vivaldi/{window,browser}.html`
/// with `body` as both files' content, returning the targets map the
/// injector and integrity checker operate against.
fn write_resources(root: &Path, version: &str, body: &str) -> HashMap<String, PathBuf> {
    let resources_dir = root
        .join("Application")
        .join(version)
        .join("resources")
        .join("vivaldi");
    std::fs::create_dir_all(&resources_dir).unwrap();

    let window = resources_dir.join("window.html");
    let browser = resources_dir.join("browser.html");
    std::fs::write(&window, body).unwrap();
    std::fs::write(&browser, body).unwrap();

    HashMap::from([
        ("window".to_string(), window),
        ("browser".to_string(), browser),
    ])
}

fn loader_dir_for(targets: &HashMap<String, PathBuf>) -> PathBuf {
    targets
        .values()
        .next()
        .and_then(|p| p.parent())
        .map(|dir| dir.join(LOADER_DIR_NAME))
        .unwrap()
}

/// Mirrors `vmmd`'s `AppState::sync_installation`: regenerate the loader,
/// reconcile mod copies, inject, and record the resulting fingerprint.
fn sync(
    injector: &FsInjector,
    manifest: &mut Manifest,
    installation_id: &str,
    targets: &HashMap<String, PathBuf>,
    mods_root: &Path,
) -> Result<String, Error> {
    let loader_dir = loader_dir_for(targets);
    let browser_version = manifest
        .find_installation(installation_id)
        .and_then(|i| i.version.clone());

    let enabled_owned: Vec<ModEntry> = manifest
        .enabled_mods_in_order()
        .into_iter()
        .cloned()
        .collect();
    let enabled_refs: Vec<&ModEntry> = enabled_owned.iter().collect();

    let generated = generate_loader(&enabled_refs, browser_version.as_deref());
    reconcile_mod_copies(mods_root, &loader_dir, &enabled_refs)?;
    write_loader(&loader_dir, &generated)?;

    let loader_relative_src = format!("./{LOADER_DIR_NAME}/{LOADER_FILE_NAME}");
    injector.inject(targets, &loader_relative_src, &generated.fingerprint)?;

    if let Some(installation) = manifest.find_installation_mut(installation_id) {
        installation.injection_fingerprint = Some(generated.fingerprint.clone());
        installation.last_injection_at = Some(Utc::now());
    }

    Ok(generated.fingerprint)
}

fn backups_in(dir: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.contains("vmm-backup"))
        })
        .collect()
}

struct Fixture {
    _mods_root: TempDir,
    _install_root: TempDir,
    mods_root: PathBuf,
    install_root: PathBuf,
}

fn fixture() -> Fixture {
    let mods_root = tempdir().unwrap();
    let install_root = tempdir().unwrap();
    let mods_root_path = mods_root.path().to_path_buf();
    let install_root_path = install_root.path().to_path_buf();
    Fixture {
        _mods_root: mods_root,
        _install_root: install_root,
        mods_root: mods_root_path,
        install_root: install_root_path,
    }
}

/// S1 — First injection: a clean 100-byte `window.html` ending with
/// `</html>` becomes exactly `original + stub`, a backup holding the
/// original 100 bytes appears, and the fingerprint matches the derivation
/// formula from §4.1.
#[test]
fn s1_first_injection() {
    let fixture = fixture();
    std::fs::write(fixture.mods_root.join("hello.js"), b"console.log('hi')").unwrap();

    let pad = "a".repeat(100 - "<html><body>".len() - "</body></html>".len());
    let original = format!("<html><body>{pad}</body></html>");
    assert_eq!(original.len(), 100);
    assert!(original.ends_with("</html>"));

    let targets = write_resources(&fixture.install_root, "3.0", &original);
    let application_path = fixture.install_root.join("Application");

    let mut manifest = Manifest::create_default(fixture.mods_root.clone(), Utc::now());
    manifest.mods.push(mod_entry("hello", 0));
    manifest
        .installations
        .push(installation("install-1", application_path, "3.0"));

    let injector = FsInjector::new();
    let fingerprint = sync(&injector, &mut manifest, "install-1", &targets, &fixture.mods_root).unwrap();

    let window_path = &targets["window"];
    let contents = std::fs::read_to_string(window_path).unwrap();
    assert!(contents.starts_with(&original));
    assert!(contents.contains(&format!("fingerprint={fingerprint}")));
    assert!(contents.contains("<script type=\"module\""));

    let resources_dir = window_path.parent().unwrap();
    let backups = backups_in(resources_dir);
    let window_backups: Vec<_> = backups
        .iter()
        .filter(|p| p.file_name().unwrap().to_str().unwrap().starts_with("window.html."))
        .collect();
    assert_eq!(window_backups.len(), 1);
    assert_eq!(std::fs::read_to_string(window_backups[0]).unwrap(), original);

    let loader_content_hash = {
        let generated = generate_loader(&[manifest.mods.first().unwrap()], Some("3.0"));
        generated.content_hash
    };
    let expected_fingerprint = derive_fingerprint(&loader_content_hash, &["hello".to_string()]);
    assert_eq!(fingerprint, expected_fingerprint);
}

/// S2 — Browser update: a new version directory with pristine HTML gets the
/// stub on the next sync, and re-syncing it doesn't accumulate more than one
/// backup per target.
#[test]
fn s2_browser_update_reinjects_new_version_dir() {
    let fixture = fixture();
    std::fs::write(fixture.mods_root.join("hello.js"), b"console.log('hi')").unwrap();

    let original = "<html><body>hi</body></html>";
    let old_targets = write_resources(&fixture.install_root, "3.0", original);
    let application_path = fixture.install_root.join("Application");

    let mut manifest = Manifest::create_default(fixture.mods_root.clone(), Utc::now());
    manifest.mods.push(mod_entry("hello", 0));
    manifest
        .installations
        .push(installation("install-1", application_path.clone(), "3.0"));

    let injector = FsInjector::new();
    sync(&injector, &mut manifest, "install-1", &old_targets, &fixture.mods_root).unwrap();

    // The updater replaces the version directory with pristine HTML.
    let new_targets = write_resources(&fixture.install_root, "3.1", original);
    if let Some(i) = manifest.find_installation_mut("install-1") {
        i.version = Some("3.1".to_string());
    }

    let fingerprint = sync(&injector, &mut manifest, "install-1", &new_targets, &fixture.mods_root).unwrap();
    let observation = injector.get_injection_status(&new_targets, Some(&fingerprint));
    assert!(observation.target_files["window"].is_injected);
    assert!(observation.target_files["browser"].is_injected);

    // Re-sync the already-injected new targets: no extraneous backups.
    sync(&injector, &mut manifest, "install-1", &new_targets, &fixture.mods_root).unwrap();
    let resources_dir = new_targets["window"].parent().unwrap();
    let window_backups: Vec<_> = backups_in(resources_dir)
        .into_iter()
        .filter(|p| p.file_name().unwrap().to_str().unwrap().starts_with("window.html."))
        .collect();
    assert_eq!(window_backups.len(), 1);
}

/// S3 — Fingerprint mismatch: corrupting the stub's fingerprint is reported
/// as a named, per-target violation, and the next heal restores validity.
#[test]
fn s3_fingerprint_mismatch_detected_and_healed() {
    let fixture = fixture();
    std::fs::write(fixture.mods_root.join("hello.js"), b"console.log('hi')").unwrap();

    let original = "<html><body>hi</body></html>";
    let targets = write_resources(&fixture.install_root, "3.0", original);
    let application_path = fixture.install_root.join("Application");

    let mut manifest = Manifest::create_default(fixture.mods_root.clone(), Utc::now());
    manifest.mods.push(mod_entry("hello", 0));
    manifest
        .installations
        .push(installation("install-1", application_path, "3.0"));

    let injector = FsInjector::new();
    sync(&injector, &mut manifest, "install-1", &targets, &fixture.mods_root).unwrap();

    let window_path = &targets["window"];
    let corrupted = std::fs::read_to_string(window_path)
        .unwrap()
        .replace(
            manifest
                .find_installation("install-1")
                .unwrap()
                .injection_fingerprint
                .as_deref()
                .unwrap(),
            &"deadbeef".repeat(8),
        );
    std::fs::write(window_path, corrupted).unwrap();

    let loader_path = loader_dir_for(&targets).join(LOADER_FILE_NAME);
    let enabled_filenames: Vec<String> = manifest
        .enabled_mods_in_order()
        .into_iter()
        .map(|m| m.filename.clone())
        .collect();
    let mut streak = FailureStreak::new();

    let result = check_installation(
        &injector,
        manifest.find_installation("install-1").unwrap(),
        &targets,
        &loader_path,
        &fixture.mods_root,
        &enabled_filenames,
        &mut streak,
    );

    assert!(!result.passed);
    assert!(result
        .violations
        .iter()
        .any(|v| v == "Fingerprint mismatch in window.html"));

    let healed_fingerprint = sync(&injector, &mut manifest, "install-1", &targets, &fixture.mods_root).unwrap();
    let observation = injector.get_injection_status(&targets, Some(&healed_fingerprint));
    assert!(observation.target_files["window"].is_injected);
    assert_eq!(
        observation.target_files["window"].fingerprint_found.as_deref(),
        Some(healed_fingerprint.as_str())
    );
}

/// S4 — Retry exhaustion: a heal action that fails every attempt runs
/// exactly `DEFAULT_MAX_RETRIES` times, then reports terminal failure.
#[tokio::test(start_paused = true)]
async fn s4_retry_exhaustion_reports_terminal_failure() {
    struct AlwaysFails;

    impl HealAction for AlwaysFails {
        async fn attempt(&self, _installation_id: &str) -> Result<String, String> {
            Err("target is read-only".to_string())
        }

        async fn wait_for_stabilization(&self, _installation_id: &str) {}
    }

    let supervisor = HealSupervisor::new();
    supervisor.enqueue("install-1", "Manual");

    let outcome = supervisor.run_one(&AlwaysFails).await.unwrap();

    assert!(!outcome.success);
    assert_eq!(outcome.final_state, HealState::Failed);
    assert_eq!(supervisor.total_heals_failed(), 1);

    let history: Vec<_> = supervisor.history.lock().await.entries().cloned().collect();
    assert_eq!(history.len(), vmm_core::constant::DEFAULT_MAX_RETRIES as usize);
    assert!(history.iter().all(|e| e.installation_id == "install-1" && !e.success));
}

/// S5 — Safe mode round-trip: entering safe mode strips the stub from every
/// managed installation without touching mod files or the manifest entry;
/// leaving it heals everything back to `Valid`.
#[test]
fn s5_safe_mode_round_trip() {
    let fixture = fixture();
    std::fs::write(fixture.mods_root.join("hello.js"), b"console.log('hi')").unwrap();

    let original = "<html><body>hi</body></html>";
    let targets = write_resources(&fixture.install_root, "3.0", original);
    let application_path = fixture.install_root.join("Application");

    let mut manifest = Manifest::create_default(fixture.mods_root.clone(), Utc::now());
    manifest.mods.push(mod_entry("hello", 0));
    manifest
        .installations
        .push(installation("install-1", application_path, "3.0"));

    let injector = FsInjector::new();
    sync(&injector, &mut manifest, "install-1", &targets, &fixture.mods_root).unwrap();
    assert!(injector.get_injection_status(&targets, None).target_files["window"].is_injected);

    manifest.settings.safe_mode_active = true;
    injector.remove_injection(&targets).unwrap();

    let observation = injector.get_injection_status(&targets, None);
    assert!(!observation.target_files["window"].is_injected);
    assert!(!observation.target_files["browser"].is_injected);
    // Mod entries and source files survive safe mode untouched.
    assert!(fixture.mods_root.join("hello.js").exists());
    assert_eq!(manifest.mods.len(), 1);

    manifest.settings.safe_mode_active = false;
    let fingerprint = sync(&injector, &mut manifest, "install-1", &targets, &fixture.mods_root).unwrap();
    let observation = injector.get_injection_status(&targets, Some(&fingerprint));
    assert!(observation.target_files["window"].is_injected);
    assert!(observation.target_files["browser"].is_injected);
}

/// S6 — Cooldown suppression: two heals enqueued for the same installation
/// within the cooldown window don't start less than
/// `DEFAULT_COOLDOWN_SECS` apart, and both complete exactly once.
#[tokio::test(start_paused = true)]
async fn s6_cooldown_suppresses_rapid_reheal() {
    use std::sync::Mutex as StdMutex;
    use tokio::time::Instant;

    struct RecordingAction {
        starts: StdMutex<Vec<Instant>>,
    }

    impl HealAction for RecordingAction {
        async fn attempt(&self, installation_id: &str) -> Result<String, String> {
            self.starts.lock().unwrap().push(Instant::now());
            Ok(format!("fp-{installation_id}"))
        }

        async fn wait_for_stabilization(&self, _installation_id: &str) {}
    }

    let supervisor = HealSupervisor::new();
    let action = RecordingAction {
        starts: StdMutex::new(Vec::new()),
    };

    supervisor.enqueue("install-1", "IntegrityViolation");
    supervisor.enqueue("install-1", "IntegrityViolation");

    let first = supervisor.run_one(&action).await.unwrap();
    let second = supervisor.run_one(&action).await.unwrap();

    assert!(first.success);
    assert!(second.success);

    let starts = action.starts.lock().unwrap();
    assert_eq!(starts.len(), 2);
    let gap = starts[1].duration_since(starts[0]);
    assert!(
        gap >= Duration::from_secs(vmm_core::constant::DEFAULT_COOLDOWN_SECS),
        "expected >= {}s between heal starts, got {:?}",
        vmm_core::constant::DEFAULT_COOLDOWN_SECS,
        gap
    );
}
