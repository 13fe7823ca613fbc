//! `vmmd` — the resident injection/healing supervisor daemon (§5).
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use tokio::sync::{broadcast, Mutex};
use tracing::{error, info, instrument, warn};

use vmm_core::cli::Cli;
use vmm_core::config::StartupConfig;
use vmm_core::constant::MANIFEST_FILE_NAME;
use vmm_core::error::Error;
use vmm_core::events::Event;
use vmm_core::fileutil::{file_observed_metadata, find_mod_source_files};
use vmm_core::hash::hash_file;
use vmm_core::heal::{HealAction, HealSupervisor};
use vmm_core::injector::{prune_backups, FsInjector, Injector};
use vmm_core::installation::{HostInstallationDiscovery, InstallationDiscovery};
use vmm_core::integrity::{check_installation, stagger_offset, FailureStreak};
use vmm_core::ipc::{self, Request, RequestHandler, Response};
use vmm_core::loader::{generate_loader, reconcile_mod_copies, write_loader};
use vmm_core::manifest::store::{FsManifestStore, ManifestStore};
use vmm_core::manifest::{Installation, Manifest, ModEntry};
use vmm_core::safemode::SafeMode;
use vmm_core::watcher::{self, version_dir_component};
use vmm_core::log;

/// Shared state every background task and IPC handler operates against.
struct AppState {
    config: StartupConfig,
    manifest_path: PathBuf,
    manifest_store: FsManifestStore,
    manifest: Mutex<Manifest>,
    discovery: HostInstallationDiscovery,
    injector: FsInjector,
    safe_mode: SafeMode,
    heal: Arc<HealSupervisor>,
    events_tx: broadcast::Sender<Event>,
    monitoring_paused: AtomicBool,
    watcher: Arc<Mutex<watcher::FsWatcher>>,
    started_at: Instant,
    /// Per-installation diagnostics accumulated by the last discovery pass,
    /// surfaced through `GetHealthCheck` (§4.9).
    discovery_diagnostics: Mutex<Vec<String>>,
    /// Timestamp of the last integrity checker tick, surfaced through
    /// `GetHealthCheck`'s "last check time" (§4.9).
    last_integrity_check_at: Mutex<Option<chrono::DateTime<chrono::Utc>>>,
}

impl AppState {
    /// Regenerates the loader, reconciles mod copies, and (re-)injects for
    /// one installation, returning the fingerprint it converged on (§4.4,
    /// §4.5). Also prunes backups older than the configured retention
    /// window before touching injection targets, so a heal attempt doubles
    /// as the housekeeping hook for stale `.backup` files (§4.5
    /// "supplemented: backup retention").
    #[instrument(skip(self))]
    async fn sync_installation(&self, installation_id: &str) -> Result<String, Error> {
        let mods_root = self.config.mods_root().to_path_buf();

        let (targets, loader_dir, browser_version, retention_days) = {
            let manifest = self.manifest.lock().await;
            let installation = manifest
                .find_installation(installation_id)
                .ok_or_else(|| Error::NotFound(installation_id.to_string()))?;
            let targets = self.discovery.find_injection_targets(installation);
            // Every injection target lives directly under the browser's
            // resources directory; the loader and its mod copies are
            // written as a sibling of those HTML entrypoints.
            let resources_dir = targets
                .values()
                .next()
                .and_then(|p| p.parent())
                .map(Path::to_path_buf)
                .ok_or_else(|| Error::NotFound(format!("no injection targets for {installation_id}")))?;
            (
                targets,
                resources_dir.join(vmm_core::constant::LOADER_DIR_NAME),
                installation.version.clone(),
                manifest.settings.backup_retention_days,
            )
        };

        if let Err(err) = prune_backups(&loader_dir, retention_days) {
            warn!(installation_id, %err, "failed to prune stale backups");
        }

        let enabled_owned: Vec<ModEntry> = {
            let manifest = self.manifest.lock().await;
            manifest.enabled_mods_in_order().into_iter().cloned().collect()
        };
        let enabled_refs: Vec<&ModEntry> = enabled_owned.iter().collect();

        let generated = generate_loader(&enabled_refs, browser_version.as_deref());
        reconcile_mod_copies(&mods_root, &loader_dir, &enabled_refs)?;
        write_loader(&loader_dir, &generated)?;

        let loader_relative_src = format!(
            "./{}/{}",
            vmm_core::constant::LOADER_DIR_NAME,
            vmm_core::constant::LOADER_FILE_NAME
        );
        self.injector
            .inject(&targets, &loader_relative_src, &generated.fingerprint)?;

        let mut manifest = self.manifest.lock().await;
        if let Some(installation) = manifest.find_installation_mut(installation_id) {
            installation.injection_fingerprint = Some(generated.fingerprint.clone());
            installation.last_injection_at = Some(chrono::Utc::now());
            installation.last_injection_status =
                Some(vmm_core::manifest::InjectionOutcome::Success);
        }
        self.manifest_store.save(&mut manifest, &self.manifest_path).await?;

        Ok(generated.fingerprint)
    }

    async fn emit(&self, event: Event) {
        let _ = self.events_tx.send(event);
    }

    /// Reads the current `safeModeActive` setting, persisting `active` if it
    /// differs, and flips the in-memory atomic to match (§4.10 — safe mode
    /// must survive a restart, so the manifest is the source of truth and
    /// the atomic is a fast-path cache of it).
    async fn set_safe_mode(&self, active: bool) -> Result<(), Error> {
        self.safe_mode.set(active);
        let mut manifest = self.manifest.lock().await;
        if manifest.settings.safe_mode_active != active {
            manifest.settings.safe_mode_active = active;
            self.manifest_store.save(&mut manifest, &self.manifest_path).await?;
        }
        Ok(())
    }
}

struct DaemonHealAction {
    state: Arc<AppState>,
}

impl HealAction for DaemonHealAction {
    async fn attempt(&self, installation_id: &str) -> Result<String, String> {
        match self.state.sync_installation(installation_id).await {
            Ok(fingerprint) => {
                self.state
                    .emit(Event::InjectionCompleted {
                        installation_id: installation_id.to_string(),
                        fingerprint: fingerprint.clone(),
                        at: chrono::Utc::now(),
                    })
                    .await;
                Ok(fingerprint)
            }
            Err(err) => {
                // Roll back a failed heal attempt: best effort, never lets a
                // rollback error mask the original failure (§4.8 step 8).
                let targets = {
                    let manifest = self.state.manifest.lock().await;
                    manifest
                        .find_installation(installation_id)
                        .map(|installation| self.state.discovery.find_injection_targets(installation))
                };
                if let Some(targets) = targets {
                    if let Err(rollback_err) = self.state.injector.remove_injection(&targets) {
                        warn!(installation_id, %rollback_err, "rollback after failed heal also failed");
                    }
                }

                self.state
                    .emit(Event::InjectionFailed {
                        installation_id: installation_id.to_string(),
                        error: err.to_string(),
                        at: chrono::Utc::now(),
                    })
                    .await;
                Err(err.to_string())
            }
        }
    }

    async fn wait_for_stabilization(&self, installation_id: &str) {
        let targets = {
            let manifest = self.state.manifest.lock().await;
            manifest
                .find_installation(installation_id)
                .map(|installation| self.state.discovery.find_injection_targets(installation))
        };
        let Some(targets) = targets else { return };
        if targets.is_empty() {
            return;
        }

        // Poll until every target can be opened for exclusive write access —
        // evidence the browser's updater has finished unpacking new HTML and
        // released its own handle. The caller bounds this with a timeout, so
        // looping forever here just means "never observed quiescence".
        loop {
            let all_openable = targets
                .values()
                .all(|path| std::fs::OpenOptions::new().write(true).open(path).is_ok());
            if all_openable {
                return;
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }
}

struct DaemonRequestHandler {
    state: Arc<AppState>,
}

impl RequestHandler for DaemonRequestHandler {
    async fn handle(&self, request: Request) -> Response {
        match request {
            Request::GetServiceStatus => {
                let manifest = self.state.manifest.lock().await;
                let current_operation = self.state.heal.current_operation().await;
                Response::ok(serde_json::json!({
                    "running": true,
                    "uptimeSeconds": self.state.started_at.elapsed().as_secs(),
                    "installations": manifest.installations.len(),
                    "mods": manifest.mods.len(),
                    "safeMode": self.state.safe_mode.is_active(),
                    "monitoringPaused": self.state.monitoring_paused.load(Ordering::Relaxed),
                    "totalHealsAttempted": self.state.heal.total_heals_attempted(),
                    "totalHealsFailed": self.state.heal.total_heals_failed(),
                    "currentOperation": current_operation.map(|(installation_id, trigger_reason)| {
                        serde_json::json!({ "installationId": installation_id, "triggerReason": trigger_reason })
                    }),
                }))
            }
            Request::GetHealthCheck => {
                // The manifest is loaded (or created fresh) synchronously
                // before `AppState` ever exists, so by construction it is
                // always loaded by the time this handler can run.
                let diagnostics = self.state.discovery_diagnostics.lock().await.clone();
                let last_check_time = *self.state.last_integrity_check_at.lock().await;
                let monitoring_active = !self.state.monitoring_paused.load(Ordering::Relaxed);
                Response::ok(serde_json::json!({
                    "version": vmm_core::constant::TOOL_VERSION,
                    "processRunning": true,
                    "manifestLoaded": true,
                    "ipcUp": true,
                    "monitoringActive": monitoring_active,
                    "integrityCheckerActive": !self.state.safe_mode.is_active(),
                    "diagnostics": diagnostics,
                    "lastCheckTime": last_check_time,
                }))
            }
            Request::GetMonitoringStatus => {
                let watcher = self.state.watcher.lock().await;
                let counters = watcher.counters();
                Response::ok(serde_json::json!({
                    "paused": self.state.monitoring_paused.load(Ordering::Relaxed),
                    "activeWatcherCount": watcher.active_watcher_count(),
                    "totalFileChanges": counters.total_file_changes.load(Ordering::Relaxed),
                    "totalVivaldiChanges": counters.total_vivaldi_changes.load(Ordering::Relaxed),
                    "lastChangeTime": watcher.last_change_time(),
                }))
            }
            Request::PauseMonitoring => {
                self.state.monitoring_paused.store(true, Ordering::Relaxed);
                self.state
                    .emit(Event::MonitoringStateChanged { paused: true, at: chrono::Utc::now() })
                    .await;
                Response::ok_empty()
            }
            Request::ResumeMonitoring => {
                self.state.monitoring_paused.store(false, Ordering::Relaxed);
                self.state
                    .emit(Event::MonitoringStateChanged { paused: false, at: chrono::Utc::now() })
                    .await;
                Response::ok_empty()
            }
            Request::EnableSafeMode => {
                if let Err(err) = self.state.set_safe_mode(true).await {
                    return Response::err(err.to_string());
                }

                // Entering safe mode removes existing injections (best
                // effort, per-installation) without touching mod files or
                // manifest entries (§4.10).
                let ids: Vec<String> = {
                    let manifest = self.state.manifest.lock().await;
                    manifest.managed_installations().map(|i| i.id.clone()).collect()
                };
                for id in ids {
                    let targets = {
                        let manifest = self.state.manifest.lock().await;
                        match manifest.find_installation(&id) {
                            Some(installation) => self.state.discovery.find_injection_targets(installation),
                            None => continue,
                        }
                    };
                    if let Err(err) = self.state.injector.remove_injection(&targets) {
                        warn!(installation_id = %id, %err, "failed to remove injection while entering safe mode");
                    }
                }

                self.state
                    .emit(Event::SafeModeChanged { active: true, at: chrono::Utc::now() })
                    .await;
                Response::ok_empty()
            }
            Request::DisableSafeMode => {
                if let Err(err) = self.state.set_safe_mode(false).await {
                    return Response::err(err.to_string());
                }

                // Re-enqueue every managed installation so the supervisor
                // restores injection on the way out of safe mode (§4.10).
                let ids: Vec<String> = {
                    let manifest = self.state.manifest.lock().await;
                    manifest.managed_installations().map(|i| i.id.clone()).collect()
                };
                for id in &ids {
                    self.state.heal.enqueue(id, "Manual");
                }

                self.state
                    .emit(Event::SafeModeChanged { active: false, at: chrono::Utc::now() })
                    .await;
                Response::ok(serde_json::json!({ "installationsQueued": ids.len() }))
            }
            Request::TriggerAutoHeal { installation_id } => {
                self.state.heal.enqueue(&installation_id, "Manual");
                Response::ok_empty()
            }
            Request::ReloadManifest => match self
                .state
                .manifest_store
                .load(&self.state.manifest_path)
                .await
            {
                Ok(reloaded) => {
                    *self.state.manifest.lock().await = reloaded;
                    self.state
                        .emit(Event::ManifestUpdated { reason: "reload requested".to_string(), at: chrono::Utc::now() })
                        .await;
                    Response::ok_empty()
                }
                Err(err) => Response::err(err.to_string()),
            },
            Request::Subscribe => Response::ok_empty(),
        }
    }
}

/// Detects installations and reconciles them into the manifest: previously
/// unseen installations are added as managed, previously known ones missing
/// from this pass are marked inactive rather than deleted (§4.3).
fn reconcile_installations(manifest: &mut Manifest, discovered: Vec<Installation>) {
    let discovered_ids: std::collections::HashSet<String> =
        discovered.iter().map(|i| i.id.clone()).collect();

    for installation in &mut manifest.installations {
        installation.is_active = discovered_ids.contains(&installation.id);
    }

    for installation in discovered {
        if manifest.find_installation(&installation.id).is_none() {
            manifest.installations.push(installation);
        }
    }
}

/// Scans the mods root for user-dropped `.js` files and reconciles
/// `manifest.mods` against what is actually present: new files are added
/// (disabled by default), changed files get a refreshed checksum, and
/// files no longer present are flagged (`isValidated = false`) but kept —
/// the entry, its `order`, and its `enabled` flag survive a mod being
/// temporarily absent (§3 "missing files are flagged but not removed").
fn reconcile_mod_entries(manifest: &mut Manifest, mods_root: &std::path::Path) -> Result<(), Error> {
    let present = find_mod_source_files(mods_root)?;
    let present_filenames: std::collections::HashSet<String> = present
        .iter()
        .filter_map(|p| p.file_name().and_then(|n| n.to_str()).map(str::to_string))
        .collect();

    for missing in manifest
        .mods
        .iter_mut()
        .filter(|m| !present_filenames.contains(&m.filename))
    {
        missing.is_validated = false;
    }

    for path in present {
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .ok_or_else(|| Error::ValidationFailed {
                target: path.display().to_string(),
                reason: "mod filename is not valid UTF-8".to_string(),
            })?;
        let checksum = hash_file(&path)?;
        let (file_size, modified) = file_observed_metadata(&path)?;
        let modified: chrono::DateTime<chrono::Utc> = modified.into();

        match manifest.mods.iter_mut().find(|m| m.filename == filename) {
            Some(existing) if existing.checksum != checksum => {
                existing.checksum = checksum;
                existing.last_modified = modified;
                existing.file_size = file_size;
                existing.updated_at = chrono::Utc::now();
                existing.is_validated = true;
            }
            Some(existing) => {
                existing.is_validated = true;
            }
            None => {
                let now = chrono::Utc::now();
                let id = filename.trim_end_matches(".js").to_string();
                manifest.mods.push(ModEntry {
                    id,
                    filename,
                    enabled: false,
                    order: manifest.mods.len() as u32,
                    notes: None,
                    checksum,
                    last_modified: modified,
                    version: None,
                    url_scopes: Vec::new(),
                    last_known_compatible_vivaldi: None,
                    created_at: now,
                    updated_at: now,
                    file_size,
                    is_validated: false,
                });
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let cli = Cli::parse();
    let config = StartupConfig::from_cli(&cli).map_err(|err| Error::ValidationFailed {
        target: "startup configuration".to_string(),
        reason: err.to_string(),
    })?;

    let reload_handle = log::init(config.log_level());
    info!(mods_root = %config.mods_root().display(), "vmmd starting");

    std::fs::create_dir_all(config.mods_root())?;
    let manifest_path = config.mods_root().join(MANIFEST_FILE_NAME);
    let manifest_store = FsManifestStore::new();

    let mut manifest = if manifest_store.exists(&manifest_path) {
        manifest_store.load(&manifest_path).await?
    } else {
        manifest_store.create_default(config.mods_root().to_path_buf())
    };

    if manifest.settings.log_level != config.log_level() {
        log::set_level(&reload_handle, &manifest.settings.log_level);
    }

    let discovery = HostInstallationDiscovery::new();
    let discovery_result = discovery.detect();
    for diagnostic in &discovery_result.diagnostics {
        warn!(%diagnostic, "installation discovery diagnostic");
    }
    let discovery_diagnostics = discovery_result.diagnostics.clone();
    reconcile_installations(&mut manifest, discovery_result.installations);
    reconcile_mod_entries(&mut manifest, config.mods_root())?;
    manifest_store.save(&mut manifest, &manifest_path).await?;

    let safe_mode = SafeMode::new();
    safe_mode.set(manifest.settings.safe_mode_active);

    let (events_tx, _events_rx) = vmm_core::events::channel();

    let debounce = Duration::from_millis(config.debounce_ms());
    let mut fs_watcher = watcher::FsWatcher::start(config.mods_root(), debounce)?;
    for installation in manifest.managed_installations() {
        fs_watcher.watch_installation(&installation.id, &installation.application_path);
    }
    let fs_watcher_handle = Arc::new(Mutex::new(fs_watcher));

    let state = Arc::new(AppState {
        config: config.clone(),
        manifest_path: manifest_path.clone(),
        manifest_store,
        manifest: Mutex::new(manifest),
        discovery,
        injector: FsInjector::new(),
        safe_mode,
        heal: Arc::new(HealSupervisor::new()),
        events_tx: events_tx.clone(),
        monitoring_paused: AtomicBool::new(false),
        watcher: fs_watcher_handle,
        started_at: Instant::now(),
        discovery_diagnostics: Mutex::new(discovery_diagnostics),
        last_integrity_check_at: Mutex::new(None),
    });

    let managed_ids: Vec<String> = {
        let manifest = state.manifest.lock().await;
        manifest.managed_installations().map(|i| i.id.clone()).collect()
    };
    for id in &managed_ids {
        match state.sync_installation(id).await {
            Ok(fingerprint) => {
                state
                    .emit(Event::InjectionCompleted { installation_id: id.clone(), fingerprint, at: chrono::Utc::now() })
                    .await;
            }
            Err(err) => {
                warn!(installation_id = %id, %err, "initial injection sync failed");
                state
                    .emit(Event::InjectionFailed { installation_id: id.clone(), error: err.to_string(), at: chrono::Utc::now() })
                    .await;
            }
        }
    }

    let heal_action = Arc::new(DaemonHealAction { state: state.clone() });
    let heal_supervisor = state.heal.clone();
    tokio::spawn(heal_supervisor.run_forever(heal_action));

    let watcher_state = state.clone();
    let pause_watcher = state.watcher.clone();
    let resume_watcher = state.watcher.clone();
    let recv_watcher = state.watcher.clone();

    tokio::spawn(async move {
        loop {
            let batch = {
                let mut watcher = recv_watcher.lock().await;
                watcher.recv().await
            };
            let Some(batch) = batch else { break };
            if watcher_state.monitoring_paused.load(Ordering::Relaxed) {
                continue;
            }

            if let Some(installation_id) = &batch.installation_id {
                let new_version = {
                    let manifest = watcher_state.manifest.lock().await;
                    manifest.find_installation(installation_id).and_then(|installation| {
                        batch
                            .changed_paths
                            .first()
                            .and_then(|p| version_dir_component(&installation.application_path, p))
                    })
                };
                watcher_state
                    .emit(Event::VivaldiUpdateDetected {
                        installation_id: installation_id.clone(),
                        new_version,
                        at: chrono::Utc::now(),
                    })
                    .await;
                watcher_state.heal.enqueue(installation_id, "VivaldiUpdate");
                continue;
            }

            let mut manifest = watcher_state.manifest.lock().await;
            if let Err(err) = reconcile_mod_entries(&mut manifest, watcher_state.config.mods_root()) {
                warn!(%err, "failed to reconcile mod entries after change batch");
                continue;
            }
            if let Err(err) = watcher_state
                .manifest_store
                .save(&mut manifest, &watcher_state.manifest_path)
                .await
            {
                warn!(%err, "failed to save manifest after change batch");
            }
            let ids: Vec<String> = manifest.managed_installations().map(|i| i.id.clone()).collect();
            drop(manifest);

            watcher_state
                .emit(Event::ManifestUpdated { reason: "mods changed on disk".to_string(), at: chrono::Utc::now() })
                .await;

            for id in ids {
                watcher_state.heal.enqueue(&id, "Manual");
            }
        }
    });

    let monitoring_toggle_state = state.clone();
    tokio::spawn(async move {
        let mut was_paused = false;
        loop {
            tokio::time::sleep(Duration::from_millis(200)).await;
            let paused = monitoring_toggle_state.monitoring_paused.load(Ordering::Relaxed);
            if paused && !was_paused {
                pause_watcher.lock().await.pause();
            } else if !paused && was_paused {
                resume_watcher.lock().await.resume();
            }
            was_paused = paused;
        }
    });

    let integrity_state = state.clone();
    let integrity_interval = Duration::from_secs(config.integrity_interval_secs());
    tokio::spawn(async move {
        let mut streak = FailureStreak::new();
        loop {
            let safe_mode_active = integrity_state.safe_mode.is_active();
            let auto_heal_enabled = {
                let manifest = integrity_state.manifest.lock().await;
                manifest.settings.auto_heal_enabled
            };

            if safe_mode_active || !auto_heal_enabled || integrity_state.monitoring_paused.load(Ordering::Relaxed) {
                tokio::time::sleep(integrity_interval).await;
                continue;
            }

            let ids: Vec<String> = {
                let manifest = integrity_state.manifest.lock().await;
                manifest.managed_installations().map(|i| i.id.clone()).collect()
            };

            for (index, id) in ids.iter().enumerate() {
                tokio::time::sleep(stagger_offset(index, ids.len(), integrity_interval)).await;

                let (installation, mods_root, enabled_mod_filenames) = {
                    let manifest = integrity_state.manifest.lock().await;
                    let installation = manifest.find_installation(id).cloned();
                    let enabled_mod_filenames: Vec<String> = manifest
                        .enabled_mods_in_order()
                        .into_iter()
                        .map(|m| m.filename.clone())
                        .collect();
                    (installation, manifest.settings.mods_root_path.clone(), enabled_mod_filenames)
                };
                let Some(installation) = installation else { continue };
                let targets = integrity_state.discovery.find_injection_targets(&installation);
                let loader_path = targets
                    .values()
                    .next()
                    .and_then(|p| p.parent())
                    .map(|resources_dir| {
                        resources_dir
                            .join(vmm_core::constant::LOADER_DIR_NAME)
                            .join(vmm_core::constant::LOADER_FILE_NAME)
                    })
                    .unwrap_or_default();

                let result = check_installation(
                    &integrity_state.injector,
                    &installation,
                    &targets,
                    &loader_path,
                    &mods_root,
                    &enabled_mod_filenames,
                    &mut streak,
                );

                if !result.passed {
                    integrity_state
                        .emit(Event::IntegrityViolation {
                            installation_id: result.installation_id.clone(),
                            violations: result.violations.clone(),
                            consecutive_failures: result.consecutive_failures,
                            at: chrono::Utc::now(),
                        })
                        .await;
                    integrity_state.heal.enqueue(id, "IntegrityViolation");
                } else {
                    integrity_state
                        .emit(Event::ServiceHealthChanged { healthy: true, detail: None, at: chrono::Utc::now() })
                        .await;
                }
            }

            *integrity_state.last_integrity_check_at.lock().await = Some(chrono::Utc::now());
            tokio::time::sleep(integrity_interval).await;
        }
    });

    let (ipc_shutdown_tx, ipc_shutdown_rx) = tokio::sync::watch::channel(false);
    let ipc_state = state.clone();
    let ipc_events = events_tx.clone();
    let ipc_task = tokio::spawn(async move {
        let handler = Arc::new(DaemonRequestHandler { state: ipc_state });
        if let Err(err) = ipc::serve("vmm-core.sock", handler, ipc_events, ipc_shutdown_rx).await {
            error!(%err, "ipc endpoint terminated");
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, draining ipc connections");
    let _ = ipc_shutdown_tx.send(true);
    let _ = tokio::time::timeout(Duration::from_secs(5), ipc_task).await;
    info!("exiting");
    Ok(())
}
