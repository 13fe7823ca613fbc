//! C6 — filesystem watcher with debounced event coalescing (§4.6).
//!
//! `notify` is not something the teacher repo reaches for (it polls a
//! registry over HTTP, not a local directory), but several files in the
//! retrieval pack build exactly this kind of debounced local watcher on top
//! of it, so that is the crate this module is grounded on.
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tracing::warn;

use crate::constant::{IGNORED_SUFFIXES, LOADER_DIR_NAME, MOD_FILE_EXTENSION};
use crate::error::Error;

/// A coalesced batch of changes observed within one debounce window (§4.6).
/// `installation_id` is set for batches drawn from a managed installation's
/// tree rather than the mods root.
#[derive(Debug, Clone, Default)]
pub struct ChangeBatch {
    pub changed_paths: Vec<PathBuf>,
    pub installation_id: Option<String>,
}

/// Observable counters exposed over IPC (`GetMonitoringStatus`, §4.6
/// "active_watcher_count, total_file_changes, total_vivaldi_changes,
/// last_change_time are observable").
#[derive(Debug, Default)]
pub struct WatcherCounters {
    pub events_observed: AtomicU64,
    pub events_ignored: AtomicU64,
    pub batches_emitted: AtomicU64,
    pub total_file_changes: AtomicU64,
    pub total_vivaldi_changes: AtomicU64,
}

/// Watches the mods root plus a dynamic set of managed installation trees,
/// coalescing bursts into [`ChangeBatch`]es once each changed path has been
/// quiescent for the debounce window, and exposing pause/resume control that
/// actually releases and re-establishes the underlying OS watch handles
/// (§4.6).
pub struct FsWatcher {
    watcher: StdMutex<RecommendedWatcher>,
    paused: Arc<AtomicBool>,
    counters: Arc<WatcherCounters>,
    batches: mpsc::Receiver<ChangeBatch>,
    mods_root: PathBuf,
    installation_roots: Arc<StdMutex<HashMap<PathBuf, String>>>,
    last_change_time: Arc<StdMutex<Option<DateTime<Utc>>>>,
}

impl FsWatcher {
    /// Starts watching `mods_root` recursively (§4.6 "the mods root
    /// directory recursively for files with the mod extension"), draining
    /// coalesced events into a channel every `debounce` interval.
    /// Self-writes under the browser's `vivaldi-mods/` loader directory are
    /// filtered at the source, resolving the open question of whether the
    /// watcher should see its own output (§4.6, §9 open question — decided:
    /// filtered). Installation trees are added afterwards via
    /// [`Self::watch_installation`].
    pub fn start(mods_root: &Path, debounce: Duration) -> Result<Self, Error> {
        let (raw_tx, mut raw_rx) = mpsc::unbounded_channel::<(PathBuf, Option<String>)>();
        let counters = Arc::new(WatcherCounters::default());
        let paused = Arc::new(AtomicBool::new(false));
        let installation_roots: Arc<StdMutex<HashMap<PathBuf, String>>> =
            Arc::new(StdMutex::new(HashMap::new()));
        let last_change_time = Arc::new(StdMutex::new(None));
        let mods_root_owned = mods_root.to_path_buf();

        let counters_cb = counters.clone();
        let paused_cb = paused.clone();
        let roots_cb = installation_roots.clone();
        let last_change_cb = last_change_time.clone();
        let mods_root_cb = mods_root_owned.clone();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let event = match res {
                Ok(event) => event,
                Err(err) => {
                    warn!(?err, "watcher backend error");
                    return;
                }
            };

            if paused_cb.load(Ordering::Relaxed) {
                return;
            }

            if !matches!(
                event.kind,
                EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
            ) {
                return;
            }

            for path in event.paths {
                counters_cb.events_observed.fetch_add(1, Ordering::Relaxed);

                let installation_id = roots_cb
                    .lock()
                    .unwrap()
                    .iter()
                    .find(|(root, _)| path.starts_with(root))
                    .map(|(_, id)| id.clone());

                let relevant = match &installation_id {
                    Some(_) => is_relevant_installation_path(&path),
                    None => path.starts_with(&mods_root_cb) && is_relevant_mod_path(&path),
                };

                if relevant {
                    *last_change_cb.lock().unwrap() = Some(Utc::now());
                    let _ = raw_tx.send((path, installation_id));
                } else {
                    counters_cb.events_ignored.fetch_add(1, Ordering::Relaxed);
                }
            }
        })?;

        watcher.watch(mods_root, RecursiveMode::Recursive)?;

        let (batch_tx, batch_rx) = mpsc::channel(64);
        let counters_task = counters.clone();
        tokio::spawn(async move {
            // Trailing-edge debounce: a path is only emitted once it has
            // been quiescent for `debounce`, not on every fixed tick — a
            // path that keeps changing is held back indefinitely rather than
            // re-emitted each interval (§4.6 invariant: at least
            // `debounce_ms` of quiescence between consecutive events for the
            // same path). The poll interval just needs to be finer than the
            // debounce window so quiescence is detected promptly.
            let poll_interval = Duration::from_millis((debounce.as_millis() as u64 / 4).clamp(25, 500));
            let mut ticker = tokio::time::interval(poll_interval);
            let mut pending_mods: HashMap<PathBuf, Instant> = HashMap::new();
            let mut pending_installations: HashMap<String, HashMap<PathBuf, Instant>> = HashMap::new();

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let now = Instant::now();

                        let ready_mods: Vec<PathBuf> = pending_mods
                            .iter()
                            .filter(|(_, &last)| now.duration_since(last) >= debounce)
                            .map(|(path, _)| path.clone())
                            .collect();
                        if !ready_mods.is_empty() {
                            for path in &ready_mods {
                                pending_mods.remove(path);
                            }
                            counters_task.total_file_changes.fetch_add(ready_mods.len() as u64, Ordering::Relaxed);
                            counters_task.batches_emitted.fetch_add(1, Ordering::Relaxed);
                            if batch_tx.send(ChangeBatch { changed_paths: ready_mods, installation_id: None }).await.is_err() {
                                break;
                            }
                        }

                        let mut drained_installations = Vec::new();
                        for (id, paths) in pending_installations.iter_mut() {
                            let ready: Vec<PathBuf> = paths
                                .iter()
                                .filter(|(_, &last)| now.duration_since(last) >= debounce)
                                .map(|(path, _)| path.clone())
                                .collect();
                            if ready.is_empty() {
                                continue;
                            }
                            for path in &ready {
                                paths.remove(path);
                            }
                            counters_task.total_vivaldi_changes.fetch_add(ready.len() as u64, Ordering::Relaxed);
                            counters_task.batches_emitted.fetch_add(1, Ordering::Relaxed);
                            if batch_tx.send(ChangeBatch { changed_paths: ready, installation_id: Some(id.clone()) }).await.is_err() {
                                return;
                            }
                            if paths.is_empty() {
                                drained_installations.push(id.clone());
                            }
                        }
                        for id in drained_installations {
                            pending_installations.remove(&id);
                        }
                    }
                    maybe_event = raw_rx.recv() => {
                        match maybe_event {
                            Some((path, Some(installation_id))) => {
                                pending_installations.entry(installation_id).or_default().insert(path, Instant::now());
                            }
                            Some((path, None)) => {
                                pending_mods.insert(path, Instant::now());
                            }
                            None => break,
                        }
                    }
                }
            }
        });

        Ok(Self {
            watcher: StdMutex::new(watcher),
            paused,
            counters,
            batches: batch_rx,
            mods_root: mods_root_owned,
            installation_roots,
            last_change_time,
        })
    }

    /// Receives the next coalesced batch of changes, or `None` once the
    /// watcher task has shut down.
    pub async fn recv(&mut self) -> Option<ChangeBatch> {
        self.batches.recv().await
    }

    /// Begins recursively watching a managed installation's tree, tagging
    /// every event observed under it with `installation_id` (§4.6 "each
    /// managed installation's resources directory recursively"). Watches
    /// the installation's `Application/` directory rather than just the
    /// current version's `resources/vivaldi/` subtree, since a browser
    /// update replaces the version directory itself (§8 scenario S2) and a
    /// narrower watch would miss the new directory being created.
    pub fn watch_installation(&self, installation_id: &str, application_dir: &Path) {
        let mut watcher = self.watcher.lock().unwrap();
        if let Err(err) = watcher.watch(application_dir, RecursiveMode::Recursive) {
            warn!(?err, installation_id, ?application_dir, "failed to watch installation tree");
            return;
        }
        self.installation_roots
            .lock()
            .unwrap()
            .insert(application_dir.to_path_buf(), installation_id.to_string());
    }

    pub fn unwatch_installation(&self, application_dir: &Path) {
        let mut watcher = self.watcher.lock().unwrap();
        let _ = watcher.unwatch(application_dir);
        self.installation_roots.lock().unwrap().remove(application_dir);
    }

    /// Stops delivering events and releases every OS watch handle (§4.6
    /// "pause() stops delivering and releases OS watch handles").
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Relaxed);
        let mut watcher = self.watcher.lock().unwrap();
        let _ = watcher.unwatch(&self.mods_root);
        for root in self.installation_roots.lock().unwrap().keys() {
            let _ = watcher.unwatch(root);
        }
    }

    /// Re-establishes every watch handle using the current installation set
    /// (§4.6 "resume() re-establishes them using the current manifest").
    pub fn resume(&self) {
        let mut watcher = self.watcher.lock().unwrap();
        if let Err(err) = watcher.watch(&self.mods_root, RecursiveMode::Recursive) {
            warn!(?err, "failed to re-watch mods root on resume");
        }
        for root in self.installation_roots.lock().unwrap().keys() {
            if let Err(err) = watcher.watch(root, RecursiveMode::Recursive) {
                warn!(?err, ?root, "failed to re-watch installation tree on resume");
            }
        }
        self.paused.store(false, Ordering::Relaxed);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    pub fn counters(&self) -> &WatcherCounters {
        &self.counters
    }

    /// One handle for the mods root plus one per currently watched
    /// installation tree (§4.6 "active_watcher_count").
    pub fn active_watcher_count(&self) -> usize {
        1 + self.installation_roots.lock().unwrap().len()
    }

    pub fn last_change_time(&self) -> Option<DateTime<Utc>> {
        *self.last_change_time.lock().unwrap()
    }
}

fn passes_ignore_filters(path: &Path) -> bool {
    if path.components().any(|c| c.as_os_str() == LOADER_DIR_NAME) {
        return false;
    }

    let name = match path.file_name().and_then(|n| n.to_str()) {
        Some(name) => name,
        None => return false,
    };

    if name.ends_with('~') {
        return false;
    }

    !IGNORED_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
}

/// A mods-root path is relevant if it is a `.js` file, doesn't carry an
/// ignored editor/temp-file suffix, and doesn't fall under the loader's own
/// output directory (§4.6).
fn is_relevant_mod_path(path: &Path) -> bool {
    passes_ignore_filters(path)
        && path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case(MOD_FILE_EXTENSION))
}

/// An installation-tree path is relevant under the same ignore filters, but
/// without a `.js` extension requirement — a browser update touches HTML,
/// binaries, and version directories, not just script files (§4.6).
fn is_relevant_installation_path(path: &Path) -> bool {
    passes_ignore_filters(path)
}

/// Given an installation's `Application/` directory and a changed path under
/// it, returns the immediate child directory name — the version directory a
/// browser update creates or replaces (§8 scenario S2).
pub fn version_dir_component(application_dir: &Path, changed_path: &Path) -> Option<String> {
    let relative = changed_path.strip_prefix(application_dir).ok()?;
    relative
        .components()
        .next()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
}

/// Test-only stand-in that lets component tests feed synthetic batches
/// without touching a real filesystem watcher (§9).
pub struct FakeWatcher {
    batches: Mutex<mpsc::Receiver<ChangeBatch>>,
    sender: mpsc::Sender<ChangeBatch>,
}

impl FakeWatcher {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel(16);
        Self {
            batches: Mutex::new(receiver),
            sender,
        }
    }

    pub async fn push(&self, batch: ChangeBatch) {
        let _ = self.sender.send(batch).await;
    }

    pub async fn recv(&self) -> Option<ChangeBatch> {
        self.batches.lock().await.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_relevant_mod_path_accepts_js_file() {
        assert!(is_relevant_mod_path(Path::new("/mods/hello.js")));
    }

    #[test]
    fn test_is_relevant_mod_path_rejects_non_js_extension() {
        assert!(!is_relevant_mod_path(Path::new("/mods/readme.txt")));
    }

    #[test]
    fn test_is_relevant_mod_path_rejects_ignored_suffix() {
        assert!(!is_relevant_mod_path(Path::new("/mods/hello.js.swp")));
    }

    #[test]
    fn test_is_relevant_mod_path_rejects_trailing_tilde() {
        assert!(!is_relevant_mod_path(Path::new("/mods/hello.js~")));
    }

    #[test]
    fn test_is_relevant_mod_path_rejects_loader_dir_self_writes() {
        assert!(!is_relevant_mod_path(Path::new(
            "/resources/vivaldi/vivaldi-mods/mods/hello.js"
        )));
    }

    #[test]
    fn test_is_relevant_installation_path_accepts_non_js_files() {
        assert!(is_relevant_installation_path(Path::new(
            "/Application/6.5.0/resources/vivaldi/window.html"
        )));
    }

    #[test]
    fn test_is_relevant_installation_path_rejects_own_loader_output() {
        assert!(!is_relevant_installation_path(Path::new(
            "/Application/6.5.0/resources/vivaldi/vivaldi-mods/loader.js"
        )));
    }

    #[test]
    fn test_version_dir_component_extracts_immediate_child() {
        let application_dir = Path::new("/opt/vivaldi/Application");
        let changed = Path::new("/opt/vivaldi/Application/6.6.0/resources/vivaldi/window.html");

        assert_eq!(
            version_dir_component(application_dir, changed),
            Some("6.6.0".to_string())
        );
    }

    #[tokio::test]
    async fn test_fake_watcher_round_trips_batch() {
        let fake = FakeWatcher::new();
        fake.push(ChangeBatch {
            changed_paths: vec![PathBuf::from("/mods/a.js")],
            installation_id: None,
        })
        .await;

        let batch = fake.recv().await.unwrap();
        assert_eq!(batch.changed_paths, vec![PathBuf::from("/mods/a.js")]);
        assert_eq!(batch.installation_id, None);
    }
}
