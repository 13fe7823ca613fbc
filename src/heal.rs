//! C8 — the heal supervisor: queue, cooldown, stabilization, retry/backoff,
//! bounded history (§4.8).
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tracing::{info, instrument, warn};

use crate::constant::{
    DEFAULT_BACKOFF_SECS, DEFAULT_COOLDOWN_SECS, DEFAULT_HISTORY_MAX_ENTRIES, DEFAULT_MAX_RETRIES,
    DEFAULT_STABILIZATION_MAX_WAIT_SECS,
};
use crate::manifest::HealHistoryEntry;

/// The supervisor's state for one installation (§4.8 state diagram:
/// `Idle -> Cooldown? -> Stabilizing -> Healing -> Success|Retrying(n<max) ->
/// Cooldown?|Failed`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealState {
    Idle,
    Cooldown,
    Stabilizing,
    Healing,
    Success,
    Retrying,
    Failed,
}

/// A request to heal one installation, queued FIFO (§4.8).
#[derive(Debug, Clone)]
pub struct HealRequest {
    pub installation_id: String,
    pub trigger_reason: String,
    pub retry_count: u32,
}

/// Outcome handed back to whatever enqueued the heal (IPC, integrity
/// checker, watcher-triggered auto-heal).
#[derive(Debug, Clone)]
pub struct HealOutcome {
    pub installation_id: String,
    pub success: bool,
    pub final_state: HealState,
    pub error: Option<String>,
}

/// Decides the next backoff delay for a given retry count, clamped to the
/// last configured element once exhausted (§4.8). `DEFAULT_MAX_RETRIES` caps
/// the *total* number of attempts for a request, not the number of retries
/// after the first — a permanently-failing heal makes exactly
/// `DEFAULT_MAX_RETRIES` attempts in all.
fn backoff_for(retry_count: u32) -> Duration {
    let idx = (retry_count as usize).min(DEFAULT_BACKOFF_SECS.len() - 1);
    Duration::from_secs(DEFAULT_BACKOFF_SECS[idx])
}

/// Tracks the last heal attempt time per installation to enforce the
/// minimum cooldown between attempts (§4.8).
#[derive(Default)]
struct CooldownTracker {
    last_attempt: HashMap<String, Instant>,
}

impl CooldownTracker {
    fn remaining(&self, installation_id: &str, cooldown: Duration) -> Option<Duration> {
        let last = *self.last_attempt.get(installation_id)?;
        let elapsed = last.elapsed();
        if elapsed >= cooldown {
            None
        } else {
            Some(cooldown - elapsed)
        }
    }

    fn record_attempt(&mut self, installation_id: &str) {
        self.last_attempt.insert(installation_id.to_string(), Instant::now());
    }
}

/// The bounded, newest-first heal history (§3, §4.8). Capped at
/// `DEFAULT_HISTORY_MAX_ENTRIES`, oldest entries dropped first.
#[derive(Default)]
pub struct HealHistory {
    entries: VecDeque<HealHistoryEntry>,
}

impl HealHistory {
    pub fn push(&mut self, entry: HealHistoryEntry) {
        self.entries.push_front(entry);
        while self.entries.len() > DEFAULT_HISTORY_MAX_ENTRIES {
            self.entries.pop_back();
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = &HealHistoryEntry> {
        self.entries.iter()
    }
}

/// The action to perform for one queued heal attempt. Abstracted away from
/// the concrete injector/loader pipeline so the state machine can be unit
/// tested without a filesystem (§9).
pub trait HealAction: Send + Sync {
    /// Performs one heal attempt for `installation_id`, returning the
    /// fingerprint written on success.
    fn attempt(
        &self,
        installation_id: &str,
    ) -> impl std::future::Future<Output = Result<String, String>> + Send;

    /// Waits for injection targets to become stable (no concurrent writer)
    /// before attempting the heal, bounded by
    /// `DEFAULT_STABILIZATION_MAX_WAIT_SECS` (§4.8 "Stabilizing").
    fn wait_for_stabilization(
        &self,
        installation_id: &str,
    ) -> impl std::future::Future<Output = ()> + Send;
}

/// Single-worker heal supervisor: a FIFO queue drained by exactly one
/// worker at a time (§4.8 "a single worker processes the queue — healing is
/// never run concurrently for two installations").
pub struct HealSupervisor {
    queue_tx: mpsc::UnboundedSender<HealRequest>,
    queue_rx: Mutex<mpsc::UnboundedReceiver<HealRequest>>,
    worker_gate: Semaphore,
    cooldown: Mutex<CooldownTracker>,
    pub history: Mutex<HealHistory>,
    /// Process-wide counters (§4.8 step 1/8: `total_heals_attempted`,
    /// `total_heals_failed`), exposed to `GetServiceStatus` over IPC.
    total_heals_attempted: AtomicU64,
    total_heals_failed: AtomicU64,
    /// The installation id + trigger reason of the in-flight or most
    /// recently completed heal, surfaced as `GetServiceStatus`'s
    /// "current-operation fields" (§4.9).
    last_operation: Mutex<Option<(String, String)>>,
}

impl HealSupervisor {
    pub fn new() -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        Self {
            queue_tx,
            queue_rx: Mutex::new(queue_rx),
            worker_gate: Semaphore::new(1),
            cooldown: Mutex::new(CooldownTracker::default()),
            history: Mutex::new(HealHistory::default()),
            total_heals_attempted: AtomicU64::new(0),
            total_heals_failed: AtomicU64::new(0),
            last_operation: Mutex::new(None),
        }
    }

    pub fn total_heals_attempted(&self) -> u64 {
        self.total_heals_attempted.load(Ordering::Relaxed)
    }

    pub fn total_heals_failed(&self) -> u64 {
        self.total_heals_failed.load(Ordering::Relaxed)
    }

    pub async fn current_operation(&self) -> Option<(String, String)> {
        self.last_operation.lock().await.clone()
    }

    /// Enqueues a heal request. Non-blocking — the request is picked up by
    /// whichever caller is driving [`Self::run_one`] or [`Self::run_forever`].
    pub fn enqueue(&self, installation_id: &str, trigger_reason: &str) {
        let _ = self.queue_tx.send(HealRequest {
            installation_id: installation_id.to_string(),
            trigger_reason: trigger_reason.to_string(),
            retry_count: 0,
        });
    }

    /// Processes exactly one queued request to completion (including its
    /// internal retry loop), holding the single-worker gate for the
    /// duration. Returns `None` if the queue is closed.
    #[instrument(skip(self, action))]
    pub async fn run_one<A: HealAction>(&self, action: &A) -> Option<HealOutcome> {
        let _permit = self.worker_gate.acquire().await.ok()?;
        let request = self.queue_rx.lock().await.recv().await?;
        Some(self.process(action, request).await)
    }

    /// Drains the queue forever, processing one request at a time. Intended
    /// to run as a background task for the lifetime of the daemon.
    pub async fn run_forever<A: HealAction>(self: Arc<Self>, action: Arc<A>) {
        loop {
            match self.run_one(action.as_ref()).await {
                Some(_) => {}
                None => break,
            }
        }
    }

    async fn process<A: HealAction>(&self, action: &A, mut request: HealRequest) -> HealOutcome {
        let cooldown = Duration::from_secs(DEFAULT_COOLDOWN_SECS);

        loop {
            let remaining = { self.cooldown.lock().await.remaining(&request.installation_id, cooldown) };
            if let Some(remaining) = remaining {
                info!(installation_id = %request.installation_id, ?remaining, "heal cooldown active, waiting");
                tokio::time::sleep(remaining).await;
            }

            tokio::time::timeout(
                Duration::from_secs(DEFAULT_STABILIZATION_MAX_WAIT_SECS),
                action.wait_for_stabilization(&request.installation_id),
            )
            .await
            .ok();

            *self.last_operation.lock().await =
                Some((request.installation_id.clone(), request.trigger_reason.clone()));
            self.total_heals_attempted.fetch_add(1, Ordering::Relaxed);

            let started = Utc::now();
            let start_instant = Instant::now();
            let result = action.attempt(&request.installation_id).await;
            self.cooldown.lock().await.record_attempt(&request.installation_id);

            let duration_ms = start_instant.elapsed().as_millis() as u64;

            match result {
                Ok(fingerprint) => {
                    self.history.lock().await.push(HealHistoryEntry {
                        installation_id: request.installation_id.clone(),
                        trigger_reason: request.trigger_reason.clone(),
                        started_at: started,
                        duration_ms,
                        success: true,
                        fingerprint: Some(fingerprint),
                        error: None,
                    });
                    info!(installation_id = %request.installation_id, "heal succeeded");
                    return HealOutcome {
                        installation_id: request.installation_id,
                        success: true,
                        final_state: HealState::Success,
                        error: None,
                    };
                }
                Err(error) => {
                    self.history.lock().await.push(HealHistoryEntry {
                        installation_id: request.installation_id.clone(),
                        trigger_reason: request.trigger_reason.clone(),
                        started_at: started,
                        duration_ms,
                        success: false,
                        fingerprint: None,
                        error: Some(error.clone()),
                    });

                    if request.retry_count + 1 >= DEFAULT_MAX_RETRIES {
                        warn!(installation_id = %request.installation_id, %error, "heal failed, retries exhausted");
                        self.total_heals_failed.fetch_add(1, Ordering::Relaxed);
                        return HealOutcome {
                            installation_id: request.installation_id,
                            success: false,
                            final_state: HealState::Failed,
                            error: Some(error),
                        };
                    }

                    let delay = backoff_for(request.retry_count);
                    warn!(installation_id = %request.installation_id, %error, retry = request.retry_count, ?delay, "heal failed, retrying after backoff");
                    tokio::time::sleep(delay).await;
                    request.retry_count += 1;
                }
            }
        }
    }
}

impl Default for HealSupervisor {
    fn default() -> Self {
        Self::new()
    }
}
