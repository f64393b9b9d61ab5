use crate::core::errors::FreshnessError;
use crate::core::models::{OwnerId, ScanSummary};
use crate::core::settings::SyncSettings;
use crate::core::store::TripStore;
use crate::providers::InboxScanner;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;

/// The narrated phases shown while a sync runs. The server reports no
/// incremental progress, so these advance on a timer; the final entry has
/// zero delay and sticks until the job settles.
pub const SYNC_PHASES: &[(&str, u64)] = &[
    ("Connecting to your inbox…", 4_000),
    ("Looking for travel emails…", 10_000),
    ("Extracting trips and reservations…", 20_000),
    ("Almost done…", 0),
];

#[derive(Debug, Clone)]
pub enum SyncOutcome {
    Completed(ScanSummary),
    Failed(FreshnessError),
    /// The client stopped waiting; the server job may still land its data.
    /// Shown as a soft "still completing" message, never as a failure.
    TimedOut,
}

impl SyncOutcome {
    pub fn user_message(&self) -> String {
        match self {
            SyncOutcome::Completed(summary) => format!(
                "Found {} trip(s) and {} reservation(s) in {} email(s)",
                summary.trips_created, summary.reservations_created, summary.emails_processed
            ),
            SyncOutcome::Failed(e) => e.user_message(),
            SyncOutcome::TimedOut => FreshnessError::ClientTimeout.user_message(),
        }
    }
}

/// Observable sync state. One session per client process at a time.
#[derive(Debug, Clone)]
pub struct SyncSession {
    pub is_syncing: bool,
    pub account: Option<OwnerId>,
    pub phase: usize,
    pub phase_message: String,
    pub started_at: Option<Instant>,
    pub last_outcome: Option<SyncOutcome>,
}

impl SyncSession {
    fn idle() -> Self {
        Self {
            is_syncing: false,
            account: None,
            phase: 0,
            phase_message: String::new(),
            started_at: None,
            last_outcome: None,
        }
    }
}

struct SyncInner {
    store: TripStore,
    scanner: Arc<dyn InboxScanner>,
    settings: SyncSettings,
    session: watch::Sender<SyncSession>,
    /// Serializes the idle→running transition so two racing starts cannot
    /// both pass the checks.
    start_gate: Mutex<()>,
    /// Rate-limit bookkeeping on the monotonic clock; the wall-clock
    /// "last synced" shown to the UI lives in the store.
    last_attempt: Mutex<HashMap<OwnerId, Instant>>,
}

/// Orchestrates the long-running inbox scan.
///
/// The scan job, a client timeout, and a last-resort safety reset all race
/// toward a single finish; whichever settles first wins and the rest become
/// no-ops. The job itself is never cancelled: a timeout only stops the
/// waiting, and a late settlement is logged and dropped.
#[derive(Clone)]
pub struct SyncOrchestrator {
    inner: Arc<SyncInner>,
}

impl SyncOrchestrator {
    pub fn new(store: TripStore, scanner: Arc<dyn InboxScanner>, settings: SyncSettings) -> Self {
        let (session, _rx) = watch::channel(SyncSession::idle());
        Self {
            inner: Arc::new(SyncInner {
                store,
                scanner,
                settings,
                session,
                start_gate: Mutex::new(()),
                last_attempt: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncSession> {
        self.inner.session.subscribe()
    }

    pub fn session(&self) -> SyncSession {
        self.inner.session.borrow().clone()
    }

    /// Begin a sync for the account. Rejected, with the exact wait, when
    /// one is already running or the account's cooldown has not elapsed;
    /// a rejection changes nothing and does not touch the cooldown clock.
    pub async fn start_sync(&self, account: &OwnerId) -> Result<(), FreshnessError> {
        let _gate = self.inner.start_gate.lock().await;

        let current = self.inner.session.borrow().clone();
        if current.is_syncing {
            // Worst case, the safety reset frees the slot.
            let safety = Duration::from_secs(self.inner.settings.safety_reset_secs);
            let remaining = current
                .started_at
                .map(|s| safety.saturating_sub(s.elapsed()))
                .unwrap_or(safety);
            return Err(FreshnessError::RateLimited {
                retry_after: remaining.max(Duration::from_secs(1)),
            });
        }

        let cooldown = Duration::from_secs(self.inner.settings.cooldown_secs);
        let last_attempt = self.inner.last_attempt.lock().await.get(account).copied();
        match last_attempt {
            Some(last) => {
                let elapsed = last.elapsed();
                if elapsed < cooldown {
                    return Err(FreshnessError::RateLimited {
                        retry_after: cooldown - elapsed,
                    });
                }
            }
            None => {
                // Fresh process: fall back to the persisted wall-clock stamp
                // so a restart does not bypass the cooldown.
                if let Some(last) = self.inner.store.last_synced_at(account).await {
                    let elapsed = Utc::now().signed_duration_since(last);
                    let window = chrono::Duration::seconds(self.inner.settings.cooldown_secs as i64);
                    if elapsed >= chrono::Duration::zero() && elapsed < window {
                        let remaining = (window - elapsed).to_std().unwrap_or(cooldown);
                        return Err(FreshnessError::RateLimited {
                            retry_after: remaining.max(Duration::from_secs(1)),
                        });
                    }
                }
            }
        }

        let finished = Arc::new(AtomicBool::new(false));
        let started_at = Instant::now();

        self.inner.session.send_replace(SyncSession {
            is_syncing: true,
            account: Some(account.clone()),
            phase: 0,
            phase_message: SYNC_PHASES[0].0.to_string(),
            started_at: Some(started_at),
            last_outcome: current.last_outcome,
        });
        tracing::info!(account = %account, "Inbox sync started");

        self.spawn_phase_walker(Arc::clone(&finished));
        self.spawn_job(account.clone(), Arc::clone(&finished));
        self.spawn_client_timeout(account.clone(), Arc::clone(&finished));
        self.spawn_safety_reset(account.clone(), finished);

        Ok(())
    }

    /// Walk the narration list. Decoupled from the job: it only reads the
    /// finish flag, never decides the outcome.
    fn spawn_phase_walker(&self, finished: Arc<AtomicBool>) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            for (i, (message, delay_ms)) in SYNC_PHASES.iter().enumerate() {
                if finished.load(Ordering::Acquire) {
                    return;
                }
                inner.session.send_modify(|s| {
                    if s.is_syncing {
                        s.phase = i;
                        s.phase_message = (*message).to_string();
                    }
                });
                if *delay_ms == 0 {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(*delay_ms)).await;
            }
        });
    }

    fn spawn_job(&self, account: OwnerId, finished: Arc<AtomicBool>) {
        let inner = Arc::clone(&self.inner);
        let this = self.clone();
        tokio::spawn(async move {
            // Runs to completion even if the client stops waiting: the
            // scan's side effects are worth keeping either way.
            let outcome = match inner.scanner.scan_inbox(&account).await {
                Ok(summary) => {
                    tracing::info!(
                        account = %account,
                        trips = summary.trips_created,
                        reservations = summary.reservations_created,
                        emails = summary.emails_processed,
                        "Inbox scan completed"
                    );
                    SyncOutcome::Completed(summary)
                }
                Err(e) => {
                    tracing::warn!(account = %account, error = %e, "Inbox scan failed");
                    SyncOutcome::Failed(e)
                }
            };
            this.finish(&account, &finished, outcome).await;
        });
    }

    fn spawn_client_timeout(&self, account: OwnerId, finished: Arc<AtomicBool>) {
        let timeout = Duration::from_secs(self.inner.settings.client_timeout_secs);
        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if !finished.load(Ordering::Acquire) {
                tracing::info!(
                    account = %account,
                    waited_secs = timeout.as_secs(),
                    "Client stopped waiting on inbox scan"
                );
            }
            this.finish(&account, &finished, SyncOutcome::TimedOut).await;
        });
    }

    fn spawn_safety_reset(&self, account: OwnerId, finished: Arc<AtomicBool>) {
        let reset_after = Duration::from_secs(self.inner.settings.safety_reset_secs);
        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(reset_after).await;
            if !finished.load(Ordering::Acquire) {
                tracing::error!(
                    account = %account,
                    "Safety reset: sync never settled, forcing idle"
                );
            }
            this.finish(&account, &finished, SyncOutcome::TimedOut).await;
        });
    }

    /// The single-resolution finish. Whoever swaps the flag first settles
    /// the session; everyone else's result is logged and dropped.
    async fn finish(&self, account: &OwnerId, finished: &AtomicBool, outcome: SyncOutcome) {
        if finished.swap(true, Ordering::AcqRel) {
            tracing::debug!(account = %account, ?outcome, "Late sync settlement ignored");
            return;
        }

        // Every real attempt (success, failure, or timeout) moves the
        // cooldown clock, so a failing job cannot be retried in a tight loop.
        self.inner
            .last_attempt
            .lock()
            .await
            .insert(account.clone(), Instant::now());
        self.inner.store.mark_synced(account, Utc::now()).await;

        self.inner.session.send_modify(|s| {
            s.is_syncing = false;
            s.account = None;
            s.phase = 0;
            s.phase_message = String::new();
            s.started_at = None;
            s.last_outcome = Some(outcome);
        });
    }
}
