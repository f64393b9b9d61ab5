use crate::core::cadence;
use crate::core::codec;
use crate::core::errors::FreshnessError;
use crate::core::models::{AggregateScope, EntityId, FreshnessRecord, TripId};
use crate::core::store::TripStore;
use crate::providers::StatusAggregator;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::time::Instant;

/// How often a trip task re-evaluates its cadence. The cadence tiers are
/// minutes to hours, so a coarse check keeps scheduling simple without
/// meaningful drift.
const CHECK_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
enum RefreshOutcome {
    Applied,
    Failed(FreshnessError),
}

impl RefreshOutcome {
    fn into_result(self) -> Result<(), FreshnessError> {
        match self {
            RefreshOutcome::Applied => Ok(()),
            RefreshOutcome::Failed(e) => Err(e),
        }
    }
}

/// Per-trip polling bookkeeping; recomputed from the entities' scheduled
/// times on every pass, never persisted.
struct PollState {
    next_due: Option<Instant>,
}

impl PollState {
    fn new() -> Self {
        Self { next_due: None }
    }

    /// True when a tick should fire now. Reschedules on tier changes so a
    /// flight moving into a tighter tier is not stuck on a stale due time.
    fn due(&mut self, now: Instant, interval: Option<Duration>) -> bool {
        let Some(interval) = interval else {
            self.next_due = None;
            return false;
        };

        match self.next_due {
            None => {
                // Freshly schedulable: fire immediately, then settle into
                // the cadence.
                self.next_due = Some(now + interval);
                true
            }
            Some(due) if now >= due => {
                self.next_due = Some(now + interval);
                true
            }
            Some(due) => {
                // Tier may have tightened since the last pass.
                if due > now + interval {
                    self.next_due = Some(now + interval);
                }
                false
            }
        }
    }
}

struct PollInner {
    store: TripStore,
    aggregator: Arc<dyn StatusAggregator>,
    inflight: Mutex<HashMap<TripId, broadcast::Sender<RefreshOutcome>>>,
}

/// Client-side poll scheduler.
///
/// `watch` drives background ticks for a trip while a screen shows it;
/// `refresh_now` is the explicit pull-to-refresh path. Both funnel into one
/// in-flight aggregation call per trip, so concurrent refreshes coalesce
/// instead of stacking network calls.
#[derive(Clone)]
pub struct PollScheduler {
    inner: Arc<PollInner>,
}

impl PollScheduler {
    pub fn new(store: TripStore, aggregator: Arc<dyn StatusAggregator>) -> Self {
        Self {
            inner: Arc::new(PollInner {
                store,
                aggregator,
                inflight: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Reactive per-entity freshness for one trip. The background task polls
    /// on the cadence tier of the trip's most imminent flight and exits when
    /// the last receiver is dropped.
    pub async fn watch(&self, trip_id: &TripId) -> watch::Receiver<HashMap<EntityId, FreshnessRecord>> {
        let initial = self.inner.store.statuses_for_trip(trip_id).await;
        let (tx, rx) = watch::channel(initial);

        let inner = Arc::clone(&self.inner);
        let trip_id = trip_id.clone();
        tokio::spawn(async move {
            run_trip_loop(inner, trip_id, tx).await;
        });

        rx
    }

    /// Explicit refresh. Runs even when the cadence says "no polling"
    /// (user intent overrides the tiering), but never concurrently with
    /// itself for the same trip: a second call while one is outstanding
    /// subscribes to the in-flight outcome and issues no network call.
    pub async fn refresh_now(&self, trip_id: &TripId) -> Result<(), FreshnessError> {
        self.refresh_coalesced(trip_id).await.into_result()
    }

    async fn refresh_coalesced(&self, trip_id: &TripId) -> RefreshOutcome {
        let mut follower = {
            let mut inflight = self.inner.inflight.lock().await;
            match inflight.get(trip_id) {
                Some(tx) => Some(tx.subscribe()),
                None => {
                    let (tx, _rx) = broadcast::channel(1);
                    inflight.insert(trip_id.clone(), tx);
                    None
                }
            }
        };

        if let Some(rx) = follower.as_mut() {
            return match rx.recv().await {
                Ok(outcome) => outcome,
                Err(_) => RefreshOutcome::Failed(FreshnessError::TransientUpstream(
                    "refresh interrupted".to_string(),
                )),
            };
        }

        let outcome = self.perform_refresh(trip_id).await;

        // Remove before broadcasting so a refresh arriving after the send
        // starts a fresh call instead of reading a settled channel.
        let tx = self.inner.inflight.lock().await.remove(trip_id);
        if let Some(tx) = tx {
            let _ = tx.send(outcome.clone());
        }

        outcome
    }

    async fn perform_refresh(&self, trip_id: &TripId) -> RefreshOutcome {
        let Some(owner) = self.inner.store.owner_of_trip(trip_id).await else {
            return RefreshOutcome::Failed(FreshnessError::Malformed(format!(
                "unknown trip {trip_id}"
            )));
        };

        match self
            .inner
            .aggregator
            .aggregate_status(&owner, AggregateScope::Trip(trip_id.clone()))
            .await
        {
            Ok(response) => {
                let applied = self.inner.store.merge_batch(&response.per_entity).await;
                tracing::debug!(trip = %trip_id, applied, "Trip refresh applied");
                RefreshOutcome::Applied
            }
            Err(e) => {
                tracing::debug!(trip = %trip_id, error = %e, "Trip refresh failed");
                RefreshOutcome::Failed(e)
            }
        }
    }
}

async fn run_trip_loop(
    inner: Arc<PollInner>,
    trip_id: TripId,
    tx: watch::Sender<HashMap<EntityId, FreshnessRecord>>,
) {
    let scheduler = PollScheduler { inner };
    let mut state = PollState::new();
    let mut check = tokio::time::interval(CHECK_INTERVAL);
    check.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    tracing::debug!(trip = %trip_id, "Watching trip");

    loop {
        check.tick().await;
        if tx.is_closed() {
            tracing::debug!(trip = %trip_id, "Last watcher gone, stopping");
            return;
        }

        let entities = scheduler.inner.store.tracked_for_trip(&trip_id).await;
        let now = Utc::now();

        // The trip ticks at the tightest cadence any of its flights needs;
        // one call then refreshes all of them in a single round-trip.
        let interval = entities
            .iter()
            .filter_map(|e| {
                let status = codec::decode_entity(e).map(|r| r.status);
                cadence::next_interval(now, e.scheduled_start, e.scheduled_end, status)
            })
            .min();

        if state.due(Instant::now(), interval) {
            // Background failures stay silent; the next due tick retries
            // naturally without tightening the cadence.
            if let RefreshOutcome::Failed(e) = scheduler.refresh_coalesced(&trip_id).await {
                tracing::debug!(trip = %trip_id, error = %e, "Background tick failed");
            }
        }

        let current = scheduler.inner.store.statuses_for_trip(&trip_id).await;
        tx.send_if_modified(|cached| {
            if *cached != current {
                *cached = current;
                true
            } else {
                false
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::{
        AggregateResponse, FlightStatus, OwnerId, ReservationKind, Trip, WatchedEntity,
    };
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedAggregator {
        calls: AtomicUsize,
        delay: Duration,
        fail: bool,
        status: FlightStatus,
    }

    impl ScriptedAggregator {
        fn new(status: FlightStatus) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                delay: Duration::ZERO,
                fail: false,
                status,
            }
        }

        fn slow(delay: Duration) -> Self {
            Self {
                delay,
                ..Self::new(FlightStatus::Scheduled)
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::new(FlightStatus::Scheduled)
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl StatusAggregator for ScriptedAggregator {
        async fn aggregate_status(
            &self,
            _owner: &OwnerId,
            scope: AggregateScope,
        ) -> Result<AggregateResponse, FreshnessError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail {
                return Err(FreshnessError::TransientUpstream("503".to_string()));
            }
            let AggregateScope::Trip(_) = scope else {
                return Ok(AggregateResponse::default());
            };
            let mut per_entity = HashMap::new();
            per_entity.insert(
                EntityId::from("res-1"),
                FreshnessRecord {
                    status: self.status,
                    departure_gate: Some("B7".to_string()),
                    departure_terminal: None,
                    arrival_gate: None,
                    arrival_terminal: None,
                    checked_at: Utc::now(),
                    source: "scripted".to_string(),
                },
            );
            Ok(AggregateResponse {
                per_entity,
                has_more: false,
            })
        }
    }

    async fn store_with_flight(hours_out: i64) -> TripStore {
        let store = TripStore::new();
        store
            .upsert_trip(Trip {
                id: TripId::from("trip-1"),
                owner: OwnerId::from("alice"),
                name: "Tokyo".to_string(),
            })
            .await;
        store
            .upsert_entity(WatchedEntity {
                id: EntityId::from("res-1"),
                trip_id: TripId::from("trip-1"),
                kind: ReservationKind::Flight,
                scheduled_start: Utc::now() + ChronoDuration::hours(hours_out),
                scheduled_end: None,
                details: serde_json::Map::new(),
            })
            .await;
        store
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_refresh_now_coalesces() {
        let store = store_with_flight(1).await;
        let aggregator = Arc::new(ScriptedAggregator::slow(Duration::from_secs(3)));
        let scheduler = PollScheduler::new(store, aggregator.clone());

        let trip = TripId::from("trip-1");
        let a = {
            let scheduler = scheduler.clone();
            let trip = trip.clone();
            tokio::spawn(async move { scheduler.refresh_now(&trip).await })
        };
        let b = {
            let scheduler = scheduler.clone();
            let trip = trip.clone();
            tokio::spawn(async move { scheduler.refresh_now(&trip).await })
        };

        let (a, b) = tokio::join!(a, b);
        assert!(a.unwrap().is_ok());
        assert!(b.unwrap().is_ok());
        assert_eq!(aggregator.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_refresh_failure_reaches_both_callers() {
        let store = store_with_flight(1).await;
        let aggregator = Arc::new(ScriptedAggregator {
            delay: Duration::from_secs(3),
            ..ScriptedAggregator::failing()
        });
        let scheduler = PollScheduler::new(store, aggregator.clone());

        let trip = TripId::from("trip-1");
        let a = {
            let scheduler = scheduler.clone();
            let trip = trip.clone();
            tokio::spawn(async move { scheduler.refresh_now(&trip).await })
        };
        let b = {
            let scheduler = scheduler.clone();
            let trip = trip.clone();
            tokio::spawn(async move { scheduler.refresh_now(&trip).await })
        };

        let (a, b) = tokio::join!(a, b);
        assert!(matches!(
            a.unwrap(),
            Err(FreshnessError::TransientUpstream(_))
        ));
        assert!(matches!(
            b.unwrap(),
            Err(FreshnessError::TransientUpstream(_))
        ));
        assert_eq!(aggregator.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_now_runs_outside_polling_window() {
        // 100h out: cadence says no polling, explicit refresh still goes.
        let store = store_with_flight(100).await;
        let aggregator = Arc::new(ScriptedAggregator::new(FlightStatus::Scheduled));
        let scheduler = PollScheduler::new(store, aggregator.clone());

        scheduler.refresh_now(&TripId::from("trip-1")).await.unwrap();
        assert_eq!(aggregator.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_now_unknown_trip() {
        let store = TripStore::new();
        let aggregator = Arc::new(ScriptedAggregator::new(FlightStatus::Scheduled));
        let scheduler = PollScheduler::new(store, aggregator.clone());

        let result = scheduler.refresh_now(&TripId::from("ghost")).await;
        assert!(matches!(result, Err(FreshnessError::Malformed(_))));
        assert_eq!(aggregator.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_ticks_on_imminent_cadence() {
        // 1h out: 5-minute tier.
        let store = store_with_flight(1).await;
        let aggregator = Arc::new(ScriptedAggregator::new(FlightStatus::Active));
        let scheduler = PollScheduler::new(store, aggregator.clone());

        let mut rx = scheduler.watch(&TripId::from("trip-1")).await;
        assert!(rx.borrow().is_empty());

        // First schedulable pass fires immediately.
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(aggregator.calls(), 1);

        rx.changed().await.unwrap();
        let statuses = rx.borrow_and_update().clone();
        assert_eq!(
            statuses.get(&EntityId::from("res-1")).unwrap().status,
            FlightStatus::Active
        );

        // One more tick lands after the 5-minute cadence elapses.
        tokio::time::sleep(Duration::from_secs(5 * 60 + 5)).await;
        assert_eq!(aggregator.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_tick_does_not_tighten_cadence() {
        let store = store_with_flight(1).await;
        let aggregator = Arc::new(ScriptedAggregator::failing());
        let scheduler = PollScheduler::new(store, aggregator.clone());

        let _rx = scheduler.watch(&TripId::from("trip-1")).await;

        // Two cadence periods: the immediate tick plus two scheduled ones,
        // and nothing in between despite every call failing.
        tokio::time::sleep(Duration::from_secs(10 * 60 + 10)).await;
        assert_eq!(aggregator.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_stops_when_cadence_is_none() {
        // 100h out: no polling at all.
        let store = store_with_flight(100).await;
        let aggregator = Arc::new(ScriptedAggregator::new(FlightStatus::Scheduled));
        let scheduler = PollScheduler::new(store, aggregator.clone());

        let _rx = scheduler.watch(&TripId::from("trip-1")).await;
        tokio::time::sleep(Duration::from_secs(60 * 60)).await;
        assert_eq!(aggregator.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_task_exits_when_receiver_dropped() {
        let store = store_with_flight(1).await;
        let aggregator = Arc::new(ScriptedAggregator::new(FlightStatus::Scheduled));
        let scheduler = PollScheduler::new(store, aggregator.clone());

        let rx = scheduler.watch(&TripId::from("trip-1")).await;
        tokio::time::sleep(Duration::from_secs(3)).await;
        let calls_at_drop = aggregator.calls();

        drop(rx);
        tokio::time::sleep(Duration::from_secs(30 * 60)).await;
        assert_eq!(aggregator.calls(), calls_at_drop);
    }
}
