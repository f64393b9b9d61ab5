use crate::core::errors::FreshnessError;
use crate::core::models::{AggregateResponse, AggregateScope, OwnerId, WatchedEntity};
use crate::core::store::TripStore;
use crate::providers::{FlightStatusSource, StatusAggregator};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// The one aggregation entry point every refresh path shares.
///
/// One upstream call covers all of an owner's flights in scope, and a
/// per-owner cooldown refuses redundant calls with the exact wait instead
/// of performing them. Two racing calls for the same owner can both slip
/// past the cooldown check; that race is tolerated and resolved
/// last-writer-wins at the record level by the store merge.
pub struct AggregationService {
    store: TripStore,
    source: Arc<dyn FlightStatusSource>,
    cooldown: Duration,
    attempts: Mutex<HashMap<OwnerId, Instant>>,
}

impl AggregationService {
    pub fn new(store: TripStore, source: Arc<dyn FlightStatusSource>, cooldown: Duration) -> Self {
        Self {
            store,
            source,
            cooldown,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    /// Refuse the call when the owner's cooldown has not elapsed; otherwise
    /// stamp the attempt. Stamping up front keeps a failing upstream from
    /// being hammered in a tight loop.
    async fn check_cooldown(&self, owner: &OwnerId) -> Result<(), FreshnessError> {
        let mut attempts = self.attempts.lock().await;
        let now = Instant::now();

        if let Some(last) = attempts.get(owner) {
            let elapsed = now.duration_since(*last);
            if elapsed < self.cooldown {
                return Err(FreshnessError::RateLimited {
                    retry_after: self.cooldown - elapsed,
                });
            }
        }

        attempts.insert(owner.clone(), now);
        Ok(())
    }

    async fn entities_in_scope(&self, owner: &OwnerId, scope: &AggregateScope) -> Vec<WatchedEntity> {
        match scope {
            AggregateScope::Owner => self.store.tracked_for_owner(owner).await,
            AggregateScope::Trip(trip_id) => {
                // A trip scope only counts when the trip belongs to the caller.
                match self.store.owner_of_trip(trip_id).await {
                    Some(trip_owner) if &trip_owner == owner => {
                        self.store.tracked_for_trip(trip_id).await
                    }
                    _ => Vec::new(),
                }
            }
        }
    }
}

#[async_trait]
impl StatusAggregator for AggregationService {
    async fn aggregate_status(
        &self,
        owner: &OwnerId,
        scope: AggregateScope,
    ) -> Result<AggregateResponse, FreshnessError> {
        self.check_cooldown(owner).await?;

        let flights = self.entities_in_scope(owner, &scope).await;
        if flights.is_empty() {
            return Ok(AggregateResponse::default());
        }

        let per_entity = self.source.fetch_statuses(&flights).await?;
        let applied = self.store.merge_batch(&per_entity).await;

        tracing::debug!(
            owner = %owner,
            flights = flights.len(),
            returned = per_entity.len(),
            applied,
            source = self.source.name(),
            "Aggregated flight statuses"
        );

        Ok(AggregateResponse {
            per_entity,
            has_more: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::{
        EntityId, FlightStatus, FreshnessRecord, ReservationKind, Trip, TripId,
    };
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedSource {
        calls: AtomicUsize,
        fail: bool,
    }

    impl ScriptedSource {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail: true,
            }
        }
    }

    #[async_trait]
    impl FlightStatusSource for ScriptedSource {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn fetch_statuses(
            &self,
            flights: &[WatchedEntity],
        ) -> Result<HashMap<EntityId, FreshnessRecord>, FreshnessError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(FreshnessError::TransientUpstream("503".to_string()));
            }
            Ok(flights
                .iter()
                .map(|f| {
                    (
                        f.id.clone(),
                        FreshnessRecord {
                            status: FlightStatus::Scheduled,
                            departure_gate: None,
                            departure_terminal: None,
                            arrival_gate: None,
                            arrival_terminal: None,
                            checked_at: Utc::now(),
                            source: "scripted".to_string(),
                        },
                    )
                })
                .collect())
        }
    }

    async fn store_with_flights() -> TripStore {
        let store = TripStore::new();
        store
            .upsert_trip(Trip {
                id: TripId::from("trip-1"),
                owner: OwnerId::from("alice"),
                name: "Tokyo".to_string(),
            })
            .await;
        store
            .upsert_trip(Trip {
                id: TripId::from("trip-2"),
                owner: OwnerId::from("alice"),
                name: "Lisbon".to_string(),
            })
            .await;
        for (id, trip) in [("f1", "trip-1"), ("f2", "trip-1"), ("f3", "trip-2")] {
            store
                .upsert_entity(WatchedEntity {
                    id: EntityId::from(id),
                    trip_id: TripId::from(trip),
                    kind: ReservationKind::Flight,
                    scheduled_start: Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap(),
                    scheduled_end: None,
                    details: serde_json::Map::new(),
                })
                .await;
        }
        store
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_rejects_with_exact_wait() {
        let store = store_with_flights().await;
        let source = Arc::new(ScriptedSource::new());
        let service =
            AggregationService::new(store, source.clone(), Duration::from_secs(180));
        let owner = OwnerId::from("alice");

        assert!(service
            .aggregate_status(&owner, AggregateScope::Owner)
            .await
            .is_ok());

        tokio::time::advance(Duration::from_secs(60)).await;
        match service.aggregate_status(&owner, AggregateScope::Owner).await {
            Err(FreshnessError::RateLimited { retry_after }) => {
                assert_eq!(retry_after, Duration::from_secs(120));
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(121)).await;
        assert!(service
            .aggregate_status(&owner, AggregateScope::Owner)
            .await
            .is_ok());
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_is_per_owner() {
        let store = store_with_flights().await;
        store
            .upsert_trip(Trip {
                id: TripId::from("trip-b"),
                owner: OwnerId::from("bob"),
                name: "Oslo".to_string(),
            })
            .await;
        store
            .upsert_entity(WatchedEntity {
                id: EntityId::from("fb"),
                trip_id: TripId::from("trip-b"),
                kind: ReservationKind::Flight,
                scheduled_start: Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap(),
                scheduled_end: None,
                details: serde_json::Map::new(),
            })
            .await;

        let service = AggregationService::new(
            store,
            Arc::new(ScriptedSource::new()),
            Duration::from_secs(180),
        );

        assert!(service
            .aggregate_status(&OwnerId::from("alice"), AggregateScope::Owner)
            .await
            .is_ok());
        assert!(service
            .aggregate_status(&OwnerId::from("bob"), AggregateScope::Owner)
            .await
            .is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_trip_scope_limits_flights_and_checks_owner() {
        let store = store_with_flights().await;
        let source = Arc::new(ScriptedSource::new());
        let service = AggregationService::new(
            store.clone(),
            source.clone(),
            Duration::from_secs(0),
        );

        let response = service
            .aggregate_status(
                &OwnerId::from("alice"),
                AggregateScope::Trip(TripId::from("trip-1")),
            )
            .await
            .unwrap();
        assert_eq!(response.per_entity.len(), 2);

        // Someone else's trip id yields nothing and no upstream call.
        let calls_before = source.calls.load(Ordering::SeqCst);
        let response = service
            .aggregate_status(
                &OwnerId::from("mallory"),
                AggregateScope::Trip(TripId::from("trip-1")),
            )
            .await
            .unwrap();
        assert!(response.per_entity.is_empty());
        assert_eq!(source.calls.load(Ordering::SeqCst), calls_before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_results_are_merged_into_store() {
        let store = store_with_flights().await;
        let service = AggregationService::new(
            store.clone(),
            Arc::new(ScriptedSource::new()),
            Duration::from_secs(0),
        );

        service
            .aggregate_status(&OwnerId::from("alice"), AggregateScope::Owner)
            .await
            .unwrap();

        let statuses = store.statuses_for_trip(&TripId::from("trip-1")).await;
        assert_eq!(statuses.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_upstream_failure_propagates() {
        let store = store_with_flights().await;
        let service = AggregationService::new(
            store,
            Arc::new(ScriptedSource::failing()),
            Duration::from_secs(0),
        );

        let result = service
            .aggregate_status(&OwnerId::from("alice"), AggregateScope::Owner)
            .await;
        assert!(matches!(result, Err(FreshnessError::TransientUpstream(_))));
    }
}
