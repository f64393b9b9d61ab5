use crate::core::codec;
use crate::core::models::{
    EntityId, FreshnessRecord, OwnerId, Trip, TripId, WatchedEntity,
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Itinerary snapshot the daemon seeds from. The CRUD store proper lives in
/// the application; this is the slice the freshness subsystem needs.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ItinerarySnapshot {
    #[serde(default)]
    pub trips: Vec<Trip>,
    #[serde(default)]
    pub reservations: Vec<WatchedEntity>,
}

impl ItinerarySnapshot {
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        use anyhow::Context;

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read itinerary snapshot: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse itinerary snapshot: {}", path.display()))
    }
}

#[derive(Default)]
struct StoreInner {
    trips: HashMap<TripId, Trip>,
    entities: HashMap<EntityId, WatchedEntity>,
    last_synced: HashMap<OwnerId, DateTime<Utc>>,
}

/// Shared storage both the client poll path and the server fan-out path
/// read and write. Freshness merges go through `codec::encode`, so the
/// record is always replaced wholesale and every other detail key survives.
#[derive(Clone, Default)]
pub struct TripStore {
    inner: Arc<RwLock<StoreInner>>,
}

impl TripStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(StoreInner::default())),
        }
    }

    /// Seed from the configured snapshot file. A missing or unreadable file
    /// logs and leaves the store empty; the daemon still runs.
    pub async fn seed_from_file(&self, path: Option<std::path::PathBuf>) {
        let Some(path) = path else {
            tracing::warn!("No data directory; starting with an empty itinerary");
            return;
        };
        if !path.exists() {
            tracing::warn!(?path, "Itinerary snapshot not found; starting empty");
            return;
        }

        match ItinerarySnapshot::load(&path) {
            Ok(snapshot) => {
                tracing::info!(
                    trips = snapshot.trips.len(),
                    reservations = snapshot.reservations.len(),
                    "Seeded itinerary from snapshot"
                );
                self.seed(snapshot).await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Could not load itinerary snapshot; starting empty");
            }
        }
    }

    pub async fn seed(&self, snapshot: ItinerarySnapshot) {
        for trip in snapshot.trips {
            self.upsert_trip(trip).await;
        }
        for entity in snapshot.reservations {
            self.upsert_entity(entity).await;
        }
    }

    pub async fn upsert_trip(&self, trip: Trip) {
        self.inner.write().await.trips.insert(trip.id.clone(), trip);
    }

    pub async fn upsert_entity(&self, entity: WatchedEntity) {
        self.inner
            .write()
            .await
            .entities
            .insert(entity.id.clone(), entity);
    }

    pub async fn trips(&self) -> Vec<Trip> {
        self.inner.read().await.trips.values().cloned().collect()
    }

    #[allow(dead_code)]
    pub async fn entity(&self, id: &EntityId) -> Option<WatchedEntity> {
        self.inner.read().await.entities.get(id).cloned()
    }

    pub async fn owner_of_trip(&self, id: &TripId) -> Option<OwnerId> {
        self.inner.read().await.trips.get(id).map(|t| t.owner.clone())
    }

    pub async fn entities_for_trip(&self, id: &TripId) -> Vec<WatchedEntity> {
        self.inner
            .read()
            .await
            .entities
            .values()
            .filter(|e| &e.trip_id == id)
            .cloned()
            .collect()
    }

    /// The trip's freshness-tracked reservations.
    pub async fn tracked_for_trip(&self, id: &TripId) -> Vec<WatchedEntity> {
        self.inner
            .read()
            .await
            .entities
            .values()
            .filter(|e| &e.trip_id == id && e.kind.is_freshness_tracked())
            .cloned()
            .collect()
    }

    pub async fn tracked_for_owner(&self, owner: &OwnerId) -> Vec<WatchedEntity> {
        let inner = self.inner.read().await;
        inner
            .entities
            .values()
            .filter(|e| {
                e.kind.is_freshness_tracked()
                    && inner
                        .trips
                        .get(&e.trip_id)
                        .is_some_and(|t| &t.owner == owner)
            })
            .cloned()
            .collect()
    }

    /// Flights whose scheduled departure falls inside the fan-out window.
    pub async fn flights_in_window(
        &self,
        now: DateTime<Utc>,
        look_back: ChronoDuration,
        look_ahead: ChronoDuration,
    ) -> Vec<WatchedEntity> {
        let from = now - look_back;
        let to = now + look_ahead;
        self.inner
            .read()
            .await
            .entities
            .values()
            .filter(|e| {
                e.kind.is_freshness_tracked()
                    && e.scheduled_start >= from
                    && e.scheduled_start <= to
            })
            .cloned()
            .collect()
    }

    /// Decoded freshness view of one trip, keyed by entity.
    pub async fn statuses_for_trip(&self, id: &TripId) -> HashMap<EntityId, FreshnessRecord> {
        self.entities_for_trip(id)
            .await
            .iter()
            .filter_map(|e| codec::decode_entity(e).map(|r| (e.id.clone(), r)))
            .collect()
    }

    /// Merge one response batch under a single write lock, so a concurrent
    /// reader never observes half a batch. Returns how many records were
    /// applied.
    ///
    /// A record whose `checked_at` is not newer than the cached one is a
    /// stale response from a slower call and is discarded.
    pub async fn merge_batch(&self, records: &HashMap<EntityId, FreshnessRecord>) -> usize {
        let mut inner = self.inner.write().await;
        let mut applied = 0;

        for (id, incoming) in records {
            let Some(entity) = inner.entities.get_mut(id) else {
                tracing::debug!(entity = %id, "Dropping status for unknown reservation");
                continue;
            };

            if let Some(cached) = codec::decode(&entity.details) {
                if cached.checked_at >= incoming.checked_at {
                    tracing::debug!(
                        entity = %id,
                        cached_at = %cached.checked_at,
                        incoming_at = %incoming.checked_at,
                        "Discarding stale status response"
                    );
                    continue;
                }
            }

            entity.details = codec::encode(&entity.details, incoming);
            applied += 1;
        }

        applied
    }

    pub async fn last_synced_at(&self, owner: &OwnerId) -> Option<DateTime<Utc>> {
        self.inner.read().await.last_synced.get(owner).copied()
    }

    pub async fn mark_synced(&self, owner: &OwnerId, at: DateTime<Utc>) {
        self.inner
            .write()
            .await
            .last_synced
            .insert(owner.clone(), at);
    }
}
