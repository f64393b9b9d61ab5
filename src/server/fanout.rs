use crate::core::errors::FreshnessError;
use crate::core::models::{AggregateScope, EntityId, OwnerId};
use crate::core::settings::FanoutSettings;
use crate::core::store::TripStore;
use crate::providers::StatusAggregator;
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct FanOutReport {
    pub owners: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Timer-driven server pass that keeps every user's imminent flights fresh.
///
/// Each pass finds the flights departing inside the window, groups them by
/// owner, and issues one aggregation call per owner: call volume is
/// O(owners), not O(flights). One owner's failure never touches the rest.
pub struct FanOutScheduler {
    store: TripStore,
    aggregator: Arc<dyn StatusAggregator>,
    interval: Duration,
    look_back: ChronoDuration,
    look_ahead: ChronoDuration,
}

impl FanOutScheduler {
    pub fn new(
        store: TripStore,
        aggregator: Arc<dyn StatusAggregator>,
        settings: &FanoutSettings,
    ) -> Self {
        Self {
            store,
            aggregator,
            interval: Duration::from_secs(settings.interval_secs),
            look_back: ChronoDuration::hours(settings.look_back_hours),
            look_ahead: ChronoDuration::hours(settings.look_ahead_hours),
        }
    }

    pub async fn run_loop(&self) {
        let mut interval = tokio::time::interval(self.interval);

        loop {
            interval.tick().await;
            let report = self.run_once().await;
            tracing::info!(
                owners = report.owners,
                succeeded = report.succeeded,
                failed = report.failed,
                "Fan-out pass complete"
            );
        }
    }

    pub async fn run_once(&self) -> FanOutReport {
        let now = Utc::now();
        let flights = self
            .store
            .flights_in_window(now, self.look_back, self.look_ahead)
            .await;

        // Owner resolution goes through the parent trip.
        let mut batch: BTreeMap<OwnerId, BTreeSet<EntityId>> = BTreeMap::new();
        for flight in flights {
            let Some(owner) = self.store.owner_of_trip(&flight.trip_id).await else {
                tracing::warn!(
                    entity = %flight.id,
                    trip = %flight.trip_id,
                    "Flight references a missing trip, skipping"
                );
                continue;
            };
            batch.entry(owner).or_default().insert(flight.id);
        }

        let mut report = FanOutReport {
            owners: batch.len(),
            ..FanOutReport::default()
        };

        for (owner, entity_ids) in batch {
            match self
                .aggregator
                .aggregate_status(&owner, AggregateScope::Owner)
                .await
            {
                Ok(response) => {
                    report.succeeded += 1;
                    tracing::debug!(
                        owner = %owner,
                        flights = entity_ids.len(),
                        refreshed = response.per_entity.len(),
                        "Owner refresh succeeded"
                    );
                }
                Err(FreshnessError::RateLimited { retry_after }) => {
                    // Someone (a poll tick, a manual refresh) beat us to this
                    // owner inside the cooldown; their data is fresh enough.
                    report.succeeded += 1;
                    tracing::debug!(
                        owner = %owner,
                        retry_after_secs = retry_after.as_secs(),
                        "Owner refresh skipped, recently aggregated"
                    );
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(owner = %owner, error = %e, "Owner refresh failed");
                }
            }
        }

        report
    }
}
