use crate::client::PollScheduler;
use crate::core::settings::SettingsWatcher;
use crate::core::store::TripStore;
use crate::providers::HttpStatusAggregator;
use anyhow::Result;
use std::sync::Arc;

/// Client-side daemon: seeds the store from the itinerary snapshot, then
/// watches every trip with live-trackable flights, letting the poll
/// scheduler decide cadence per trip.
pub async fn run() -> Result<()> {
    let mut settings_watcher = SettingsWatcher::new()?;
    let settings = settings_watcher.get().await;
    settings_watcher.start_watching()?;

    let store = TripStore::new();
    store.seed_from_file(settings.data.itinerary_path()).await;

    let aggregator = Arc::new(HttpStatusAggregator::new(settings.server.base_url.clone()));
    let scheduler = PollScheduler::new(store.clone(), aggregator);

    let mut watched = 0usize;
    for trip in store.trips().await {
        let tracked = store.tracked_for_trip(&trip.id).await;
        if tracked.is_empty() {
            continue;
        }

        let mut rx = scheduler.watch(&trip.id).await;
        watched += 1;
        let trip_id = trip.id.clone();
        let trip_name = trip.name.clone();
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let statuses = rx.borrow_and_update().clone();
                for (entity, record) in &statuses {
                    tracing::info!(
                        trip = %trip_id,
                        trip_name = %trip_name,
                        entity = %entity,
                        status = record.status.label(),
                        departure_gate = record.departure_gate.as_deref().unwrap_or("-"),
                        checked_at = %record.checked_at,
                        "Flight status updated"
                    );
                }
            }
        });
    }

    tracing::info!(trips = watched, "Watching trips for live status");

    let mut settings_rx = settings_watcher.subscribe();
    tokio::spawn(async move {
        while let Ok(new_settings) = settings_rx.recv().await {
            tracing::info!(
                base_url = %new_settings.server.base_url,
                "Settings reloaded; server endpoints apply to new connections"
            );
        }
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    Ok(())
}
