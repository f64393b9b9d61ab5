use crate::client::PollScheduler;
use crate::core::errors::FreshnessError;
use crate::core::models::TripId;
use crate::core::settings::Settings;
use crate::core::store::TripStore;
use crate::providers::HttpStatusAggregator;
use anyhow::Result;
use std::sync::Arc;

/// Explicit pull-to-refresh for one trip.
pub async fn run(trip: String) -> Result<()> {
    let settings = Settings::load()?;

    let store = TripStore::new();
    store.seed_from_file(settings.data.itinerary_path()).await;

    let aggregator = Arc::new(HttpStatusAggregator::new(settings.server.base_url.clone()));
    let scheduler = PollScheduler::new(store.clone(), aggregator);
    let trip_id = TripId::new(trip);

    match scheduler.refresh_now(&trip_id).await {
        Ok(()) => {
            let statuses = store.statuses_for_trip(&trip_id).await;
            println!("Refreshed {} flight(s)", statuses.len());
            for (id, record) in statuses {
                println!("  {:<12} {}", id, record.status.label());
            }
            Ok(())
        }
        // A rate-limit rejection is information, not a failure.
        Err(e @ FreshnessError::RateLimited { .. }) => {
            println!("{}", e.user_message());
            Ok(())
        }
        Err(e) => anyhow::bail!("Refresh failed: {e}"),
    }
}
