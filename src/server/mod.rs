pub mod aggregate;
pub mod fanout;

use crate::core::settings::Settings;
use crate::core::store::TripStore;
use crate::providers::HttpFlightStatusSource;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

pub use aggregate::AggregationService;
pub use fanout::{FanOutReport, FanOutScheduler};

/// Server-side fan-out process: refreshes every owner's imminent flights on
/// a fixed timer, one aggregation call per owner.
pub async fn run() -> Result<()> {
    let settings = Settings::load()?;
    settings.validate()?;

    let store = TripStore::new();
    store.seed_from_file(settings.data.itinerary_path()).await;

    let source = Arc::new(HttpFlightStatusSource::new(
        settings.server.status_feed_url.clone(),
    ));
    let aggregator = Arc::new(AggregationService::new(
        store.clone(),
        source,
        Duration::from_secs(settings.fanout.owner_cooldown_secs),
    ));
    let scheduler = FanOutScheduler::new(store, aggregator, &settings.fanout);

    tracing::info!(
        interval_secs = settings.fanout.interval_secs,
        "Starting fan-out scheduler"
    );
    scheduler.run_loop().await;
    Ok(())
}
