mod http;

use crate::core::errors::FreshnessError;
use crate::core::models::{
    AggregateResponse, AggregateScope, EntityId, FreshnessRecord, OwnerId, ScanSummary,
    WatchedEntity,
};
use async_trait::async_trait;
use std::collections::HashMap;

pub use http::{HttpFlightStatusSource, HttpInboxScanner, HttpStatusAggregator};

/// The per-owner aggregation entry point. Every refresh path (client poll
/// ticks, explicit refresh, server fan-out) funnels through one
/// implementation of this, so upstream call volume stays bounded by its
/// cooldown no matter who asks.
#[async_trait]
pub trait StatusAggregator: Send + Sync {
    async fn aggregate_status(
        &self,
        owner: &OwnerId,
        scope: AggregateScope,
    ) -> Result<AggregateResponse, FreshnessError>;
}

/// The long-running inbox scan job. No incremental progress; it either
/// settles with a summary or fails.
#[async_trait]
pub trait InboxScanner: Send + Sync {
    async fn scan_inbox(&self, account: &OwnerId) -> Result<ScanSummary, FreshnessError>;
}

/// The third-party flight status API, treated as an opaque boundary:
/// payload parsing happens behind this trait, not in this crate.
#[async_trait]
pub trait FlightStatusSource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fetch_statuses(
        &self,
        flights: &[WatchedEntity],
    ) -> Result<HashMap<EntityId, FreshnessRecord>, FreshnessError>;
}
