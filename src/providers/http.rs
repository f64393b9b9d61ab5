use crate::core::errors::FreshnessError;
use crate::core::models::{
    AggregateResponse, AggregateScope, EntityId, FreshnessRecord, OwnerId, ScanSummary,
    WatchedEntity,
};
use crate::providers::{FlightStatusSource, InboxScanner, StatusAggregator};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

const AGGREGATE_PATH: &str = "/v1/status/aggregate";
const SCAN_PATH: &str = "/v1/inbox/scan";
const STATUS_FEED_PATH: &str = "/v1/statuses";

const RECONNECT_HINT: &str = "Reconnect your email account in Settings";

#[derive(Debug, Serialize)]
struct AggregateRequest<'a> {
    owner: &'a OwnerId,
    scope: &'a AggregateScope,
}

#[derive(Debug, Serialize)]
struct ScanRequest<'a> {
    account: &'a OwnerId,
}

#[derive(Debug, Deserialize)]
struct RateLimitBody {
    #[serde(default)]
    retry_after_secs: Option<u64>,
}

/// Client for the server-side aggregation entry point.
pub struct HttpStatusAggregator {
    client: reqwest::Client,
    base_url: String,
}

impl HttpStatusAggregator {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl StatusAggregator for HttpStatusAggregator {
    async fn aggregate_status(
        &self,
        owner: &OwnerId,
        scope: AggregateScope,
    ) -> Result<AggregateResponse, FreshnessError> {
        let url = format!("{}{}", self.base_url, AGGREGATE_PATH);
        let response = self
            .client
            .post(&url)
            .json(&AggregateRequest {
                owner,
                scope: &scope,
            })
            .send()
            .await
            .map_err(|e| FreshnessError::TransientUpstream(e.to_string()))?;

        let response = check_status(response).await?;

        response
            .json::<AggregateResponse>()
            .await
            .map_err(|e| FreshnessError::Malformed(e.to_string()))
    }
}

/// Client for the inbox scan job. The call can run for a long time; the
/// orchestrator owns the timeout, not this layer.
pub struct HttpInboxScanner {
    client: reqwest::Client,
    base_url: String,
}

impl HttpInboxScanner {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl InboxScanner for HttpInboxScanner {
    async fn scan_inbox(&self, account: &OwnerId) -> Result<ScanSummary, FreshnessError> {
        let url = format!("{}{}", self.base_url, SCAN_PATH);
        let response = self
            .client
            .post(&url)
            .json(&ScanRequest { account })
            .send()
            .await
            .map_err(|e| FreshnessError::TransientUpstream(e.to_string()))?;

        let response = check_status(response).await?;

        response
            .json::<ScanSummary>()
            .await
            .map_err(|e| FreshnessError::Malformed(e.to_string()))
    }
}

#[derive(Debug, Serialize)]
struct StatusFeedRequest {
    flights: Vec<FlightRef>,
}

#[derive(Debug, Serialize)]
struct FlightRef {
    id: EntityId,
    scheduled_start: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    scheduled_end: Option<DateTime<Utc>>,
}

/// Client for the normalized flight-status feed the server aggregation
/// pulls from. The feed owns all third-party payload parsing; this side
/// only sees finished records.
pub struct HttpFlightStatusSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpFlightStatusSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl FlightStatusSource for HttpFlightStatusSource {
    fn name(&self) -> &'static str {
        "status-feed"
    }

    async fn fetch_statuses(
        &self,
        flights: &[WatchedEntity],
    ) -> Result<HashMap<EntityId, FreshnessRecord>, FreshnessError> {
        let url = format!("{}{}", self.base_url, STATUS_FEED_PATH);
        let request = StatusFeedRequest {
            flights: flights
                .iter()
                .map(|f| FlightRef {
                    id: f.id.clone(),
                    scheduled_start: f.scheduled_start,
                    scheduled_end: f.scheduled_end,
                })
                .collect(),
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| FreshnessError::TransientUpstream(e.to_string()))?;

        let response = check_status(response).await?;

        response
            .json::<HashMap<EntityId, FreshnessRecord>>()
            .await
            .map_err(|e| FreshnessError::Malformed(e.to_string()))
    }
}

/// Map transport status codes onto the error taxonomy.
async fn check_status(response: Response) -> Result<Response, FreshnessError> {
    let status = response.status();

    if status.is_success() {
        return Ok(response);
    }

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(FreshnessError::AuthExpired {
            hint: RECONNECT_HINT.to_string(),
        }),
        StatusCode::TOO_MANY_REQUESTS => {
            // Retry-After header first, structured body as fallback for
            // older server builds.
            let retry_after = match retry_after_of(&response) {
                Some(d) => d,
                None => response
                    .json::<RateLimitBody>()
                    .await
                    .ok()
                    .and_then(|b| b.retry_after_secs)
                    .map(Duration::from_secs)
                    .unwrap_or(Duration::from_secs(60)),
            };
            Err(FreshnessError::RateLimited { retry_after })
        }
        _ => {
            let body = response.text().await.unwrap_or_default();
            Err(FreshnessError::TransientUpstream(format!(
                "{status} - {body}"
            )))
        }
    }
}

fn retry_after_of(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
