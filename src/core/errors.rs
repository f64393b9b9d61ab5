use std::time::Duration;

/// Failure taxonomy for the freshness subsystem.
///
/// Background paths (poll ticks, fan-out) log these and move on; only
/// user-triggered actions surface them, and `ClientTimeout` is downgraded to
/// an informational message even there.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FreshnessError {
    /// Third-party hiccup. Retried on the next natural tick, never
    /// immediately.
    #[error("upstream temporarily unavailable: {0}")]
    TransientUpstream(String),

    /// The aggregation entry point refused the call; the caller must wait.
    #[error("rate limited, retry in {}s", retry_after.as_secs())]
    RateLimited { retry_after: Duration },

    /// The owner's credential to the external source has lapsed. Surfaced
    /// as an actionable "reconnect" state, not a generic error.
    #[error("account connection expired: {hint}")]
    AuthExpired { hint: String },

    /// The client stopped waiting; the server job may still complete.
    #[error("timed out waiting for the server")]
    ClientTimeout,

    /// Cache or response data that does not parse. Logged and treated as
    /// absent, never propagated to a human.
    #[error("malformed data: {0}")]
    Malformed(String),
}

impl FreshnessError {
    /// Message suitable for direct display after a user-triggered action.
    pub fn user_message(&self) -> String {
        match self {
            FreshnessError::RateLimited { retry_after } => {
                format!(
                    "Just refreshed, try again in {} seconds",
                    retry_after.as_secs().max(1)
                )
            }
            FreshnessError::AuthExpired { hint } => hint.clone(),
            FreshnessError::ClientTimeout => {
                "Sync started and may still be completing".to_string()
            }
            FreshnessError::TransientUpstream(_) | FreshnessError::Malformed(_) => {
                "Couldn't reach the status service, showing last known data".to_string()
            }
        }
    }
}
