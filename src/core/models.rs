use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;

macro_rules! string_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            #[allow(dead_code)]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            #[allow(dead_code)]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }
    };
}

string_id!(OwnerId);
string_id!(TripId);
string_id!(EntityId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationKind {
    Flight,
    Lodging,
    Train,
    CarRental,
    Activity,
    Other,
}

impl ReservationKind {
    /// Only flights carry live status worth polling for.
    pub fn is_freshness_tracked(&self) -> bool {
        matches!(self, ReservationKind::Flight)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trip {
    pub id: TripId,
    pub owner: OwnerId,
    pub name: String,
}

/// A reservation-like record whose external facts may go stale.
///
/// `details` is a free-form attribute bag shared with the rest of the
/// application; this subsystem owns exactly one reserved key inside it
/// (see `core::codec`) and must leave every other key untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchedEntity {
    pub id: EntityId,
    pub trip_id: TripId,
    pub kind: ReservationKind,
    pub scheduled_start: DateTime<Utc>,
    #[serde(default)]
    pub scheduled_end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub details: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlightStatus {
    Unknown,
    Scheduled,
    Active,
    Landed,
    Cancelled,
    Diverted,
}

impl FlightStatus {
    /// Terminal statuses stop the polling cadence outright. A diverted
    /// flight is still in the air somewhere, so it keeps polling until the
    /// arrival window closes.
    pub fn is_terminal(&self) -> bool {
        matches!(self, FlightStatus::Landed | FlightStatus::Cancelled)
    }

    pub fn label(&self) -> &'static str {
        match self {
            FlightStatus::Unknown => "Unknown",
            FlightStatus::Scheduled => "Scheduled",
            FlightStatus::Active => "In air",
            FlightStatus::Landed => "Landed",
            FlightStatus::Cancelled => "Cancelled",
            FlightStatus::Diverted => "Diverted",
        }
    }
}

/// The freshness record cached inside an entity's attribute bag.
///
/// Either absent (never checked) or fully formed; merges replace the whole
/// record, never individual fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FreshnessRecord {
    pub status: FlightStatus,
    #[serde(default)]
    pub departure_gate: Option<String>,
    #[serde(default)]
    pub departure_terminal: Option<String>,
    #[serde(default)]
    pub arrival_gate: Option<String>,
    #[serde(default)]
    pub arrival_terminal: Option<String>,
    pub checked_at: DateTime<Utc>,
    pub source: String,
}

/// Scope of one aggregation call: everything the owner has in the active
/// window, or a single trip's flights.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateScope {
    Owner,
    Trip(TripId),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregateResponse {
    pub per_entity: HashMap<EntityId, FreshnessRecord>,
    #[serde(default)]
    pub has_more: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ScanSummary {
    pub trips_created: u32,
    pub reservations_created: u32,
    pub emails_processed: u32,
    #[serde(default)]
    pub has_more: bool,
}
