use crate::core::models::{FreshnessRecord, WatchedEntity};
use serde_json::{Map, Value};

/// Reserved key inside the reservation attribute bag. The double underscore
/// keeps it clear of user-visible detail keys; nothing outside this module
/// reads or writes it directly.
pub const LIVE_STATUS_KEY: &str = "__live_status";

/// Read the cached freshness record out of an attribute bag.
///
/// Missing or malformed data is `None`, never an error: a corrupt cache
/// entry must not break anything downstream.
pub fn decode(details: &Map<String, Value>) -> Option<FreshnessRecord> {
    let raw = details.get(LIVE_STATUS_KEY)?;

    match serde_json::from_value::<FreshnessRecord>(raw.clone()) {
        Ok(record) => Some(record),
        Err(e) => {
            tracing::debug!(error = %e, "Discarding malformed cached status record");
            None
        }
    }
}

pub fn decode_entity(entity: &WatchedEntity) -> Option<FreshnessRecord> {
    decode(&entity.details)
}

/// Return a new attribute bag with the reserved key replaced wholesale.
///
/// Every other key is carried over untouched; the record itself is never
/// merged field-by-field.
pub fn encode(details: &Map<String, Value>, record: &FreshnessRecord) -> Map<String, Value> {
    let mut next = details.clone();
    // FreshnessRecord serialization cannot fail: all fields are plain data.
    let value = serde_json::to_value(record).unwrap_or(Value::Null);
    next.insert(LIVE_STATUS_KEY.to_string(), value);
    next
}
