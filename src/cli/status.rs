use crate::core::models::{AggregateScope, FreshnessRecord, Trip};
use crate::core::settings::Settings;
use crate::core::store::TripStore;
use crate::providers::{HttpStatusAggregator, StatusAggregator};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

#[derive(Serialize)]
struct StatusOutput {
    trips: HashMap<String, TripStatus>,
    #[serde(with = "chrono::serde::ts_seconds")]
    fetched_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct TripStatus {
    name: String,
    flights: HashMap<String, FlightLine>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize)]
struct FlightLine {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    departure_gate: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    arrival_gate: Option<String>,
    checked: String,
}

pub async fn run(json: bool, trip_filter: Option<String>) -> Result<()> {
    let settings = Settings::load()?;

    let store = TripStore::new();
    store.seed_from_file(settings.data.itinerary_path()).await;

    let trips = select_trips(&store, trip_filter.as_deref()).await?;
    let aggregator = HttpStatusAggregator::new(settings.server.base_url.clone());

    let mut results: HashMap<String, TripStatus> = HashMap::new();
    for trip in trips {
        let status = fetch_trip_status(&store, &aggregator, &trip).await;
        results.insert(trip.id.to_string(), status);
    }

    if json {
        let output = StatusOutput {
            trips: results,
            fetched_at: Utc::now(),
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_text_output(&results);
    }

    Ok(())
}

async fn select_trips(store: &TripStore, filter: Option<&str>) -> Result<Vec<Trip>> {
    let mut trips = store.trips().await;

    if let Some(filter) = filter {
        trips.retain(|t| t.id.as_str() == filter || t.name.eq_ignore_ascii_case(filter));
        if trips.is_empty() {
            anyhow::bail!("No trip matches '{}'", filter);
        }
    } else if trips.is_empty() {
        anyhow::bail!("No trips in the itinerary snapshot. Is the snapshot path configured?");
    }

    trips.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(trips)
}

async fn fetch_trip_status(
    store: &TripStore,
    aggregator: &HttpStatusAggregator,
    trip: &Trip,
) -> TripStatus {
    // Any failure (rate limit included) still shows the cached records,
    // with the message next to them.
    let error = match aggregator
        .aggregate_status(&trip.owner, AggregateScope::Trip(trip.id.clone()))
        .await
    {
        Ok(response) => {
            store.merge_batch(&response.per_entity).await;
            None
        }
        Err(e) => Some(e.user_message()),
    };

    let flights = store
        .statuses_for_trip(&trip.id)
        .await
        .into_iter()
        .map(|(id, record)| (id.to_string(), to_line(&record)))
        .collect();

    TripStatus {
        name: trip.name.clone(),
        flights,
        error,
    }
}

fn to_line(record: &FreshnessRecord) -> FlightLine {
    FlightLine {
        status: record.status.label().to_string(),
        departure_gate: record.departure_gate.clone(),
        arrival_gate: record.arrival_gate.clone(),
        checked: format_age(record.checked_at),
    }
}

fn format_age(checked_at: DateTime<Utc>) -> String {
    let age = Utc::now().signed_duration_since(checked_at);

    if age.num_seconds() < 60 {
        return "just now".to_string();
    }

    let total_minutes = age.num_minutes();
    let hours = total_minutes / 60;
    let minutes = total_minutes % 60;

    if hours > 0 {
        format!("{}h {:02}m ago", hours, minutes)
    } else {
        format!("{}m ago", minutes)
    }
}

fn print_text_output(results: &HashMap<String, TripStatus>) {
    for (i, (trip_id, status)) in results.iter().enumerate() {
        if i > 0 {
            println!();
        }

        println!("{} ({})", status.name, trip_id);

        if let Some(error) = &status.error {
            println!("  {}", error);
        }

        if status.flights.is_empty() {
            println!("  No live status yet");
            continue;
        }

        for (flight_id, line) in &status.flights {
            let gate = line
                .departure_gate
                .as_ref()
                .map(|g| format!(" gate {}", g))
                .unwrap_or_default();
            println!(
                "  {:<12} {:<10}{} (checked {})",
                flight_id, line.status, gate, line.checked
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn test_format_age() {
        let now = Utc::now();
        assert_eq!(format_age(now), "just now");
        assert_eq!(format_age(now - ChronoDuration::minutes(5)), "5m ago");
        assert_eq!(
            format_age(now - ChronoDuration::minutes(125)),
            "2h 05m ago"
        );
    }
}
