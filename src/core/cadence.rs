use crate::core::models::FlightStatus;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::time::Duration;

const FAR_HORIZON_HOURS: i64 = 48;
const NEAR_HORIZON_HOURS: i64 = 6;
const IMMINENT_HORIZON_HOURS: i64 = 2;

const FAR_INTERVAL: Duration = Duration::from_secs(6 * 60 * 60);
const NEAR_INTERVAL: Duration = Duration::from_secs(30 * 60);
const IMMINENT_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// When a flight has no scheduled arrival, keep polling this long past
/// departure before giving up on the landing.
const DEFAULT_ARRIVAL_WINDOW_HOURS: i64 = 6;

/// Tiered poll cadence for one flight. `None` means "do not poll".
///
/// The tiers bound third-party call volume while keeping staleness under
/// ten minutes during the window that matters (boarding through landing):
///
/// - more than 48h out: no polling
/// - 48h to 6h out: every 6 hours
/// - 6h to 2h out: every 30 minutes
/// - 2h out through arrival: every 5 minutes
///
/// Boundary times (exactly 48h, 6h, 2h out) fall into the tighter tier.
/// A terminal cached status (landed, cancelled) stops polling regardless
/// of the clock.
pub fn next_interval(
    now: DateTime<Utc>,
    scheduled_start: DateTime<Utc>,
    scheduled_end: Option<DateTime<Utc>>,
    known_status: Option<FlightStatus>,
) -> Option<Duration> {
    if known_status.is_some_and(|s| s.is_terminal()) {
        return None;
    }

    let arrival = scheduled_end
        .unwrap_or_else(|| scheduled_start + ChronoDuration::hours(DEFAULT_ARRIVAL_WINDOW_HOURS));
    if now > arrival {
        return None;
    }

    let until_departure = scheduled_start.signed_duration_since(now);

    if until_departure > ChronoDuration::hours(FAR_HORIZON_HOURS) {
        None
    } else if until_departure > ChronoDuration::hours(NEAR_HORIZON_HOURS) {
        Some(FAR_INTERVAL)
    } else if until_departure > ChronoDuration::hours(IMMINENT_HORIZON_HOURS) {
        Some(NEAR_INTERVAL)
    } else {
        Some(IMMINENT_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_no_polling_far_out() {
        let now = base();
        let start = now + ChronoDuration::hours(72);
        assert_eq!(next_interval(now, start, None, None), None);
    }

    #[test]
    fn test_six_hour_tier() {
        let now = base();
        let start = now + ChronoDuration::hours(24);
        assert_eq!(next_interval(now, start, None, None), Some(FAR_INTERVAL));
    }

    #[test]
    fn test_thirty_minute_tier() {
        let now = base();
        let start = now + ChronoDuration::hours(4);
        assert_eq!(next_interval(now, start, None, None), Some(NEAR_INTERVAL));
    }

    #[test]
    fn test_five_minute_tier() {
        let now = base();
        let start = now + ChronoDuration::minutes(45);
        assert_eq!(next_interval(now, start, None, None), Some(IMMINENT_INTERVAL));
    }

    #[test]
    fn test_boundaries_belong_to_tighter_tier() {
        let now = base();

        let start = now + ChronoDuration::hours(48);
        assert_eq!(next_interval(now, start, None, None), Some(FAR_INTERVAL));

        let start = now + ChronoDuration::hours(6);
        assert_eq!(next_interval(now, start, None, None), Some(NEAR_INTERVAL));

        let start = now + ChronoDuration::hours(2);
        assert_eq!(next_interval(now, start, None, None), Some(IMMINENT_INTERVAL));
    }

    #[test]
    fn test_in_flight_polls_until_scheduled_arrival() {
        let now = base();
        let start = now - ChronoDuration::hours(3);
        let end = now + ChronoDuration::hours(2);
        assert_eq!(
            next_interval(now, start, Some(end), Some(FlightStatus::Active)),
            Some(IMMINENT_INTERVAL)
        );
    }

    #[test]
    fn test_no_polling_after_arrival() {
        let now = base();
        let start = now - ChronoDuration::hours(10);
        let end = now - ChronoDuration::hours(1);
        assert_eq!(next_interval(now, start, Some(end), None), None);
    }

    #[test]
    fn test_missing_arrival_uses_default_window() {
        let now = base();

        // Departed 5h ago, no scheduled arrival: still inside the window.
        let start = now - ChronoDuration::hours(5);
        assert_eq!(next_interval(now, start, None, None), Some(IMMINENT_INTERVAL));

        // Departed 7h ago: window closed.
        let start = now - ChronoDuration::hours(7);
        assert_eq!(next_interval(now, start, None, None), None);
    }

    #[test]
    fn test_terminal_status_stops_polling() {
        let now = base();
        let start = now + ChronoDuration::hours(1);
        assert_eq!(
            next_interval(now, start, None, Some(FlightStatus::Landed)),
            None
        );
        assert_eq!(
            next_interval(now, start, None, Some(FlightStatus::Cancelled)),
            None
        );
        assert_eq!(
            next_interval(now, start, None, Some(FlightStatus::Diverted)),
            Some(IMMINENT_INTERVAL)
        );
    }

    #[test]
    fn test_interval_non_increasing_as_departure_nears() {
        let now = base();
        let mut last = Duration::MAX;

        for hours_out in (0..=48).rev() {
            let start = now + ChronoDuration::hours(hours_out);
            if let Some(interval) = next_interval(now, start, None, None) {
                assert!(
                    interval <= last,
                    "interval grew from {last:?} to {interval:?} at {hours_out}h out"
                );
                last = interval;
            }
        }
    }
}
