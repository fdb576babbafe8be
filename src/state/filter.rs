//! Update filter: decides whether a driver update is worth broadcasting
//! (spec.md §4.3).
//!
//! Pure functions over the prior *broadcast* anchor rather than the full
//! driver record, so they can be unit tested without constructing a
//! registry. The caller is responsible for merging the received fields
//! into the stored record regardless of the verdict, and for moving the
//! broadcast anchor only when the verdict is `true`.

use relay_proto::RouteGeometry;
use std::time::{Duration, Instant};

/// The driver's last-broadcast anchor, as it affects the movement and
/// heartbeat rules. `None` values mean "no driver record yet" or "no prior
/// broadcast yet" respectively.
#[derive(Debug, Clone, Copy)]
pub struct BroadcastAnchor {
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub at: Option<Instant>,
}

/// Planar (non-geodesic) Euclidean distance in degrees. Intentional
/// approximation — do not substitute a great-circle formula, it would
/// change the calibration of `movementThreshold`.
fn planar_distance_degrees(a_lat: f64, a_lng: f64, b_lat: f64, b_lng: f64) -> f64 {
    ((a_lat - b_lat).powi(2) + (a_lng - b_lng).powi(2)).sqrt()
}

/// Rules 1-4 of spec.md §4.3 for `updateLocation`/position+payload
/// updates. `has_prior_record` distinguishes "first update ever" (rule 1)
/// from "record exists but never broadcast" (rule 2's `None` anchor case).
#[allow(clippy::too_many_arguments)]
pub fn should_broadcast_location(
    has_prior_record: bool,
    anchor: BroadcastAnchor,
    lat: f64,
    lng: f64,
    prior_passenger_count: i64,
    prior_max_capacity: i64,
    new_passenger_count: Option<i64>,
    new_max_capacity: Option<i64>,
    movement_threshold_degrees: f64,
    heartbeat_interval: Duration,
    now: Instant,
) -> bool {
    if !has_prior_record {
        return true;
    }

    match (anchor.lat, anchor.lng) {
        (Some(a_lat), Some(a_lng)) => {
            if planar_distance_degrees(lat, lng, a_lat, a_lng) > movement_threshold_degrees {
                return true;
            }
        }
        _ => return true,
    }

    if let Some(new_passenger_count) = new_passenger_count {
        if new_passenger_count != prior_passenger_count {
            return true;
        }
    }
    if let Some(new_max_capacity) = new_max_capacity {
        if new_max_capacity != prior_max_capacity {
            return true;
        }
    }

    match anchor.at {
        Some(last) => now.duration_since(last) >= heartbeat_interval,
        None => true,
    }
}

/// `routeUpdate`: broadcast only on change, by canonical-serialized
/// equality. Not subject to the movement threshold.
pub fn should_broadcast_route(
    prior: Option<&RouteGeometry>,
    new_geometry: &RouteGeometry,
) -> bool {
    match prior {
        Some(prior) => prior != new_geometry,
        None => true,
    }
}

/// `passengerUpdate`: broadcast only if either field differs from prior.
pub fn should_broadcast_passenger(
    prior_passenger_count: i64,
    prior_max_capacity: i64,
    new_passenger_count: Option<i64>,
    new_max_capacity: Option<i64>,
) -> bool {
    new_passenger_count.is_some_and(|v| v != prior_passenger_count)
        || new_max_capacity.is_some_and(|v| v != prior_max_capacity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const NO_ANCHOR: BroadcastAnchor = BroadcastAnchor {
        lat: None,
        lng: None,
        at: None,
    };

    #[test]
    fn first_update_always_broadcasts() {
        let now = Instant::now();
        assert!(should_broadcast_location(
            false, NO_ANCHOR, 14.5, 121.0, 0, 0, None, None, 0.0001,
            Duration::from_secs(30), now
        ));
    }

    #[test]
    fn stationary_repeats_suppressed_until_heartbeat() {
        let now = Instant::now();
        let anchor = BroadcastAnchor {
            lat: Some(14.5),
            lng: Some(121.0),
            at: Some(now),
        };
        assert!(!should_broadcast_location(
            true, anchor, 14.5, 121.0, 3, 20, Some(3), Some(20), 0.0001,
            Duration::from_secs(16), now + Duration::from_secs(10)
        ));
        assert!(should_broadcast_location(
            true, anchor, 14.5, 121.0, 3, 20, Some(3), Some(20), 0.0001,
            Duration::from_secs(16), now + Duration::from_secs(16)
        ));
    }

    #[test]
    fn movement_above_threshold_broadcasts() {
        let now = Instant::now();
        let anchor = BroadcastAnchor {
            lat: Some(14.5000),
            lng: Some(121.0000),
            at: Some(now),
        };
        assert!(should_broadcast_location(
            true, anchor, 14.5002, 121.0000, 0, 0, None, None, 0.0001,
            Duration::from_secs(30), now + Duration::from_secs(3)
        ));
    }

    #[test]
    fn movement_below_threshold_does_not_broadcast() {
        let now = Instant::now();
        let anchor = BroadcastAnchor {
            lat: Some(14.5000),
            lng: Some(121.0000),
            at: Some(now),
        };
        assert!(!should_broadcast_location(
            true, anchor, 14.500005, 121.0000, 0, 0, None, None, 0.0001,
            Duration::from_secs(30), now + Duration::from_secs(3)
        ));
    }

    #[test]
    fn passenger_change_forces_broadcast_even_when_stationary() {
        let now = Instant::now();
        let anchor = BroadcastAnchor {
            lat: Some(14.5),
            lng: Some(121.0),
            at: Some(now),
        };
        assert!(should_broadcast_location(
            true, anchor, 14.5, 121.0, 3, 20, Some(4), Some(20), 0.0001,
            Duration::from_secs(30), now + Duration::from_secs(1)
        ));
    }

    #[test]
    fn route_update_only_broadcasts_on_change() {
        let a = RouteGeometry::new(json!({"points": "abc"}));
        let b = RouteGeometry::new(json!({"points": "abc"}));
        let c = RouteGeometry::new(json!({"points": "abd"}));
        assert!(!should_broadcast_route(Some(&a), &b));
        assert!(should_broadcast_route(Some(&a), &c));
        assert!(should_broadcast_route(None, &a));
    }

    #[test]
    fn passenger_update_requires_a_difference() {
        assert!(!should_broadcast_passenger(3, 20, Some(3), Some(20)));
        assert!(should_broadcast_passenger(3, 20, Some(4), Some(20)));
        assert!(should_broadcast_passenger(3, 20, None, None));
    }
}
