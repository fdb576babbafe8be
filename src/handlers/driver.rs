//! Driver-originated event handlers (spec.md §4.3, §4.4, §6).

use crate::error::RelayError;
use crate::fanout::{broadcast_to_users, unicast_to_driver};
use crate::state::filter::{self, BroadcastAnchor};
use crate::state::Hub;
use relay_proto::{DriverPayloadFields, OutboundEvent, RouteGeometry};
use std::time::Instant;

fn merge_fields(record: &mut crate::state::DriverRecord, fields: &DriverPayloadFields) {
    if let Some(name) = &fields.destination_name {
        record.destination_name = Some(name.clone());
    }
    if let Some(lat) = fields.destination_lat {
        record.destination_lat = Some(lat);
    }
    if let Some(lng) = fields.destination_lng {
        record.destination_lng = Some(lng);
    }
    if let Some(org) = &fields.organization_name {
        record.organization_name = Some(org.clone());
    }
    if let Some(count) = fields.passenger_count {
        record.passenger_count = count;
    }
    if let Some(cap) = fields.max_capacity {
        record.max_capacity = cap;
    }
}

/// Ensures a driver record exists and is `Live`, performing the
/// `Absent → Live` or `DisconnectedInGrace → Live` transition for the
/// connection currently sending an authoritative update. Returns `false`
/// if this call created the record (i.e. there was no prior record).
fn ensure_live(hub: &Hub, account_id: &str, connection_id: u64, now: Instant) -> bool {
    let had_prior_record = hub.drivers.contains_key(account_id);
    hub.ensure_driver_record(account_id, connection_id, now);
    let driver = hub.drivers.get(account_id).unwrap();
    let mut driver = driver.write().unwrap();
    if had_prior_record && !driver.is_live() {
        driver.reconnect(connection_id);
    }
    driver.last_updated_at = now;
    had_prior_record
}

/// `updateLocation` (spec.md §4.3 rules 1-4, rate-gated).
pub fn update_location(
    hub: &Hub,
    connection_id: u64,
    account_id: String,
    lat: f64,
    lng: f64,
    fields: DriverPayloadFields,
    now: Instant,
) -> Result<(), RelayError> {
    // Rate gate only counts location updates (spec.md §9 open question:
    // preserved as observed, not tightened to cover every driver event).
    if !hub.rate_gate.check(connection_id, now) {
        crate::metrics::RATE_LIMIT_REJECTIONS.inc();
        return Err(RelayError::RateLimitExceeded);
    }

    if hub.connection_account_id(connection_id).is_none() {
        hub.bind_driver_identity(connection_id, account_id.clone(), now);
    }

    let has_prior_record = ensure_live(hub, &account_id, connection_id, now);

    let (should_broadcast, restored) = {
        let driver = hub.drivers.get(&account_id).unwrap();
        let mut driver = driver.write().unwrap();

        let anchor = BroadcastAnchor {
            lat: driver.last_broadcast_lat,
            lng: driver.last_broadcast_lng,
            at: driver.last_broadcast_at,
        };
        let should_broadcast = filter::should_broadcast_location(
            has_prior_record,
            anchor,
            lat,
            lng,
            driver.passenger_count,
            driver.max_capacity,
            fields.passenger_count,
            fields.max_capacity,
            hub.config.limits.movement_threshold_degrees,
            std::time::Duration::from_secs(hub.config.limits.heartbeat_interval_secs),
            now,
        );

        driver.lat = lat;
        driver.lng = lng;
        merge_fields(&mut driver, &fields);

        if should_broadcast {
            driver.last_broadcast_lat = Some(lat);
            driver.last_broadcast_lng = Some(lng);
            driver.last_broadcast_at = Some(now);
        }

        let restored = if driver.pending_state_restore {
            driver.pending_state_restore = false;
            Some((driver.passenger_count, driver.max_capacity))
        } else {
            None
        };

        (should_broadcast, restored)
    };

    if should_broadcast {
        broadcast_to_users(
            hub,
            &OutboundEvent::LocationUpdate {
                account_id: account_id.clone(),
                lat,
                lng,
                is_online: true,
            },
        );
    }

    if let Some((passenger_count, max_capacity)) = restored {
        let _ = unicast_to_driver(
            hub,
            &account_id,
            OutboundEvent::DriverStateRestored {
                account_id: account_id.clone(),
                passenger_count,
                max_capacity,
            },
        );
    }

    Ok(())
}

pub fn destination_update(
    hub: &Hub,
    account_id: String,
    fields: DriverPayloadFields,
    now: Instant,
) -> Result<(), RelayError> {
    let driver = hub
        .drivers
        .get(&account_id)
        .ok_or_else(|| RelayError::DriverNotFound(account_id.clone()))?;
    {
        let mut driver = driver.write().unwrap();
        merge_fields(&mut driver, &fields);
        driver.last_updated_at = now;
    }
    drop(driver);

    // Always broadcast (spec.md §4.3).
    broadcast_to_users(
        hub,
        &OutboundEvent::DestinationUpdate {
            account_id: account_id.clone(),
            destination_name: fields.destination_name,
            destination_lat: fields.destination_lat,
            destination_lng: fields.destination_lng,
            is_online: true,
        },
    );
    Ok(())
}

pub fn route_update(
    hub: &Hub,
    account_id: String,
    geometry: RouteGeometry,
    fields: DriverPayloadFields,
    now: Instant,
) -> Result<(), RelayError> {
    let driver = hub
        .drivers
        .get(&account_id)
        .ok_or_else(|| RelayError::DriverNotFound(account_id.clone()))?;

    let should_broadcast = {
        let mut driver = driver.write().unwrap();
        let should_broadcast = filter::should_broadcast_route(driver.geometry.as_ref(), &geometry);
        driver.geometry = Some(geometry.clone());
        merge_fields(&mut driver, &fields);
        driver.last_updated_at = now;
        should_broadcast
    };
    drop(driver);

    if should_broadcast {
        broadcast_to_users(
            hub,
            &OutboundEvent::RouteUpdate {
                account_id,
                geometry,
                is_online: true,
            },
        );
    }
    Ok(())
}

pub fn passenger_update(
    hub: &Hub,
    account_id: String,
    fields: DriverPayloadFields,
    now: Instant,
) -> Result<(), RelayError> {
    let driver = hub
        .drivers
        .get(&account_id)
        .ok_or_else(|| RelayError::DriverNotFound(account_id.clone()))?;

    let (should_broadcast, passenger_count, max_capacity, restored) = {
        let mut driver = driver.write().unwrap();
        let should_broadcast = filter::should_broadcast_passenger(
            driver.passenger_count,
            driver.max_capacity,
            fields.passenger_count,
            fields.max_capacity,
        );
        merge_fields(&mut driver, &fields);
        driver.last_updated_at = now;

        let restored = if driver.pending_state_restore {
            driver.pending_state_restore = false;
            Some((driver.passenger_count, driver.max_capacity))
        } else {
            None
        };

        (should_broadcast, driver.passenger_count, driver.max_capacity, restored)
    };
    drop(driver);

    if should_broadcast {
        broadcast_to_users(
            hub,
            &OutboundEvent::PassengerUpdate {
                account_id: account_id.clone(),
                passenger_count,
                max_capacity,
                is_online: true,
            },
        );
    }

    // Restoration gate (spec.md §4.1): the first authoritative update after
    // a resume — location or passenger — delivers the deferred
    // `driverStateRestored`, not just `updateLocation`.
    if let Some((passenger_count, max_capacity)) = restored {
        let _ = unicast_to_driver(
            hub,
            &account_id,
            OutboundEvent::DriverStateRestored {
                account_id,
                passenger_count,
                max_capacity,
            },
        );
    }
    Ok(())
}

/// `endSession`: any state → `Absent`, immediate, no grace (spec.md §4.4).
/// Both this path and the reaper's stale-past-grace path emit
/// `driverRemoved`, by the decision recorded in DESIGN.md.
pub fn end_session(hub: &Hub, account_id: Option<String>) -> Result<(), RelayError> {
    let Some(account_id) = account_id else {
        return Ok(());
    };
    if hub.end_session(&account_id) {
        broadcast_to_users(
            hub,
            &OutboundEvent::DriverRemoved {
                account_id,
                timestamp: chrono::Utc::now().timestamp_millis(),
            },
        );
    }
    Ok(())
}
