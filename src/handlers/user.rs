//! User-originated event handlers (spec.md §4.6, §4.7, §4.9).

use crate::error::RelayError;
use crate::fanout::unicast_to_driver;
use crate::state::driver::WaitingPassenger;
use crate::state::Hub;
use relay_proto::{OutboundEvent, ValidationError};
use std::time::Instant;

pub fn get_bus_info(hub: &Hub, connection_id: u64, account_id: &str) -> Result<(), RelayError> {
    let event = match hub.driver_summary(account_id) {
        Some(driver) => OutboundEvent::BusInfo { driver },
        None => OutboundEvent::BusInfoError {
            account_id: account_id.to_string(),
            reason: "driver not found".to_string(),
        },
    };
    if let Some(sink) = hub.connections.get(&connection_id) {
        let _ = sink.send(event);
    }
    Ok(())
}

pub fn request_drivers_data(hub: &Hub, connection_id: u64) -> Result<(), RelayError> {
    let (drivers, _total, _limited) = hub.snapshot_drivers();
    if let Some(sink) = hub.connections.get(&connection_id) {
        let _ = sink.send(OutboundEvent::DriversData { drivers });
    }
    Ok(())
}

pub fn request_current_data(hub: &Hub, connection_id: u64) -> Result<(), RelayError> {
    let (drivers, total, limited) = hub.snapshot_drivers();
    if let Some(sink) = hub.connections.get(&connection_id) {
        let _ = sink.send(OutboundEvent::DriversSnapshot {
            drivers,
            total,
            limited,
        });
    }
    Ok(())
}

/// `pingDriver` (spec.md §4.7): validated, unicast-only, never broadcast.
pub fn ping_driver(
    hub: &Hub,
    driver_account_id: String,
    lat: f64,
    lng: f64,
    passenger_count: i64,
    user_account_id: Option<String>,
    now: Instant,
) -> Result<(), RelayError> {
    let user_account_id = user_account_id
        .ok_or(RelayError::Validation(ValidationError::MissingField("userAccountId")))?;

    {
        let driver = hub
            .drivers
            .get(&driver_account_id)
            .ok_or_else(|| RelayError::DriverNotFound(driver_account_id.clone()))?;
        let mut driver = driver.write().unwrap();
        if !driver.is_live() {
            return Err(RelayError::DriverUnavailable(driver_account_id));
        }
        evict_oldest_if_over_capacity(&mut driver, hub.config.limits.max_waiting_passengers_per_driver);
        driver.waiting_passengers.insert(
            user_account_id.clone(),
            WaitingPassenger {
                user_account_id: user_account_id.clone(),
                lat,
                lng,
                requested_count: passenger_count,
                pinged_at: now,
            },
        );
    }

    if let Some(user) = hub.users.get(&user_account_id) {
        let mut user = user.write().unwrap();
        user.last_ping_lat = Some(lat);
        user.last_ping_lng = Some(lng);
    }

    let result = unicast_to_driver(
        hub,
        &driver_account_id,
        OutboundEvent::PingReceived {
            user_account_id,
            lat,
            lng,
            passenger_count,
            timestamp: chrono::Utc::now().timestamp_millis(),
        },
    );
    if result.is_ok() {
        crate::metrics::PINGS_ROUTED.inc();
    }
    result
}

/// `unpingDriver` (spec.md §4.7).
pub fn unping_driver(
    hub: &Hub,
    driver_account_id: String,
    user_account_id: Option<String>,
    now: Instant,
) -> Result<(), RelayError> {
    let user_account_id = user_account_id
        .ok_or(RelayError::Validation(ValidationError::MissingField("userAccountId")))?;
    let _ = now;

    let removed = hub
        .drivers
        .get(&driver_account_id)
        .map(|driver| {
            driver
                .write()
                .unwrap()
                .waiting_passengers
                .remove(&user_account_id)
                .is_some()
        })
        .unwrap_or(false);

    if !removed {
        return Ok(());
    }

    unicast_to_driver(
        hub,
        &driver_account_id,
        OutboundEvent::PingRemoved {
            user_account_id,
            timestamp: chrono::Utc::now().timestamp_millis(),
            reason: None,
        },
    )
}

/// Prunes a disconnected user from every driver's `waitingPassengers` and
/// notifies each affected live driver (spec.md §4.7).
pub fn handle_user_disconnect_pings(hub: &Hub, user_account_id: &str) {
    let affected_drivers: Vec<String> = hub
        .drivers
        .iter()
        .filter_map(|entry| {
            let mut driver = entry.value().write().unwrap();
            if driver.waiting_passengers.remove(user_account_id).is_some() {
                Some(entry.key().clone())
            } else {
                None
            }
        })
        .collect();

    for driver_account_id in affected_drivers {
        let _ = unicast_to_driver(
            hub,
            &driver_account_id,
            OutboundEvent::PingRemoved {
                user_account_id: user_account_id.to_string(),
                timestamp: chrono::Utc::now().timestamp_millis(),
                reason: Some("user_disconnected"),
            },
        );
    }
}

/// Evicts the oldest-pinged passenger if the driver's `waitingPassengers`
/// is at capacity (see DESIGN.md §11.3 — an addition with no direct
/// spec.md counterpart, to bound unbounded memory growth).
fn evict_oldest_if_over_capacity(driver: &mut crate::state::DriverRecord, max: usize) {
    if driver.waiting_passengers.len() < max {
        return;
    }
    if let Some(oldest_key) = driver
        .waiting_passengers
        .iter()
        .min_by_key(|(_, p)| p.pinged_at)
        .map(|(k, _)| k.clone())
    {
        driver.waiting_passengers.remove(&oldest_key);
    }
}
