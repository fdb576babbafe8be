//! Event router: binds inbound event kinds to handlers, wraps every call
//! in a fault envelope, and enforces role-based admission (spec.md §4.5).

pub mod driver;
pub mod registration;
pub mod user;

use crate::error::RelayError;
use crate::state::Hub;
use relay_proto::{InboundEvent, OutboundEvent, Role, WireMessage};
use tracing::{error, warn};

/// Parses and routes one inbound frame from `connection_id`. Never panics
/// and never propagates an error to the caller — failures are reported to
/// the offending connection as an `error` event and logged (spec.md §7:
/// internal errors never crash the engine).
pub fn dispatch(hub: &Hub, connection_id: u64, raw: WireMessage) {
    let now = hub.clock.now();

    if let Some(role) = hub.connection_role(connection_id) {
        if role == Role::User {
            if let Some(account_id) = hub.connection_account_id(connection_id) {
                hub.touch_user_activity(&account_id, now);
            }
        }
    }

    let event = match InboundEvent::try_from(raw) {
        Ok(event) => event,
        Err(validation_err) => {
            reply_error(hub, connection_id, &RelayError::Validation(validation_err));
            return;
        }
    };

    if let Err(err) = route(hub, connection_id, event, now) {
        if matches!(err, RelayError::Internal(_)) {
            error!(connection_id, error = %err, "handler failed");
        } else {
            warn!(connection_id, code = err.error_code(), error = %err, "rejected event");
        }
        reply_error(hub, connection_id, &err);
    }
}

fn route(
    hub: &Hub,
    connection_id: u64,
    event: InboundEvent,
    now: std::time::Instant,
) -> Result<(), RelayError> {
    match event {
        InboundEvent::RegisterRole { role, account_id } => {
            registration::register_role(hub, connection_id, role, account_id, now)
        }
        InboundEvent::ResumeSession { session_key } => {
            registration::resume_session(hub, connection_id, &session_key, now)
        }
        InboundEvent::UpdateLocation {
            account_id,
            lat,
            lng,
            fields,
        } => {
            hub.admit(connection_id, Role::Driver, "updateLocation")?;
            driver::update_location(hub, connection_id, account_id, lat, lng, fields, now)
        }
        InboundEvent::DestinationUpdate { account_id, fields } => {
            hub.admit(connection_id, Role::Driver, "destinationUpdate")?;
            driver::destination_update(hub, account_id, fields, now)
        }
        InboundEvent::RouteUpdate {
            account_id,
            geometry,
            fields,
        } => {
            hub.admit(connection_id, Role::Driver, "routeUpdate")?;
            driver::route_update(hub, account_id, geometry, fields, now)
        }
        InboundEvent::PassengerUpdate { account_id, fields } => {
            hub.admit(connection_id, Role::Driver, "passengerUpdate")?;
            driver::passenger_update(hub, account_id, fields, now)
        }
        InboundEvent::EndSession { account_id } => {
            hub.admit(connection_id, Role::Driver, "endSession")?;
            let account_id = account_id.or_else(|| hub.connection_account_id(connection_id));
            driver::end_session(hub, account_id)
        }
        InboundEvent::GetBusInfo { account_id } => {
            hub.admit(connection_id, Role::User, "getBusInfo")?;
            user::get_bus_info(hub, connection_id, &account_id)
        }
        InboundEvent::RequestDriversData => {
            hub.admit(connection_id, Role::User, "requestDriversData")?;
            user::request_drivers_data(hub, connection_id)
        }
        InboundEvent::RequestCurrentData => {
            hub.admit(connection_id, Role::User, "requestCurrentData")?;
            user::request_current_data(hub, connection_id)
        }
        InboundEvent::PingDriver {
            driver_account_id,
            lat,
            lng,
            passenger_count,
            user_account_id,
        } => {
            hub.admit(connection_id, Role::User, "pingDriver")?;
            let user_account_id =
                user_account_id.or_else(|| hub.connection_account_id(connection_id));
            user::ping_driver(
                hub,
                driver_account_id,
                lat,
                lng,
                passenger_count,
                user_account_id,
                now,
            )
        }
        InboundEvent::UnpingDriver {
            driver_account_id,
            user_account_id,
        } => {
            hub.admit(connection_id, Role::User, "unpingDriver")?;
            let user_account_id =
                user_account_id.or_else(|| hub.connection_account_id(connection_id));
            user::unping_driver(hub, driver_account_id, user_account_id, now)
        }
    }
}

fn reply_error(hub: &Hub, connection_id: u64, err: &RelayError) {
    if let Some(sink) = hub.connections.get(&connection_id) {
        let _ = sink.send(OutboundEvent::Error {
            message: err.to_string(),
        });
    }
}

/// Tears down `connection_id`: removes it from every registry index (via
/// `Hub::unbind`) and, if it was bound to a user, prunes that user from
/// every driver's `waitingPassengers` (spec.md §4.7: "If the user
/// disconnects, the server removes the user from every driver's
/// waitingPassengers"). This is the single place a transport-level close —
/// local preemption, a dead fan-out send, peer FIN, or reaper reconciliation
/// — should route through, so the ping-cleanup side effect is never missed.
pub fn disconnect(hub: &Hub, connection_id: u64, now: std::time::Instant) {
    let role = hub.connection_role(connection_id);
    let account_id = hub.connection_account_id(connection_id);

    hub.unbind(connection_id, now);

    if role == Some(Role::User) {
        if let Some(account_id) = account_id {
            user::handle_user_disconnect_pings(hub, &account_id);
        }
    }
}
