//! `registerRole` and `resumeSession` handlers (spec.md §4.1).

use crate::error::RelayError;
use crate::state::registry::ResumeOutcome;
use crate::state::Hub;
use relay_proto::{OutboundEvent, Role};
use std::time::Instant;

pub fn register_role(
    hub: &Hub,
    connection_id: u64,
    role: Role,
    account_id: Option<String>,
    now: Instant,
) -> Result<(), RelayError> {
    let outcome = hub.register(connection_id, role, account_id.clone(), now);

    if role == Role::User {
        // A user record lives from registration to reap/end (spec.md §3
        // Lifecycles) — unlike a driver record, it is not deferred to the
        // first update.
        let account_id = account_id.expect("relay-proto rejects userless registerRole");
        hub.ensure_user_record(&account_id, connection_id, now);
    }

    send(hub, connection_id, OutboundEvent::SessionAssigned {
        session_key: outcome.session_key,
    });

    if role == Role::User {
        send_drivers_snapshot(hub, connection_id);
    }

    Ok(())
}

pub fn resume_session(
    hub: &Hub,
    connection_id: u64,
    session_key: &str,
    now: Instant,
) -> Result<(), RelayError> {
    match hub.resume_session(connection_id, session_key, now) {
        ResumeOutcome::UnknownSession => Err(RelayError::UnknownSession),
        ResumeOutcome::Resumed { role, .. } => {
            if role == Role::User {
                send_drivers_snapshot(hub, connection_id);
            }
            Ok(())
        }
    }
}

fn send_drivers_snapshot(hub: &Hub, connection_id: u64) {
    let (drivers, total, limited) = hub.snapshot_drivers();
    send(
        hub,
        connection_id,
        OutboundEvent::DriversSnapshot {
            drivers,
            total,
            limited,
        },
    );
}

fn send(hub: &Hub, connection_id: u64, event: OutboundEvent) {
    if let Some(sink) = hub.connections.get(&connection_id) {
        let _ = sink.send(event);
    }
}
