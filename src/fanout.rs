//! Fan-out primitives: broadcast to every user, or unicast to one driver
//! (spec.md §4.6).
//!
//! Recipient connection ids are snapshotted while iterating the registry's
//! indexes, then each send happens after that snapshot is taken — per
//! spec.md §5, a slow or dead subscriber must not block the others, and
//! the registry itself is never held locked across a transport write.

use crate::error::RelayError;
use crate::state::Hub;
use relay_proto::{OutboundEvent, Role};

/// **BroadcastToUsers(event, payload)** (spec.md §4.6). Best-effort: a
/// send failure to one subscriber is treated as a disconnect for that
/// subscriber (spec.md §9 design note) and does not stop delivery to the
/// rest.
pub fn broadcast_to_users(hub: &Hub, event: &OutboundEvent) {
    crate::metrics::BROADCASTS_SENT.inc();

    let recipients: Vec<u64> = hub
        .connection_index
        .iter()
        .filter(|entry| entry.value().role == Role::User)
        .map(|entry| *entry.key())
        .collect();

    for connection_id in recipients {
        let Some(sink) = hub.connections.get(&connection_id) else {
            continue;
        };
        if sink.send(event.clone()).is_err() {
            drop(sink);
            crate::handlers::disconnect(hub, connection_id, hub.clock.now());
        }
    }
}

/// Sends to every currently bound connection regardless of role. Used only
/// for `serverShutdown` (spec.md §5) — every other outbound event is
/// either a user broadcast or a driver unicast.
pub fn broadcast_to_all(hub: &Hub, event: &OutboundEvent) {
    let recipients: Vec<u64> = hub.connection_index.iter().map(|entry| *entry.key()).collect();

    for connection_id in recipients {
        let Some(sink) = hub.connections.get(&connection_id) else {
            continue;
        };
        let _ = sink.send(event.clone());
    }
}

/// **UnicastToDriver(driverAccountId, event, payload)** (spec.md §4.6).
/// Fails with a protocol-level error to the originator if the driver is
/// unknown, has no bound connection, or whose transport is not live.
pub fn unicast_to_driver(
    hub: &Hub,
    driver_account_id: &str,
    event: OutboundEvent,
) -> Result<(), RelayError> {
    let connection_id = {
        let driver = hub
            .drivers
            .get(driver_account_id)
            .ok_or_else(|| RelayError::DriverNotFound(driver_account_id.to_string()))?;
        let driver = driver.read().unwrap();
        if !driver.is_live() {
            return Err(RelayError::DriverUnavailable(driver_account_id.to_string()));
        }
        driver.connection_id.unwrap()
    };

    let sink = hub
        .connections
        .get(&connection_id)
        .ok_or_else(|| RelayError::DriverUnavailable(driver_account_id.to_string()))?;

    if sink.send(event).is_err() {
        drop(sink);
        crate::handlers::disconnect(hub, connection_id, hub.clock.now());
        return Err(RelayError::DriverUnavailable(driver_account_id.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use crate::config::Config;
    use crate::state::sink::CloseReason;
    use crate::state::sink::ConnectionSink;
    use relay_proto::Role;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Instant;

    struct RecordingSink {
        received: Mutex<Vec<OutboundEvent>>,
        fail: bool,
    }
    impl ConnectionSink for RecordingSink {
        fn send(&self, event: OutboundEvent) -> Result<(), ()> {
            if self.fail {
                return Err(());
            }
            self.received.lock().unwrap().push(event);
            Ok(())
        }
        fn close(&self, _reason: CloseReason) {}
    }

    fn test_hub() -> Hub {
        Hub::new(Arc::new(Config::default()), Arc::new(FakeClock::new()))
    }

    #[test]
    fn broadcast_reaches_only_user_role_connections() {
        let hub = test_hub();
        let now = Instant::now();
        hub.register(1, Role::User, Some("U1".to_string()), now);
        hub.register(2, Role::Driver, Some("D1".to_string()), now);

        let sink1 = Arc::new(RecordingSink {
            received: Mutex::new(Vec::new()),
            fail: false,
        });
        let sink2 = Arc::new(RecordingSink {
            received: Mutex::new(Vec::new()),
            fail: false,
        });
        hub.connections.insert(1, sink1.clone());
        hub.connections.insert(2, sink2.clone());

        broadcast_to_users(
            &hub,
            &OutboundEvent::DriverRemoved {
                account_id: "D1".to_string(),
                timestamp: 0,
            },
        );

        assert_eq!(sink1.received.lock().unwrap().len(), 1);
        assert_eq!(sink2.received.lock().unwrap().len(), 0);
    }

    #[test]
    fn unicast_fails_for_unknown_driver() {
        let hub = test_hub();
        let err = unicast_to_driver(&hub, "ghost", OutboundEvent::ServerShutdown { timestamp: 0 });
        assert!(matches!(err, Err(RelayError::DriverNotFound(_))));
    }

    #[test]
    fn a_dead_subscriber_does_not_block_the_rest() {
        let hub = test_hub();
        let now = Instant::now();
        hub.register(1, Role::User, Some("U1".to_string()), now);
        hub.register(2, Role::User, Some("U2".to_string()), now);

        let dead = Arc::new(RecordingSink {
            received: Mutex::new(Vec::new()),
            fail: true,
        });
        let alive = Arc::new(RecordingSink {
            received: Mutex::new(Vec::new()),
            fail: false,
        });
        hub.connections.insert(1, dead);
        hub.connections.insert(2, alive.clone());

        let delivered = AtomicUsize::new(0);
        broadcast_to_users(
            &hub,
            &OutboundEvent::DriverRemoved {
                account_id: "D1".to_string(),
                timestamp: 0,
            },
        );
        delivered.fetch_add(alive.received.lock().unwrap().len(), Ordering::SeqCst);

        assert_eq!(delivered.load(Ordering::SeqCst), 1);
    }
}
