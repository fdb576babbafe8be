//! Periodic reaper (spec.md §4.8): every `cleanupInterval`, (a) reconciles
//! registry entries whose transport is gone, (b) purges accounts stale past
//! their grace window, and (c) sweeps expired rate-gate buckets.
//!
//! Idempotent with respect to `endSession` and with respect to itself: a
//! record already removed by a concurrent `endSession` is simply absent
//! from the next sweep's iteration, and re-running a sweep against
//! unchanged state removes nothing further.

use crate::fanout::broadcast_to_all;
use crate::handlers::user::handle_user_disconnect_pings;
use crate::state::{DriverState, Hub};
use relay_proto::{OutboundEvent, Role};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Runs one sweep. Called from a `tokio::time::interval` loop in `main`, and
/// directly from tests to assert on boundary behavior without waiting on a
/// real timer.
pub fn sweep(hub: &Hub, now: Instant) {
    reconcile_dangling_connections(hub, now);
    let removed_drivers = reap_stale_drivers(hub, now);
    let removed_users = reap_stale_users(hub, now);
    let dropped_buckets = hub.rate_gate.sweep_expired(now);

    if removed_drivers > 0 || removed_users > 0 || dropped_buckets > 0 {
        debug!(
            removed_drivers,
            removed_users, dropped_buckets, "reaper sweep"
        );
    }
}

/// Part (a): a record may still carry a `connectionHandle` whose transport
/// already vanished without the owning task calling `Unbind` (a crashed
/// connection task, a dropped channel). Detect this by checking the
/// handle against the live `connections` table and fold it into the normal
/// disconnected-with-grace transition, including the same `waitingPassengers`
/// pruning a clean disconnect gets.
fn reconcile_dangling_connections(hub: &Hub, now: Instant) {
    let dangling_drivers: Vec<String> = hub
        .drivers
        .iter()
        .filter_map(|entry| {
            let d = entry.value().read().unwrap();
            match d.connection_id {
                Some(cid) if !hub.connections.contains_key(&cid) => Some(entry.key().clone()),
                _ => None,
            }
        })
        .collect();
    for account_id in dangling_drivers {
        if let Some(driver) = hub.drivers.get(&account_id) {
            let mut driver = driver.write().unwrap();
            if driver.connection_id.is_some() && !hub.connections.contains_key(&driver.connection_id.unwrap())
            {
                driver.mark_disconnected(now);
            }
        }
    }

    let dangling_users: Vec<String> = hub
        .users
        .iter()
        .filter_map(|entry| {
            let u = entry.value().read().unwrap();
            match u.connection_id {
                Some(cid) if !hub.connections.contains_key(&cid) => Some(entry.key().clone()),
                _ => None,
            }
        })
        .collect();
    for account_id in dangling_users {
        let newly_disconnected = if let Some(user) = hub.users.get(&account_id) {
            let mut user = user.write().unwrap();
            let was_live = user.is_live();
            if was_live {
                user.mark_disconnected(now);
            }
            was_live
        } else {
            false
        };
        if newly_disconnected {
            handle_user_disconnect_pings(hub, &account_id);
        }
    }
}

/// Part (b), driver half (spec.md §4.4 `DisconnectedInGrace → Absent` /
/// `Live → Absent`). Returns the number of records removed.
fn reap_stale_drivers(hub: &Hub, now: Instant) -> usize {
    let stale_timeout = Duration::from_secs(hub.config.limits.stale_timeout_secs);
    let grace_period = Duration::from_secs(hub.config.limits.grace_period_secs);

    let doomed: Vec<String> = hub
        .drivers
        .iter()
        .filter_map(|entry| {
            let d = entry.value().read().unwrap();
            if now.duration_since(d.last_updated_at) <= stale_timeout {
                return None;
            }
            if d.state == DriverState::DisconnectedInGrace {
                let past_grace = d
                    .disconnected_at
                    .map(|at| now.duration_since(at) > grace_period)
                    .unwrap_or(true);
                if !past_grace {
                    return None;
                }
            }
            Some(entry.key().clone())
        })
        .collect();

    for account_id in &doomed {
        if hub.drivers.remove(account_id).is_some() {
            hub.remove_account_session(Role::Driver, account_id);
            crate::metrics::REAPER_REMOVALS.inc();
            // Both this path and `endSession` emit `driverRemoved`, per
            // spec.md §9's consistency decision (see DESIGN.md).
            broadcast_to_all(
                hub,
                &OutboundEvent::DriverRemoved {
                    account_id: account_id.clone(),
                    timestamp: chrono::Utc::now().timestamp_millis(),
                },
            );
            info!(account_id, "driver reaped after stale timeout");
        }
    }
    doomed.len()
}

/// Part (b), user half. A user record carries no downstream subscribers of
/// its own, so reaping one is silent on the wire — `waitingPassengers`
/// pruning already happened at disconnect time via [`handlers::disconnect`].
fn reap_stale_users(hub: &Hub, now: Instant) -> usize {
    let stale_timeout = Duration::from_secs(hub.config.limits.stale_timeout_secs);
    let grace_period = Duration::from_secs(hub.config.limits.grace_period_secs);

    let doomed: Vec<String> = hub
        .users
        .iter()
        .filter_map(|entry| {
            let u = entry.value().read().unwrap();
            if now.duration_since(u.last_activity_at) <= stale_timeout {
                return None;
            }
            if u.disconnected {
                let past_grace = u
                    .disconnected_at
                    .map(|at| now.duration_since(at) > grace_period)
                    .unwrap_or(true);
                if !past_grace {
                    return None;
                }
            }
            Some(entry.key().clone())
        })
        .collect();

    for account_id in &doomed {
        if hub.users.remove(account_id).is_some() {
            hub.remove_account_session(Role::User, account_id);
            crate::metrics::REAPER_REMOVALS.inc();
        }
    }
    doomed.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use crate::config::Config;
    use crate::state::sink::{CloseReason, ConnectionSink};
    use relay_proto::Role;
    use std::sync::{Arc, Mutex};

    struct RecordingSink {
        received: Mutex<Vec<OutboundEvent>>,
    }
    impl ConnectionSink for RecordingSink {
        fn send(&self, event: OutboundEvent) -> Result<(), ()> {
            self.received.lock().unwrap().push(event);
            Ok(())
        }
        fn close(&self, _reason: CloseReason) {}
    }

    fn test_hub() -> (Hub, Arc<FakeClock>) {
        let clock = Arc::new(FakeClock::new());
        (Hub::new(Arc::new(Config::default()), clock.clone()), clock)
    }

    #[test]
    fn reaping_an_already_absent_record_is_a_no_op() {
        let (hub, clock) = test_hub();
        sweep(&hub, clock.now());
        sweep(&hub, clock.now());
    }

    #[test]
    fn driver_reaped_after_grace_and_stale_timeout_emits_driver_removed() {
        let (hub, clock) = test_hub();
        let now = clock.now();
        hub.register(1, Role::Driver, Some("D1".to_string()), now);
        hub.ensure_driver_record("D1", 1, now);

        let sink = Arc::new(RecordingSink {
            received: Mutex::new(Vec::new()),
        });
        hub.connections.insert(2, sink.clone());
        hub.register(2, Role::User, Some("U1".to_string()), now);
        hub.ensure_user_record("U1", 2, now);

        hub.unbind(1, now);
        clock.advance(Duration::from_secs(301));

        sweep(&hub, clock.now());

        assert!(hub.drivers.get("D1").is_none());
        let received = sink.received.lock().unwrap();
        assert!(received
            .iter()
            .any(|e| matches!(e, OutboundEvent::DriverRemoved { account_id, .. } if account_id == "D1")));
    }

    #[test]
    fn driver_within_grace_is_not_reaped() {
        let (hub, clock) = test_hub();
        let now = clock.now();
        hub.register(1, Role::Driver, Some("D1".to_string()), now);
        hub.ensure_driver_record("D1", 1, now);
        hub.unbind(1, now);

        clock.advance(Duration::from_secs(10));
        sweep(&hub, clock.now());

        assert!(hub.drivers.get("D1").is_some());
    }

    #[test]
    fn dangling_connection_handle_transitions_to_grace() {
        let (hub, clock) = test_hub();
        let now = clock.now();
        hub.register(1, Role::Driver, Some("D1".to_string()), now);
        hub.ensure_driver_record("D1", 1, now);
        // Simulate a connection task that crashed without calling Unbind:
        // the sink vanishes but the driver record still points at it.
        hub.connections.remove(&1);

        sweep(&hub, clock.now());

        let driver = hub.drivers.get("D1").unwrap();
        let driver = driver.read().unwrap();
        assert_eq!(driver.state, DriverState::DisconnectedInGrace);
    }

    #[test]
    fn expired_rate_gate_buckets_are_swept() {
        let (hub, clock) = test_hub();
        let now = clock.now();
        hub.rate_gate.check(42, now);
        clock.advance(Duration::from_secs(120));

        sweep(&hub, clock.now());

        // Already dropped by the sweep above; a second sweep removes nothing.
        assert_eq!(hub.rate_gate.sweep_expired(clock.now()), 0);
    }
}
