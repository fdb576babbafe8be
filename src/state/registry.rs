//! Registry operations: Register, ResumeSession, Unbind, Preempt, and
//! snapshot composition (spec.md §4.1, §4.9).

use super::driver::DriverRecord;
use super::session::{mint_session_key, SessionKey, SessionRecord};
use super::sink::CloseReason;
use super::user::UserRecord;
use super::Hub;
use crate::error::RelayError;
use relay_proto::Role;
use std::time::Instant;

/// connection id + role + account id bound to it, as tracked by the
/// registry's connection index.
#[derive(Debug, Clone)]
pub struct ConnectionBinding {
    pub role: Role,
    pub account_id: Option<String>,
    pub session_key: SessionKey,
}

pub struct RegisterOutcome {
    pub session_key: SessionKey,
    /// The connection that was preempted to make room for this one, if any.
    pub preempted: Option<u64>,
}

pub enum ResumeOutcome {
    Resumed {
        role: Role,
        account_id: Option<String>,
        preempted: Option<u64>,
        /// True if a live driver record had `pendingStateRestore` carried
        /// over — i.e. the caller should expect a `driverStateRestored`
        /// once the next authoritative update lands.
        driver_restoring: bool,
    },
    UnknownSession,
}

impl Hub {
    /// **Register(connection, role, accountId)** (spec.md §4.1).
    ///
    /// `account_id` may be `None` only for `Role::Driver` — the caller
    /// (relay-proto's validator) already rejects a user registration
    /// without one.
    pub fn register(
        &self,
        connection_id: u64,
        role: Role,
        account_id: Option<String>,
        now: Instant,
    ) -> RegisterOutcome {
        let preempted = account_id
            .as_deref()
            .and_then(|account_id| self.incumbent_connection(role, account_id));

        if let Some(incumbent) = preempted {
            self.preempt(incumbent, CloseReason::Preempted, now);
        }

        let session_key = mint_session_key();
        self.sessions.insert(
            session_key.clone(),
            SessionRecord::new(account_id.clone(), role, connection_id, now),
        );
        self.connection_index.insert(
            connection_id,
            ConnectionBinding {
                role,
                account_id,
                session_key: session_key.clone(),
            },
        );
        self.rate_gate.remove(connection_id);

        RegisterOutcome {
            session_key,
            preempted,
        }
    }

    /// Late-binds a driver connection's account id on its first
    /// authoritative update, when it registered with `registerRole` bare
    /// (spec.md §9 open question: preserved as permissive).
    pub fn bind_driver_identity(&self, connection_id: u64, account_id: String, now: Instant) {
        let Some(mut binding) = self.connection_index.get_mut(&connection_id) else {
            return;
        };
        if binding.account_id.is_some() {
            return;
        }

        if let Some(incumbent) = self.incumbent_connection(Role::Driver, &account_id) {
            if incumbent != connection_id {
                drop(binding);
                self.preempt(incumbent, CloseReason::Preempted, now);
                binding = self.connection_index.get_mut(&connection_id).unwrap();
            }
        }

        binding.account_id = Some(account_id.clone());
        let session_key = binding.session_key.clone();
        drop(binding);

        if let Some(mut session) = self.sessions.get_mut(&session_key) {
            session.account_id = Some(account_id);
            session.last_activity_at = now;
        }
    }

    /// **ResumeSession(connection, sessionKey)** (spec.md §4.1).
    pub fn resume_session(
        &self,
        connection_id: u64,
        session_key: &str,
        now: Instant,
    ) -> ResumeOutcome {
        let Some(mut session) = self.sessions.get_mut(session_key) else {
            return ResumeOutcome::UnknownSession;
        };

        let role = session.role;
        let account_id = session.account_id.clone();

        let preempted = session
            .connection_id
            .filter(|&incumbent| incumbent != connection_id);

        session.connection_id = Some(connection_id);
        session.last_activity_at = now;
        drop(session);

        if let Some(incumbent) = preempted {
            self.preempt(incumbent, CloseReason::Preempted, now);
        }

        self.connection_index.insert(
            connection_id,
            ConnectionBinding {
                role,
                account_id: account_id.clone(),
                session_key: session_key.to_string(),
            },
        );
        self.rate_gate.remove(connection_id);

        let mut driver_restoring = false;
        if role == Role::Driver {
            if let Some(account_id) = account_id.as_deref() {
                if let Some(driver) = self.drivers.get(account_id) {
                    let mut driver = driver.write().unwrap();
                    driver.reconnect(connection_id);
                    driver.pending_state_restore = true;
                    driver_restoring = true;
                }
            }
        } else if let Some(account_id) = account_id.as_deref() {
            if let Some(user) = self.users.get(account_id) {
                user.write().unwrap().reconnect(connection_id, now);
            }
        }

        ResumeOutcome::Resumed {
            role,
            account_id,
            preempted,
            driver_restoring,
        }
    }

    /// **Unbind(connection)** (spec.md §4.1): transport closed, locally or
    /// by peer. Transitions the bound record into disconnected-with-grace.
    pub fn unbind(&self, connection_id: u64, now: Instant) {
        self.connections.remove(&connection_id);
        self.rate_gate.remove(connection_id);

        let Some((_, binding)) = self.connection_index.remove(&connection_id) else {
            return;
        };

        let Some(account_id) = binding.account_id else {
            return;
        };

        match binding.role {
            Role::Driver => {
                if let Some(driver) = self.drivers.get(&account_id) {
                    let mut driver = driver.write().unwrap();
                    if driver.connection_id == Some(connection_id) {
                        driver.mark_disconnected(now);
                    }
                }
            }
            Role::User => {
                if let Some(user) = self.users.get(&account_id) {
                    let mut user = user.write().unwrap();
                    if user.connection_id == Some(connection_id) {
                        user.mark_disconnected(now);
                    }
                }
            }
        }
    }

    /// **Preempt(connection, reason)** (spec.md §4.1): sends `connectionReplaced`,
    /// closes the incumbent connection's transport, then synchronously
    /// reclaims its mappings via `Unbind` — spec.md §4.1 requires the
    /// incumbent's entries reclaimed before the new connection binds, and
    /// §5 requires a closed connection's index entries removed
    /// synchronously rather than left to the (possibly delayed) transport
    /// task's own teardown. Never called on the newly arriving connection.
    fn preempt(&self, connection_id: u64, reason: CloseReason, now: Instant) {
        if let Some(sink) = self.connections.get(&connection_id) {
            let _ = sink.send(relay_proto::OutboundEvent::ConnectionReplaced {
                message: "replaced by a newer connection for this account".to_string(),
                timestamp: chrono::Utc::now().timestamp_millis(),
            });
            sink.close(reason);
        }
        self.unbind(connection_id, now);
    }

    /// The live connection currently bound to `account_id` under `role`,
    /// if any (spec.md §3 invariant 1: at most one). A driver's own record
    /// is deferred until its first update, so a driver that registered
    /// with an explicit `accountId` but hasn't sent one yet has no record
    /// to consult — fall back to scanning `connection_index` for another
    /// connection already bound to the same (role, accountId) so two such
    /// registrations still preempt each other.
    fn incumbent_connection(&self, role: Role, account_id: &str) -> Option<u64> {
        match role {
            Role::Driver => {
                if let Some(connection_id) = self
                    .drivers
                    .get(account_id)
                    .and_then(|d| d.read().unwrap().connection_id)
                {
                    return Some(connection_id);
                }
                self.connection_index.iter().find_map(|entry| {
                    (entry.role == Role::Driver && entry.account_id.as_deref() == Some(account_id))
                        .then(|| *entry.key())
                })
            }
            Role::User => self
                .users
                .get(account_id)
                .and_then(|u| u.read().unwrap().connection_id),
        }
    }

    /// Creates the driver record on `Absent → Live` (first valid update).
    pub fn ensure_driver_record(&self, account_id: &str, connection_id: u64, now: Instant) {
        self.drivers
            .entry(account_id.to_string())
            .or_insert_with(|| {
                std::sync::RwLock::new(DriverRecord::new(account_id.to_string(), connection_id, now))
            });
    }

    pub fn ensure_user_record(&self, account_id: &str, connection_id: u64, now: Instant) {
        self.users.entry(account_id.to_string()).or_insert_with(|| {
            std::sync::RwLock::new(UserRecord::new(account_id.to_string(), connection_id, now))
        });
    }

    /// `endSession`: any state → `Absent`, immediate, no grace
    /// (spec.md §4.4).
    pub fn end_session(&self, account_id: &str) -> bool {
        let removed = self.drivers.remove(account_id).is_some();
        self.remove_account_session(Role::Driver, account_id);
        removed
    }

    /// Drops the session record (if any) bound to `account_id` under
    /// `role`. Called whenever a driver or user record is removed outright
    /// (`endSession`, or the reaper's stale-past-grace sweep) so a stale
    /// session key can't be used to resume into a record that no longer
    /// exists.
    pub fn remove_account_session(&self, role: Role, account_id: &str) {
        let key = self.sessions.iter().find_map(|entry| {
            (entry.role == role && entry.account_id.as_deref() == Some(account_id))
                .then(|| entry.key().clone())
        });
        if let Some(key) = key {
            self.sessions.remove(&key);
        }
    }

    pub fn connection_role(&self, connection_id: u64) -> Option<Role> {
        self.connection_index.get(&connection_id).map(|b| b.role)
    }

    pub fn connection_account_id(&self, connection_id: u64) -> Option<String> {
        self.connection_index
            .get(&connection_id)
            .and_then(|b| b.account_id.clone())
    }

    pub fn touch_user_activity(&self, account_id: &str, now: Instant) {
        if let Some(user) = self.users.get(account_id) {
            user.write().unwrap().last_activity_at = now;
        }
    }

    /// Composes a point-in-time snapshot of every driver that has either a
    /// position or a geometry, truncated to `maxSnapshotDrivers` sorted by
    /// recency (spec.md §4.9).
    pub fn snapshot_drivers(&self) -> (Vec<relay_proto::DriverSummary>, usize, bool) {
        let mut rows: Vec<(Instant, relay_proto::DriverSummary)> = self
            .drivers
            .iter()
            .filter_map(|entry| {
                let d = entry.value().read().unwrap();
                if d.geometry.is_none() && (d.lat, d.lng) == (0.0, 0.0) && d.last_broadcast_at.is_none()
                {
                    return None;
                }
                Some((
                    d.last_updated_at,
                    relay_proto::DriverSummary {
                        account_id: d.account_id.clone(),
                        lat: d.lat,
                        lng: d.lng,
                        destination_name: d.destination_name.clone(),
                        destination_lat: d.destination_lat,
                        destination_lng: d.destination_lng,
                        organization_name: d.organization_name.clone(),
                        passenger_count: d.passenger_count,
                        max_capacity: d.max_capacity,
                        is_online: d.is_live(),
                    },
                ))
            })
            .collect();

        let total = rows.len();
        let max = self.config.limits.max_snapshot_drivers;
        let limited = total > max;
        if limited {
            rows.sort_by(|a, b| b.0.cmp(&a.0));
            rows.truncate(max);
        }

        (rows.into_iter().map(|(_, summary)| summary).collect(), total, limited)
    }

    pub fn driver_summary(&self, account_id: &str) -> Option<relay_proto::DriverSummary> {
        let d = self.drivers.get(account_id)?;
        let d = d.read().unwrap();
        Some(relay_proto::DriverSummary {
            account_id: d.account_id.clone(),
            lat: d.lat,
            lng: d.lng,
            destination_name: d.destination_name.clone(),
            destination_lat: d.destination_lat,
            destination_lng: d.destination_lng,
            organization_name: d.organization_name.clone(),
            passenger_count: d.passenger_count,
            max_capacity: d.max_capacity,
            is_online: d.is_live(),
        })
    }

    /// Rejects if the event's originating role doesn't match what spec.md
    /// §4.5 requires for that event.
    pub fn admit(
        &self,
        connection_id: u64,
        required: Role,
        event: &'static str,
    ) -> Result<(), RelayError> {
        match self.connection_role(connection_id) {
            Some(role) if role == required => Ok(()),
            Some(role) => Err(RelayError::Authorization {
                role: role.as_str(),
                event,
            }),
            None => Err(RelayError::Authorization {
                role: "unregistered",
                event,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use crate::config::Config;
    use crate::state::sink::ConnectionSink;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    struct RecordingSink {
        closed: AtomicBool,
    }
    impl ConnectionSink for RecordingSink {
        fn send(&self, _event: relay_proto::OutboundEvent) -> Result<(), ()> {
            Ok(())
        }
        fn close(&self, _reason: CloseReason) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    fn test_hub() -> Hub {
        Hub::new(Arc::new(Config::default()), Arc::new(FakeClock::new()))
    }

    #[test]
    fn registering_second_connection_preempts_first() {
        let hub = test_hub();
        let now = Instant::now();
        hub.connections.insert(
            1,
            Arc::new(RecordingSink {
                closed: AtomicBool::new(false),
            }),
        );
        let outcome_a = hub.register(1, Role::Driver, Some("D1".to_string()), now);
        assert!(outcome_a.preempted.is_none());
        hub.ensure_driver_record("D1", 1, now);

        let outcome_b = hub.register(2, Role::Driver, Some("D1".to_string()), now);
        assert_eq!(outcome_b.preempted, Some(1));
    }

    #[test]
    fn preempted_connection_has_its_mappings_reclaimed_synchronously() {
        let hub = test_hub();
        let now = Instant::now();
        hub.connections.insert(
            1,
            Arc::new(RecordingSink {
                closed: AtomicBool::new(false),
            }),
        );
        hub.register(1, Role::Driver, Some("D1".to_string()), now);
        hub.ensure_driver_record("D1", 1, now);

        hub.register(2, Role::Driver, Some("D1".to_string()), now);

        // The incumbent's connection and index entries must be gone
        // immediately, not left for its (possibly delayed) transport task
        // to clean up later.
        assert!(hub.connections.get(&1).is_none());
        assert!(hub.connection_index.get(&1).is_none());

        // The driver record itself transitions into grace right away too,
        // ready to be rebound to connection 2 on its next update.
        let driver = hub.drivers.get("D1").unwrap();
        let driver = driver.read().unwrap();
        assert_eq!(driver.connection_id, None);
        assert!(driver.disconnected_at.is_some());
    }

    #[test]
    fn preempting_with_no_incumbent_is_a_no_op() {
        let hub = test_hub();
        let now = Instant::now();
        let outcome = hub.register(1, Role::Driver, Some("D1".to_string()), now);
        assert!(outcome.preempted.is_none());
    }

    #[test]
    fn unbind_marks_driver_disconnected_in_grace() {
        let hub = test_hub();
        let now = Instant::now();
        hub.register(1, Role::Driver, Some("D1".to_string()), now);
        hub.ensure_driver_record("D1", 1, now);

        hub.unbind(1, now);

        let driver = hub.drivers.get("D1").unwrap();
        let driver = driver.read().unwrap();
        assert_eq!(driver.connection_id, None);
        assert!(driver.disconnected_at.is_some());
    }

    #[test]
    fn resume_session_with_unknown_key_fails() {
        let hub = test_hub();
        let now = Instant::now();
        assert!(matches!(
            hub.resume_session(1, "not-a-real-key", now),
            ResumeOutcome::UnknownSession
        ));
    }

    #[test]
    fn resume_session_restores_driver_and_sets_pending_flag() {
        let hub = test_hub();
        let now = Instant::now();
        let reg = hub.register(1, Role::Driver, Some("D1".to_string()), now);
        hub.ensure_driver_record("D1", 1, now);
        hub.unbind(1, now);

        let outcome = hub.resume_session(2, &reg.session_key, now);
        match outcome {
            ResumeOutcome::Resumed { driver_restoring, .. } => assert!(driver_restoring),
            _ => panic!("expected Resumed"),
        }
        let driver = hub.drivers.get("D1").unwrap();
        assert!(driver.read().unwrap().pending_state_restore);
    }
}
