//! User record (spec.md §3).

use std::time::Instant;

#[derive(Debug, Clone)]
pub struct UserRecord {
    pub account_id: String,
    pub connection_id: Option<u64>,
    pub last_activity_at: Instant,
    pub disconnected: bool,
    pub disconnected_at: Option<Instant>,
    /// Captured from the most recent `pingDriver` sent by this user.
    pub last_ping_lat: Option<f64>,
    pub last_ping_lng: Option<f64>,
}

impl UserRecord {
    pub fn new(account_id: String, connection_id: u64, now: Instant) -> Self {
        Self {
            account_id,
            connection_id: Some(connection_id),
            last_activity_at: now,
            disconnected: false,
            disconnected_at: None,
            last_ping_lat: None,
            last_ping_lng: None,
        }
    }

    pub fn is_live(&self) -> bool {
        !self.disconnected && self.connection_id.is_some()
    }

    pub fn mark_disconnected(&mut self, now: Instant) {
        self.disconnected = true;
        self.connection_id = None;
        self.disconnected_at = Some(now);
    }

    pub fn reconnect(&mut self, connection_id: u64, now: Instant) {
        self.disconnected = false;
        self.connection_id = Some(connection_id);
        self.disconnected_at = None;
        self.last_activity_at = now;
    }
}
