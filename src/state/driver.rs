//! Driver record and state machine (spec.md §3, §4.4).

use relay_proto::RouteGeometry;
use std::time::Instant;

/// Where a driver record sits in its lifecycle. `Absent` has no stored
/// record at all — it is represented by the key's absence in the
/// registry, not a variant here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Live,
    DisconnectedInGrace,
}

/// A single waiting passenger entry (spec.md §3 `waitingPassengers`).
#[derive(Debug, Clone)]
pub struct WaitingPassenger {
    pub user_account_id: String,
    pub lat: f64,
    pub lng: f64,
    pub requested_count: i64,
    pub pinged_at: Instant,
}

#[derive(Debug, Clone)]
pub struct DriverRecord {
    pub account_id: String,
    pub state: DriverState,

    pub lat: f64,
    pub lng: f64,

    pub last_broadcast_lat: Option<f64>,
    pub last_broadcast_lng: Option<f64>,
    pub last_broadcast_at: Option<Instant>,

    pub destination_name: Option<String>,
    pub destination_lat: Option<f64>,
    pub destination_lng: Option<f64>,

    pub geometry: Option<RouteGeometry>,
    pub organization_name: Option<String>,

    pub passenger_count: i64,
    pub max_capacity: i64,

    pub last_updated_at: Instant,

    /// The connection currently bound to this driver, if live.
    pub connection_id: Option<u64>,
    pub disconnected_at: Option<Instant>,
    pub reconnect_attempts: u32,

    /// Keyed by user account id.
    pub waiting_passengers: std::collections::HashMap<String, WaitingPassenger>,

    pub pending_state_restore: bool,
}

impl DriverRecord {
    /// A freshly created record for a driver's first valid update
    /// (spec.md §4.4 `Absent → Live`).
    pub fn new(account_id: String, connection_id: u64, now: Instant) -> Self {
        Self {
            account_id,
            state: DriverState::Live,
            lat: 0.0,
            lng: 0.0,
            last_broadcast_lat: None,
            last_broadcast_lng: None,
            last_broadcast_at: None,
            destination_name: None,
            destination_lat: None,
            destination_lng: None,
            geometry: None,
            organization_name: None,
            passenger_count: 0,
            max_capacity: 0,
            last_updated_at: now,
            connection_id: Some(connection_id),
            disconnected_at: None,
            reconnect_attempts: 0,
            waiting_passengers: std::collections::HashMap::new(),
            pending_state_restore: false,
        }
    }

    pub fn is_live(&self) -> bool {
        self.state == DriverState::Live && self.connection_id.is_some()
    }

    /// `Live → DisconnectedInGrace` on transport unbind.
    pub fn mark_disconnected(&mut self, now: Instant) {
        self.state = DriverState::DisconnectedInGrace;
        self.connection_id = None;
        self.disconnected_at = Some(now);
    }

    /// `DisconnectedInGrace → Live` on the next valid driver message.
    pub fn reconnect(&mut self, connection_id: u64) {
        if self.state == DriverState::DisconnectedInGrace {
            self.reconnect_attempts += 1;
        }
        self.state = DriverState::Live;
        self.connection_id = Some(connection_id);
        self.disconnected_at = None;
    }
}
