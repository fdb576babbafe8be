//! Central registry: owned process-wide state, serialized per key rather
//! than behind one global lock (spec.md §5). Modeled as an owned value
//! (`Hub`) constructed once at startup and shared via `Arc`, rather than
//! the ambient singleton the source used — see DESIGN.md.

pub mod driver;
pub mod filter;
pub mod rate_gate;
pub mod registry;
pub mod session;
pub mod sink;
pub mod user;

pub use driver::{DriverRecord, DriverState};
pub use registry::ConnectionBinding;
pub use session::{SessionKey, SessionRecord};
pub use sink::ConnectionSink;
pub use user::UserRecord;

use crate::clock::Clock;
use crate::config::Config;
use crate::state::rate_gate::RateGate;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Process-wide mutable state plus the shared config and clock.
///
/// Lock order: never hold a `drivers`/`users` entry lock while acquiring
/// another entry lock on the same map (no two-driver operation exists);
/// `sessions` and `connection_index` are plain `DashMap`s consulted before
/// or after, never while holding a record lock, to avoid lock-order
/// inversion across the sharded maps.
pub struct Hub {
    pub config: Arc<Config>,
    pub clock: Arc<dyn Clock>,

    pub drivers: DashMap<String, RwLock<DriverRecord>>,
    pub users: DashMap<String, RwLock<UserRecord>>,
    pub sessions: DashMap<SessionKey, SessionRecord>,

    /// connection id -> (role, account id, session key), for connections
    /// currently bound.
    pub connection_index: DashMap<u64, ConnectionBinding>,

    /// connection id -> outbound sink, for every accepted (not necessarily
    /// bound) connection.
    pub connections: DashMap<u64, Arc<dyn ConnectionSink>>,

    pub rate_gate: RateGate,

    next_connection_id: AtomicU64,
    pub started_at: std::time::Instant,
}

impl Hub {
    pub fn new(config: Arc<Config>, clock: Arc<dyn Clock>) -> Self {
        let rate_gate = RateGate::new(config.limits.max_updates_per_minute);
        Self {
            config,
            clock: clock.clone(),
            drivers: DashMap::new(),
            users: DashMap::new(),
            sessions: DashMap::new(),
            connection_index: DashMap::new(),
            connections: DashMap::new(),
            rate_gate,
            next_connection_id: AtomicU64::new(1),
            started_at: clock.now(),
        }
    }

    pub fn next_connection_id(&self) -> u64 {
        self.next_connection_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn live_driver_count(&self) -> usize {
        self.drivers
            .iter()
            .filter(|e| e.value().read().map(|d| d.is_live()).unwrap_or(false))
            .count()
    }

    pub fn live_user_count(&self) -> usize {
        self.users
            .iter()
            .filter(|e| e.value().read().map(|u| u.is_live()).unwrap_or(false))
            .count()
    }

    /// Graceful-shutdown step one (spec.md §5): mark every live driver
    /// disconnected (recording `disconnectedAt`) without removing any
    /// record — clients are expected to reconnect after the process
    /// restarts. `serverShutdown` fan-out and listener close are the
    /// caller's responsibility.
    pub fn mark_all_disconnected(&self, now: std::time::Instant) {
        for entry in self.drivers.iter() {
            let mut driver = entry.value().write().unwrap();
            if driver.is_live() {
                driver.mark_disconnected(now);
            }
        }
        for entry in self.users.iter() {
            let mut user = entry.value().write().unwrap();
            if user.is_live() {
                user.mark_disconnected(now);
            }
        }
    }
}
