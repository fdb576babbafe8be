//! Prometheus metrics (spec.md §10.5 ambient observability — not part of
//! the protocol surface in spec.md §6, exposed on `GET /metrics` behind the
//! same router as the WebSocket upgrade and HTTP probes).
//!
//! Grounded on the teacher's `src/metrics.rs`: a `lazy_static` global
//! registry of counters and gauges, gathered to Prometheus text format on
//! scrape. Gauges are re-derived from the `Hub` at scrape time rather than
//! maintained incrementally, since the registry is already the source of
//! truth and a scrape is infrequent relative to connection churn.

use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

use crate::state::Hub;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    pub static ref CONNECTED_DRIVERS: IntGauge = IntGauge::new(
        "relay_connected_drivers",
        "Drivers currently in the Live state"
    ).unwrap();

    pub static ref CONNECTED_USERS: IntGauge = IntGauge::new(
        "relay_connected_users",
        "Users currently connected"
    ).unwrap();

    pub static ref BROADCASTS_SENT: IntCounter = IntCounter::new(
        "relay_broadcasts_sent_total",
        "Driver update broadcasts fanned out to the user cohort"
    ).unwrap();

    pub static ref RATE_LIMIT_REJECTIONS: IntCounter = IntCounter::new(
        "relay_rate_limit_rejections_total",
        "updateLocation events rejected by the per-connection rate gate"
    ).unwrap();

    pub static ref REAPER_REMOVALS: IntCounter = IntCounter::new(
        "relay_reaper_removals_total",
        "Driver and user records removed by the reaper past grace/stale timeout"
    ).unwrap();

    pub static ref PINGS_ROUTED: IntCounter = IntCounter::new(
        "relay_pings_routed_total",
        "pingDriver events successfully unicast to a live driver"
    ).unwrap();
}

/// Registers every metric. Must be called once at startup before the first
/// scrape — mirrors the teacher's `metrics::init()`.
pub fn init() {
    REGISTRY.register(Box::new(CONNECTED_DRIVERS.clone())).unwrap();
    REGISTRY.register(Box::new(CONNECTED_USERS.clone())).unwrap();
    REGISTRY.register(Box::new(BROADCASTS_SENT.clone())).unwrap();
    REGISTRY.register(Box::new(RATE_LIMIT_REJECTIONS.clone())).unwrap();
    REGISTRY.register(Box::new(REAPER_REMOVALS.clone())).unwrap();
    REGISTRY.register(Box::new(PINGS_ROUTED.clone())).unwrap();
}

/// Refreshes the gauges from live `Hub` state, then renders the whole
/// registry to Prometheus text exposition format for `GET /metrics`.
pub fn gather(hub: &Hub) -> String {
    CONNECTED_DRIVERS.set(hub.live_driver_count() as i64);
    CONNECTED_USERS.set(hub.live_user_count() as i64);

    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap_or_default()
}
