//! Shared in-process test harness: a `Hub` behind a `FakeClock`, plus a
//! recording `ConnectionSink` double, so the scenarios in spec.md §8 can
//! be driven without a live socket (SPEC_FULL.md §10.4), simplified from
//! the teacher's subprocess-plus-real-TCP `tests/common` harness since
//! this crate's registry already abstracts transport behind `ConnectionSink`.

#![allow(dead_code)]

use fleet_relay::clock::FakeClock;
use fleet_relay::config::Config;
use fleet_relay::handlers;
use fleet_relay::state::sink::{CloseReason, ConnectionSink};
use fleet_relay::state::Hub;
use relay_proto::{OutboundEvent, WireMessage};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

pub struct RecordingSink {
    received: Mutex<Vec<OutboundEvent>>,
    closed: AtomicBool,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            received: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }

    pub fn events(&self) -> Vec<OutboundEvent> {
        self.received.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Every received event whose wire name matches `event`, in arrival order.
    pub fn events_named(&self, event: &str) -> Vec<OutboundEvent> {
        self.received
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.to_wire().event == event)
            .cloned()
            .collect()
    }
}

impl ConnectionSink for RecordingSink {
    fn send(&self, event: OutboundEvent) -> Result<(), ()> {
        self.received.lock().unwrap().push(event);
        Ok(())
    }

    fn close(&self, _reason: CloseReason) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

pub struct TestHub {
    pub hub: Hub,
    pub clock: Arc<FakeClock>,
    next_connection_id: std::cell::Cell<u64>,
}

impl TestHub {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Same as `new`, but with a caller-supplied config — scenarios that pin
    /// down a specific `heartbeatInterval`/`staleTimeout`/etc. build one via
    /// `Config { limits: LimitsConfig { .. }, ..Config::default() }`.
    pub fn with_config(config: Config) -> Self {
        let clock = Arc::new(FakeClock::new());
        let hub = Hub::new(Arc::new(config), clock.clone());
        Self {
            hub,
            clock,
            next_connection_id: std::cell::Cell::new(1),
        }
    }

    /// Accepts a new connection and registers its sink, returning the
    /// connection id to drive it with.
    pub fn connect(&self) -> (u64, Arc<RecordingSink>) {
        let connection_id = self.next_connection_id.get();
        self.next_connection_id.set(connection_id + 1);
        let sink = RecordingSink::new();
        self.hub.connections.insert(connection_id, sink.clone());
        (connection_id, sink)
    }

    pub fn send(&self, connection_id: u64, event: &str, data: Value) {
        handlers::dispatch(&self.hub, connection_id, WireMessage::new(event, data));
    }

    pub fn disconnect(&self, connection_id: u64) {
        handlers::disconnect(&self.hub, connection_id, self.clock.now());
    }
}
