//! Server-to-client events (spec.md §6).

use crate::geometry::RouteGeometry;
use crate::wire::WireMessage;
use serde_json::{json, Value};

/// A single driver's row in a snapshot payload (spec.md §4.9). Mirrors the
/// driver record's client-facing fields; `lastUpdatedAt` is used only for
/// sort order upstream and is deliberately not part of this shape.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DriverSummary {
    pub account_id: String,
    pub lat: f64,
    pub lng: f64,
    pub destination_name: Option<String>,
    pub destination_lat: Option<f64>,
    pub destination_lng: Option<f64>,
    pub organization_name: Option<String>,
    pub passenger_count: i64,
    pub max_capacity: i64,
    pub is_online: bool,
}

impl DriverSummary {
    fn to_value(&self) -> Value {
        json!({
            "accountId": self.account_id,
            "lat": self.lat,
            "lng": self.lng,
            "destinationName": self.destination_name,
            "destinationLat": self.destination_lat,
            "destinationLng": self.destination_lng,
            "organizationName": self.organization_name,
            "passengerCount": self.passenger_count,
            "maxCapacity": self.max_capacity,
            "isOnline": self.is_online,
        })
    }
}

/// Every event the relay may push to a driver or user connection.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundEvent {
    /// Bare session-key string payload.
    SessionAssigned {
        session_key: String,
    },
    DriversSnapshot {
        drivers: Vec<DriverSummary>,
        total: usize,
        limited: bool,
    },
    /// Legacy alias of `driversSnapshot` kept for clients that still read
    /// the `buses` field name (see DESIGN.md).
    CurrentData {
        buses: Vec<DriverSummary>,
    },
    LocationUpdate {
        account_id: String,
        lat: f64,
        lng: f64,
        is_online: bool,
    },
    DestinationUpdate {
        account_id: String,
        destination_name: Option<String>,
        destination_lat: Option<f64>,
        destination_lng: Option<f64>,
        is_online: bool,
    },
    RouteUpdate {
        account_id: String,
        geometry: RouteGeometry,
        is_online: bool,
    },
    PassengerUpdate {
        account_id: String,
        passenger_count: i64,
        max_capacity: i64,
        is_online: bool,
    },
    BusInfo {
        driver: DriverSummary,
    },
    BusInfoError {
        account_id: String,
        reason: String,
    },
    DriversData {
        drivers: Vec<DriverSummary>,
    },
    DriverRemoved {
        account_id: String,
        timestamp: i64,
    },
    DriverStateRestored {
        account_id: String,
        passenger_count: i64,
        max_capacity: i64,
    },
    /// Unicast to the driver that was pinged.
    PingReceived {
        user_account_id: String,
        lat: f64,
        lng: f64,
        passenger_count: i64,
        timestamp: i64,
    },
    PingRemoved {
        user_account_id: String,
        timestamp: i64,
        reason: Option<&'static str>,
    },
    ConnectionReplaced {
        message: String,
        timestamp: i64,
    },
    ServerShutdown {
        timestamp: i64,
    },
    Error {
        message: String,
    },
}

impl OutboundEvent {
    pub fn to_wire(&self) -> WireMessage {
        match self {
            OutboundEvent::SessionAssigned { session_key } => {
                WireMessage::new("sessionAssigned", json!(session_key))
            }
            OutboundEvent::DriversSnapshot { drivers, total, limited } => WireMessage::new(
                "driversSnapshot",
                json!({
                    "drivers": drivers.iter().map(DriverSummary::to_value).collect::<Vec<_>>(),
                    "count": drivers.len(),
                    "total": total,
                    "limited": limited,
                }),
            ),
            OutboundEvent::CurrentData { buses } => WireMessage::new(
                "currentData",
                json!({ "buses": buses.iter().map(DriverSummary::to_value).collect::<Vec<_>>() }),
            ),
            OutboundEvent::LocationUpdate { account_id, lat, lng, is_online } => WireMessage::new(
                "locationUpdate",
                json!({
                    "accountId": account_id,
                    "lat": lat,
                    "lng": lng,
                    "from": "driver",
                    "isOnline": is_online,
                }),
            ),
            OutboundEvent::DestinationUpdate {
                account_id,
                destination_name,
                destination_lat,
                destination_lng,
                is_online,
            } => WireMessage::new(
                "destinationUpdate",
                json!({
                    "accountId": account_id,
                    "destinationName": destination_name,
                    "destinationLat": destination_lat,
                    "destinationLng": destination_lng,
                    "from": "driver",
                    "isOnline": is_online,
                }),
            ),
            OutboundEvent::RouteUpdate { account_id, geometry, is_online } => WireMessage::new(
                "routeUpdate",
                json!({
                    "accountId": account_id,
                    "geometry": geometry.as_value(),
                    "from": "driver",
                    "isOnline": is_online,
                }),
            ),
            OutboundEvent::PassengerUpdate {
                account_id,
                passenger_count,
                max_capacity,
                is_online,
            } => WireMessage::new(
                "passengerUpdate",
                json!({
                    "accountId": account_id,
                    "passengerCount": passenger_count,
                    "maxCapacity": max_capacity,
                    "from": "driver",
                    "isOnline": is_online,
                }),
            ),
            OutboundEvent::BusInfo { driver } => WireMessage::new("busInfo", driver.to_value()),
            OutboundEvent::BusInfoError { account_id, reason } => WireMessage::new(
                "busInfoError",
                json!({ "accountId": account_id, "reason": reason }),
            ),
            OutboundEvent::DriversData { drivers } => WireMessage::new(
                "driversData",
                json!({ "drivers": drivers.iter().map(DriverSummary::to_value).collect::<Vec<_>>() }),
            ),
            OutboundEvent::DriverRemoved { account_id, timestamp } => WireMessage::new(
                "driverRemoved",
                json!({ "accountId": account_id, "timestamp": timestamp }),
            ),
            OutboundEvent::DriverStateRestored {
                account_id,
                passenger_count,
                max_capacity,
            } => WireMessage::new(
                "driverStateRestored",
                json!({
                    "accountId": account_id,
                    "passengerCount": passenger_count,
                    "maxCapacity": max_capacity,
                }),
            ),
            OutboundEvent::PingReceived {
                user_account_id,
                lat,
                lng,
                passenger_count,
                timestamp,
            } => WireMessage::new(
                "pingReceived",
                json!({
                    "userAccountId": user_account_id,
                    "lat": lat,
                    "lng": lng,
                    "passengerCount": passenger_count,
                    "timestamp": timestamp,
                }),
            ),
            OutboundEvent::PingRemoved { user_account_id, timestamp, reason } => WireMessage::new(
                "pingRemoved",
                json!({
                    "userAccountId": user_account_id,
                    "timestamp": timestamp,
                    "reason": reason,
                }),
            ),
            OutboundEvent::ConnectionReplaced { message, timestamp } => WireMessage::new(
                "connectionReplaced",
                json!({ "message": message, "timestamp": timestamp }),
            ),
            OutboundEvent::ServerShutdown { timestamp } => {
                WireMessage::new("serverShutdown", json!({ "timestamp": timestamp }))
            }
            OutboundEvent::Error { message } => {
                WireMessage::new("error", json!({ "message": message }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_assigned_payload_is_bare_string() {
        let event = OutboundEvent::SessionAssigned {
            session_key: "tok-1".to_string(),
        };
        let wire = event.to_wire();
        assert_eq!(wire.event, "sessionAssigned");
        assert_eq!(wire.data, json!("tok-1"));
    }

    #[test]
    fn drivers_snapshot_embeds_each_summary_and_counts() {
        let event = OutboundEvent::DriversSnapshot {
            drivers: vec![DriverSummary {
                account_id: "d1".to_string(),
                lat: 1.0,
                lng: 2.0,
                is_online: true,
                ..Default::default()
            }],
            total: 1,
            limited: false,
        };
        let wire = event.to_wire();
        assert_eq!(wire.data["drivers"][0]["accountId"], "d1");
        assert_eq!(wire.data["count"], 1);
        assert_eq!(wire.data["limited"], false);
    }

    #[test]
    fn broadcast_events_tag_origin_role() {
        let event = OutboundEvent::LocationUpdate {
            account_id: "d1".to_string(),
            lat: 1.0,
            lng: 2.0,
            is_online: true,
        };
        let wire = event.to_wire();
        assert_eq!(wire.data["from"], "driver");
    }
}
