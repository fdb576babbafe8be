//! Client-to-server events (spec.md §6).

use crate::geometry::RouteGeometry;
use crate::role::Role;
use crate::validate::{
    as_f64, validate_account_id, validate_lat, validate_lng, validate_non_negative_count,
    validate_ping_passenger_count, ValidationError,
};
use crate::wire::WireMessage;
use serde_json::Value;

/// Optional driver-update fields carried by `updateLocation`,
/// `destinationUpdate`, `routeUpdate`, and `passengerUpdate`. Not every
/// event populates every field; absent fields are left untouched by the
/// update filter rather than treated as a reset to `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DriverPayloadFields {
    pub destination_name: Option<String>,
    pub destination_lat: Option<f64>,
    pub destination_lng: Option<f64>,
    pub organization_name: Option<String>,
    pub passenger_count: Option<i64>,
    pub max_capacity: Option<i64>,
}

fn opt_str(data: &Value, field: &str) -> Option<String> {
    data.get(field).and_then(Value::as_str).map(str::to_owned)
}

fn opt_f64(data: &Value, field: &'static str) -> Result<Option<f64>, ValidationError> {
    match data.get(field) {
        Some(v) if !v.is_null() => Ok(Some(as_f64(field, v)?)),
        _ => Ok(None),
    }
}

/// Parses a non-negative integer field (spec.md §3: `passengerCount`,
/// `maxCapacity` are "non-negative integers").
fn opt_non_negative_i64(data: &Value, field: &'static str) -> Result<Option<i64>, ValidationError> {
    match data.get(field) {
        Some(v) if !v.is_null() => {
            Ok(Some(validate_non_negative_count(field, as_f64(field, v)? as i64)?))
        }
        _ => Ok(None),
    }
}

fn parse_driver_payload_fields(data: &Value) -> Result<DriverPayloadFields, ValidationError> {
    Ok(DriverPayloadFields {
        destination_name: opt_str(data, "destinationName"),
        destination_lat: opt_f64(data, "destinationLat")?,
        destination_lng: opt_f64(data, "destinationLng")?,
        organization_name: opt_str(data, "organizationName"),
        passenger_count: opt_non_negative_i64(data, "passengerCount")?,
        max_capacity: opt_non_negative_i64(data, "maxCapacity")?,
    })
}

/// Every event a driver or user connection may send.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// `registerRole`. Accepts either a bare role string or an object of
    /// `{ role, accountId? }` (spec.md §9: drivers may omit `accountId` on
    /// first registration and declare it later on their first update).
    RegisterRole {
        role: Role,
        account_id: Option<String>,
    },
    /// `resumeSession`. The payload is the bare session key string.
    ResumeSession {
        session_key: String,
    },
    UpdateLocation {
        account_id: String,
        lat: f64,
        lng: f64,
        fields: DriverPayloadFields,
    },
    DestinationUpdate {
        account_id: String,
        fields: DriverPayloadFields,
    },
    RouteUpdate {
        account_id: String,
        geometry: RouteGeometry,
        fields: DriverPayloadFields,
    },
    PassengerUpdate {
        account_id: String,
        fields: DriverPayloadFields,
    },
    EndSession {
        account_id: Option<String>,
    },
    GetBusInfo {
        account_id: String,
    },
    RequestDriversData,
    RequestCurrentData,
    PingDriver {
        driver_account_id: String,
        lat: f64,
        lng: f64,
        passenger_count: i64,
        user_account_id: Option<String>,
    },
    UnpingDriver {
        driver_account_id: String,
        user_account_id: Option<String>,
    },
}

fn get_str(data: &Value, field: &'static str) -> Result<String, ValidationError> {
    data.get(field)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or(ValidationError::MissingField(field))
}

fn get_required(data: &Value, field: &'static str) -> Result<Value, ValidationError> {
    data.get(field)
        .cloned()
        .ok_or(ValidationError::MissingField(field))
}

impl TryFrom<WireMessage> for InboundEvent {
    type Error = ValidationError;

    fn try_from(msg: WireMessage) -> Result<Self, Self::Error> {
        let WireMessage { event, data } = msg;
        match event.as_str() {
            "registerRole" => parse_register_role(&data),
            "resumeSession" => {
                let session_key = data
                    .as_str()
                    .map(str::to_owned)
                    .ok_or(ValidationError::MissingField("sessionKey"))?;
                Ok(InboundEvent::ResumeSession { session_key })
            }
            "updateLocation" => {
                let account_id = get_str(&data, "accountId")?;
                validate_account_id(&account_id)?;
                let lat = validate_lat(as_f64("lat", &get_required(&data, "lat")?)?)?;
                let lng = validate_lng(as_f64("lng", &get_required(&data, "lng")?)?)?;
                let fields = parse_driver_payload_fields(&data)?;
                Ok(InboundEvent::UpdateLocation {
                    account_id,
                    lat,
                    lng,
                    fields,
                })
            }
            "destinationUpdate" => {
                let account_id = get_str(&data, "accountId")?;
                validate_account_id(&account_id)?;
                Ok(InboundEvent::DestinationUpdate {
                    account_id,
                    fields: parse_driver_payload_fields(&data)?,
                })
            }
            "routeUpdate" => {
                let account_id = get_str(&data, "accountId")?;
                validate_account_id(&account_id)?;
                let geometry = RouteGeometry::new(get_required(&data, "geometry")?);
                Ok(InboundEvent::RouteUpdate {
                    account_id,
                    geometry,
                    fields: parse_driver_payload_fields(&data)?,
                })
            }
            "passengerUpdate" => {
                let account_id = get_str(&data, "accountId")?;
                validate_account_id(&account_id)?;
                Ok(InboundEvent::PassengerUpdate {
                    account_id,
                    fields: parse_driver_payload_fields(&data)?,
                })
            }
            "endSession" => Ok(InboundEvent::EndSession {
                account_id: opt_str(&data, "accountId"),
            }),
            "getBusInfo" => Ok(InboundEvent::GetBusInfo {
                account_id: get_str(&data, "accountId")?,
            }),
            "requestDriversData" => Ok(InboundEvent::RequestDriversData),
            "requestCurrentData" => Ok(InboundEvent::RequestCurrentData),
            "pingDriver" => {
                let driver_account_id = get_str(&data, "driverAccountId")?;
                validate_account_id(&driver_account_id)?;
                let lat = validate_lat(as_f64("lat", &get_required(&data, "lat")?)?)?;
                let lng = validate_lng(as_f64("lng", &get_required(&data, "lng")?)?)?;
                let raw_count = data
                    .get("passengerCount")
                    .map(|v| as_f64("passengerCount", v))
                    .transpose()?;
                let passenger_count = validate_ping_passenger_count(raw_count)?;
                Ok(InboundEvent::PingDriver {
                    driver_account_id,
                    lat,
                    lng,
                    passenger_count,
                    user_account_id: opt_str(&data, "userAccountId"),
                })
            }
            "unpingDriver" => {
                let driver_account_id = get_str(&data, "driverAccountId")?;
                validate_account_id(&driver_account_id)?;
                Ok(InboundEvent::UnpingDriver {
                    driver_account_id,
                    user_account_id: opt_str(&data, "userAccountId"),
                })
            }
            other => Err(ValidationError::UnknownEvent(other.to_string())),
        }
    }
}

/// `registerRole` accepts `"driver"` / `"user"` as a bare string, or
/// `{ "role": "...", "accountId": "..." }` as an object.
fn parse_register_role(data: &Value) -> Result<InboundEvent, ValidationError> {
    if let Some(role_str) = data.as_str() {
        let role: Role = role_str
            .parse()
            .map_err(|_| ValidationError::UnknownRole(role_str.to_string()))?;
        return Ok(InboundEvent::RegisterRole {
            role,
            account_id: None,
        });
    }

    let role_str = get_str(data, "role")?;
    let role: Role = role_str
        .parse()
        .map_err(|_| ValidationError::UnknownRole(role_str.clone()))?;
    let account_id = match data.get("accountId").and_then(Value::as_str) {
        Some(id) => {
            validate_account_id(id)?;
            Some(id.to_string())
        }
        None => None,
    };
    if role == Role::User && account_id.is_none() {
        return Err(ValidationError::MissingField("accountId"));
    }
    Ok(InboundEvent::RegisterRole { role, account_id })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn register_role_bare_string() {
        let msg = WireMessage::new("registerRole", json!("driver"));
        let event = InboundEvent::try_from(msg).unwrap();
        assert_eq!(
            event,
            InboundEvent::RegisterRole {
                role: Role::Driver,
                account_id: None,
            }
        );
    }

    #[test]
    fn register_role_object_form_with_account() {
        let msg = WireMessage::new("registerRole", json!({"role": "user", "accountId": "acct-1"}));
        let event = InboundEvent::try_from(msg).unwrap();
        assert_eq!(
            event,
            InboundEvent::RegisterRole {
                role: Role::User,
                account_id: Some("acct-1".to_string()),
            }
        );
    }

    #[test]
    fn register_role_user_requires_account_id() {
        let msg = WireMessage::new("registerRole", json!({"role": "user"}));
        assert!(InboundEvent::try_from(msg).is_err());
    }

    #[test]
    fn resume_session_is_bare_string() {
        let msg = WireMessage::new("resumeSession", json!("sess-abc"));
        let event = InboundEvent::try_from(msg).unwrap();
        assert_eq!(
            event,
            InboundEvent::ResumeSession {
                session_key: "sess-abc".to_string()
            }
        );
    }

    #[test]
    fn update_location_rejects_bad_lat() {
        let msg = WireMessage::new(
            "updateLocation",
            json!({"accountId": "d1", "lat": 95.0, "lng": 0.0}),
        );
        assert!(InboundEvent::try_from(msg).is_err());
    }

    #[test]
    fn update_location_rejects_negative_passenger_count() {
        let msg = WireMessage::new(
            "updateLocation",
            json!({"accountId": "d1", "lat": 0.0, "lng": 0.0, "passengerCount": -1}),
        );
        assert!(InboundEvent::try_from(msg).is_err());
    }

    #[test]
    fn update_location_accepts_numeric_strings_and_optional_fields() {
        let msg = WireMessage::new(
            "updateLocation",
            json!({"accountId": "d1", "lat": "12.5", "lng": "-45.25", "passengerCount": 3}),
        );
        let event = InboundEvent::try_from(msg).unwrap();
        match event {
            InboundEvent::UpdateLocation { lat, lng, fields, .. } => {
                assert_eq!(lat, 12.5);
                assert_eq!(lng, -45.25);
                assert_eq!(fields.passenger_count, Some(3));
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn unknown_event_is_rejected() {
        let msg = WireMessage::new("doTheThing", Value::Null);
        assert!(matches!(
            InboundEvent::try_from(msg),
            Err(ValidationError::UnknownEvent(_))
        ));
    }

    #[test]
    fn ping_driver_defaults_passenger_count() {
        let msg = WireMessage::new(
            "pingDriver",
            json!({"driverAccountId": "d1", "lat": 1.0, "lng": 2.0}),
        );
        let event = InboundEvent::try_from(msg).unwrap();
        assert_eq!(
            event,
            InboundEvent::PingDriver {
                driver_account_id: "d1".to_string(),
                lat: 1.0,
                lng: 2.0,
                passenger_count: 1,
                user_account_id: None,
            }
        );
    }
}
