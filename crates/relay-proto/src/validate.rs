//! Payload validation shared by every inbound event that carries coordinates
//! or identifiers.

use serde_json::Value;
use thiserror::Error;

/// A malformed or out-of-range inbound payload.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("field {field} must be a number, got {got}")]
    NotANumber { field: &'static str, got: String },

    #[error("latitude {0} out of range [-90, 90]")]
    LatOutOfRange(f64),

    #[error("longitude {0} out of range [-180, 180]")]
    LngOutOfRange(f64),

    #[error("account id must not be empty")]
    EmptyAccountId,

    #[error("unknown role: {0}")]
    UnknownRole(String),

    #[error("passengerCount {0} out of range [1, 20]")]
    PassengerCountOutOfRange(i64),

    #[error("field {field} must be non-negative, got {got}")]
    NegativeCount { field: &'static str, got: i64 },

    #[error("unknown event: {0}")]
    UnknownEvent(String),
}

/// Accepts a JSON number or a numeric string (spec.md §6: "string forms
/// parseable to number accepted").
pub fn as_f64(field: &'static str, value: &Value) -> Result<f64, ValidationError> {
    match value {
        Value::Number(n) => n.as_f64().ok_or(ValidationError::NotANumber {
            field,
            got: value.to_string(),
        }),
        Value::String(s) => s.trim().parse::<f64>().map_err(|_| ValidationError::NotANumber {
            field,
            got: s.clone(),
        }),
        other => Err(ValidationError::NotANumber {
            field,
            got: other.to_string(),
        }),
    }
}

pub fn validate_lat(lat: f64) -> Result<f64, ValidationError> {
    if (-90.0..=90.0).contains(&lat) {
        Ok(lat)
    } else {
        Err(ValidationError::LatOutOfRange(lat))
    }
}

pub fn validate_lng(lng: f64) -> Result<f64, ValidationError> {
    if (-180.0..=180.0).contains(&lng) {
        Ok(lng)
    } else {
        Err(ValidationError::LngOutOfRange(lng))
    }
}

pub fn validate_account_id(id: &str) -> Result<(), ValidationError> {
    if id.trim().is_empty() {
        Err(ValidationError::EmptyAccountId)
    } else {
        Ok(())
    }
}

/// `passengerCount`/`maxCapacity` on a driver update are declared
/// "non-negative integers" (spec.md §3); reject a negative value rather than
/// silently accepting and broadcasting it.
pub fn validate_non_negative_count(field: &'static str, value: i64) -> Result<i64, ValidationError> {
    if value < 0 {
        Err(ValidationError::NegativeCount { field, got: value })
    } else {
        Ok(value)
    }
}

/// `passengerCount`, if present on a ping, is floored to its absolute value
/// and must land in `[1, 20]`; default `1` when absent (spec.md §4.7).
pub fn validate_ping_passenger_count(raw: Option<f64>) -> Result<i64, ValidationError> {
    let Some(raw) = raw else { return Ok(1) };
    let floored = raw.abs().floor() as i64;
    if (1..=20).contains(&floored) {
        Ok(floored)
    } else {
        Err(ValidationError::PassengerCountOutOfRange(floored))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numeric_string_accepted() {
        assert_eq!(as_f64("lat", &json!("14.5")).unwrap(), 14.5);
    }

    #[test]
    fn boundary_lat_accepted() {
        assert!(validate_lat(90.0).is_ok());
        assert!(validate_lat(90.000001).is_err());
        assert!(validate_lat(-90.0).is_ok());
    }

    #[test]
    fn boundary_lng_accepted() {
        assert!(validate_lng(180.0).is_ok());
        assert!(validate_lng(-180.0).is_ok());
        assert!(validate_lng(180.000001).is_err());
    }

    #[test]
    fn passenger_count_bounds() {
        assert_eq!(validate_ping_passenger_count(None).unwrap(), 1);
        assert!(validate_ping_passenger_count(Some(0.0)).is_err());
        assert_eq!(validate_ping_passenger_count(Some(20.0)).unwrap(), 20);
        assert!(validate_ping_passenger_count(Some(21.0)).is_err());
        assert_eq!(validate_ping_passenger_count(Some(-2.0)).unwrap(), 2);
    }
}
