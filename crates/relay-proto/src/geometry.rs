//! Route geometry: an opaque, equality-comparable blob.
//!
//! Clients may send an encoded polyline string or a coordinate-list array;
//! the relay never interprets the contents, only compares them for change
//! detection (spec.md §4.3, §9). Two payloads that are structurally equal
//! but differ in JSON object key order must still compare equal, so we
//! canonicalize before comparing rather than relying on `serde_json::Value`'s
//! derived `PartialEq` (which is order-sensitive for objects represented as
//! maps only if the map type itself is order-sensitive; `serde_json`'s
//! default map is a `BTreeMap`-like ordered map only when the `preserve_order`
//! feature is off — we canonicalize explicitly so behavior does not depend on
//! that feature flag).

use serde_json::Value;
use std::fmt::Write as _;

/// Opaque route geometry, compared by canonical serialized form.
#[derive(Debug, Clone)]
pub struct RouteGeometry(Value);

impl RouteGeometry {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// A deterministic string form: object keys sorted recursively, arrays
    /// left in order (order is significant for a coordinate list).
    pub fn canonical_string(&self) -> String {
        let mut out = String::new();
        write_canonical(&self.0, &mut out);
        out
    }
}

impl PartialEq for RouteGeometry {
    fn eq(&self, other: &Self) -> bool {
        self.canonical_string() == other.canonical_string()
    }
}
impl Eq for RouteGeometry {}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => {
            let _ = write!(out, "{b}");
        }
        Value::Number(n) => {
            let _ = write!(out, "{n}");
        }
        Value::String(s) => {
            let _ = write!(out, "{s:?}");
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                let _ = write!(out, "{key:?}:");
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_affect_equality() {
        let a = RouteGeometry::new(json!({"type": "polyline", "points": "abc"}));
        let b = RouteGeometry::new(json!({"points": "abc", "type": "polyline"}));
        assert_eq!(a, b);
    }

    #[test]
    fn value_difference_is_detected() {
        let a = RouteGeometry::new(json!({"points": "abc"}));
        let b = RouteGeometry::new(json!({"points": "abd"}));
        assert_ne!(a, b);
    }

    #[test]
    fn array_order_is_significant() {
        let a = RouteGeometry::new(json!([[1, 2], [3, 4]]));
        let b = RouteGeometry::new(json!([[3, 4], [1, 2]]));
        assert_ne!(a, b);
    }
}
