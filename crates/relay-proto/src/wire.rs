//! The on-the-wire envelope every message is framed in.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single named event with its JSON-compatible payload.
///
/// Both directions of the transport use this shape: `{ "event": "...",
/// "data": { ... } }`. `data` defaults to `null` for payload-less events
/// (e.g. `requestDriversData`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMessage {
    pub event: String,
    #[serde(default = "default_data")]
    pub data: Value,
}

fn default_data() -> Value {
    Value::Null
}

impl WireMessage {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }
}
