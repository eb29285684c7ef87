//! Wire envelope definition
//!
//! Every message exchanged over a transport is a JSON object of the shape
//! `{"eventName": <string>, "data": <any JSON value>}`. The payload is
//! type-erased at this layer; registered handlers decide what shape they
//! expect and validate it themselves.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A named event with an arbitrary JSON payload
///
/// Immutable once constructed; cloned freely for fan-out. A missing
/// `data` field on the wire deserializes to `Value::Null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event name, used to look up handlers on the receiving side
    #[serde(rename = "eventName")]
    pub name: String,
    /// Opaque payload, resolved by the registered handler
    #[serde(default)]
    pub data: Value,
}

impl Event {
    /// Create a new event envelope
    pub fn new(name: impl Into<String>, data: Value) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_serialize_shape() {
        let ev = Event::new("ping", json!({"seq": 1}));
        let json = serde_json::to_string(&ev).unwrap();
        assert_eq!(json, r#"{"eventName":"ping","data":{"seq":1}}"#);
    }

    #[test]
    fn test_event_deserialize() {
        let ev: Event = serde_json::from_str(r#"{"eventName":"ping","data":{"seq":1}}"#).unwrap();
        assert_eq!(ev.name, "ping");
        assert_eq!(ev.data, json!({"seq": 1}));
    }

    #[test]
    fn test_event_round_trip() {
        let ev = Event::new("ping", json!({"seq": 1}));
        let json = serde_json::to_string(&ev).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ev);
    }

    #[test]
    fn test_missing_data_is_null() {
        let ev: Event = serde_json::from_str(r#"{"eventName":"bare"}"#).unwrap();
        assert_eq!(ev.name, "bare");
        assert_eq!(ev.data, Value::Null);
    }

    #[test]
    fn test_malformed_envelope_rejected() {
        assert!(serde_json::from_str::<Event>("{not json").is_err());
        assert!(serde_json::from_str::<Event>(r#"{"data": 1}"#).is_err());
    }
}
