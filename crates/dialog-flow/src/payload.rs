//! Payload field-naming conventions
//!
//! Transports disagree on whether dialogue payloads use `session_id` or
//! `sessionId`. The convention is picked once when a [`Dialog`](crate::Dialog)
//! is built and every read and write goes through it.

use std::fmt::Debug;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::errors::{FlowError, Result};
use crate::messages::OutgoingMessage;
use crate::types::SessionId;

/// Reads the fields the flow layer needs from inbound payloads and shapes
/// outgoing messages for the transport.
pub trait PayloadConvention: Send + Sync + Debug {
    /// Session identifier of an inbound event
    fn session_id(&self, payload: &Value) -> Option<SessionId>;

    /// Application correlation data of an inbound event
    fn custom_data<'a>(&self, payload: &'a Value) -> Option<&'a str>;

    /// Encode an outgoing message
    fn encode(&self, message: &OutgoingMessage) -> Result<Value>;
}

/// `session_id` / `custom_data`, the native dialogue engine's naming
#[derive(Debug, Clone, Copy, Default)]
pub struct SnakeCase;

/// `sessionId` / `customData`, the JSON API naming
#[derive(Debug, Clone, Copy, Default)]
pub struct CamelCase;

/// Map the `use_json_api` configuration flag to a convention
pub fn convention_for(use_json_api: bool) -> Arc<dyn PayloadConvention> {
    if use_json_api {
        Arc::new(CamelCase)
    } else {
        Arc::new(SnakeCase)
    }
}

fn string_field<'a>(payload: &'a Value, key: &str) -> Option<&'a str> {
    payload.get(key).and_then(Value::as_str)
}

fn encode_snake(message: &OutgoingMessage) -> Result<Value> {
    message.to_snake_case_value().map_err(|source| FlowError::Encode {
        message: message.topic(),
        source,
    })
}

impl PayloadConvention for SnakeCase {
    fn session_id(&self, payload: &Value) -> Option<SessionId> {
        string_field(payload, "session_id").map(SessionId::from)
    }

    fn custom_data<'a>(&self, payload: &'a Value) -> Option<&'a str> {
        string_field(payload, "custom_data")
    }

    fn encode(&self, message: &OutgoingMessage) -> Result<Value> {
        encode_snake(message)
    }
}

impl PayloadConvention for CamelCase {
    fn session_id(&self, payload: &Value) -> Option<SessionId> {
        string_field(payload, "sessionId").map(SessionId::from)
    }

    fn custom_data<'a>(&self, payload: &'a Value) -> Option<&'a str> {
        string_field(payload, "customData")
    }

    fn encode(&self, message: &OutgoingMessage) -> Result<Value> {
        Ok(camelize_keys(encode_snake(message)?))
    }
}

/// Rewrite every object key from snake_case to camelCase, recursively.
/// Values are left alone.
fn camelize_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| (snake_to_camel(&key), camelize_keys(value)))
                .collect::<Map<String, Value>>(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(camelize_keys).collect()),
        other => other,
    }
}

fn snake_to_camel(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut upper_next = false;
    for c in key.chars() {
        if c == '_' {
            upper_next = !out.is_empty();
        } else if upper_next {
            out.extend(c.to_uppercase());
            upper_next = false;
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{ContinueSession, EndSession};
    use serde_json::json;

    #[test]
    fn test_snake_case_extraction() {
        let payload = json!({"session_id": "s1", "custom_data": "order-42", "sessionId": "wrong"});
        assert_eq!(SnakeCase.session_id(&payload), Some(SessionId::from("s1")));
        assert_eq!(SnakeCase.custom_data(&payload), Some("order-42"));
    }

    #[test]
    fn test_camel_case_extraction() {
        let payload = json!({"sessionId": "s2", "customData": "order-17", "session_id": "wrong"});
        assert_eq!(CamelCase.session_id(&payload), Some(SessionId::from("s2")));
        assert_eq!(CamelCase.custom_data(&payload), Some("order-17"));
    }

    #[test]
    fn test_missing_or_non_string_fields() {
        let payload = json!({"session_id": 12, "custom_data": null});
        assert_eq!(SnakeCase.session_id(&payload), None);
        assert_eq!(SnakeCase.custom_data(&payload), None);
        assert_eq!(CamelCase.session_id(&json!({})), None);
    }

    #[test]
    fn test_camel_case_encoding() {
        let message = OutgoingMessage::from(ContinueSession {
            session_id: "s1".into(),
            text: Some("Which city?".into()),
            intent_filter: Some(vec!["city_name".into()]),
            custom_data: None,
            send_intent_not_recognized: true,
            slot: None,
        });

        let snake = SnakeCase.encode(&message).unwrap();
        assert_eq!(snake["session_id"], "s1");
        assert_eq!(snake["intent_filter"], json!(["city_name"]));

        let camel = CamelCase.encode(&message).unwrap();
        assert_eq!(
            camel,
            json!({
                "sessionId": "s1",
                "text": "Which city?",
                "intentFilter": ["city_name"],
                "sendIntentNotRecognized": true
            })
        );
    }

    #[test]
    fn test_nested_keys_are_camelized() {
        let message = OutgoingMessage::from(crate::messages::StartSession::action(None, "tok"));
        let camel = CamelCase.encode(&message).unwrap();
        assert_eq!(camel["customData"], "tok");
        assert_eq!(camel["init"]["canBeEnqueued"], true);
        assert_eq!(camel["init"]["type"], "action");
    }

    #[test]
    fn test_convention_for_flag() {
        let message = OutgoingMessage::from(EndSession { session_id: "s3".into(), text: None });
        assert!(convention_for(true).encode(&message).unwrap().get("sessionId").is_some());
        assert!(convention_for(false).encode(&message).unwrap().get("session_id").is_some());
    }

    #[test]
    fn test_snake_to_camel() {
        assert_eq!(snake_to_camel("send_intent_not_recognized"), "sendIntentNotRecognized");
        assert_eq!(snake_to_camel("text"), "text");
        assert_eq!(snake_to_camel("_private"), "private");
    }
}
