//! Control channel messages.
//!
//! Every control message is a JSON document
//! `{"kind": "...", "attributes": {...}}` framed with a 4-byte big-endian
//! length prefix, in both directions.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;
use crate::lifecycle::LifecycleSignal;
use crate::protocol::encode_length_prefixed;

/// Message kinds understood on the control channel.
pub mod kinds {
    /// Outbound: worker initialized, `{"ready": "true"}`.
    pub const WRAPPER_INITIALIZED: &str = "wrapperInitialized";
    /// Outbound: explicit stream offset commit.
    pub const STREAM_MESSAGE_ACK: &str = "streamMessageAck";
    /// Inbound: drain.
    pub const DRAIN: &str = "drain";
    /// Inbound: terminate.
    pub const TERMINATE: &str = "terminate";
    /// Inbound: continue after drain.
    pub const CONTINUE: &str = "continue";
}

/// A control channel message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlMessage {
    /// Message kind.
    pub kind: String,
    /// Kind-specific attributes.
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl ControlMessage {
    /// Message with no attributes.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            attributes: Map::new(),
        }
    }

    /// Add an attribute.
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// The readiness notification.
    pub fn wrapper_initialized() -> Self {
        Self::new(kinds::WRAPPER_INITIALIZED).with_attribute("ready", "true")
    }

    /// Commit request for one stream offset.
    pub fn stream_message_ack(topic: &str, partition: i64, offset: i64) -> Self {
        Self::new(kinds::STREAM_MESSAGE_ACK)
            .with_attribute("topic", topic)
            .with_attribute("partition", partition)
            .with_attribute("offset", offset)
    }

    /// Lifecycle signal carried by an inbound message, if any.
    pub fn as_signal(&self) -> Option<LifecycleSignal> {
        match self.kind.as_str() {
            kinds::DRAIN => Some(LifecycleSignal::Drain),
            kinds::TERMINATE => Some(LifecycleSignal::Terminate),
            kinds::CONTINUE => Some(LifecycleSignal::Continue),
            _ => None,
        }
    }

    /// Encode as a length-prefixed JSON frame.
    pub fn encode(&self) -> Result<Vec<u8>> {
        encode_length_prefixed(&serde_json::to_vec(self)?)
    }

    /// Decode a frame body (without the length prefix).
    pub fn decode(payload: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::decode_length;
    use serde_json::json;

    #[test]
    fn test_wrapper_initialized_shape() {
        let frame = ControlMessage::wrapper_initialized().encode().unwrap();
        let length = decode_length(&frame).unwrap() as usize;
        assert_eq!(length, frame.len() - 4);

        let value: Value = serde_json::from_slice(&frame[4..]).unwrap();
        assert_eq!(value, json!({"kind": "wrapperInitialized", "attributes": {"ready": "true"}}));
    }

    #[test]
    fn test_stream_message_ack_shape() {
        let message = ControlMessage::stream_message_ack("orders", 3, 1024);
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(
            value,
            json!({
                "kind": "streamMessageAck",
                "attributes": {"topic": "orders", "partition": 3, "offset": 1024}
            })
        );
    }

    #[test]
    fn test_inbound_kinds() {
        let decode = |s: &str| ControlMessage::decode(s.as_bytes()).unwrap();

        assert_eq!(decode(r#"{"kind":"drain"}"#).as_signal(), Some(LifecycleSignal::Drain));
        assert_eq!(
            decode(r#"{"kind":"terminate","attributes":{}}"#).as_signal(),
            Some(LifecycleSignal::Terminate)
        );
        assert_eq!(decode(r#"{"kind":"continue"}"#).as_signal(), Some(LifecycleSignal::Continue));
        assert_eq!(decode(r#"{"kind":"somethingElse"}"#).as_signal(), None);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(ControlMessage::decode(b"not json").is_err());
        assert!(ControlMessage::decode(br#"{"attributes":{}}"#).is_err());
    }
}
