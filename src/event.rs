//! Invocation event data model.
//!
//! An [`Event`] is decoded from exactly one inbound frame and handed by value
//! to exactly one handler call. Header and field values keep the type the host
//! sent them with ([`FieldValue`]).

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

use crate::codec::{MsgPackCodec, WireEventRef};
use crate::error::Result;

/// A typed header or field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// msgpack nil.
    Nil,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Unsigned integer above `i64::MAX`.
    UInt(u64),
    /// Float.
    Float(f64),
    /// UTF-8 text.
    Str(String),
    /// Raw bytes (msgpack bin, or text that was not valid UTF-8).
    Bytes(Vec<u8>),
    /// msgpack array.
    Array(Vec<FieldValue>),
    /// msgpack map. Non-text keys are rendered as text.
    Map(BTreeMap<String, FieldValue>),
}

impl FieldValue {
    /// Text view of the value, if it is textual.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Str(s) => Some(s),
            FieldValue::Bytes(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    /// Integer view of the value, if it fits an `i64`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Int(n) => Some(*n),
            FieldValue::UInt(n) => i64::try_from(*n).ok(),
            _ => None,
        }
    }

    /// Elements of an array value.
    pub fn as_array(&self) -> Option<&[FieldValue]> {
        match self {
            FieldValue::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Entries of a map value.
    pub fn as_map(&self) -> Option<&BTreeMap<String, FieldValue>> {
        match self {
            FieldValue::Map(entries) => Some(entries),
            _ => None,
        }
    }

    fn into_key(self) -> String {
        match self {
            FieldValue::Str(s) => s,
            FieldValue::Bytes(b) => String::from_utf8_lossy(&b).into_owned(),
            FieldValue::Nil => String::new(),
            FieldValue::Bool(b) => b.to_string(),
            FieldValue::Int(n) => n.to_string(),
            FieldValue::UInt(n) => n.to_string(),
            FieldValue::Float(f) => f.to_string(),
            other @ (FieldValue::Array(_) | FieldValue::Map(_)) => format!("{other:?}"),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Str(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Str(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            FieldValue::Nil => serializer.serialize_unit(),
            FieldValue::Bool(b) => serializer.serialize_bool(*b),
            FieldValue::Int(n) => serializer.serialize_i64(*n),
            FieldValue::Float(f) => serializer.serialize_f64(*f),
            FieldValue::Str(s) => serializer.serialize_str(s),
            FieldValue::UInt(n) => serializer.serialize_u64(*n),
            FieldValue::Bytes(b) => serializer.serialize_bytes(b),
            FieldValue::Array(items) => serializer.collect_seq(items),
            FieldValue::Map(entries) => serializer.collect_map(entries),
        }
    }
}

impl<'de> Deserialize<'de> for FieldValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct FieldValueVisitor;

        impl<'de> Visitor<'de> for FieldValueVisitor {
            type Value = FieldValue;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("any msgpack value")
            }

            fn visit_unit<E: de::Error>(self) -> std::result::Result<FieldValue, E> {
                Ok(FieldValue::Nil)
            }

            fn visit_none<E: de::Error>(self) -> std::result::Result<FieldValue, E> {
                Ok(FieldValue::Nil)
            }

            fn visit_bool<E: de::Error>(self, v: bool) -> std::result::Result<FieldValue, E> {
                Ok(FieldValue::Bool(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<FieldValue, E> {
                Ok(FieldValue::Int(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<FieldValue, E> {
                Ok(i64::try_from(v).map_or(FieldValue::UInt(v), FieldValue::Int))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<FieldValue, E> {
                Ok(FieldValue::Float(v))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<FieldValue, E> {
                Ok(FieldValue::Str(v.to_string()))
            }

            fn visit_string<E: de::Error>(self, v: String) -> std::result::Result<FieldValue, E> {
                Ok(FieldValue::Str(v))
            }

            fn visit_bytes<E: de::Error>(self, v: &[u8]) -> std::result::Result<FieldValue, E> {
                Ok(FieldValue::Bytes(v.to_vec()))
            }

            fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> std::result::Result<FieldValue, E> {
                Ok(FieldValue::Bytes(v))
            }

            fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> std::result::Result<FieldValue, D::Error> {
                FieldValue::deserialize(deserializer)
            }

            fn visit_seq<A: de::SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<FieldValue, A::Error> {
                let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
                while let Some(item) = seq.next_element::<FieldValue>()? {
                    items.push(item);
                }
                Ok(FieldValue::Array(items))
            }

            fn visit_map<A: de::MapAccess<'de>>(self, mut map: A) -> std::result::Result<FieldValue, A::Error> {
                let mut entries = BTreeMap::new();
                while let Some((key, value)) = map.next_entry::<FieldValue, FieldValue>()? {
                    entries.insert(key.into_key(), value);
                }
                Ok(FieldValue::Map(entries))
            }
        }

        deserializer.deserialize_any(FieldValueVisitor)
    }
}

/// Header map with case-insensitive lookup.
///
/// Keys keep the spelling the host sent.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Headers(BTreeMap<String, FieldValue>);

impl Headers {
    /// Create an empty header map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a header, replacing any existing header with the same name
    /// regardless of case.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) {
        let name = name.into();
        self.0.retain(|k, _| !k.eq_ignore_ascii_case(&name));
        self.0.insert(name, value.into());
    }

    /// Case-insensitive lookup.
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.0
            .get(name)
            .or_else(|| self.0.iter().find(|(k, _)| k.eq_ignore_ascii_case(name)).map(|(_, v)| v))
    }

    /// Case-insensitive lookup returning text.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(FieldValue::as_str)
    }

    /// Number of headers.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate headers in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl FromIterator<(String, FieldValue)> for Headers {
    fn from_iter<I: IntoIterator<Item = (String, FieldValue)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (k, v) in iter {
            headers.insert(k, v);
        }
        headers
    }
}

/// Which trigger delivered the event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerInfo {
    /// Trigger class (`sync`, `async`, ...).
    #[serde(default)]
    pub class: String,
    /// Trigger kind (`http`, `kafka-cluster`, ...).
    #[serde(default)]
    pub kind: String,
    /// Trigger name as configured on the function.
    #[serde(default)]
    pub name: String,
}

/// One invocation event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Event {
    /// Event id assigned by the host.
    pub id: String,
    /// Raw body bytes.
    pub body: Bytes,
    /// Body content type.
    pub content_type: String,
    /// Request headers.
    pub headers: Headers,
    /// Trigger-specific fields (query parameters, etc.).
    pub fields: BTreeMap<String, FieldValue>,
    /// Request path.
    pub path: String,
    /// Request URL.
    pub url: String,
    /// Request method.
    pub method: String,
    /// Trigger that delivered the event.
    pub trigger: TriggerInfo,
    /// Time the event was received by the host.
    pub timestamp: Option<DateTime<Utc>>,
    /// Event type.
    pub event_type: String,
    /// Event type version.
    pub type_version: String,
    /// Event version.
    pub version: String,
    /// Body size as reported by the host.
    pub size: u64,
    /// Stream shard the event came from.
    pub shard_id: i64,
    /// Number of shards in the stream.
    pub num_shards: i64,
    /// Offset of the event within its shard.
    pub offset: i64,
}

impl Event {
    /// Body as text, replacing invalid UTF-8.
    pub fn body_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Deserialize a JSON body.
    pub fn body_json<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&FieldValue> {
        self.headers.get(name)
    }

    /// Field lookup.
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Encode as a msgpack map, the same layout the host sends.
    pub fn encode(&self) -> Result<Vec<u8>> {
        MsgPackCodec::encode(&WireEventRef::from(self))
    }
}

/// Event timestamps travel as seconds since the epoch, int or float.
pub(crate) mod timestamp {
    use super::*;

    const MICROS_PER_SECOND: i64 = 1_000_000;

    pub(crate) fn serialize<S: Serializer>(
        value: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        match value {
            None => serializer.serialize_unit(),
            Some(ts) => {
                let micros = ts.timestamp_micros();
                if micros % MICROS_PER_SECOND == 0 {
                    serializer.serialize_i64(ts.timestamp())
                } else {
                    serializer.serialize_f64(micros as f64 / MICROS_PER_SECOND as f64)
                }
            }
        }
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Option<DateTime<Utc>>, D::Error> {
        struct TimestampVisitor;

        impl<'de> Visitor<'de> for TimestampVisitor {
            type Value = Option<DateTime<Utc>>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("seconds since epoch")
            }

            fn visit_unit<E: de::Error>(self) -> std::result::Result<Self::Value, E> {
                Ok(None)
            }

            fn visit_none<E: de::Error>(self) -> std::result::Result<Self::Value, E> {
                Ok(None)
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<Self::Value, E> {
                DateTime::from_timestamp(v, 0)
                    .map(Some)
                    .ok_or_else(|| E::custom(format!("timestamp out of range: {v}")))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<Self::Value, E> {
                let secs = i64::try_from(v).map_err(|_| E::custom(format!("timestamp out of range: {v}")))?;
                self.visit_i64(secs)
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<Self::Value, E> {
                let micros = (v * MICROS_PER_SECOND as f64).round();
                if !micros.is_finite() || micros.abs() > i64::MAX as f64 {
                    return Err(E::custom(format!("timestamp out of range: {v}")));
                }
                DateTime::from_timestamp_micros(micros as i64)
                    .map(Some)
                    .ok_or_else(|| E::custom(format!("timestamp out of range: {v}")))
            }
        }

        deserializer.deserialize_any(TimestampVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headers_case_insensitive() {
        let mut headers = Headers::new();
        headers.insert("Content-Type", "application/json");
        headers.insert("X-Count", 3i64);

        assert_eq!(headers.get_str("content-type"), Some("application/json"));
        assert_eq!(headers.get_str("CONTENT-TYPE"), Some("application/json"));
        assert_eq!(headers.get("x-count").and_then(FieldValue::as_i64), Some(3));
        assert!(headers.get("missing").is_none());
    }

    #[test]
    fn test_headers_insert_replaces_any_case() {
        let mut headers = Headers::new();
        headers.insert("X-Id", "a");
        headers.insert("x-id", "b");

        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get_str("X-ID"), Some("b"));
    }

    #[test]
    fn test_body_helpers() {
        let event = Event {
            body: Bytes::from_static(br#"{"name":"worker"}"#),
            ..Default::default()
        };

        assert_eq!(event.body_text(), r#"{"name":"worker"}"#);
        let value: serde_json::Value = event.body_json().unwrap();
        assert_eq!(value["name"], "worker");
    }

    #[test]
    fn test_body_text_lossy() {
        let event = Event {
            body: Bytes::from_static(&[b'a', 0xFF, b'b']),
            ..Default::default()
        };
        assert_eq!(event.body_text(), "a\u{FFFD}b");
    }

    #[test]
    fn test_field_value_json_shape() {
        let value = serde_json::to_value(FieldValue::Int(7)).unwrap();
        assert_eq!(value, serde_json::json!(7));

        let value = serde_json::to_value(FieldValue::Nil).unwrap();
        assert!(value.is_null());

        let nested = FieldValue::Map(BTreeMap::from([(
            "ids".to_string(),
            FieldValue::Array(vec![FieldValue::UInt(u64::MAX), "x".into()]),
        )]));
        let value = serde_json::to_value(nested).unwrap();
        assert_eq!(value, serde_json::json!({"ids": [u64::MAX, "x"]}));
    }
}
