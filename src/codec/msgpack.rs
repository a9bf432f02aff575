//! MsgPack codec using `rmp-serde`.
//!
//! Events travel as msgpack maps keyed by field name (`to_vec_named`).
//!
//! # Example
//!
//! ```
//! use funcwire::codec::EventDecoder;
//! use funcwire::Event;
//!
//! let event = Event { id: "e-1".into(), method: "POST".into(), ..Default::default() };
//! let frame = event.encode().unwrap();
//!
//! let mut decoder = EventDecoder::new(true);
//! assert_eq!(decoder.decode(&frame).unwrap(), event);
//! ```

use std::collections::BTreeMap;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

use crate::error::{Result, WorkerError};
use crate::event::{timestamp, Event, FieldValue, Headers, TriggerInfo};

/// MessagePack codec for structured data.
///
/// Uses `rmp_serde::to_vec_named` so structs are serialized as maps (with
/// field names) rather than arrays (positional).
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes.
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized.
    #[inline]
    pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Decode MsgPack bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes cannot be deserialized to type T.
    #[inline]
    pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

/// How a text field is read off the wire.
///
/// `String` rejects invalid UTF-8; `ByteBuf` accepts anything and converts
/// lossily.
pub(crate) trait TextField: DeserializeOwned + Ord {
    fn into_text(self) -> String;
}

impl TextField for String {
    #[inline]
    fn into_text(self) -> String {
        self
    }
}

impl TextField for ByteBuf {
    fn into_text(self) -> String {
        match String::from_utf8(self.into_vec()) {
            Ok(s) => s,
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
        }
    }
}

#[derive(Deserialize)]
#[serde(bound = "T: TextField")]
struct WireTrigger<T> {
    #[serde(default)]
    class: Option<T>,
    #[serde(default)]
    kind: Option<T>,
    #[serde(default)]
    name: Option<T>,
}

/// Inbound event map. Unknown keys are ignored, missing keys default.
#[derive(Deserialize)]
#[serde(bound = "T: TextField")]
struct WireEvent<T> {
    #[serde(default)]
    id: Option<T>,
    #[serde(default)]
    body: Option<ByteBuf>,
    #[serde(default, rename = "content-type", alias = "content_type")]
    content_type: Option<T>,
    #[serde(default)]
    headers: Option<BTreeMap<T, FieldValue>>,
    #[serde(default)]
    fields: Option<BTreeMap<T, FieldValue>>,
    #[serde(default)]
    path: Option<T>,
    #[serde(default)]
    url: Option<T>,
    #[serde(default)]
    method: Option<T>,
    #[serde(default)]
    trigger: Option<WireTrigger<T>>,
    #[serde(default, with = "timestamp")]
    timestamp: Option<DateTime<Utc>>,
    #[serde(default, rename = "type")]
    event_type: Option<T>,
    #[serde(default)]
    type_version: Option<T>,
    #[serde(default)]
    version: Option<T>,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    shard_id: Option<i64>,
    #[serde(default)]
    num_shards: Option<i64>,
    #[serde(default)]
    offset: Option<i64>,
}

fn text<T: TextField>(value: Option<T>) -> String {
    value.map(TextField::into_text).unwrap_or_default()
}

impl<T: TextField> WireEvent<T> {
    fn into_event(self) -> Event {
        let wire = self;
        let trigger = wire
            .trigger
            .map(|t| TriggerInfo {
                class: text(t.class),
                kind: text(t.kind),
                name: text(t.name),
            })
            .unwrap_or_default();

        Event {
            id: text(wire.id),
            body: wire.body.map(|b| Bytes::from(b.into_vec())).unwrap_or_default(),
            content_type: text(wire.content_type),
            headers: wire
                .headers
                .unwrap_or_default()
                .into_iter()
                .map(|(k, v)| (k.into_text(), v))
                .collect::<Headers>(),
            fields: wire
                .fields
                .unwrap_or_default()
                .into_iter()
                .map(|(k, v)| (k.into_text(), v))
                .collect(),
            path: text(wire.path),
            url: text(wire.url),
            method: text(wire.method),
            trigger,
            timestamp: wire.timestamp,
            event_type: text(wire.event_type),
            type_version: text(wire.type_version),
            version: text(wire.version),
            size: wire.size.unwrap_or_default(),
            shard_id: wire.shard_id.unwrap_or_default(),
            num_shards: wire.num_shards.unwrap_or_default(),
            offset: wire.offset.unwrap_or_default(),
        }
    }
}

/// Outbound view of an [`Event`], borrowing its fields.
#[derive(Serialize)]
pub(crate) struct WireEventRef<'a> {
    id: &'a str,
    #[serde(with = "serde_bytes")]
    body: &'a [u8],
    #[serde(rename = "content-type")]
    content_type: &'a str,
    headers: &'a Headers,
    fields: &'a BTreeMap<String, FieldValue>,
    path: &'a str,
    url: &'a str,
    method: &'a str,
    trigger: &'a TriggerInfo,
    #[serde(with = "timestamp")]
    timestamp: Option<DateTime<Utc>>,
    #[serde(rename = "type")]
    event_type: &'a str,
    type_version: &'a str,
    version: &'a str,
    size: u64,
    shard_id: i64,
    num_shards: i64,
    offset: i64,
}

impl<'a> From<&'a Event> for WireEventRef<'a> {
    fn from(event: &'a Event) -> Self {
        Self {
            id: &event.id,
            body: &event.body,
            content_type: &event.content_type,
            headers: &event.headers,
            fields: &event.fields,
            path: &event.path,
            url: &event.url,
            method: &event.method,
            trigger: &event.trigger,
            timestamp: event.timestamp,
            event_type: &event.event_type,
            type_version: &event.type_version,
            version: &event.version,
            size: event.size,
            shard_id: event.shard_id,
            num_shards: event.num_shards,
            offset: event.offset,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecoderState {
    Ready,
    Failed,
}

/// Decodes one event per complete frame body.
///
/// After a failed frame the decoder refuses further input until [`reset`]
/// is called, so a corrupt frame can never leak into the next one.
///
/// [`reset`]: EventDecoder::reset
#[derive(Debug)]
pub struct EventDecoder {
    /// Strict UTF-8 for text fields when set, lossy otherwise.
    decode_strings: bool,
    state: DecoderState,
    decoded: u64,
    failed: u64,
}

impl EventDecoder {
    /// Create a decoder. `decode_strings` selects strict UTF-8 text fields.
    pub fn new(decode_strings: bool) -> Self {
        Self {
            decode_strings,
            state: DecoderState::Ready,
            decoded: 0,
            failed: 0,
        }
    }

    /// Decode one frame body into an [`Event`].
    ///
    /// # Errors
    ///
    /// `MsgPackDecode` if the body is not a valid event map (including
    /// invalid UTF-8 in a strict text field); `Protocol` if the decoder was
    /// not reset after a previous failure.
    pub fn decode(&mut self, frame: &[u8]) -> Result<Event> {
        if self.state == DecoderState::Failed {
            return Err(WorkerError::Protocol(
                "event decoder must be reset after a failed frame".to_string(),
            ));
        }

        let decoded = if self.decode_strings {
            MsgPackCodec::decode::<WireEvent<String>>(frame).map(WireEvent::into_event)
        } else {
            MsgPackCodec::decode::<WireEvent<ByteBuf>>(frame).map(WireEvent::into_event)
        };

        match decoded {
            Ok(event) => {
                self.decoded += 1;
                Ok(event)
            }
            Err(e) => {
                self.failed += 1;
                self.state = DecoderState::Failed;
                Err(e)
            }
        }
    }

    /// Discard state left behind by a failed frame.
    pub fn reset(&mut self) {
        self.state = DecoderState::Ready;
    }

    /// Whether text fields are decoded strictly.
    pub fn decode_strings(&self) -> bool {
        self.decode_strings
    }

    /// Number of frames decoded successfully.
    pub fn decoded_count(&self) -> u64 {
        self.decoded
    }

    /// Number of frames that failed to decode.
    pub fn failed_count(&self) -> u64 {
        self.failed
    }
}
