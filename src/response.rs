//! Handler output and its encoding into a response line.
//!
//! Handlers return anything convertible into [`Output`]. The dispatch loop
//! turns it into a [`Response`] and then into the JSON document carried by
//! an `r` line:
//!
//! ```text
//! {"body": "...", "body_encoding": "text"|"base64", "content_type": "...",
//!  "headers": {...}, "status_code": 200}
//! ```
//!
//! # Example
//!
//! ```
//! use funcwire::response::Output;
//! use serde_json::json;
//!
//! let response = Output::from((201u16, json!({"a": 1}))).into_response().unwrap();
//! let encoded = response.encode().unwrap();
//!
//! assert_eq!(encoded.status_code, 201);
//! assert_eq!(encoded.body, r#"{"a": 1}"#);
//! assert_eq!(encoded.content_type, "application/json");
//! ```

use std::collections::BTreeMap;
use std::io;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::ser::{Formatter, Serializer};
use serde_json::Value;
use thiserror::Error;

/// Content type for text and binary bodies.
pub const TEXT_PLAIN: &str = "text/plain";

/// Content type for JSON object and array bodies.
pub const APPLICATION_JSON: &str = "application/json";

/// Header telling a stream trigger not to commit the offset on its own.
pub const NO_ACK_HEADER: &str = "x-nuclio-stream-no-ack";

/// Errors while turning handler output into a response line.
#[derive(Debug, Error)]
pub enum ResponseError {
    /// Status code outside `100..=599`.
    #[error("Invalid status code: {0}")]
    InvalidStatus(u16),

    /// Body or headers failed to serialize.
    #[error("Failed to serialize response: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A response body.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    /// Sent as-is.
    Text(String),
    /// Sent base64-encoded.
    Binary(Bytes),
    /// Sent as JSON text, see [`to_json_body`].
    Json(Value),
}

impl Body {
    /// Content type implied by the body kind.
    fn default_content_type(&self) -> &'static str {
        match self {
            Body::Json(_) => APPLICATION_JSON,
            Body::Text(_) | Body::Binary(_) => TEXT_PLAIN,
        }
    }

    /// JSON objects and arrays stay JSON; scalars become text.
    fn from_json(value: Value) -> Body {
        match value {
            Value::Object(_) | Value::Array(_) => Body::Json(value),
            Value::Null => Body::Text(String::new()),
            Value::String(s) => Body::Text(s),
            other => Body::Text(other.to_string()),
        }
    }
}

impl Default for Body {
    fn default() -> Self {
        Body::Text(String::new())
    }
}

impl From<&str> for Body {
    fn from(value: &str) -> Self {
        Body::Text(value.to_string())
    }
}

impl From<String> for Body {
    fn from(value: String) -> Self {
        Body::Text(value)
    }
}

impl From<Vec<u8>> for Body {
    fn from(value: Vec<u8>) -> Self {
        Body::Binary(Bytes::from(value))
    }
}

impl From<Bytes> for Body {
    fn from(value: Bytes) -> Self {
        Body::Binary(value)
    }
}

impl From<Value> for Body {
    fn from(value: Value) -> Self {
        Body::from_json(value)
    }
}

/// A fully specified response.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Response body.
    pub body: Body,
    /// Content type sent to the host.
    pub content_type: String,
    /// Response headers.
    pub headers: BTreeMap<String, Value>,
    /// HTTP-style status code.
    pub status_code: u16,
}

impl Default for Response {
    fn default() -> Self {
        Self {
            body: Body::default(),
            content_type: TEXT_PLAIN.to_string(),
            headers: BTreeMap::new(),
            status_code: 200,
        }
    }
}

impl Response {
    /// 200 response whose content type follows the body kind.
    pub fn new(body: impl Into<Body>) -> Self {
        let body = body.into();
        Self {
            content_type: body.default_content_type().to_string(),
            body,
            ..Default::default()
        }
    }

    /// 500 text response, as sent when a handler fails.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            body: Body::Text(message.into()),
            status_code: 500,
            ..Default::default()
        }
    }

    /// Set the status code.
    pub fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = status_code;
        self
    }

    /// Set the content type.
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    /// Add a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Mark the response so stream triggers leave the offset uncommitted.
    ///
    /// Used together with [`Platform::explicit_ack`](crate::handler::Platform::explicit_ack).
    pub fn ensure_no_ack(&mut self) {
        self.headers.insert(NO_ACK_HEADER.to_string(), Value::Bool(true));
    }

    /// Encode into the document carried by an `r` line.
    ///
    /// # Errors
    ///
    /// `InvalidStatus` if the status code is outside `100..=599`.
    pub fn encode(&self) -> Result<EncodedResponse, ResponseError> {
        validate_status(self.status_code)?;

        let (body, body_encoding) = match &self.body {
            Body::Text(text) => (text.clone(), BodyEncoding::Text),
            Body::Binary(bytes) => (STANDARD.encode(bytes), BodyEncoding::Base64),
            Body::Json(value) => (to_json_body(value)?, BodyEncoding::Text),
        };

        Ok(EncodedResponse {
            body,
            body_encoding,
            content_type: self.content_type.clone(),
            headers: self.headers.clone(),
            status_code: self.status_code,
        })
    }
}

/// Encode a JSON body the way the host's SDKs print it: `", "` between
/// items, `": "` after keys and non-ASCII text escaped as `\uXXXX`.
///
/// ```
/// use funcwire::response::to_json_body;
/// use serde_json::json;
///
/// let body = to_json_body(&json!({"a": [1, 2], "b": "é"})).unwrap();
/// assert_eq!(body, r#"{"a": [1, 2], "b": "\u00e9"}"#);
/// ```
///
/// # Errors
///
/// Any serialization error from `serde_json`.
pub fn to_json_body(value: &Value) -> Result<String, ResponseError> {
    let mut buf = Vec::with_capacity(128);
    let mut serializer = Serializer::with_formatter(&mut buf, SpacedFormatter);
    value.serialize(&mut serializer)?;
    // Every byte written is ASCII
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

struct SpacedFormatter;

impl Formatter for SpacedFormatter {
    fn begin_array_value<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        writer.write_all(b": ")
    }

    fn write_string_fragment<W: ?Sized + io::Write>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()> {
        let mut start = 0;
        for (i, ch) in fragment.char_indices() {
            if ch.is_ascii() && ch != '\x7f' {
                continue;
            }
            writer.write_all(&fragment.as_bytes()[start..i])?;
            let mut units = [0u16; 2];
            for unit in ch.encode_utf16(&mut units) {
                write!(writer, "\\u{unit:04x}")?;
            }
            start = i + ch.len_utf8();
        }
        writer.write_all(&fragment.as_bytes()[start..])
    }
}

fn validate_status(status_code: u16) -> Result<(), ResponseError> {
    if (100..=599).contains(&status_code) {
        Ok(())
    } else {
        Err(ResponseError::InvalidStatus(status_code))
    }
}

/// How the `body` string of an encoded response must be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyEncoding {
    /// Body is the text itself.
    Text,
    /// Body is base64 of the raw bytes.
    Base64,
}

/// Wire form of a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodedResponse {
    /// Text or base64 body.
    pub body: String,
    /// `text` or `base64`.
    pub body_encoding: BodyEncoding,
    /// Content type.
    pub content_type: String,
    /// Headers.
    pub headers: BTreeMap<String, Value>,
    /// Status code.
    pub status_code: u16,
}

/// Anything a handler may return.
#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    /// Text body, 200.
    Text(String),
    /// Binary body, 200.
    Binary(Bytes),
    /// JSON value: objects and arrays as JSON, scalars as text.
    Json(Value),
    /// Explicit status with a body.
    Status(u16, Body),
    /// Full response, passed through.
    Response(Response),
}

impl Output {
    /// Serialize `value` into a JSON output.
    pub fn json<T: Serialize>(value: &T) -> Result<Output, ResponseError> {
        Ok(Output::Json(serde_json::to_value(value)?))
    }

    /// Resolve into a [`Response`].
    ///
    /// # Errors
    ///
    /// `InvalidStatus` for a status code outside `100..=599`.
    pub fn into_response(self) -> Result<Response, ResponseError> {
        let response = match self {
            Output::Text(text) => Response::new(Body::Text(text)),
            Output::Binary(bytes) => Response::new(Body::Binary(bytes)),
            Output::Json(value) => Response::new(Body::from_json(value)),
            Output::Status(status_code, body) => Response::new(body).with_status(status_code),
            Output::Response(response) => response,
        };

        validate_status(response.status_code)?;
        Ok(response)
    }
}

impl From<()> for Output {
    fn from(_: ()) -> Self {
        Output::Text(String::new())
    }
}

impl From<&str> for Output {
    fn from(value: &str) -> Self {
        Output::Text(value.to_string())
    }
}

impl From<String> for Output {
    fn from(value: String) -> Self {
        Output::Text(value)
    }
}

impl From<Vec<u8>> for Output {
    fn from(value: Vec<u8>) -> Self {
        Output::Binary(Bytes::from(value))
    }
}

impl From<Bytes> for Output {
    fn from(value: Bytes) -> Self {
        Output::Binary(value)
    }
}

impl From<Value> for Output {
    fn from(value: Value) -> Self {
        Output::Json(value)
    }
}

impl From<Response> for Output {
    fn from(value: Response) -> Self {
        Output::Response(value)
    }
}

impl<T: Into<Body>> From<(u16, T)> for Output {
    fn from((status_code, body): (u16, T)) -> Self {
        Output::Status(status_code, body.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn encode(output: impl Into<Output>) -> EncodedResponse {
        output.into().into_response().unwrap().encode().unwrap()
    }

    #[test]
    fn test_text_output() {
        let encoded = encode("ok");
        assert_eq!(encoded.body, "ok");
        assert_eq!(encoded.body_encoding, BodyEncoding::Text);
        assert_eq!(encoded.content_type, TEXT_PLAIN);
        assert_eq!(encoded.status_code, 200);
    }

    #[test]
    fn test_binary_output_is_base64() {
        let encoded = encode(vec![0u8, 1, 2, 255]);
        assert_eq!(encoded.body, "AAEC/w==");
        assert_eq!(encoded.body_encoding, BodyEncoding::Base64);
        assert_eq!(encoded.content_type, TEXT_PLAIN);
    }

    #[test]
    fn test_status_with_json_body() {
        let encoded = encode((201u16, json!({"a": 1})));
        assert_eq!(encoded.status_code, 201);
        assert_eq!(encoded.body, r#"{"a": 1}"#);
        assert_eq!(encoded.content_type, APPLICATION_JSON);
    }

    #[test]
    fn test_status_with_text_body() {
        let encoded = encode((404u16, "missing"));
        assert_eq!(encoded.status_code, 404);
        assert_eq!(encoded.body, "missing");
        assert_eq!(encoded.content_type, TEXT_PLAIN);
    }

    #[test]
    fn test_json_array_and_scalars() {
        let encoded = encode(json!([1, 2]));
        assert_eq!(encoded.body, "[1, 2]");
        assert_eq!(encoded.content_type, APPLICATION_JSON);

        let encoded = encode(json!(42));
        assert_eq!(encoded.body, "42");
        assert_eq!(encoded.content_type, TEXT_PLAIN);

        let encoded = encode(json!("plain"));
        assert_eq!(encoded.body, "plain");
    }

    #[test]
    fn test_response_passthrough() {
        let response = Response::new(json!({"k": "v"}))
            .with_status(202)
            .with_content_type("application/vnd.custom+json")
            .with_header("x-request-id", "r-1");

        let encoded = encode(response);
        assert_eq!(encoded.status_code, 202);
        assert_eq!(encoded.content_type, "application/vnd.custom+json");
        assert_eq!(encoded.body, r#"{"k": "v"}"#);
        assert_eq!(encoded.headers["x-request-id"], json!("r-1"));
    }

    #[test]
    fn test_json_body_layout() {
        let body = to_json_body(&json!({"list": [1, {"k": null}], "empty": {}, "t": true})).unwrap();
        assert_eq!(body, r#"{"empty": {}, "list": [1, {"k": null}], "t": true}"#);

        let body = to_json_body(&json!(["caf\u{e9}", "\u{1f600}", "del\u{7f}", "q\"\n"])).unwrap();
        assert_eq!(body, r#"["caf\u00e9", "\ud83d\ude00", "del\u007f", "q\"\n"]"#);
    }

    #[test]
    fn test_invalid_status_is_error() {
        let err = Output::from((99u16, "nope")).into_response().unwrap_err();
        assert!(matches!(err, ResponseError::InvalidStatus(99)));

        let response = Response::new("x").with_status(600);
        assert!(response.encode().is_err());
    }

    #[test]
    fn test_ensure_no_ack() {
        let mut response = Response::new("done");
        response.ensure_no_ack();

        let encoded = response.encode().unwrap();
        assert_eq!(encoded.headers[NO_ACK_HEADER], json!(true));
    }

    #[test]
    fn test_error_response() {
        let encoded = Response::error("boom").encode().unwrap();
        assert_eq!(encoded.status_code, 500);
        assert_eq!(encoded.content_type, TEXT_PLAIN);
        assert_eq!(encoded.body, "boom");
    }

    #[test]
    fn test_encoded_json_shape() {
        let encoded = encode("hi");
        let value = serde_json::to_value(&encoded).unwrap();
        assert_eq!(
            value,
            json!({
                "body": "hi",
                "body_encoding": "text",
                "content_type": "text/plain",
                "headers": {},
                "status_code": 200
            })
        );
    }
}
