//! Outbound request body selection.
//!
//! # Responsibilities
//! - Model the body value a preceding handler may attach to a request
//! - Resolve exactly one transmission plan per relay
//! - Apply the content-type defaults tied to each plan
//!
//! # Design Decisions
//! - The body variant is an explicit enum chosen by whoever attaches it
//! - JSON is encoded while planning, before any upstream I/O

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use axum::body::Body;
use bytes::Bytes;
use futures_util::TryStream;
use http::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use http::Request;
use serde::Serialize;

use crate::proxy::error::RelayError;

/// Default content type for string bodies.
pub const TEXT_CONTENT_TYPE: &str = "text/plain;charset=utf-8";

/// Default content type for JSON-encoded bodies.
pub const JSON_CONTENT_TYPE: &str = "application/json;charset=utf-8";

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A body value supplied by an earlier handler in place of the raw request stream.
///
/// Only honoured when the proxy is configured to trust request bodies.
pub enum RequestBody {
    /// Send no body at all and drop `content-type`.
    Empty,
    /// Send the string as-is.
    Text(String),
    /// Send the bytes as-is.
    Bytes(Bytes),
    /// Pipe the stream through unmodified.
    Stream(Body),
    /// Serialize to JSON when the request is forwarded.
    Json(JsonBody),
}

impl RequestBody {
    /// Wrap a serializable value; encoding is deferred until forwarding.
    pub fn json<T>(value: T) -> Self
    where
        T: Serialize + Send + 'static,
    {
        RequestBody::Json(JsonBody(Box::new(move || serde_json::to_vec(&value))))
    }

    /// Wrap a fallible byte stream.
    pub fn stream<S>(stream: S) -> Self
    where
        S: TryStream + Send + 'static,
        S::Ok: Into<Bytes>,
        S::Error: Into<BoxError>,
    {
        RequestBody::Stream(Body::from_stream(stream))
    }

    /// The transmission mode this value selects.
    pub fn mode(&self) -> BodyMode {
        match self {
            RequestBody::Empty => BodyMode::Empty,
            RequestBody::Text(_) => BodyMode::Text,
            RequestBody::Bytes(_) => BodyMode::Bytes,
            RequestBody::Stream(_) => BodyMode::Stream,
            RequestBody::Json(_) => BodyMode::Json,
        }
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestBody::Empty => f.write_str("Empty"),
            RequestBody::Text(text) => f.debug_tuple("Text").field(text).finish(),
            RequestBody::Bytes(bytes) => f.debug_tuple("Bytes").field(bytes).finish(),
            RequestBody::Stream(_) => f.write_str("Stream(..)"),
            RequestBody::Json(_) => f.write_str("Json(..)"),
        }
    }
}

impl From<String> for RequestBody {
    fn from(text: String) -> Self {
        RequestBody::Text(text)
    }
}

impl From<&str> for RequestBody {
    fn from(text: &str) -> Self {
        RequestBody::Text(text.to_owned())
    }
}

impl From<Bytes> for RequestBody {
    fn from(bytes: Bytes) -> Self {
        RequestBody::Bytes(bytes)
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(bytes: Vec<u8>) -> Self {
        RequestBody::Bytes(bytes.into())
    }
}

impl From<serde_json::Value> for RequestBody {
    fn from(value: serde_json::Value) -> Self {
        RequestBody::json(value)
    }
}

/// A value waiting to be JSON-encoded.
pub struct JsonBody(Box<dyn FnOnce() -> serde_json::Result<Vec<u8>> + Send>);

impl JsonBody {
    fn encode(self) -> serde_json::Result<Vec<u8>> {
        (self.0)()
    }
}

/// The six ways an outbound request body can be transmitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyMode {
    Empty,
    Text,
    Bytes,
    Stream,
    Json,
    /// The raw inbound stream, untouched.
    Passthrough,
}

impl BodyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BodyMode::Empty => "empty",
            BodyMode::Text => "text",
            BodyMode::Bytes => "bytes",
            BodyMode::Stream => "stream",
            BodyMode::Json => "json",
            BodyMode::Passthrough => "passthrough",
        }
    }
}

/// Request extension carrying a [`RequestBody`] from an earlier handler.
#[derive(Clone)]
struct BodySlot(Arc<Mutex<Option<RequestBody>>>);

/// Attach or detach a [`RequestBody`] on an `http::Request`.
pub trait RequestBodyExt {
    /// Replace the body the proxy will forward (when bodies are trusted).
    fn set_relay_body(&mut self, body: RequestBody);

    /// Remove the attached body, if any.
    fn take_relay_body(&mut self) -> Option<RequestBody>;
}

impl<B> RequestBodyExt for Request<B> {
    fn set_relay_body(&mut self, body: RequestBody) {
        self.extensions_mut()
            .insert(BodySlot(Arc::new(Mutex::new(Some(body)))));
    }

    fn take_relay_body(&mut self) -> Option<RequestBody> {
        let slot = self.extensions_mut().remove::<BodySlot>()?;
        let body = slot.0.lock().unwrap_or_else(PoisonError::into_inner).take();
        body
    }
}

/// The resolved body for one outbound request.
pub(crate) struct BodyPlan {
    pub(crate) mode: BodyMode,
    pub(crate) body: Body,
}

impl BodyPlan {
    /// Pick the transmission mode and fix up `headers` accordingly.
    ///
    /// `raw` is the untouched inbound stream and is only used when no trusted
    /// body value applies.
    pub(crate) fn resolve(
        trust_request_body: bool,
        value: Option<RequestBody>,
        raw: Body,
        headers: &mut HeaderMap,
    ) -> Result<Self, RelayError> {
        let value = match value {
            Some(value) if trust_request_body => value,
            _ => {
                return Ok(Self {
                    mode: BodyMode::Passthrough,
                    body: raw,
                })
            }
        };

        let mode = value.mode();
        let body = match value {
            RequestBody::Empty => {
                headers.remove(CONTENT_TYPE);
                Body::empty()
            }
            RequestBody::Text(text) => {
                default_content_type(headers, TEXT_CONTENT_TYPE);
                Body::from(text)
            }
            RequestBody::Bytes(bytes) => Body::from(bytes),
            RequestBody::Stream(stream) => stream,
            RequestBody::Json(json) => {
                let encoded = json.encode()?;
                default_content_type(headers, JSON_CONTENT_TYPE);
                Body::from(encoded)
            }
        };
        Ok(Self { mode, body })
    }
}

fn default_content_type(headers: &mut HeaderMap, value: &'static str) {
    if !headers.contains_key(CONTENT_TYPE) {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(value));
    }
}
