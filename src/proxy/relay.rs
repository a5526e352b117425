//! Reply construction from an origin response.
//!
//! # Responsibilities
//! - Copy status, reason phrase and sanitized headers
//! - Hand the body back as a live stream, or buffer and inflate it
//!
//! # Design Decisions
//! - A body can only be attached to a finished [`ResponseHead`]
//! - Buffered bodies are capped at `max_parsed_body_bytes`, before and after inflating

use std::fmt;
use std::io::Read;

use axum::body::Body;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};
use http::header::{HeaderMap, CONTENT_ENCODING, CONTENT_LENGTH};
use http::StatusCode;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::ext::ReasonPhrase;

use crate::proxy::error::RelayError;
use crate::proxy::headers::{sanitize, Direction};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Status line and headers of a relayed reply.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    status: StatusCode,
    reason: Option<ReasonPhrase>,
    headers: HeaderMap,
}

impl ResponseHead {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            reason: None,
            headers: HeaderMap::new(),
        }
    }

    /// Use a non-canonical reason phrase.
    pub fn with_reason(mut self, reason: ReasonPhrase) -> Self {
        self.reason = Some(reason);
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// The reason phrase the origin sent, or the canonical one.
    pub fn reason(&self) -> &str {
        self.reason
            .as_ref()
            .and_then(|reason| std::str::from_utf8(reason.as_bytes()).ok())
            .or(self.status.canonical_reason())
            .unwrap_or("")
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Finish with a body that is streamed to the caller.
    pub fn stream(self, body: Body) -> RelayedResponse {
        RelayedResponse {
            head: self,
            body: RelayBody::Stream(body),
        }
    }

    /// Finish with a fully buffered body.
    pub fn buffered(self, bytes: Bytes) -> RelayedResponse {
        RelayedResponse {
            head: self,
            body: RelayBody::Parsed(bytes),
        }
    }
}

/// Body of a relayed reply.
pub enum RelayBody {
    /// The origin's body, not yet read.
    Stream(Body),
    /// The origin's body, read and decoded.
    Parsed(Bytes),
}

impl fmt::Debug for RelayBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayBody::Stream(_) => f.write_str("Stream(..)"),
            RelayBody::Parsed(bytes) => f.debug_tuple("Parsed").field(&bytes.len()).finish(),
        }
    }
}

/// Response extension exposing a buffered body to outer middleware.
///
/// Outer layers may read it instead of draining the response body, and may
/// replace the response body entirely.
#[derive(Debug, Clone)]
pub struct ParsedBody(pub Bytes);

/// A reply ready to be written back to the caller.
#[derive(Debug)]
pub struct RelayedResponse {
    head: ResponseHead,
    body: RelayBody,
}

impl RelayedResponse {
    pub fn head(&self) -> &ResponseHead {
        &self.head
    }

    pub fn body(&self) -> &RelayBody {
        &self.body
    }

    pub fn into_parts(self) -> (ResponseHead, RelayBody) {
        (self.head, self.body)
    }
}

impl IntoResponse for RelayedResponse {
    fn into_response(self) -> Response {
        let ResponseHead {
            status,
            reason,
            headers,
        } = self.head;

        let (body, parsed) = match self.body {
            RelayBody::Stream(body) => (body, None),
            RelayBody::Parsed(bytes) => (Body::from(bytes.clone()), Some(ParsedBody(bytes))),
        };

        let mut response = Response::new(body);
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        if let Some(reason) = reason {
            response.extensions_mut().insert(reason);
        }
        if let Some(parsed) = parsed {
            response.extensions_mut().insert(parsed);
        }
        response
    }
}

/// Turns origin responses into [`RelayedResponse`]s.
#[derive(Debug, Clone)]
pub struct ResponseRelay {
    parse_response_body: bool,
    max_body_bytes: usize,
}

impl ResponseRelay {
    pub fn new(parse_response_body: bool, max_body_bytes: usize) -> Self {
        Self {
            parse_response_body,
            max_body_bytes,
        }
    }

    pub async fn relay<B>(&self, response: http::Response<B>) -> Result<RelayedResponse, RelayError>
    where
        B: hyper::body::Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let (mut parts, body) = response.into_parts();

        let mut head = ResponseHead::new(parts.status)
            .with_headers(sanitize(&parts.headers, Direction::Response));
        if let Some(reason) = parts.extensions.remove::<ReasonPhrase>() {
            head = head.with_reason(reason);
        }

        if !self.parse_response_body {
            return Ok(head.stream(Body::new(body)));
        }

        let collected = Limited::new(body, self.max_body_bytes)
            .collect()
            .await
            .map_err(|err| {
                if err.downcast_ref::<LengthLimitError>().is_some() {
                    RelayError::BodyTooLarge {
                        limit: self.max_body_bytes,
                    }
                } else {
                    RelayError::ResponseBody(err)
                }
            })?
            .to_bytes();

        // Bodiless replies (HEAD, 204, 304) keep the headers describing the
        // representation they stand for.
        if collected.is_empty() {
            return Ok(head.buffered(collected));
        }

        let decoded = decode_body(head.headers_mut(), collected, self.max_body_bytes)?;
        head.headers_mut().remove(CONTENT_LENGTH);
        Ok(head.buffered(decoded))
    }
}

/// Inflate `bytes` according to `content-encoding`, removing the header when done.
///
/// Codings other than gzip and deflate are left as they are, header included.
fn decode_body(headers: &mut HeaderMap, bytes: Bytes, limit: usize) -> Result<Bytes, RelayError> {
    let Some(encoding) = headers
        .get(CONTENT_ENCODING)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_ascii_lowercase())
    else {
        return Ok(bytes);
    };

    let decoded = match encoding.as_str() {
        "" | "identity" => bytes,
        "gzip" | "x-gzip" => inflate(GzDecoder::new(&bytes[..]), &encoding, limit)?,
        // Servers disagree on whether deflate means zlib-wrapped or raw.
        "deflate" => match inflate(ZlibDecoder::new(&bytes[..]), &encoding, limit) {
            Err(RelayError::Decompression { .. }) => {
                inflate(DeflateDecoder::new(&bytes[..]), &encoding, limit)?
            }
            zlib => zlib?,
        },
        other => {
            tracing::warn!(encoding = other, "Unsupported content-encoding, body left encoded");
            return Ok(bytes);
        }
    };

    headers.remove(CONTENT_ENCODING);
    Ok(decoded)
}

fn inflate(reader: impl Read, encoding: &str, limit: usize) -> Result<Bytes, RelayError> {
    let mut out = Vec::new();
    reader
        .take(limit as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|source| RelayError::Decompression {
            encoding: encoding.to_string(),
            source,
        })?;
    if out.len() > limit {
        return Err(RelayError::BodyTooLarge { limit });
    }
    Ok(out.into())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use flate2::write::{DeflateEncoder, GzEncoder, ZlibEncoder};
    use flate2::Compression;
    use http::HeaderValue;
    use http_body_util::Full;

    use super::*;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn origin_response(body: Vec<u8>, encoding: Option<&'static str>) -> http::Response<Full<Bytes>> {
        let mut builder = http::Response::builder()
            .status(StatusCode::OK)
            .header("content-length", body.len())
            .header("connection", "keep-alive")
            .header("x-origin", "yes");
        if let Some(encoding) = encoding {
            builder = builder.header(CONTENT_ENCODING, encoding);
        }
        builder.body(Full::new(Bytes::from(body))).unwrap()
    }

    #[tokio::test]
    async fn passthrough_leaves_body_unread() {
        let relay = ResponseRelay::new(false, 1024);
        let relayed = relay
            .relay(origin_response(gzip(b"hello"), Some("gzip")))
            .await
            .unwrap();

        assert!(matches!(relayed.body(), RelayBody::Stream(_)));
        let headers = relayed.head().headers();
        assert_eq!(headers[CONTENT_ENCODING], "gzip");
        assert!(headers.get("connection").is_none());
        assert_eq!(headers["x-origin"], "yes");
    }

    #[tokio::test]
    async fn parsed_mode_inflates_gzip() {
        let relay = ResponseRelay::new(true, 1024);
        let relayed = relay
            .relay(origin_response(gzip(br#"{"gzipped":true}"#), Some("gzip")))
            .await
            .unwrap();

        let headers = relayed.head().headers();
        assert!(headers.get(CONTENT_ENCODING).is_none());
        assert!(headers.get(CONTENT_LENGTH).is_none());
        match relayed.body() {
            RelayBody::Parsed(bytes) => assert_eq!(&bytes[..], br#"{"gzipped":true}"#),
            other => panic!("expected parsed body, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn parsed_mode_without_encoding_buffers_as_is() {
        let relay = ResponseRelay::new(true, 1024);
        let relayed = relay
            .relay(origin_response(b"plain".to_vec(), None))
            .await
            .unwrap();
        assert!(matches!(relayed.body(), RelayBody::Parsed(bytes) if &bytes[..] == b"plain"));
    }

    #[tokio::test]
    async fn corrupt_gzip_is_a_decompression_error() {
        let relay = ResponseRelay::new(true, 1024);
        let err = relay
            .relay(origin_response(b"definitely not gzip".to_vec(), Some("gzip")))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Decompression { .. }), "{err:?}");
    }

    fn bodiless_response(status: StatusCode) -> http::Response<Full<Bytes>> {
        http::Response::builder()
            .status(status)
            .header(CONTENT_ENCODING, "gzip")
            .header(CONTENT_LENGTH, "120")
            .body(Full::new(Bytes::new()))
            .unwrap()
    }

    #[tokio::test]
    async fn empty_encoded_body_keeps_status() {
        let relay = ResponseRelay::new(true, 1024);
        for status in [StatusCode::NOT_MODIFIED, StatusCode::NO_CONTENT, StatusCode::OK] {
            let relayed = relay.relay(bodiless_response(status)).await.unwrap();
            assert_eq!(relayed.head().status(), status);
            assert_eq!(relayed.head().headers()[CONTENT_ENCODING], "gzip");
            assert_eq!(relayed.head().headers()[CONTENT_LENGTH], "120");
            assert!(matches!(relayed.body(), RelayBody::Parsed(bytes) if bytes.is_empty()));
        }
    }

    #[tokio::test]
    async fn deflate_accepts_zlib_and_raw_streams() {
        let relay = ResponseRelay::new(true, 1024);

        let mut zlib = ZlibEncoder::new(Vec::new(), Compression::default());
        zlib.write_all(b"wrapped").unwrap();
        let relayed = relay
            .relay(origin_response(zlib.finish().unwrap(), Some("deflate")))
            .await
            .unwrap();
        assert!(matches!(relayed.body(), RelayBody::Parsed(bytes) if &bytes[..] == b"wrapped"));

        let mut raw = DeflateEncoder::new(Vec::new(), Compression::default());
        raw.write_all(b"raw").unwrap();
        let relayed = relay
            .relay(origin_response(raw.finish().unwrap(), Some("deflate")))
            .await
            .unwrap();
        assert!(matches!(relayed.body(), RelayBody::Parsed(bytes) if &bytes[..] == b"raw"));
    }

    #[tokio::test]
    async fn oversized_inflated_zlib_is_too_large() {
        let mut zlib = ZlibEncoder::new(Vec::new(), Compression::best());
        zlib.write_all(&[b'a'; 4096]).unwrap();
        let encoded = zlib.finish().unwrap();
        assert!(encoded.len() < 64);

        let err = ResponseRelay::new(true, 64)
            .relay(origin_response(encoded, Some("deflate")))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::BodyTooLarge { limit: 64 }), "{err:?}");
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let relay = ResponseRelay::new(true, 4);
        let err = relay
            .relay(origin_response(b"too long".to_vec(), None))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::BodyTooLarge { limit: 4 }));
    }

    #[tokio::test]
    async fn unsupported_encoding_is_left_alone() {
        let relay = ResponseRelay::new(true, 1024);
        let relayed = relay
            .relay(origin_response(b"brotli bytes".to_vec(), Some("br")))
            .await
            .unwrap();
        assert_eq!(relayed.head().headers()[CONTENT_ENCODING], "br");
    }

    #[test]
    fn reason_falls_back_to_canonical() {
        let head = ResponseHead::new(StatusCode::IM_A_TEAPOT);
        assert_eq!(head.reason(), "I'm a teapot");

        let head = head.with_reason(ReasonPhrase::from_static(b"Short And Stout"));
        assert_eq!(head.reason(), "Short And Stout");
    }

    #[test]
    fn into_response_carries_reason_and_parsed_body() {
        let mut headers = HeaderMap::new();
        headers.insert("x-foo", HeaderValue::from_static("bar"));
        let response = ResponseHead::new(StatusCode::IM_A_TEAPOT)
            .with_reason(ReasonPhrase::from_static(b"Short And Stout"))
            .with_headers(headers)
            .buffered(Bytes::from_static(b"tea"))
            .into_response();

        assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
        assert_eq!(response.headers()["x-foo"], "bar");
        assert_eq!(
            response.extensions().get::<ReasonPhrase>().unwrap().as_bytes(),
            b"Short And Stout"
        );
        assert_eq!(&response.extensions().get::<ParsedBody>().unwrap().0[..], b"tea");
    }
}
