//! Raw request-head parsing.
//!
//! The accept loop peeks at the first request on a connection to decide
//! between the HTTP service and the CONNECT splicer, before hyper sees any
//! bytes.

use http::{HeaderMap, HeaderName, HeaderValue, Method, Version};
use thiserror::Error;
use tokio::io::AsyncRead;

use crate::net::PeekStream;
use crate::proxy::ConnectRequest;

/// Upper bound on header lines in a peeked head; hyper's default.
const MAX_HEADERS: usize = 100;

#[derive(Debug, Error)]
pub enum HeadError {
    #[error("malformed request head: {0}")]
    Malformed(#[from] httparse::Error),
    #[error("invalid method {0:?}")]
    Method(String),
    #[error("unsupported HTTP version 1.{0}")]
    Version(u8),
    #[error("read failed")]
    Io(#[from] std::io::Error),
}

/// Request line and headers of one HTTP/1.x request.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: Method,
    /// Request target as sent: origin, absolute or authority form.
    pub target: String,
    pub version: Version,
    pub headers: HeaderMap,
}

impl RequestHead {
    /// Parse a head from the start of `buf`.
    ///
    /// Returns `None` while the header section is incomplete, otherwise the
    /// head and its length in bytes.
    pub fn parse(buf: &[u8]) -> Result<Option<(usize, Self)>, HeadError> {
        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut request = httparse::Request::new(&mut headers);
        let len = match request.parse(buf)? {
            httparse::Status::Partial => return Ok(None),
            httparse::Status::Complete(len) => len,
        };

        // Complete parses always carry method, path and version.
        let method_str = request.method.unwrap_or_default();
        let method = Method::from_bytes(method_str.as_bytes())
            .map_err(|_| HeadError::Method(method_str.to_string()))?;
        let version = match request.version.unwrap_or(1) {
            0 => Version::HTTP_10,
            1 => Version::HTTP_11,
            other => return Err(HeadError::Version(other)),
        };
        let headers = request
            .headers
            .iter()
            .filter_map(|h| {
                let name = HeaderName::from_bytes(h.name.as_bytes()).ok()?;
                let value = HeaderValue::from_bytes(h.value).ok()?;
                Some((name, value))
            })
            .collect();

        Ok(Some((
            len,
            Self {
                method,
                target: request.path.unwrap_or_default().to_string(),
                version,
                headers,
            },
        )))
    }

    /// Read ahead on `stream` until a full head is buffered.
    ///
    /// Nothing is consumed. Returns `None` if the stream ends or the buffer
    /// fills before the header section is complete.
    pub async fn peek<S>(stream: &mut PeekStream<S>) -> Result<Option<(usize, Self)>, HeadError>
    where
        S: AsyncRead + Unpin,
    {
        loop {
            if let Some(parsed) = Self::parse(stream.buffered())? {
                return Ok(Some(parsed));
            }
            if stream.is_full() || stream.fill().await? == 0 {
                return Ok(None);
            }
        }
    }

    pub fn is_connect(&self) -> bool {
        self.method == Method::CONNECT
    }

    /// The splicer's view of a CONNECT head.
    pub fn into_connect_request(self) -> Option<ConnectRequest> {
        self.is_connect()
            .then(|| ConnectRequest::new(self.target, self.version))
    }
}
