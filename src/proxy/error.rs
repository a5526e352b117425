//! Relay and tunnel error types.

use axum::response::{IntoResponse, Response};
use http::StatusCode;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failure of a single HTTP relay attempt.
///
/// Nothing is retried: the error is rendered as the reply to the caller.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// DNS or TCP/TLS connect failure towards the origin.
    #[error("target {target} is unreachable")]
    TargetUnreachable {
        target: String,
        #[source]
        source: BoxError,
    },

    /// The origin sent something that is not a valid HTTP response.
    #[error("upstream protocol error from {target}")]
    UpstreamProtocol {
        target: String,
        #[source]
        source: BoxError,
    },

    /// A structured request body could not be serialized to JSON.
    #[error("failed to encode request body as JSON")]
    BodyEncoding(#[from] serde_json::Error),

    /// Inflating a buffered response body failed.
    ///
    /// Status and headers were already taken from the origin at this point, so
    /// the whole reply is replaced by an error. This is the one partial-failure
    /// case of the relay.
    #[error("failed to decode {encoding} response body")]
    Decompression {
        encoding: String,
        #[source]
        source: std::io::Error,
    },

    /// The buffered response body grew beyond the configured limit.
    #[error("response body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },

    /// Reading the upstream body failed while buffering it.
    #[error("failed to read upstream response body")]
    ResponseBody(#[source] BoxError),

    /// The request target is not an absolute `http`/`https` URL.
    #[error("not an absolute http(s) URL: {0}")]
    NotAbsolute(String),

    /// The outbound request could not be assembled.
    #[error("invalid outbound request")]
    InvalidRequest(#[from] http::Error),
}

impl RelayError {
    /// Status code used when the error is rendered to the caller.
    pub fn status(&self) -> StatusCode {
        match self {
            RelayError::NotAbsolute(_) => StatusCode::BAD_REQUEST,
            RelayError::BodyEncoding(_) | RelayError::InvalidRequest(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            _ => StatusCode::BAD_GATEWAY,
        }
    }

    pub(crate) fn from_client(target: &str, err: hyper_util::client::legacy::Error) -> Self {
        if err.is_connect() {
            RelayError::TargetUnreachable {
                target: target.to_string(),
                source: Box::new(err),
            }
        } else {
            RelayError::UpstreamProtocol {
                target: target.to_string(),
                source: Box::new(err),
            }
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status();
        tracing::warn!(error = %self, status = status.as_u16(), "Relay failed");
        (status, self.to_string()).into_response()
    }
}

/// Failure while setting up or running a CONNECT tunnel.
///
/// These are only logged; the caller's socket is closed.
#[derive(Debug, thiserror::Error)]
pub enum TunnelError {
    /// The CONNECT target is not `host[:port]`.
    #[error("invalid tunnel target {0:?}")]
    InvalidTarget(String),

    /// Opening the TCP connection to the target failed.
    #[error("failed to connect to {target}")]
    Connect {
        target: String,
        #[source]
        source: std::io::Error,
    },

    /// Writing the handshake to either endpoint failed.
    #[error("tunnel io error")]
    Io(#[from] std::io::Error),
}
