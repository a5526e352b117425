//! Forward-proxy relay core.
//!
//! # Data Flow
//! ```text
//! absolute-URL request
//!     → middleware.rs (trigger check, otherwise next handler)
//!     → forward.rs (headers.rs sanitize, body.rs plan, send by scheme)
//!     → relay.rs (status/headers, stream or buffered body)
//!     → reply to caller
//!
//! CONNECT on a raw connection
//!     → tunnel.rs (connect, 200 Connection Established, splice, teardown)
//! ```
//!
//! # Design Decisions
//! - No state is shared between relays besides the connection pools
//! - Exactly one attempt per request; retry policy belongs to callers

pub mod body;
pub mod error;
pub mod forward;
pub mod headers;
pub mod middleware;
pub mod relay;
pub mod tunnel;

use std::time::{Duration, Instant};

use axum::body::Body;
use http::Request;

use crate::config::schema::RelayConfig;
use crate::observability::metrics;

pub use body::{BodyMode, RequestBody, RequestBodyExt};
pub use error::{RelayError, TunnelError};
pub use forward::{relay_scheme, InboundRequest, RequestForwarder, TargetScheme};
pub use headers::{sanitize, Direction};
pub use middleware::relay_requests;
pub use relay::{ParsedBody, RelayBody, RelayedResponse, ResponseHead, ResponseRelay};
pub use tunnel::{ConnectRequest, TunnelOptions, TunnelSplicer};

/// Options for the HTTP relay path.
#[derive(Debug, Clone)]
pub struct RelayOptions {
    /// Honour body values attached with [`RequestBodyExt::set_relay_body`].
    pub trust_request_body: bool,
    /// Buffer and inflate response bodies instead of streaming them.
    pub parse_response_body: bool,
    /// Upper bound for buffered response bodies.
    pub max_parsed_body_bytes: usize,
    pub connect_timeout: Option<Duration>,
}

impl Default for RelayOptions {
    fn default() -> Self {
        RelayOptions::from(&RelayConfig::default())
    }
}

impl From<&RelayConfig> for RelayOptions {
    fn from(config: &RelayConfig) -> Self {
        Self {
            trust_request_body: config.trust_request_body,
            parse_response_body: config.parse_response_body,
            max_parsed_body_bytes: config.max_parsed_body_bytes,
            connect_timeout: config.connect_timeout_secs.map(Duration::from_secs),
        }
    }
}

/// Relays absolute-URL requests to their origin.
#[derive(Clone)]
pub struct ForwardProxy {
    forwarder: RequestForwarder,
    relay: ResponseRelay,
}

impl ForwardProxy {
    pub fn new(options: RelayOptions) -> Self {
        Self {
            forwarder: RequestForwarder::new(options.trust_request_body, options.connect_timeout),
            relay: ResponseRelay::new(options.parse_response_body, options.max_parsed_body_bytes),
        }
    }

    /// Forward `request` and build the reply for the caller.
    pub async fn relay(&self, request: Request<Body>) -> Result<RelayedResponse, RelayError> {
        let start = Instant::now();
        let inbound = InboundRequest::from_request(request);
        let method = inbound.method.clone();
        let url = inbound.uri.to_string();

        let result = match self.forwarder.forward(inbound).await {
            Ok(response) => self.relay.relay(response).await,
            Err(err) => Err(err),
        };

        match &result {
            Ok(relayed) => {
                let head = relayed.head();
                tracing::debug!(
                    method = %method,
                    url = %url,
                    status = head.status().as_u16(),
                    reason = head.reason(),
                    "Relayed response"
                );
                metrics::record_request(method.as_str(), head.status().as_u16(), start);
            }
            Err(err) => {
                metrics::record_request(method.as_str(), err.status().as_u16(), start);
            }
        }
        result
    }
}
