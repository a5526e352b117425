//! Outbound request construction and dispatch.
//!
//! # Responsibilities
//! - Decide whether a request target is relayable at all
//! - Sanitize headers and resolve the body plan
//! - Send through the plain or TLS client picked by the URL scheme
//!
//! # Design Decisions
//! - Redirects are never followed; the origin's reply is returned verbatim
//! - Connector errors map to `TargetUnreachable`, everything else to `UpstreamProtocol`

use std::time::Duration;

use axum::body::Body;
use http::{HeaderMap, Method, Request, Response, Uri};
use hyper::body::Incoming;
use hyper_tls::HttpsConnector;
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;

use crate::proxy::body::{BodyPlan, RequestBody, RequestBodyExt};
use crate::proxy::error::RelayError;
use crate::proxy::headers::{sanitize, Direction};

/// Scheme of a relayable absolute URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetScheme {
    Http,
    Https,
}

/// Returns the scheme if `uri` is an absolute `http`/`https` URL.
///
/// Anything else (origin-form paths, authority-form CONNECT targets, other
/// schemes) is not ours to relay.
pub fn relay_scheme(uri: &Uri) -> Option<TargetScheme> {
    let scheme = uri.scheme_str()?;
    uri.authority()?;
    if scheme.eq_ignore_ascii_case("http") {
        Some(TargetScheme::Http)
    } else if scheme.eq_ignore_ascii_case("https") {
        Some(TargetScheme::Https)
    } else {
        None
    }
}

/// An inbound request as seen by the relay.
pub struct InboundRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    /// Body value attached by an earlier handler, if any.
    pub body: Option<RequestBody>,
    /// The unparsed inbound body stream.
    pub raw: Body,
}

impl InboundRequest {
    /// Split an axum request, lifting out any attached [`RequestBody`].
    pub fn from_request(mut request: Request<Body>) -> Self {
        let body = request.take_relay_body();
        let (parts, raw) = request.into_parts();
        Self {
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            body,
            raw,
        }
    }
}

/// Sends relayed requests to their origin.
#[derive(Clone)]
pub struct RequestForwarder {
    http: Client<HttpConnector, Body>,
    https: Client<HttpsConnector<HttpConnector>, Body>,
    trust_request_body: bool,
}

impl RequestForwarder {
    pub fn new(trust_request_body: bool, connect_timeout: Option<Duration>) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(connect_timeout);

        let mut tls_connector = connector.clone();
        tls_connector.enforce_http(false);

        Self {
            http: Client::builder(TokioExecutor::new()).build(connector),
            https: Client::builder(TokioExecutor::new())
                .build(HttpsConnector::new_with_connector(tls_connector)),
            trust_request_body,
        }
    }

    /// Forward `inbound` and wait for the origin's response head.
    pub async fn forward(&self, inbound: InboundRequest) -> Result<Response<Incoming>, RelayError> {
        let target = inbound.uri.to_string();
        let Some(scheme) = relay_scheme(&inbound.uri) else {
            return Err(RelayError::NotAbsolute(target));
        };

        let mut headers = sanitize(&inbound.headers, Direction::Request);
        let plan = BodyPlan::resolve(self.trust_request_body, inbound.body, inbound.raw, &mut headers)?;

        tracing::debug!(
            method = %inbound.method,
            url = %target,
            body_mode = plan.mode.as_str(),
            "Forwarding request"
        );

        let mut request = Request::builder()
            .method(inbound.method)
            .uri(inbound.uri)
            .body(plan.body)?;
        *request.headers_mut() = headers;

        let response = match scheme {
            TargetScheme::Http => self.http.request(request).await,
            TargetScheme::Https => self.https.request(request).await,
        };
        response.map_err(|err| RelayError::from_client(&target, err))
    }
}
