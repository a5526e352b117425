//! HTTP server and accept loop.
//!
//! # Responsibilities
//! - Accept connections from the bounded listener
//! - Peek at the first request head on each connection
//! - Hand CONNECT connections to the tunnel splicer as raw sockets
//! - Serve everything else with hyper through the relay middleware
//! - Stop accepting on shutdown and drain live connections
//!
//! # Design Decisions
//! - The relay middleware wraps the whole router, so every request passes it
//!   before routing; non-proxy requests fall through to the router
//! - Only the first request on a connection can open a tunnel; a later CONNECT
//!   on a kept-alive connection reaches the router like any other request

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{middleware, Router};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::config::ProxyConfig;
use crate::http::head::RequestHead;
use crate::net::{ConnectionTracker, Listener, ListenerError, PeekStream};
use crate::proxy::{relay_requests, ForwardProxy, RelayOptions, TunnelSplicer};

/// Largest request head the accept loop reads ahead for.
const MAX_HEAD_BYTES: usize = 16 * 1024;

/// Forward-proxy server.
pub struct HttpServer {
    config: ProxyConfig,
    proxy: Arc<ForwardProxy>,
    splicer: TunnelSplicer,
    app: Router,
    tracker: ConnectionTracker,
}

impl HttpServer {
    /// Create a server that answers non-proxy requests with `404`.
    pub fn new(config: ProxyConfig) -> Self {
        Self::with_app(config, Router::new())
    }

    /// Create a server that routes non-proxy requests to `app`.
    pub fn with_app(config: ProxyConfig, app: Router) -> Self {
        let proxy = Arc::new(ForwardProxy::new(RelayOptions::from(&config.relay)));
        let splicer = TunnelSplicer::new(
            config.tunnel.options(config.relay.connect_timeout_secs),
        );
        Self {
            config,
            proxy,
            splicer,
            app: app.fallback(not_proxied),
            tracker: ConnectionTracker::new(),
        }
    }

    /// Run until `shutdown` fires, then drain open connections.
    pub async fn run(
        self,
        listener: Listener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ListenerError> {
        let addr = listener.local_addr().map_err(ListenerError::Accept)?;
        tracing::info!(address = %addr, "HTTP server starting");

        let service = ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .map_request(|request: http::Request<Incoming>| request.map(Body::new))
            .layer(middleware::from_fn_with_state(
                Arc::clone(&self.proxy),
                relay_requests,
            ))
            .service(self.app);

        loop {
            let accepted = tokio::select! {
                accepted = listener.accept() => accepted,
                _ = shutdown.recv() => break,
            };
            let (stream, peer, permit) = match accepted {
                Ok(accepted) => accepted,
                Err(err) => {
                    tracing::warn!(error = %err, "Accept failed");
                    continue;
                }
            };

            let guard = self.tracker.track();
            let service = service.clone();
            let splicer = self.splicer.clone();
            let shutdown = shutdown.resubscribe();
            tokio::spawn(async move {
                let _permit = permit;
                tracing::trace!(connection_id = %guard.id(), peer_addr = %peer, "Connection opened");
                serve_connection(stream, peer, service, splicer, shutdown).await;
                drop(guard);
            });
        }

        let drain = Duration::from_secs(self.config.lifecycle.drain_timeout_secs);
        tracing::info!(
            active = self.tracker.active_count(),
            drain_timeout_secs = drain.as_secs(),
            "Draining connections"
        );
        if !self.tracker.wait_idle(drain).await {
            tracing::warn!(
                active = self.tracker.active_count(),
                "Drain timeout elapsed with connections still open"
            );
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

async fn serve_connection<S, B>(
    stream: TcpStream,
    peer: SocketAddr,
    service: S,
    splicer: TunnelSplicer,
    mut shutdown: broadcast::Receiver<()>,
) where
    S: tower::Service<
            http::Request<Incoming>,
            Response = http::Response<B>,
            Error = std::convert::Infallible,
        > + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
    B: hyper::body::Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let mut stream = PeekStream::new(stream, MAX_HEAD_BYTES);
    let peeked = match RequestHead::peek(&mut stream).await {
        Ok(peeked) => peeked,
        Err(err) => {
            // hyper answers malformed heads itself.
            tracing::debug!(peer_addr = %peer, error = %err, "Unparsed request head");
            None
        }
    };

    if let Some((len, head)) = peeked {
        if let Some(connect) = head.into_connect_request() {
            stream.consume(len);
            let (rest, socket) = stream.into_parts();
            if let Err(err) = splicer.handle(connect, socket, rest).await {
                tracing::debug!(peer_addr = %peer, error = %err, "Tunnel ended with error");
            }
            return;
        }
    }

    let conn = http1::Builder::new()
        .serve_connection(TokioIo::new(stream), TowerToHyperService::new(service));
    tokio::pin!(conn);
    let result = tokio::select! {
        result = conn.as_mut() => result,
        _ = shutdown.recv() => {
            conn.as_mut().graceful_shutdown();
            conn.await
        }
    };
    if let Err(err) = result {
        tracing::debug!(peer_addr = %peer, error = %err, "Connection error");
    }
}

async fn not_proxied() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "Not a proxy request")
}
