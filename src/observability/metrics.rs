//! Metrics collection and exposition.
//!
//! # Metrics
//! - `forward_proxy_requests_total` (counter): relayed requests by method, status
//! - `forward_proxy_request_duration_seconds` (histogram): time to reply head
//! - `forward_proxy_tunnels_active` (gauge): open CONNECT sessions
//! - `forward_proxy_tunnels_total` (counter): CONNECT sessions by outcome

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and its scrape endpoint on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

/// Record one relayed request.
pub fn record_request(method: &str, status: u16, start: Instant) {
    let method = method.to_string();
    let status = status.to_string();
    metrics::counter!(
        "forward_proxy_requests_total",
        "method" => method.clone(),
        "status" => status.clone()
    )
    .increment(1);
    metrics::histogram!(
        "forward_proxy_request_duration_seconds",
        "method" => method,
        "status" => status
    )
    .record(start.elapsed().as_secs_f64());
}

pub fn tunnel_opened() {
    metrics::gauge!("forward_proxy_tunnels_active").increment(1.0);
    metrics::counter!("forward_proxy_tunnels_total", "outcome" => "established").increment(1);
}

pub fn tunnel_closed() {
    metrics::gauge!("forward_proxy_tunnels_active").decrement(1.0);
}

pub fn tunnel_failed() {
    metrics::counter!("forward_proxy_tunnels_total", "outcome" => "failed").increment(1);
}
