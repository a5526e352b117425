//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files, and
//! every section is defaulted so an empty file is a valid config.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::proxy::TunnelOptions;

/// Root configuration for the forward proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address, connection limit).
    pub listener: ListenerConfig,

    /// HTTP relay behaviour.
    pub relay: RelayConfig,

    /// CONNECT tunnel behaviour.
    pub tunnel: TunnelConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Shutdown behaviour.
    pub lifecycle: LifecycleConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_connections: 10_000,
        }
    }
}

/// HTTP relay configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Use body values attached to requests by earlier middleware.
    #[serde(alias = "trustRequestBody")]
    pub trust_request_body: bool,

    /// Buffer and decompress origin responses before replying.
    #[serde(alias = "parseResponseBody")]
    pub parse_response_body: bool,

    /// Largest response body buffered in parsed mode, before and after inflating.
    pub max_parsed_body_bytes: usize,

    /// Origin connect timeout; unset waits for the OS.
    pub connect_timeout_secs: Option<u64>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            trust_request_body: false,
            parse_response_body: false,
            max_parsed_body_bytes: 32 * 1024 * 1024,
            connect_timeout_secs: None,
        }
    }
}

/// CONNECT tunnel configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TunnelConfig {
    /// Port used when a CONNECT target has none.
    pub default_port: u16,

    /// Answer failed connects with `502 Bad Gateway` instead of closing.
    pub reply_on_failure: bool,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            default_port: 80,
            reply_on_failure: false,
        }
    }
}

impl TunnelConfig {
    /// Tunnel options, sharing the relay's connect timeout.
    pub fn options(&self, connect_timeout_secs: Option<u64>) -> TunnelOptions {
        TunnelOptions {
            default_port: self.default_port,
            reply_on_failure: self.reply_on_failure,
            connect_timeout: connect_timeout_secs.map(Duration::from_secs),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Shutdown configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// How long open connections may finish after a shutdown signal.
    pub drain_timeout_secs: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            drain_timeout_secs: 10,
        }
    }
}
