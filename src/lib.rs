//! Forward HTTP proxy library.
//!
//! Relays absolute-URL requests to their origin and splices CONNECT tunnels.
//! The relay is an axum middleware ([`proxy::relay_requests`]) that can sit in
//! front of any router; [`HttpServer`] wraps it in a standalone server.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod proxy;

pub use config::schema::ProxyConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use proxy::{ForwardProxy, RelayOptions};
