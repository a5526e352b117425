//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → head.rs (peek the first request head)
//!     → CONNECT: proxy::tunnel
//!     → otherwise server.rs (hyper + TraceLayer + relay middleware + router)
//!     → Send to client
//! ```

pub mod head;
pub mod server;

pub use head::{HeadError, RequestHead};
pub use server::HttpServer;
