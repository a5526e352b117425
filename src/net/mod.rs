//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → connection.rs (ID, live-connection count for draining)
//!     → peek.rs (read ahead far enough to see the request head)
//!     → hand off to the HTTP layer or the CONNECT splicer
//! ```

pub mod connection;
pub mod listener;
pub mod peek;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionTracker};
pub use listener::{ConnectionPermit, Listener, ListenerError};
pub use peek::PeekStream;
