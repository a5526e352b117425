//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! relay / tunnel / server
//!     → tracing events with method, url, status, target fields
//!     → logging.rs (subscriber: env filter, pretty or JSON)
//!     → metrics.rs (counters, histogram, tunnel gauge)
//!     → Prometheus scrape endpoint (optional)
//! ```

pub mod logging;
pub mod metrics;
