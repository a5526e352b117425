//! Axum middleware entry point for the relay.
//!
//! ```ignore
//! let proxy = Arc::new(ForwardProxy::new(RelayOptions::default()));
//! let app = Router::new()
//!     .route("/", get(|| async { "local" }))
//!     .layer(middleware::from_fn_with_state(proxy, relay_requests));
//! ```

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::proxy::forward::relay_scheme;
use crate::proxy::ForwardProxy;

/// Relay absolute `http`/`https` requests; hand everything else to `next` untouched.
pub async fn relay_requests(
    State(proxy): State<Arc<ForwardProxy>>,
    request: Request,
    next: Next,
) -> Response {
    if relay_scheme(request.uri()).is_none() {
        return next.run(request).await;
    }

    match proxy.relay(request).await {
        Ok(relayed) => relayed.into_response(),
        Err(err) => err.into_response(),
    }
}
