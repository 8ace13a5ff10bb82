//! HTTP API layer for jobq.
//!
//! - **Endpoints**: job submission and queries, event feed, metrics
//! - **Extractors**: tenant identity from the `X-Tenant-Id` header
//!
//! Built on Axum 0.8 with Tower middleware stack.

pub mod endpoints;
pub mod extractors;
pub mod middleware;
pub mod response;

use axum::Router;
use tower_http::trace::TraceLayer;

pub use endpoints::router;
pub use middleware::AppState;

/// The full application: API routes under `/api` with request tracing.
pub fn app(state: AppState) -> Router {
    Router::new()
        .nest("/api", router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
