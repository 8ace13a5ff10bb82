//! API endpoints.

mod events;
mod jobs;
mod metrics;

use axum::Router;

use crate::middleware::AppState;

pub use events::JobEventResponse;
pub use jobs::{CreateJobRequest, JobResponse};
pub use metrics::MetricsResponse;

/// Create the API router.
pub fn router() -> Router<AppState> {
    Router::new()
        .nest("/jobs", jobs::router())
        .nest("/events", events::router())
        .nest("/metrics", metrics::router())
}
