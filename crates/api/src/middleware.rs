//! Shared request state.

use jobq_core::JobService;

/// Application state.
#[derive(Clone)]
pub struct AppState {
    pub job_service: JobService,
}

impl AppState {
    #[must_use]
    pub const fn new(job_service: JobService) -> Self {
        Self { job_service }
    }
}
