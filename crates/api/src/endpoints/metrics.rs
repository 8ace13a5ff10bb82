//! Metrics and health endpoints.

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use jobq_common::AppResult;
use jobq_db::JobCounts;
use serde::Serialize;

use crate::{extractors::MaybeTenantId, middleware::AppState, response::ApiResponse};

/// Create the metrics router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(get_metrics))
        .route("/health", get(health_check))
}

/// Metrics response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsResponse {
    pub jobs: JobCounts,
    pub tracked_tenants: usize,
    pub rate_limit: usize,
    pub rate_window_secs: u64,
    pub max_active_jobs: u64,
    /// Submissions the `X-Tenant-Id` tenant may still make in this window.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_submissions: Option<usize>,
}

/// Global job counts and admission settings.
async fn get_metrics(
    MaybeTenantId(tenant_id): MaybeTenantId,
    State(state): State<AppState>,
) -> AppResult<ApiResponse<MetricsResponse>> {
    let jobs = state.job_service.counts_by_status(None).await?;
    let limiter = state.job_service.limiter();
    let remaining_submissions = match tenant_id {
        Some(tenant_id) => Some(limiter.remaining(&tenant_id).await),
        None => None,
    };

    Ok(ApiResponse::ok(MetricsResponse {
        jobs,
        tracked_tenants: limiter.tenant_count().await,
        rate_limit: limiter.config().max_requests,
        rate_window_secs: limiter.config().window.as_secs(),
        max_active_jobs: state.job_service.config().max_active_jobs,
        remaining_submissions,
    }))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Liveness probe.
async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
        }),
    )
}
