//! Job endpoints.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::get,
};
use jobq_common::{AppError, AppResult};
use jobq_core::SubmitJobInput;
use jobq_db::{
    JobCounts,
    entities::{JobStatus, job},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::Validate;

use crate::{
    endpoints::events::JobEventResponse,
    extractors::{MaybeTenantId, TenantId},
    middleware::AppState,
    response::ApiResponse,
};

// ==================== Request/Response Types ====================

/// Job response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResponse {
    pub id: i64,
    pub tenant_id: String,
    pub idempotency_key: Option<String>,
    pub status: JobStatus,
    pub payload: String,
    pub attempt_count: i32,
    pub max_retries: i32,
    pub lease_expiry: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub completed_at: Option<String>,
    pub last_error: Option<String>,
}

impl From<job::Model> for JobResponse {
    fn from(j: job::Model) -> Self {
        Self {
            id: j.id,
            tenant_id: j.tenant_id,
            idempotency_key: j.idempotency_key,
            status: j.status,
            payload: j.payload,
            attempt_count: j.attempt_count,
            max_retries: j.max_retries,
            lease_expiry: j.lease_expiry.map(|dt| dt.to_rfc3339()),
            created_at: j.created_at.to_rfc3339(),
            updated_at: j.updated_at.to_rfc3339(),
            completed_at: j.completed_at.map(|dt| dt.to_rfc3339()),
            last_error: j.last_error,
        }
    }
}

/// Submit job request.
///
/// `payload` may be a JSON string, stored verbatim, or any other JSON value,
/// stored as its serialized text.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobRequest {
    pub payload: Value,

    #[validate(length(max = 255))]
    pub idempotency_key: Option<String>,

    #[validate(range(min = 0, max = 100))]
    pub max_retries: Option<i32>,
}

impl CreateJobRequest {
    fn payload_text(&self) -> String {
        match &self.payload {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// List jobs query.
#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    pub status: Option<String>,
}

/// Tenant summary query.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryQuery {
    pub tenant_id: Option<String>,
}

// ==================== Handlers ====================

/// Submit a job for the calling tenant.
async fn create(
    TenantId(tenant_id): TenantId,
    State(state): State<AppState>,
    Json(req): Json<CreateJobRequest>,
) -> AppResult<ApiResponse<JobResponse>> {
    req.validate()?;

    let input = SubmitJobInput {
        tenant_id,
        payload: req.payload_text(),
        idempotency_key: req.idempotency_key,
        max_retries: req.max_retries,
    };

    let job = state.job_service.submit(input).await?;

    Ok(ApiResponse::ok(job.into()))
}

/// Show one job. With a tenant header, other tenants' jobs are not found.
async fn show(
    MaybeTenantId(tenant_id): MaybeTenantId,
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<ApiResponse<JobResponse>> {
    let job = state.job_service.get(id).await?;

    if tenant_id.is_some_and(|t| t != job.tenant_id) {
        return Err(AppError::JobNotFound(id));
    }

    Ok(ApiResponse::ok(job.into()))
}

/// Audit history of one job.
async fn events(
    MaybeTenantId(tenant_id): MaybeTenantId,
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<ApiResponse<Vec<JobEventResponse>>> {
    let job = state.job_service.get(id).await?;

    if tenant_id.is_some_and(|t| t != job.tenant_id) {
        return Err(AppError::JobNotFound(id));
    }

    let events = state.job_service.job_events(job.id).await?;

    Ok(ApiResponse::ok(events.into_iter().map(Into::into).collect()))
}

/// List jobs, oldest first.
async fn list(
    MaybeTenantId(tenant_id): MaybeTenantId,
    State(state): State<AppState>,
    Query(query): Query<ListJobsQuery>,
) -> AppResult<ApiResponse<Vec<JobResponse>>> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<JobStatus>)
        .transpose()
        .map_err(AppError::BadRequest)?;

    let jobs = state
        .job_service
        .list(tenant_id.as_deref(), status)
        .await?;

    Ok(ApiResponse::ok(jobs.into_iter().map(Into::into).collect()))
}

/// Counts by status for one tenant.
async fn summary(
    MaybeTenantId(header_tenant): MaybeTenantId,
    State(state): State<AppState>,
    Query(query): Query<SummaryQuery>,
) -> AppResult<ApiResponse<JobCounts>> {
    let tenant_id = query
        .tenant_id
        .filter(|t| !t.trim().is_empty())
        .or(header_tenant)
        .ok_or_else(|| AppError::BadRequest("tenantId is required".to_string()))?;

    let counts = state.job_service.counts_by_status(Some(&tenant_id)).await?;

    Ok(ApiResponse::ok(counts))
}

/// Counts by status across all tenants.
async fn global_summary(State(state): State<AppState>) -> AppResult<ApiResponse<JobCounts>> {
    let counts = state.job_service.counts_by_status(None).await?;
    Ok(ApiResponse::ok(counts))
}

// ==================== Router ====================

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list).post(create))
        .route("/summary", get(summary))
        .route("/summary/global", get(global_summary))
        .route("/{id}", get(show))
        .route("/{id}/events", get(events))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_text() {
        let req: CreateJobRequest =
            serde_json::from_value(json!({ "payload": "{\"action\":\"noop\"}" })).unwrap();
        assert_eq!(req.payload_text(), r#"{"action":"noop"}"#);

        let req: CreateJobRequest =
            serde_json::from_value(json!({ "payload": { "action": "noop" } })).unwrap();
        assert_eq!(req.payload_text(), r#"{"action":"noop"}"#);
    }

    #[test]
    fn test_request_validation() {
        let req: CreateJobRequest = serde_json::from_value(json!({
            "payload": "x",
            "idempotencyKey": "order-1",
            "maxRetries": -1
        }))
        .unwrap();

        assert!(req.validate().is_err());
    }
}
