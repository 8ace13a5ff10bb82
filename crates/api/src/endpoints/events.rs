//! Job event feed.

use axum::{Router, extract::State, routing::get};
use jobq_common::AppResult;
use jobq_db::entities::job_event;
use serde::Serialize;

use crate::{middleware::AppState, response::ApiResponse};

/// Events returned by the feed.
const FEED_LIMIT: u64 = 50;

/// Audit event response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEventResponse {
    pub id: i64,
    pub job_id: i64,
    pub tenant_id: String,
    pub event_type: String,
    pub message: String,
    pub timestamp: String,
}

impl From<job_event::Model> for JobEventResponse {
    fn from(e: job_event::Model) -> Self {
        Self {
            id: e.id,
            job_id: e.job_id,
            tenant_id: e.tenant_id,
            event_type: e.event_type,
            message: e.message,
            timestamp: e.timestamp.to_rfc3339(),
        }
    }
}

/// Latest events, newest first.
async fn recent(State(state): State<AppState>) -> AppResult<ApiResponse<Vec<JobEventResponse>>> {
    let events = state.job_service.recent_events(FEED_LIMIT).await?;
    Ok(ApiResponse::ok(events.into_iter().map(Into::into).collect()))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(recent))
}
