//! Job event recorder.
//!
//! Appends to the job audit log. Recording never fails from the caller's point
//! of view: a lost event is logged and otherwise ignored.

use std::sync::Arc;

use async_trait::async_trait;
use jobq_common::AppResult;
use jobq_db::{entities::job_event, repositories::JobEventRepository, timestamp_now};
use tokio::sync::Mutex;

/// Event type tags written by the lifecycle.
pub mod event_type {
    pub const SUBMITTED: &str = "SUBMITTED";
    pub const LEASED: &str = "LEASED";
    pub const LEASE_EXPIRED: &str = "LEASE_EXPIRED";
    pub const STARTED: &str = "STARTED";
    pub const COMPLETED: &str = "COMPLETED";
    pub const FAILED: &str = "FAILED";
    pub const DLQ: &str = "DLQ";
}

/// Append-only audit sink for job events.
#[async_trait]
pub trait EventRecorder: Send + Sync {
    /// Record an event. Best effort.
    async fn record(&self, job_id: i64, tenant_id: &str, event_type: &str, message: &str);

    /// Most recent events, newest first.
    async fn recent(&self, limit: u64) -> AppResult<Vec<job_event::Model>>;

    /// Events of one job, oldest first.
    async fn for_job(&self, job_id: i64) -> AppResult<Vec<job_event::Model>>;
}

/// Shared event recorder handle.
pub type EventRecorderService = Arc<dyn EventRecorder>;

/// Writes events to the `job_event` table on a spawned task.
#[derive(Clone)]
pub struct RepositoryEventRecorder {
    repo: JobEventRepository,
}

impl RepositoryEventRecorder {
    #[must_use]
    pub const fn new(repo: JobEventRepository) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl EventRecorder for RepositoryEventRecorder {
    async fn record(&self, job_id: i64, tenant_id: &str, event_type: &str, message: &str) {
        let repo = self.repo.clone();
        let timestamp = timestamp_now();
        let tenant_id = tenant_id.to_string();
        let event_type = event_type.to_string();
        let message = message.to_string();

        tokio::spawn(async move {
            if let Err(e) = repo
                .append(job_id, &tenant_id, &event_type, &message, timestamp)
                .await
            {
                tracing::warn!(
                    job_id,
                    tenant_id = %tenant_id,
                    event_type = %event_type,
                    error = %e,
                    "Failed to record job event"
                );
            }
        });
    }

    async fn recent(&self, limit: u64) -> AppResult<Vec<job_event::Model>> {
        self.repo.find_recent(limit).await
    }

    async fn for_job(&self, job_id: i64) -> AppResult<Vec<job_event::Model>> {
        self.repo.find_by_job(job_id).await
    }
}

/// Keeps events in memory. Used by tests and storage-less runs.
#[derive(Debug, Default)]
pub struct MemoryEventRecorder {
    events: Mutex<Vec<job_event::Model>>,
}

impl MemoryEventRecorder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All events in recording order.
    pub async fn events(&self) -> Vec<job_event::Model> {
        self.events.lock().await.clone()
    }

    /// Event types recorded for one job, in order.
    pub async fn event_types(&self, job_id: i64) -> Vec<String> {
        self.events
            .lock()
            .await
            .iter()
            .filter(|e| e.job_id == job_id)
            .map(|e| e.event_type.clone())
            .collect()
    }
}

#[async_trait]
impl EventRecorder for MemoryEventRecorder {
    async fn record(&self, job_id: i64, tenant_id: &str, event_type: &str, message: &str) {
        let mut events = self.events.lock().await;
        let id = events.len() as i64 + 1;
        events.push(job_event::Model {
            id,
            job_id,
            tenant_id: tenant_id.to_string(),
            event_type: event_type.to_string(),
            message: message.to_string(),
            timestamp: timestamp_now(),
        });
    }

    async fn recent(&self, limit: u64) -> AppResult<Vec<job_event::Model>> {
        let events = self.events.lock().await;
        Ok(events
            .iter()
            .rev()
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    async fn for_job(&self, job_id: i64) -> AppResult<Vec<job_event::Model>> {
        let events = self.events.lock().await;
        Ok(events.iter().filter(|e| e.job_id == job_id).cloned().collect())
    }
}

/// Discards every event.
#[derive(Clone, Default)]
pub struct NoOpEventRecorder;

#[async_trait]
impl EventRecorder for NoOpEventRecorder {
    async fn record(&self, _job_id: i64, _tenant_id: &str, _event_type: &str, _message: &str) {}

    async fn recent(&self, _limit: u64) -> AppResult<Vec<job_event::Model>> {
        Ok(Vec::new())
    }

    async fn for_job(&self, _job_id: i64) -> AppResult<Vec<job_event::Model>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use sea_orm::{DatabaseBackend, MockDatabase};

    #[tokio::test]
    async fn test_memory_recorder_recent_is_newest_first() {
        let recorder = MemoryEventRecorder::new();
        recorder.record(1, "acme", event_type::SUBMITTED, "a").await;
        recorder.record(1, "acme", event_type::LEASED, "b").await;
        recorder.record(2, "acme", event_type::SUBMITTED, "c").await;

        let recent = recorder.recent(2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].message, "c");
        assert_eq!(recent[1].message, "b");

        assert_eq!(
            recorder.event_types(1).await,
            vec![event_type::SUBMITTED, event_type::LEASED]
        );
        assert_eq!(recorder.for_job(2).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_repository_recorder_swallows_storage_errors() {
        // No query results queued: the insert fails inside the spawned task
        let db = Arc::new(MockDatabase::new(DatabaseBackend::Postgres).into_connection());
        let recorder = RepositoryEventRecorder::new(JobEventRepository::new(db));

        recorder.record(1, "acme", event_type::SUBMITTED, "lost").await;
        tokio::task::yield_now().await;
    }

    #[tokio::test]
    async fn test_noop_recorder() {
        let recorder = NoOpEventRecorder;
        recorder.record(1, "acme", event_type::DLQ, "ignored").await;
        assert!(recorder.recent(10).await.unwrap().is_empty());
        assert!(recorder.for_job(1).await.unwrap().is_empty());
    }
}
