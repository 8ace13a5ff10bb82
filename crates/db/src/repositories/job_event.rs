//! Job event repository.

use std::sync::Arc;

use jobq_common::{AppError, AppResult};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set, prelude::DateTimeWithTimeZone,
};

use crate::entities::{JobEvent, job_event};

/// Job event repository for the append-only audit log.
#[derive(Clone)]
pub struct JobEventRepository {
    db: Arc<DatabaseConnection>,
}

impl JobEventRepository {
    /// Create a new job event repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Append an event.
    pub async fn append(
        &self,
        job_id: i64,
        tenant_id: &str,
        event_type: &str,
        message: &str,
        timestamp: DateTimeWithTimeZone,
    ) -> AppResult<job_event::Model> {
        let model = job_event::ActiveModel {
            job_id: Set(job_id),
            tenant_id: Set(tenant_id.to_string()),
            event_type: Set(event_type.to_string()),
            message: Set(message.to_string()),
            timestamp: Set(timestamp),
            ..Default::default()
        };

        model
            .insert(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Most recent events, newest first.
    pub async fn find_recent(&self, limit: u64) -> AppResult<Vec<job_event::Model>> {
        JobEvent::find()
            .order_by_desc(job_event::Column::Timestamp)
            .order_by_desc(job_event::Column::Id)
            .limit(limit)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Events of one job, oldest first.
    pub async fn find_by_job(&self, job_id: i64) -> AppResult<Vec<job_event::Model>> {
        JobEvent::find()
            .filter(job_event::Column::JobId.eq(job_id))
            .order_by_asc(job_event::Column::Timestamp)
            .order_by_asc(job_event::Column::Id)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::store::timestamp_now;
    use sea_orm::{DatabaseBackend, MockDatabase};

    fn create_test_event(id: i64, job_id: i64, event_type: &str) -> job_event::Model {
        job_event::Model {
            id,
            job_id,
            tenant_id: "acme".to_string(),
            event_type: event_type.to_string(),
            message: format!("{event_type} message"),
            timestamp: timestamp_now(),
        }
    }

    #[tokio::test]
    async fn test_append_returns_event() {
        let event = create_test_event(1, 10, "SUBMITTED");

        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[event.clone()]])
                .into_connection(),
        );

        let repo = JobEventRepository::new(db);
        let stored = repo
            .append(10, "acme", "SUBMITTED", "SUBMITTED message", event.timestamp)
            .await
            .unwrap();

        assert_eq!(stored, event);
    }

    #[tokio::test]
    async fn test_find_recent() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[
                    create_test_event(3, 10, "COMPLETED"),
                    create_test_event(2, 10, "STARTED"),
                ]])
                .into_connection(),
        );

        let repo = JobEventRepository::new(db);
        let events = repo.find_recent(50).await.unwrap();

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "COMPLETED");
    }

    #[tokio::test]
    async fn test_find_by_job_empty() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([Vec::<job_event::Model>::new()])
                .into_connection(),
        );

        let repo = JobEventRepository::new(db);
        assert!(repo.find_by_job(99).await.unwrap().is_empty());
    }
}
