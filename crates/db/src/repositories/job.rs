//! Job repository.

use std::sync::Arc;

use async_trait::async_trait;
use jobq_common::{AppError, AppResult};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Unchanged, ColumnTrait, Condition, DatabaseConnection, DbErr,
    EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, SqlErr,
    TransactionTrait,
    prelude::DateTimeWithTimeZone,
    sea_query::{Expr, LockBehavior, LockType},
};

use crate::entities::{Job, JobStatus, job};
use crate::store::{
    ClaimPolicy, ClaimedJob, InsertOutcome, JobCounts, JobFilter, JobStore, NewJob, Transition,
};

fn database_error(err: DbErr) -> AppError {
    AppError::Database(err.to_string())
}

/// Columns a [`Transition`] may change, keyed by the row's primary key.
fn transition_columns(model: &job::Model) -> job::ActiveModel {
    job::ActiveModel {
        id: Unchanged(model.id),
        status: Set(model.status),
        attempt_count: Set(model.attempt_count),
        lease_expiry: Set(model.lease_expiry),
        updated_at: Set(model.updated_at),
        completed_at: Set(model.completed_at),
        last_error: Set(model.last_error.clone()),
        ..Default::default()
    }
}

/// Rows a claim cycle may pick up at `now`.
fn claimable(now: DateTimeWithTimeZone) -> Condition {
    Condition::any()
        .add(
            Condition::all()
                .add(job::Column::Status.eq(JobStatus::Pending))
                .add(
                    Condition::any()
                        .add(job::Column::LeaseExpiry.is_null())
                        .add(job::Column::LeaseExpiry.lt(now)),
                ),
        )
        .add(
            Condition::all()
                .add(job::Column::Status.eq(JobStatus::Running))
                .add(job::Column::LeaseExpiry.lt(now)),
        )
}

/// `PostgreSQL`-backed job store.
#[derive(Clone)]
pub struct JobRepository {
    db: Arc<DatabaseConnection>,
}

impl JobRepository {
    /// Create a new job repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl JobStore for JobRepository {
    async fn insert(&self, new: NewJob, now: DateTimeWithTimeZone) -> AppResult<InsertOutcome> {
        let tenant_id = new.tenant_id.clone();
        let key = new.idempotency_key.clone();

        let model = job::ActiveModel {
            tenant_id: Set(new.tenant_id),
            idempotency_key: Set(new.idempotency_key),
            status: Set(JobStatus::Pending),
            payload: Set(new.payload),
            attempt_count: Set(0),
            max_retries: Set(new.max_retries),
            lease_expiry: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            completed_at: Set(None),
            last_error: Set(None),
            ..Default::default()
        };

        match model.insert(self.db.as_ref()).await {
            Ok(job) => Ok(InsertOutcome::Created(job)),
            Err(err) if matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                let Some(key) = key else {
                    return Err(database_error(err));
                };
                self.find_by_idempotency_key(&tenant_id, &key)
                    .await?
                    .map(InsertOutcome::Existing)
                    .ok_or_else(|| {
                        AppError::Conflict(format!(
                            "Idempotency key {key} for tenant {tenant_id} is taken"
                        ))
                    })
            }
            Err(err) => Err(database_error(err)),
        }
    }

    async fn find_by_id(&self, id: i64) -> AppResult<Option<job::Model>> {
        Job::find_by_id(id)
            .one(self.db.as_ref())
            .await
            .map_err(database_error)
    }

    async fn find_by_idempotency_key(
        &self,
        tenant_id: &str,
        key: &str,
    ) -> AppResult<Option<job::Model>> {
        Job::find()
            .filter(job::Column::TenantId.eq(tenant_id))
            .filter(job::Column::IdempotencyKey.eq(key))
            .one(self.db.as_ref())
            .await
            .map_err(database_error)
    }

    async fn count_active(&self, tenant_id: &str) -> AppResult<u64> {
        Job::find()
            .filter(job::Column::TenantId.eq(tenant_id))
            .filter(job::Column::Status.is_in(JobStatus::ACTIVE))
            .count(self.db.as_ref())
            .await
            .map_err(database_error)
    }

    async fn list(&self, filter: &JobFilter) -> AppResult<Vec<job::Model>> {
        let mut query = Job::find();
        if let Some(tenant_id) = &filter.tenant_id {
            query = query.filter(job::Column::TenantId.eq(tenant_id.as_str()));
        }
        if let Some(status) = filter.status {
            query = query.filter(job::Column::Status.eq(status));
        }

        query
            .order_by_asc(job::Column::CreatedAt)
            .order_by_asc(job::Column::Id)
            .all(self.db.as_ref())
            .await
            .map_err(database_error)
    }

    async fn counts_by_status(&self, tenant_id: Option<&str>) -> AppResult<JobCounts> {
        let mut query = Job::find()
            .select_only()
            .column(job::Column::Status)
            .column_as(Expr::col(job::Column::Id).count(), "count")
            .group_by(job::Column::Status);
        if let Some(tenant_id) = tenant_id {
            query = query.filter(job::Column::TenantId.eq(tenant_id));
        }

        let rows: Vec<(JobStatus, i64)> = query
            .into_tuple()
            .all(self.db.as_ref())
            .await
            .map_err(database_error)?;

        Ok(rows
            .into_iter()
            .map(|(status, count)| (status, count.max(0) as u64))
            .collect())
    }

    async fn claim(
        &self,
        now: DateTimeWithTimeZone,
        limit: u64,
        policy: ClaimPolicy<'_>,
    ) -> AppResult<Vec<ClaimedJob>> {
        let txn = self.db.begin().await.map_err(database_error)?;

        let rows = Job::find()
            .filter(claimable(now))
            .order_by_asc(job::Column::CreatedAt)
            .order_by_asc(job::Column::Id)
            .limit(limit)
            .lock_with_behavior(LockType::Update, LockBehavior::SkipLocked)
            .all(&txn)
            .await
            .map_err(database_error)?;

        let mut claimed = Vec::with_capacity(rows.len());
        for mut row in rows {
            let transition = policy(&row);
            transition.apply(&mut row, now);

            let job = transition_columns(&row)
                .update(&txn)
                .await
                .map_err(database_error)?;

            claimed.push(ClaimedJob {
                job,
                transition,
            });
        }

        txn.commit().await.map_err(database_error)?;
        Ok(claimed)
    }

    async fn apply(
        &self,
        current: &job::Model,
        transition: &Transition,
        now: DateTimeWithTimeZone,
    ) -> AppResult<Option<job::Model>> {
        let Some(lease) = current.lease_expiry else {
            return Ok(None);
        };
        if current.status != JobStatus::Running {
            return Ok(None);
        }

        let mut next = current.clone();
        transition.apply(&mut next, now);

        let result = Job::update_many()
            .set(transition_columns(&next))
            .filter(job::Column::Id.eq(current.id))
            .filter(job::Column::Status.eq(JobStatus::Running))
            .filter(job::Column::LeaseExpiry.eq(lease))
            .exec(self.db.as_ref())
            .await
            .map_err(database_error)?;

        Ok((result.rows_affected == 1).then_some(next))
    }
}
