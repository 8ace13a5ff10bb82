//! Persistent job store abstraction.
//!
//! Every state change a job can go through is a [`Transition`] value. Stores
//! only decide *which* rows a change applies to (claim eligibility, lease
//! fencing); the change itself always goes through [`Transition::apply`], so the
//! `PostgreSQL` and in-memory stores cannot drift apart.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{SubsecRound, TimeDelta, Utc};
use jobq_common::AppResult;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::Serialize;

use crate::entities::job::{self, JobStatus};

/// Current time at the precision `PostgreSQL` stores (microseconds).
///
/// Lease expiries double as fencing tokens and are compared for equality, so
/// every timestamp written must survive a database round trip unchanged.
#[must_use]
pub fn timestamp_now() -> DateTimeWithTimeZone {
    Utc::now().trunc_subsecs(6).fixed_offset()
}

/// Lease expiry for a lease taken at `now`.
#[must_use]
pub fn lease_until(now: DateTimeWithTimeZone, lease: TimeDelta) -> DateTimeWithTimeZone {
    (now + lease).trunc_subsecs(6)
}

/// A job about to be inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewJob {
    pub tenant_id: String,
    pub idempotency_key: Option<String>,
    pub payload: String,
    pub max_retries: i32,
}

impl NewJob {
    /// Row for this job as first persisted: `PENDING`, no attempts, unleased.
    #[must_use]
    pub fn into_model(self, id: i64, now: DateTimeWithTimeZone) -> job::Model {
        job::Model {
            id,
            tenant_id: self.tenant_id,
            idempotency_key: self.idempotency_key,
            status: JobStatus::Pending,
            payload: self.payload,
            attempt_count: 0,
            max_retries: self.max_retries,
            lease_expiry: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
            last_error: None,
        }
    }
}

/// Result of an insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// A new row was written.
    Created(job::Model),
    /// Another submission with the same `(tenant_id, idempotency_key)` won.
    Existing(job::Model),
}

impl InsertOutcome {
    /// The job row, whichever submission created it.
    #[must_use]
    pub fn into_job(self) -> job::Model {
        match self {
            Self::Created(job) | Self::Existing(job) => job,
        }
    }
}

/// Filter for [`JobStore::list`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobFilter {
    pub tenant_id: Option<String>,
    pub status: Option<JobStatus>,
}

impl JobFilter {
    /// Whether `job` passes this filter.
    #[must_use]
    pub fn matches(&self, job: &job::Model) -> bool {
        self.tenant_id.as_ref().is_none_or(|t| *t == job.tenant_id)
            && self.status.is_none_or(|s| s == job.status)
    }
}

/// Job counts grouped by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobCounts {
    pub pending: u64,
    pub running: u64,
    pub completed: u64,
    pub failed_permanently: u64,
    pub total: u64,
}

impl JobCounts {
    /// Add `count` jobs in `status`.
    pub const fn add(&mut self, status: JobStatus, count: u64) {
        match status {
            JobStatus::Pending => self.pending += count,
            JobStatus::Running => self.running += count,
            JobStatus::Completed => self.completed += count,
            JobStatus::Dlq => self.failed_permanently += count,
        }
        self.total += count;
    }
}

impl FromIterator<(JobStatus, u64)> for JobCounts {
    fn from_iter<I: IntoIterator<Item = (JobStatus, u64)>>(iter: I) -> Self {
        let mut counts = Self::default();
        for (status, count) in iter {
            counts.add(status, count);
        }
        counts
    }
}

/// A state change of one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// `PENDING -> RUNNING` with a fresh lease.
    Lease { until: DateTimeWithTimeZone },
    /// An abandoned lease is charged as a failed attempt and leased again.
    Reclaim {
        until: DateTimeWithTimeZone,
        error: String,
    },
    /// `RUNNING -> COMPLETED`.
    Complete,
    /// `RUNNING -> PENDING`, retry budget left.
    Retry { error: String },
    /// `-> DLQ`, retry budget exhausted.
    DeadLetter { error: String },
}

impl Transition {
    /// Status the job holds after this transition.
    #[must_use]
    pub const fn status(&self) -> JobStatus {
        match self {
            Self::Lease { .. } | Self::Reclaim { .. } => JobStatus::Running,
            Self::Complete => JobStatus::Completed,
            Self::Retry { .. } => JobStatus::Pending,
            Self::DeadLetter { .. } => JobStatus::Dlq,
        }
    }

    /// Whether this transition ends an execution attempt.
    #[must_use]
    pub const fn consumes_attempt(&self) -> bool {
        !matches!(self, Self::Lease { .. })
    }

    /// Apply the transition to `job` in place.
    pub fn apply(&self, job: &mut job::Model, now: DateTimeWithTimeZone) {
        if self.consumes_attempt() {
            job.attempt_count += 1;
        }
        job.status = self.status();
        job.updated_at = now;

        match self {
            Self::Lease { until } => {
                job.lease_expiry = Some(*until);
            }
            Self::Reclaim { until, error } => {
                job.lease_expiry = Some(*until);
                job.last_error = Some(error.clone());
            }
            Self::Complete => {
                job.lease_expiry = None;
                job.last_error = None;
                job.completed_at = Some(now);
            }
            Self::Retry { error } | Self::DeadLetter { error } => {
                job.lease_expiry = None;
                job.last_error = Some(error.clone());
            }
        }
    }
}

/// A job changed by a claim cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimedJob {
    /// Row after the transition.
    pub job: job::Model,
    pub transition: Transition,
}

impl ClaimedJob {
    /// Whether the job now holds a lease and should be executed.
    #[must_use]
    pub fn is_runnable(&self) -> bool {
        self.job.status == JobStatus::Running
    }
}

/// Decides what a claim cycle does with one eligible row.
pub type ClaimPolicy<'a> = &'a (dyn Fn(&job::Model) -> Transition + Send + Sync);

/// Persistent job storage.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new `PENDING` job.
    ///
    /// A duplicate `(tenant_id, idempotency_key)` resolves to the existing row.
    async fn insert(&self, job: NewJob, now: DateTimeWithTimeZone) -> AppResult<InsertOutcome>;

    async fn find_by_id(&self, id: i64) -> AppResult<Option<job::Model>>;

    async fn find_by_idempotency_key(
        &self,
        tenant_id: &str,
        key: &str,
    ) -> AppResult<Option<job::Model>>;

    /// Count a tenant's `PENDING` and `RUNNING` jobs.
    async fn count_active(&self, tenant_id: &str) -> AppResult<u64>;

    /// Jobs matching `filter`, oldest first.
    async fn list(&self, filter: &JobFilter) -> AppResult<Vec<job::Model>>;

    /// Counts by status, optionally for one tenant.
    async fn counts_by_status(&self, tenant_id: Option<&str>) -> AppResult<JobCounts>;

    /// Atomically select up to `limit` claimable rows (oldest first), apply
    /// `policy` to each and persist the result.
    ///
    /// Rows locked by a concurrent claim are skipped, never waited on.
    async fn claim(
        &self,
        now: DateTimeWithTimeZone,
        limit: u64,
        policy: ClaimPolicy<'_>,
    ) -> AppResult<Vec<ClaimedJob>>;

    /// Apply `transition` to the attempt `current` describes.
    ///
    /// Only succeeds while the row is still `RUNNING` under the lease
    /// `current` holds; returns `None` when that lease has been lost.
    async fn apply(
        &self,
        current: &job::Model,
        transition: &Transition,
        now: DateTimeWithTimeZone,
    ) -> AppResult<Option<job::Model>>;
}

/// Shared job store handle.
pub type JobStoreService = Arc<dyn JobStore>;
