//! Job lifecycle service.
//!
//! Owns admission (rate gate, idempotency, concurrency cap), the claim policy
//! and the retry-vs-DLQ decision. Stores persist what this service decides.

use std::sync::Arc;

use chrono::TimeDelta;
use jobq_common::{AppError, AppResult, Config};
use jobq_db::{
    ClaimedJob, InsertOutcome, JobCounts, JobFilter, JobStoreService, NewJob, Transition,
    entities::{JobStatus, job, job_event},
    lease_until, timestamp_now,
};
use sea_orm::prelude::DateTimeWithTimeZone;
use tracing::{debug, info, warn};

use super::event_recorder::{EventRecorderService, event_type};
use super::payload_events::PayloadEventTable;
use super::rate_limit::RateLimiter;

/// Error recorded when a lease runs out before the attempt resolved.
pub const LEASE_EXPIRED_ERROR: &str = "lease expired";

/// Longest tenant id the `job` table accepts.
pub const MAX_TENANT_ID_LEN: usize = 128;

/// Lifecycle settings.
#[derive(Debug, Clone)]
pub struct JobServiceConfig {
    /// Maximum PENDING + RUNNING jobs per tenant.
    pub max_active_jobs: u64,
    /// Retry budget for submissions that do not name one.
    pub default_max_retries: i32,
    /// Lease length handed out on claim.
    pub lease_duration: TimeDelta,
}

impl Default for JobServiceConfig {
    fn default() -> Self {
        Self {
            max_active_jobs: 5,
            default_max_retries: 3,
            lease_duration: TimeDelta::minutes(2),
        }
    }
}

impl From<&Config> for JobServiceConfig {
    fn from(config: &Config) -> Self {
        Self {
            max_active_jobs: config.admission.max_active_jobs,
            default_max_retries: config.admission.default_max_retries,
            lease_duration: TimeDelta::from_std(config.worker.lease_duration())
                .unwrap_or(TimeDelta::MAX),
        }
    }
}

/// A job submission.
#[derive(Debug, Clone, Default)]
pub struct SubmitJobInput {
    pub tenant_id: String,
    pub payload: String,
    pub idempotency_key: Option<String>,
    pub max_retries: Option<i32>,
}

/// How an execution attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Succeeded,
    Failed(String),
}

/// Job lifecycle service.
#[derive(Clone)]
pub struct JobService {
    store: JobStoreService,
    limiter: RateLimiter,
    events: EventRecorderService,
    payload_events: Arc<PayloadEventTable>,
    config: JobServiceConfig,
}

impl JobService {
    /// Create a new job service.
    #[must_use]
    pub fn new(
        store: JobStoreService,
        limiter: RateLimiter,
        events: EventRecorderService,
        config: JobServiceConfig,
    ) -> Self {
        Self {
            store,
            limiter,
            events,
            payload_events: Arc::new(PayloadEventTable::default()),
            config,
        }
    }

    /// Replace the payload event table.
    #[must_use]
    pub fn with_payload_events(mut self, table: PayloadEventTable) -> Self {
        self.payload_events = Arc::new(table);
        self
    }

    #[must_use]
    pub const fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    #[must_use]
    pub const fn config(&self) -> &JobServiceConfig {
        &self.config
    }

    // === Submission ===

    /// Submit a job for a tenant.
    ///
    /// Rate gate first, then idempotent replay, then the concurrency cap.
    pub async fn submit(&self, input: SubmitJobInput) -> AppResult<job::Model> {
        let tenant_id = input.tenant_id.trim();
        if tenant_id.is_empty() {
            return Err(AppError::Validation("tenant id is required".to_string()));
        }
        if tenant_id.len() > MAX_TENANT_ID_LEN {
            return Err(AppError::Validation(format!(
                "tenant id must be at most {MAX_TENANT_ID_LEN} bytes"
            )));
        }
        let max_retries = input.max_retries.unwrap_or(self.config.default_max_retries);
        if max_retries < 0 {
            return Err(AppError::Validation(
                "max retries must not be negative".to_string(),
            ));
        }
        let idempotency_key = input
            .idempotency_key
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());

        if !self.limiter.allow(tenant_id).await {
            info!(tenant_id, "Submission rejected by rate limit");
            return Err(AppError::RateLimited {
                limit: self.limiter.config().max_requests,
                window_secs: self.limiter.config().window.as_secs(),
            });
        }

        if let Some(key) = &idempotency_key {
            if let Some(existing) = self.store.find_by_idempotency_key(tenant_id, key).await? {
                debug!(tenant_id, job_id = existing.id, "Idempotent replay");
                return Ok(existing);
            }
        }

        let active = self.store.count_active(tenant_id).await?;
        if active >= self.config.max_active_jobs {
            info!(tenant_id, active, "Submission rejected by concurrency cap");
            return Err(AppError::TooManyConcurrentJobs {
                max: self.config.max_active_jobs,
            });
        }

        let outcome = self
            .store
            .insert(
                NewJob {
                    tenant_id: tenant_id.to_string(),
                    idempotency_key,
                    payload: input.payload,
                    max_retries,
                },
                timestamp_now(),
            )
            .await?;

        let job = match outcome {
            InsertOutcome::Created(job) => {
                info!(tenant_id, job_id = job.id, "Job submitted");
                self.events
                    .record(
                        job.id,
                        &job.tenant_id,
                        event_type::SUBMITTED,
                        &format!("Job submitted (max retries {})", job.max_retries),
                    )
                    .await;
                job
            }
            InsertOutcome::Existing(job) => {
                debug!(tenant_id, job_id = job.id, "Lost idempotency race; returning winner");
                job
            }
        };

        Ok(job)
    }

    // === Queries ===

    /// Find a job by ID.
    pub async fn find(&self, id: i64) -> AppResult<Option<job::Model>> {
        self.store.find_by_id(id).await
    }

    /// Get a job by ID.
    pub async fn get(&self, id: i64) -> AppResult<job::Model> {
        self.store
            .find_by_id(id)
            .await?
            .ok_or(AppError::JobNotFound(id))
    }

    /// List jobs, optionally narrowed to a tenant and/or status.
    pub async fn list(
        &self,
        tenant_id: Option<&str>,
        status: Option<JobStatus>,
    ) -> AppResult<Vec<job::Model>> {
        self.store
            .list(&JobFilter {
                tenant_id: tenant_id.map(str::to_string),
                status,
            })
            .await
    }

    /// Counts by status, for one tenant or globally.
    pub async fn counts_by_status(&self, tenant_id: Option<&str>) -> AppResult<JobCounts> {
        self.store.counts_by_status(tenant_id).await
    }

    /// Most recent audit events.
    pub async fn recent_events(&self, limit: u64) -> AppResult<Vec<job_event::Model>> {
        self.events.recent(limit).await
    }

    /// Audit history of one job, oldest first.
    pub async fn job_events(&self, id: i64) -> AppResult<Vec<job_event::Model>> {
        self.events.for_job(id).await
    }

    // === Claiming ===

    /// What a claim cycle does with an eligible row.
    ///
    /// A `RUNNING` row is only eligible once its lease has run out; that
    /// abandoned attempt is charged like a failure.
    #[must_use]
    pub fn claim_transition(
        job: &job::Model,
        now: DateTimeWithTimeZone,
        lease: TimeDelta,
    ) -> Transition {
        let until = lease_until(now, lease);
        if job.status != JobStatus::Running {
            return Transition::Lease { until };
        }

        let error = LEASE_EXPIRED_ERROR.to_string();
        if job.attempt_count + 1 > job.max_retries {
            Transition::DeadLetter { error }
        } else {
            Transition::Reclaim { until, error }
        }
    }

    /// Claim up to `limit` jobs and return the ones now leased to this worker.
    pub async fn claim_batch(&self, limit: u64) -> AppResult<Vec<job::Model>> {
        let now = timestamp_now();
        let lease = self.config.lease_duration;
        let policy = move |job: &job::Model| Self::claim_transition(job, now, lease);

        let claimed = self.store.claim(now, limit, &policy).await?;

        let mut runnable = Vec::with_capacity(claimed.len());
        for claim in claimed {
            self.record_claim(&claim).await;
            if claim.is_runnable() {
                runnable.push(claim.job);
            }
        }
        Ok(runnable)
    }

    async fn record_claim(&self, claim: &ClaimedJob) {
        let job = &claim.job;
        match &claim.transition {
            Transition::Lease { until } => {
                debug!(job_id = job.id, tenant_id = %job.tenant_id, "Job leased");
                self.events
                    .record(
                        job.id,
                        &job.tenant_id,
                        event_type::LEASED,
                        &format!("Leased until {}", until.to_rfc3339()),
                    )
                    .await;
            }
            Transition::Reclaim { until, .. } => {
                warn!(
                    job_id = job.id,
                    tenant_id = %job.tenant_id,
                    attempt = job.attempt_count,
                    "Lease expired; job reclaimed"
                );
                self.record_lease_expired(job).await;
                self.events
                    .record(
                        job.id,
                        &job.tenant_id,
                        event_type::LEASED,
                        &format!("Leased until {}", until.to_rfc3339()),
                    )
                    .await;
            }
            Transition::DeadLetter { error } => {
                warn!(
                    job_id = job.id,
                    tenant_id = %job.tenant_id,
                    attempt = job.attempt_count,
                    "Lease expired with no retries left; job dead-lettered"
                );
                self.record_lease_expired(job).await;
                self.record_dead_letter(job, error).await;
            }
            Transition::Complete | Transition::Retry { .. } => {}
        }
    }

    async fn record_lease_expired(&self, job: &job::Model) {
        self.events
            .record(
                job.id,
                &job.tenant_id,
                event_type::LEASE_EXPIRED,
                &format!("Attempt {} abandoned: lease expired", job.attempt_count),
            )
            .await;
    }

    async fn record_dead_letter(&self, job: &job::Model, error: &str) {
        self.events
            .record(
                job.id,
                &job.tenant_id,
                event_type::DLQ,
                &format!(
                    "Moved to DLQ after {} attempts: {error}",
                    job.attempt_count
                ),
            )
            .await;
    }

    // === Execution ===

    /// Record the start of an attempt, plus any payload-derived events.
    pub async fn start(&self, job: &job::Model) {
        self.events
            .record(
                job.id,
                &job.tenant_id,
                event_type::STARTED,
                &format!("Attempt {} started", job.attempt_count + 1),
            )
            .await;

        for event in self.payload_events.events_for(&job.payload) {
            self.events
                .record(job.id, &job.tenant_id, &event.event_type, &event.message)
                .await;
        }
    }

    /// Transition for a finished attempt.
    #[must_use]
    pub fn outcome_transition(job: &job::Model, outcome: ExecutionOutcome) -> Transition {
        match outcome {
            ExecutionOutcome::Succeeded => Transition::Complete,
            ExecutionOutcome::Failed(error) if job.attempt_count + 1 > job.max_retries => {
                Transition::DeadLetter { error }
            }
            ExecutionOutcome::Failed(error) => Transition::Retry { error },
        }
    }

    /// Persist the outcome of the attempt `job` describes.
    ///
    /// Returns `None` when the lease was lost meanwhile; the result is dropped.
    pub async fn resolve(
        &self,
        job: &job::Model,
        outcome: ExecutionOutcome,
    ) -> AppResult<Option<job::Model>> {
        let transition = Self::outcome_transition(job, outcome);

        let Some(updated) = self.store.apply(job, &transition, timestamp_now()).await? else {
            warn!(
                job_id = job.id,
                tenant_id = %job.tenant_id,
                "Lease lost before the attempt resolved; dropping result"
            );
            return Ok(None);
        };

        match &transition {
            Transition::Complete => {
                info!(job_id = updated.id, tenant_id = %updated.tenant_id, "Job completed");
                self.events
                    .record(
                        updated.id,
                        &updated.tenant_id,
                        event_type::COMPLETED,
                        &format!("Completed on attempt {}", updated.attempt_count),
                    )
                    .await;
            }
            Transition::Retry { error } => {
                warn!(
                    job_id = updated.id,
                    tenant_id = %updated.tenant_id,
                    attempt = updated.attempt_count,
                    error = %error,
                    "Job failed; will retry"
                );
                self.events
                    .record(
                        updated.id,
                        &updated.tenant_id,
                        event_type::FAILED,
                        &format!("Attempt {} failed: {error}", updated.attempt_count),
                    )
                    .await;
            }
            Transition::DeadLetter { error } => {
                warn!(
                    job_id = updated.id,
                    tenant_id = %updated.tenant_id,
                    attempt = updated.attempt_count,
                    error = %error,
                    "Job failed; moved to DLQ"
                );
                self.record_dead_letter(&updated, error).await;
            }
            Transition::Lease { .. } | Transition::Reclaim { .. } => {}
        }

        Ok(Some(updated))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::services::event_recorder::MemoryEventRecorder;
    use crate::services::rate_limit::RateLimitConfig;
    use jobq_db::{InMemoryJobStore, JobStore};
    use std::time::Duration;

    struct Harness {
        service: JobService,
        store: Arc<InMemoryJobStore>,
        events: Arc<MemoryEventRecorder>,
    }

    fn harness(config: JobServiceConfig) -> Harness {
        let store = InMemoryJobStore::arc();
        let events = Arc::new(MemoryEventRecorder::new());
        let service = JobService::new(
            store.clone(),
            RateLimiter::new(RateLimitConfig {
                max_requests: 100,
                window: Duration::from_secs(60),
            }),
            events.clone(),
            config,
        );
        Harness {
            service,
            store,
            events,
        }
    }

    fn submission(tenant: &str, key: Option<&str>) -> SubmitJobInput {
        SubmitJobInput {
            tenant_id: tenant.to_string(),
            payload: r#"{"action":"noop"}"#.to_string(),
            idempotency_key: key.map(str::to_string),
            max_retries: None,
        }
    }

    #[test]
    fn test_config_from_settings() {
        let config = Config {
            server: jobq_common::ServerConfig::default(),
            database: jobq_common::DatabaseConfig {
                url: "postgres://localhost/jobq".to_string(),
                max_connections: 5,
                min_connections: 1,
            },
            worker: jobq_common::WorkerConfig {
                lease_secs: 45,
                ..jobq_common::WorkerConfig::default()
            },
            admission: jobq_common::AdmissionConfig {
                max_active_jobs: 8,
                default_max_retries: 1,
                ..jobq_common::AdmissionConfig::default()
            },
        };

        let service_config = JobServiceConfig::from(&config);

        assert_eq!(service_config.lease_duration, TimeDelta::seconds(45));
        assert_eq!(service_config.max_active_jobs, 8);
        assert_eq!(service_config.default_max_retries, 1);
    }

    #[tokio::test]
    async fn test_submit_creates_pending_job() {
        let h = harness(JobServiceConfig::default());

        let job = h.service.submit(submission("acme", None)).await.unwrap();

        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempt_count, 0);
        assert_eq!(job.max_retries, 3);
        assert!(job.lease_expiry.is_none());
        assert_eq!(h.events.event_types(job.id).await, vec![event_type::SUBMITTED]);
    }

    #[tokio::test]
    async fn test_idempotent_replay_returns_existing_job() {
        let h = harness(JobServiceConfig::default());

        let first = h.service.submit(submission("acme", Some("k1"))).await.unwrap();
        let again = h.service.submit(submission("acme", Some("k1"))).await.unwrap();

        assert_eq!(first.id, again.id);
        assert_eq!(h.store.len().await, 1);
        assert_eq!(h.events.event_types(first.id).await.len(), 1);
    }

    #[tokio::test]
    async fn test_blank_key_is_treated_as_absent() {
        let h = harness(JobServiceConfig::default());

        let a = h.service.submit(submission("acme", Some("  "))).await.unwrap();
        let b = h.service.submit(submission("acme", Some(""))).await.unwrap();

        assert_ne!(a.id, b.id);
        assert!(a.idempotency_key.is_none());
    }

    #[tokio::test]
    async fn test_replay_bypasses_concurrency_cap() {
        let h = harness(JobServiceConfig {
            max_active_jobs: 1,
            ..JobServiceConfig::default()
        });

        let first = h.service.submit(submission("acme", Some("k1"))).await.unwrap();
        let replay = h.service.submit(submission("acme", Some("k1"))).await.unwrap();
        let other = h.service.submit(submission("acme", Some("k2"))).await;

        assert_eq!(first.id, replay.id);
        assert!(matches!(
            other,
            Err(AppError::TooManyConcurrentJobs { max: 1 })
        ));
    }

    #[tokio::test]
    async fn test_validation() {
        let h = harness(JobServiceConfig::default());

        let blank_tenant = h.service.submit(submission(" ", None)).await;
        assert!(matches!(blank_tenant, Err(AppError::Validation(_))));

        let long_tenant = h.service.submit(submission(&"t".repeat(129), None)).await;
        assert!(matches!(long_tenant, Err(AppError::Validation(_))));

        let negative = h
            .service
            .submit(SubmitJobInput {
                max_retries: Some(-1),
                ..submission("acme", None)
            })
            .await;
        assert!(matches!(negative, Err(AppError::Validation(_))));
        assert!(h.store.is_empty().await);
    }

    #[tokio::test]
    async fn test_rate_limit_rejection() {
        let store = InMemoryJobStore::arc();
        let service = JobService::new(
            store,
            RateLimiter::new(RateLimitConfig {
                max_requests: 1,
                window: Duration::from_secs(60),
            }),
            Arc::new(MemoryEventRecorder::new()),
            JobServiceConfig::default(),
        );

        service.submit(submission("acme", None)).await.unwrap();
        let rejected = service.submit(submission("acme", None)).await;

        assert!(matches!(
            rejected,
            Err(AppError::RateLimited {
                limit: 1,
                window_secs: 60
            })
        ));
    }

    #[tokio::test]
    async fn test_get_missing_job() {
        let h = harness(JobServiceConfig::default());
        assert!(matches!(
            h.service.get(404).await,
            Err(AppError::JobNotFound(404))
        ));
    }

    #[test]
    fn test_outcome_transition_respects_budget() {
        let now = timestamp_now();
        let mut job = NewJob {
            tenant_id: "acme".to_string(),
            idempotency_key: None,
            payload: String::new(),
            max_retries: 3,
        }
        .into_model(1, now);

        job.attempt_count = 2;
        assert!(matches!(
            JobService::outcome_transition(&job, ExecutionOutcome::Failed("x".to_string())),
            Transition::Retry { .. }
        ));

        job.attempt_count = 3;
        assert!(matches!(
            JobService::outcome_transition(&job, ExecutionOutcome::Failed("x".to_string())),
            Transition::DeadLetter { .. }
        ));
        assert_eq!(
            JobService::outcome_transition(&job, ExecutionOutcome::Succeeded),
            Transition::Complete
        );
    }

    #[test]
    fn test_claim_transition() {
        let now = timestamp_now();
        let lease = TimeDelta::minutes(2);
        let mut job = NewJob {
            tenant_id: "acme".to_string(),
            idempotency_key: None,
            payload: String::new(),
            max_retries: 0,
        }
        .into_model(1, now);

        assert_eq!(
            JobService::claim_transition(&job, now, lease),
            Transition::Lease {
                until: lease_until(now, lease)
            }
        );

        job.status = JobStatus::Running;
        assert!(matches!(
            JobService::claim_transition(&job, now, lease),
            Transition::DeadLetter { .. }
        ));

        job.max_retries = 1;
        assert!(matches!(
            JobService::claim_transition(&job, now, lease),
            Transition::Reclaim { .. }
        ));
    }

    #[tokio::test]
    async fn test_resolve_failure_retries_then_dead_letters() {
        let h = harness(JobServiceConfig::default());
        let submitted = h
            .service
            .submit(SubmitJobInput {
                max_retries: Some(1),
                ..submission("acme", None)
            })
            .await
            .unwrap();

        let leased = h.service.claim_batch(5).await.unwrap().remove(0);
        let retried = h
            .service
            .resolve(&leased, ExecutionOutcome::Failed("boom".to_string()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(retried.status, JobStatus::Pending);
        assert_eq!(retried.attempt_count, 1);

        let leased = h.service.claim_batch(5).await.unwrap().remove(0);
        let dead = h
            .service
            .resolve(&leased, ExecutionOutcome::Failed("boom".to_string()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(dead.status, JobStatus::Dlq);
        assert_eq!(dead.attempt_count, 2);
        assert_eq!(dead.last_error.as_deref(), Some("boom"));

        assert_eq!(
            h.events.event_types(submitted.id).await,
            vec![
                event_type::SUBMITTED,
                event_type::LEASED,
                event_type::FAILED,
                event_type::LEASED,
                event_type::DLQ,
            ]
        );
    }

    #[tokio::test]
    async fn test_resolve_with_lost_lease_is_dropped() {
        let h = harness(JobServiceConfig::default());
        h.service.submit(submission("acme", None)).await.unwrap();
        let leased = h.service.claim_batch(5).await.unwrap().remove(0);

        // Another worker reclaimed the job under a new lease
        let mut reclaimed = leased.clone();
        reclaimed.lease_expiry = Some(lease_until(timestamp_now(), TimeDelta::minutes(5)));
        h.store.put(reclaimed).await;

        let result = h
            .service
            .resolve(&leased, ExecutionOutcome::Succeeded)
            .await
            .unwrap();

        assert!(result.is_none());
        let stored = h.store.find_by_id(leased.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Running);
        assert_eq!(stored.attempt_count, 0);
    }

    #[tokio::test]
    async fn test_start_records_payload_events() {
        let h = harness(JobServiceConfig::default());
        let job = h
            .service
            .submit(SubmitJobInput {
                payload: r#"{"action":"paint","color":"blue"}"#.to_string(),
                ..submission("acme", None)
            })
            .await
            .unwrap();

        h.service.start(&job).await;

        assert_eq!(
            h.events.event_types(job.id).await,
            vec![event_type::SUBMITTED, event_type::STARTED, "COLOR"]
        );
    }

    #[tokio::test]
    async fn test_custom_payload_table() {
        let h = harness(JobServiceConfig::default());
        let service = h.service.clone().with_payload_events(PayloadEventTable::new(Vec::new()));
        let job = service
            .submit(SubmitJobInput {
                payload: r#"{"color":"blue"}"#.to_string(),
                ..submission("acme", None)
            })
            .await
            .unwrap();

        service.start(&job).await;

        assert_eq!(
            h.events.event_types(job.id).await,
            vec![event_type::SUBMITTED, event_type::STARTED]
        );
        assert_eq!(service.job_events(job.id).await.unwrap().len(), 2);
    }
}
