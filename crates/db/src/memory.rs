//! In-memory job store for tests and local development.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use jobq_common::AppResult;
use sea_orm::prelude::DateTimeWithTimeZone;
use tokio::sync::Mutex;

use crate::entities::{JobStatus, job};
use crate::store::{
    ClaimPolicy, ClaimedJob, InsertOutcome, JobCounts, JobFilter, JobStore, NewJob, Transition,
};

#[derive(Debug, Default)]
struct State {
    jobs: BTreeMap<i64, job::Model>,
    next_id: i64,
}

/// Job store holding every row behind one async mutex.
///
/// Each operation runs under the lock, so a claim is trivially atomic.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    state: Mutex<State>,
}

impl InMemoryJobStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Overwrite a stored row, e.g. to age a lease in tests.
    pub async fn put(&self, job: job::Model) {
        let mut state = self.state.lock().await;
        state.next_id = state.next_id.max(job.id);
        state.jobs.insert(job.id, job);
    }

    /// Number of stored jobs.
    pub async fn len(&self) -> usize {
        self.state.lock().await.jobs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, new: NewJob, now: DateTimeWithTimeZone) -> AppResult<InsertOutcome> {
        let mut state = self.state.lock().await;

        if let Some(key) = &new.idempotency_key {
            let existing = state.jobs.values().find(|j| {
                j.tenant_id == new.tenant_id && j.idempotency_key.as_ref() == Some(key)
            });
            if let Some(existing) = existing {
                return Ok(InsertOutcome::Existing(existing.clone()));
            }
        }

        state.next_id += 1;
        let job = new.into_model(state.next_id, now);
        state.jobs.insert(job.id, job.clone());
        Ok(InsertOutcome::Created(job))
    }

    async fn find_by_id(&self, id: i64) -> AppResult<Option<job::Model>> {
        Ok(self.state.lock().await.jobs.get(&id).cloned())
    }

    async fn find_by_idempotency_key(
        &self,
        tenant_id: &str,
        key: &str,
    ) -> AppResult<Option<job::Model>> {
        let state = self.state.lock().await;
        Ok(state
            .jobs
            .values()
            .find(|j| j.tenant_id == tenant_id && j.idempotency_key.as_deref() == Some(key))
            .cloned())
    }

    async fn count_active(&self, tenant_id: &str) -> AppResult<u64> {
        let state = self.state.lock().await;
        Ok(state
            .jobs
            .values()
            .filter(|j| j.tenant_id == tenant_id && JobStatus::ACTIVE.contains(&j.status))
            .count() as u64)
    }

    async fn list(&self, filter: &JobFilter) -> AppResult<Vec<job::Model>> {
        let state = self.state.lock().await;
        let mut jobs: Vec<_> = state
            .jobs
            .values()
            .filter(|j| filter.matches(j))
            .cloned()
            .collect();
        jobs.sort_by_key(|j| (j.created_at, j.id));
        Ok(jobs)
    }

    async fn counts_by_status(&self, tenant_id: Option<&str>) -> AppResult<JobCounts> {
        let state = self.state.lock().await;
        Ok(state
            .jobs
            .values()
            .filter(|j| tenant_id.is_none_or(|t| t == j.tenant_id))
            .map(|j| (j.status, 1))
            .collect())
    }

    async fn claim(
        &self,
        now: DateTimeWithTimeZone,
        limit: u64,
        policy: ClaimPolicy<'_>,
    ) -> AppResult<Vec<ClaimedJob>> {
        let mut state = self.state.lock().await;

        let mut eligible: Vec<_> = state
            .jobs
            .values()
            .filter(|j| j.is_claimable(now))
            .map(|j| (j.created_at, j.id))
            .collect();
        eligible.sort_unstable();
        eligible.truncate(usize::try_from(limit).unwrap_or(usize::MAX));

        let mut claimed = Vec::with_capacity(eligible.len());
        for (_, id) in eligible {
            let Some(row) = state.jobs.get_mut(&id) else {
                continue;
            };
            let transition = policy(&*row);
            transition.apply(row, now);
            claimed.push(ClaimedJob {
                job: row.clone(),
                transition,
            });
        }

        Ok(claimed)
    }

    async fn apply(
        &self,
        current: &job::Model,
        transition: &Transition,
        now: DateTimeWithTimeZone,
    ) -> AppResult<Option<job::Model>> {
        let mut state = self.state.lock().await;

        let Some(row) = state.jobs.get_mut(&current.id) else {
            return Ok(None);
        };
        if row.status != JobStatus::Running
            || row.lease_expiry.is_none()
            || row.lease_expiry != current.lease_expiry
        {
            return Ok(None);
        }

        transition.apply(row, now);
        Ok(Some(row.clone()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::store::{lease_until, timestamp_now};
    use chrono::TimeDelta;

    fn new_job(tenant: &str, key: Option<&str>) -> NewJob {
        NewJob {
            tenant_id: tenant.to_string(),
            idempotency_key: key.map(str::to_string),
            payload: "{}".to_string(),
            max_retries: 3,
        }
    }

    fn lease_policy(now: DateTimeWithTimeZone) -> impl Fn(&job::Model) -> Transition + Send + Sync {
        move |_| Transition::Lease {
            until: lease_until(now, TimeDelta::minutes(2)),
        }
    }

    #[tokio::test]
    async fn test_insert_deduplicates_per_tenant() {
        let store = InMemoryJobStore::new();
        let now = timestamp_now();

        let first = store.insert(new_job("acme", Some("k")), now).await.unwrap();
        let second = store.insert(new_job("acme", Some("k")), now).await.unwrap();
        let other = store.insert(new_job("globex", Some("k")), now).await.unwrap();

        assert!(matches!(first, InsertOutcome::Created(_)));
        assert!(matches!(second, InsertOutcome::Existing(_)));
        assert_eq!(first.into_job().id, second.into_job().id);
        assert!(matches!(other, InsertOutcome::Created(_)));
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_jobs_without_key_are_never_deduplicated() {
        let store = InMemoryJobStore::new();
        let now = timestamp_now();

        store.insert(new_job("acme", None), now).await.unwrap();
        store.insert(new_job("acme", None), now).await.unwrap();

        assert_eq!(store.count_active("acme").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_claim_oldest_first_up_to_limit() {
        let store = InMemoryJobStore::new();
        let now = timestamp_now();
        for offset in [3, 1, 2] {
            let mut job = new_job("acme", None).into_model(offset, now - TimeDelta::seconds(offset));
            job.payload = format!("job-{offset}");
            store.put(job).await;
        }

        let claimed = store.claim(now, 2, &lease_policy(now)).await.unwrap();

        let payloads: Vec<_> = claimed.iter().map(|c| c.job.payload.as_str()).collect();
        assert_eq!(payloads, ["job-3", "job-2"]);
        assert!(claimed.iter().all(ClaimedJob::is_runnable));
        assert!(claimed.iter().all(|c| matches!(c.transition, Transition::Lease { .. })));
    }

    #[tokio::test]
    async fn test_claimed_jobs_are_not_claimed_again() {
        let store = InMemoryJobStore::new();
        let now = timestamp_now();
        store.insert(new_job("acme", None), now).await.unwrap();

        let first = store.claim(now, 5, &lease_policy(now)).await.unwrap();
        let second = store.claim(now, 5, &lease_policy(now)).await.unwrap();

        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn test_apply_rejects_stale_lease() {
        let store = InMemoryJobStore::new();
        let now = timestamp_now();
        store.insert(new_job("acme", None), now).await.unwrap();
        let claimed = store.claim(now, 1, &lease_policy(now)).await.unwrap();
        let leased = claimed[0].job.clone();

        let mut stale = leased.clone();
        stale.lease_expiry = Some(now);

        let dropped = store.apply(&stale, &Transition::Complete, now).await.unwrap();
        assert!(dropped.is_none());

        let applied = store.apply(&leased, &Transition::Complete, now).await.unwrap();
        assert_eq!(applied.unwrap().status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_counts_by_status() {
        let store = InMemoryJobStore::new();
        let now = timestamp_now();
        store.insert(new_job("acme", None), now).await.unwrap();
        store.insert(new_job("acme", None), now).await.unwrap();
        store.insert(new_job("globex", None), now).await.unwrap();
        store.claim(now, 1, &lease_policy(now)).await.unwrap();

        let acme = store.counts_by_status(Some("acme")).await.unwrap();
        assert_eq!(acme.running, 1);
        assert_eq!(acme.pending, 1);
        assert_eq!(acme.total, 2);

        let global = store.counts_by_status(None).await.unwrap();
        assert_eq!(global.total, 3);
    }
}
