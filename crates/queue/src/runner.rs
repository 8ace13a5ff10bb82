//! Execution runner.
//!
//! Runs one leased attempt: reload, record `STARTED`, invoke the payload
//! handler, hand the outcome to [`JobService::resolve`].

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use jobq_common::AppResult;
use jobq_core::{ExecutionOutcome, JobService};
use jobq_db::entities::{JobStatus, job};
use tracing::{debug, info, warn};

/// Executes a job payload.
#[async_trait]
pub trait PayloadHandler: Send + Sync {
    /// Execute one attempt. `Err` carries the failure reason.
    async fn execute(&self, payload: &str) -> Result<(), String>;
}

/// Adapts a synchronous closure into a [`PayloadHandler`].
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F> PayloadHandler for FnHandler<F>
where
    F: Fn(&str) -> Result<(), String> + Send + Sync,
{
    async fn execute(&self, payload: &str) -> Result<(), String> {
        (self.0)(payload)
    }
}

/// Logs the payload and succeeds.
#[derive(Debug, Clone, Default)]
pub struct LogPayloadHandler;

#[async_trait]
impl PayloadHandler for LogPayloadHandler {
    async fn execute(&self, payload: &str) -> Result<(), String> {
        info!(payload, "Executing job payload");
        Ok(())
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("handler panicked: {detail}")
}

/// Runs leased jobs through a [`PayloadHandler`].
#[derive(Clone)]
pub struct ExecutionRunner {
    jobs: JobService,
    handler: Arc<dyn PayloadHandler>,
}

impl ExecutionRunner {
    #[must_use]
    pub fn new(jobs: JobService, handler: Arc<dyn PayloadHandler>) -> Self {
        Self { jobs, handler }
    }

    /// Run the attempt `leased` was claimed for.
    ///
    /// Returns the resolved row, or `None` if there was nothing to run or the
    /// lease was lost before the result could be written. An attempt whose
    /// lease was reclaimed while it waited to start is skipped; the new holder
    /// runs it.
    pub async fn run(&self, leased: &job::Model) -> AppResult<Option<job::Model>> {
        let job_id = leased.id;
        let Some(job) = self.jobs.find(job_id).await? else {
            debug!(job_id, "Job vanished before execution");
            return Ok(None);
        };
        if job.status != JobStatus::Running {
            debug!(job_id, status = %job.status, "Job is not leased; skipping");
            return Ok(None);
        }
        if job.lease_expiry != leased.lease_expiry {
            debug!(job_id, "Lease was reclaimed before execution; skipping");
            return Ok(None);
        }

        self.jobs.start(&job).await;

        let outcome = match AssertUnwindSafe(self.handler.execute(&job.payload))
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => ExecutionOutcome::Succeeded,
            Ok(Err(reason)) => ExecutionOutcome::Failed(reason),
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                warn!(job_id, tenant_id = %job.tenant_id, reason = %reason, "Payload handler panicked");
                ExecutionOutcome::Failed(reason)
            }
        };

        self.jobs.resolve(&job, outcome).await
    }
}
