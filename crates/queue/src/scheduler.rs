//! Lease scheduler.
//!
//! A fixed-delay loop that claims a batch of jobs and runs the leased ones.
//! Ticks never overlap: each one is awaited before the next is scheduled.

use std::time::Duration;

use futures::StreamExt;
use jobq_common::{AppResult, WorkerConfig};
use jobq_core::JobService;
use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval};

use crate::runner::ExecutionRunner;

/// Shortest delay `run` will poll at; `interval` rejects a zero period.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Delay between claim cycles (default: 5 seconds).
    pub poll_interval: Duration,
    /// Jobs claimed per cycle (default: 5).
    pub batch_size: u64,
    /// Leased jobs executed at once (default: 5).
    pub max_concurrent_executions: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            batch_size: 5,
            max_concurrent_executions: 5,
        }
    }
}

impl From<&WorkerConfig> for SchedulerConfig {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            poll_interval: config.poll_interval().max(MIN_POLL_INTERVAL),
            batch_size: config.batch_size,
            max_concurrent_executions: config.max_concurrent_executions.max(1),
        }
    }
}

/// Claims and dispatches jobs on a fixed delay.
#[derive(Clone)]
pub struct LeaseScheduler {
    jobs: JobService,
    runner: ExecutionRunner,
    config: SchedulerConfig,
}

impl LeaseScheduler {
    #[must_use]
    pub const fn new(jobs: JobService, runner: ExecutionRunner, config: SchedulerConfig) -> Self {
        Self {
            jobs,
            runner,
            config,
        }
    }

    /// Run one claim cycle. Returns how many leased jobs were executed.
    ///
    /// The claim commits before any job runs, so no row lock is held during
    /// execution.
    pub async fn tick(&self) -> AppResult<usize> {
        let leased = self.jobs.claim_batch(self.config.batch_size).await?;
        let count = leased.len();
        if count == 0 {
            return Ok(0);
        }
        tracing::debug!(count, "Claimed jobs");

        futures::stream::iter(leased)
            .for_each_concurrent(self.config.max_concurrent_executions, |job| async move {
                if let Err(e) = self.runner.run(&job).await {
                    tracing::error!(
                        job_id = job.id,
                        tenant_id = %job.tenant_id,
                        error = %e,
                        "Failed to run job"
                    );
                }
            })
            .await;

        Ok(count)
    }

    /// Loop until `shutdown` flips to `true` or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let period = self.config.poll_interval.max(MIN_POLL_INTERVAL);
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            poll_interval_ms = period.as_millis() as u64,
            batch_size = self.config.batch_size,
            "Lease scheduler started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }
            if *shutdown.borrow() {
                break;
            }

            match self.tick().await {
                Ok(count) => {
                    if count > 0 {
                        tracing::info!(count, "Processed leased jobs");
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Claim cycle failed");
                }
            }
        }

        tracing::info!("Lease scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduler_config_default() {
        let config = SchedulerConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.batch_size, 5);
        assert_eq!(config.max_concurrent_executions, 5);
    }

    #[test]
    fn test_scheduler_config_from_worker() {
        let worker = WorkerConfig {
            poll_interval_secs: 2,
            batch_size: 10,
            max_concurrent_executions: 0,
            ..WorkerConfig::default()
        };
        let config = SchedulerConfig::from(&worker);

        assert_eq!(config.poll_interval, Duration::from_secs(2));
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.max_concurrent_executions, 1);
    }

    #[test]
    fn test_zero_poll_interval_is_clamped() {
        let worker = WorkerConfig {
            poll_interval_secs: 0,
            ..WorkerConfig::default()
        };
        let config = SchedulerConfig::from(&worker);

        assert_eq!(config.poll_interval, MIN_POLL_INTERVAL);
    }
}
