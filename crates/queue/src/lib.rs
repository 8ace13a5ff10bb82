//! Job execution for jobq.
//!
//! - **Scheduler**: [`LeaseScheduler`] claims batches on a fixed delay
//! - **Runner**: [`ExecutionRunner`] executes one leased attempt
//! - **Handlers**: the [`PayloadHandler`] seam and its stock implementations

pub mod runner;
pub mod scheduler;

pub use runner::{ExecutionRunner, FnHandler, LogPayloadHandler, PayloadHandler};
pub use scheduler::{LeaseScheduler, SchedulerConfig};
