//! Database entities.

#![allow(missing_docs)]

pub mod job;
pub mod job_event;

pub use job::{Entity as Job, JobStatus};
pub use job_event::Entity as JobEvent;
