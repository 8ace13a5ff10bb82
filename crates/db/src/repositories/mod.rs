//! Database repositories.

pub mod job;
pub mod job_event;

pub use job::JobRepository;
pub use job_event::JobEventRepository;
