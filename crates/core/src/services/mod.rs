//! Business logic services.

pub mod event_recorder;
pub mod job;
pub mod payload_events;
pub mod rate_limit;

pub use event_recorder::{
    EventRecorder, EventRecorderService, MemoryEventRecorder, NoOpEventRecorder,
    RepositoryEventRecorder, event_type,
};
pub use job::{
    ExecutionOutcome, JobService, JobServiceConfig, LEASE_EXPIRED_ERROR, SubmitJobInput,
};
pub use payload_events::{PayloadEvent, PayloadEventRule, PayloadEventTable};
pub use rate_limit::{RateLimitConfig, RateLimiter};
