//! Core business logic for jobq.
//!
//! - **Admission**: per-tenant sliding-window [`RateLimiter`]
//! - **Lifecycle**: [`JobService`] submits, claims and resolves jobs
//! - **Audit**: [`EventRecorder`] implementations and the payload event table

pub mod services;

pub use services::*;
