//! Common utilities and shared types for jobq.
//!
//! This crate provides foundational components used across all jobq crates:
//!
//! - **Configuration**: Application settings via [`Config`]
//! - **Error handling**: Unified error types via [`AppError`] and [`AppResult`]
//!
//! # Example
//!
//! ```no_run
//! use jobq_common::Config;
//!
//! fn example() -> Result<(), config::ConfigError> {
//!     let config = Config::load()?;
//!     println!("Claiming {} jobs per cycle", config.worker.batch_size);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;

pub use config::{AdmissionConfig, Config, DatabaseConfig, ServerConfig, WorkerConfig};
pub use error::{AppError, AppResult};
