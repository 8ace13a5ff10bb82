//! Database layer for jobq.
//!
//! Owns the `job` and `job_event` tables and the [`JobStore`] contract the
//! scheduler and lifecycle manager build on. [`JobRepository`] implements it
//! on `PostgreSQL`; [`InMemoryJobStore`] implements it for tests and local runs.

pub mod entities;
pub mod memory;
pub mod migrations;
pub mod repositories;
pub mod store;
#[cfg(feature = "test-utils")]
pub mod test_utils;

pub use memory::InMemoryJobStore;
pub use repositories::{JobEventRepository, JobRepository};
pub use store::{
    ClaimPolicy, ClaimedJob, InsertOutcome, JobCounts, JobFilter, JobStore, JobStoreService,
    NewJob, Transition, lease_until, timestamp_now,
};

use jobq_common::{AppError, Config};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use std::time::Duration;
use tracing::log::LevelFilter;

/// Initialize database connection.
pub async fn init(config: &Config) -> Result<DatabaseConnection, AppError> {
    let mut opt = ConnectOptions::new(&config.database.url);

    opt.max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .connect_timeout(Duration::from_secs(10))
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .sqlx_logging(true)
        .sqlx_logging_level(LevelFilter::Debug);

    Database::connect(opt)
        .await
        .map_err(|e| AppError::Database(e.to_string()))
}

/// Run pending migrations.
pub async fn migrate(db: &DatabaseConnection) -> Result<(), AppError> {
    use sea_orm_migration::MigratorTrait;
    migrations::Migrator::up(db, None)
        .await
        .map_err(|e| AppError::Database(e.to_string()))
}
