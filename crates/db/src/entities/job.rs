//! Job entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Lifecycle status of a job.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Waiting to be claimed.
    #[sea_orm(string_value = "PENDING")]
    Pending,
    /// Leased by a worker.
    #[sea_orm(string_value = "RUNNING")]
    Running,
    /// Finished successfully. Terminal.
    #[sea_orm(string_value = "COMPLETED")]
    Completed,
    /// Retry budget exhausted. Terminal.
    #[sea_orm(string_value = "DLQ")]
    Dlq,
}

impl JobStatus {
    /// Statuses that count against a tenant's concurrency cap.
    pub const ACTIVE: [Self; 2] = [Self::Pending, Self::Running];

    /// Wire name of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Dlq => "DLQ",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(Self::Pending),
            "RUNNING" => Ok(Self::Running),
            "COMPLETED" => Ok(Self::Completed),
            "DLQ" | "FAILED_PERMANENTLY" => Ok(Self::Dlq),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// A unit of tenant work.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "job")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    /// Owning tenant.
    #[sea_orm(indexed)]
    pub tenant_id: String,

    /// Caller-supplied deduplication key, unique per tenant.
    #[sea_orm(nullable)]
    pub idempotency_key: Option<String>,

    /// Current lifecycle status.
    pub status: JobStatus,

    /// Opaque payload handed to the handler.
    #[sea_orm(column_type = "Text")]
    pub payload: String,

    /// Execution attempts made so far.
    #[sea_orm(default_value = 0)]
    pub attempt_count: i32,

    /// Failed attempts tolerated before dead-lettering.
    #[sea_orm(default_value = 3)]
    pub max_retries: i32,

    /// End of the current lease. Null when unleased.
    #[sea_orm(nullable)]
    pub lease_expiry: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,

    #[sea_orm(nullable)]
    pub completed_at: Option<DateTimeWithTimeZone>,

    /// Reason reported by the most recent failed attempt.
    #[sea_orm(column_type = "Text", nullable)]
    pub last_error: Option<String>,
}

impl Model {
    /// Whether the scheduler may claim this job at `now`.
    #[must_use]
    pub fn is_claimable(&self, now: DateTimeWithTimeZone) -> bool {
        match self.status {
            JobStatus::Pending => self.lease_expiry.is_none_or(|lease| lease < now),
            JobStatus::Running => self.lease_expiry.is_some_and(|lease| lease < now),
            JobStatus::Completed | JobStatus::Dlq => false,
        }
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::job_event::Entity")]
    Events,
}

impl Related<super::job_event::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Events.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
