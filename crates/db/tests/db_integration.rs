//! Database integration tests.
//!
//! These tests require a running `PostgreSQL` instance.
//! Run with: `cargo test -p jobq-db --features pg-tests --test db_integration`
//!
//! Environment variables:
//!   `TEST_DB_HOST` (default: localhost)
//!   `TEST_DB_PORT` (default: 5433)
//!   `TEST_DB_USER` (default: `jobq_test`)
//!   `TEST_DB_PASSWORD` (default: `jobq_test`)

#![cfg(feature = "pg-tests")]
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashSet;
use std::sync::Arc;

use chrono::TimeDelta;
use jobq_db::entities::{JobStatus, job};
use jobq_db::test_utils::TestDatabase;
use jobq_db::{
    InsertOutcome, JobRepository, JobStore, NewJob, Transition, lease_until, timestamp_now,
};

fn new_job(key: Option<&str>) -> NewJob {
    NewJob {
        tenant_id: "acme".to_string(),
        idempotency_key: key.map(str::to_string),
        payload: r#"{"action":"noop"}"#.to_string(),
        max_retries: 3,
    }
}

fn lease(_: &job::Model) -> Transition {
    Transition::Lease {
        until: lease_until(timestamp_now(), TimeDelta::minutes(2)),
    }
}

#[tokio::test]
async fn test_concurrent_claims_are_disjoint() {
    let db = TestDatabase::create_unique().await.expect("Failed to connect");
    let repo = JobRepository::new(Arc::new(db.conn.clone()));

    for _ in 0..8 {
        repo.insert(new_job(None), timestamp_now()).await.unwrap();
    }

    let now = timestamp_now();
    let (a, b) = tokio::join!(repo.claim(now, 5, &lease), repo.claim(now, 5, &lease));
    let (a, b) = (a.unwrap(), b.unwrap());

    let ids: HashSet<i64> = a.iter().chain(b.iter()).map(|c| c.job.id).collect();
    assert_eq!(ids.len(), a.len() + b.len());
    assert_eq!(ids.len(), 8);

    db.drop_database().await.unwrap();
}

#[tokio::test]
async fn test_duplicate_key_resolves_to_existing_row() {
    let db = TestDatabase::create_unique().await.expect("Failed to connect");
    let repo = JobRepository::new(Arc::new(db.conn.clone()));

    let (a, b) = tokio::join!(
        repo.insert(new_job(Some("order-42")), timestamp_now()),
        repo.insert(new_job(Some("order-42")), timestamp_now()),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    let created = [&a, &b]
        .iter()
        .filter(|o| matches!(o, InsertOutcome::Created(_)))
        .count();
    assert_eq!(created, 1);
    assert_eq!(a.into_job().id, b.into_job().id);

    db.drop_database().await.unwrap();
}

#[tokio::test]
async fn test_lease_fence_survives_round_trip() {
    let db = TestDatabase::create_unique().await.expect("Failed to connect");
    let repo = JobRepository::new(Arc::new(db.conn.clone()));
    repo.insert(new_job(None), timestamp_now()).await.unwrap();

    let claimed = repo.claim(timestamp_now(), 1, &lease).await.unwrap();
    let leased = repo.find_by_id(claimed[0].job.id).await.unwrap().unwrap();

    let done = repo
        .apply(&leased, &Transition::Complete, timestamp_now())
        .await
        .unwrap()
        .expect("lease should still be held");
    assert_eq!(done.status, JobStatus::Completed);

    // Second resolution of the same attempt is fenced out
    let again = repo
        .apply(&leased, &Transition::Complete, timestamp_now())
        .await
        .unwrap();
    assert!(again.is_none());

    let counts = repo.counts_by_status(Some("acme")).await.unwrap();
    assert_eq!(counts.completed, 1);
    assert_eq!(counts.total, 1);

    db.drop_database().await.unwrap();
}
