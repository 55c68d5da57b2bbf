// crates/db/tests/queue_test.rs
// Coordinator semantics: claiming, leases, retry/dead-letter, reclaim,
// dedupe, and cancellation.

use docwright_core::{JobSpec, JobStatus, RetryPolicy};
use docwright_db::{Database, DbError, RetryOutcome};

const LEASE_MS: i64 = 30_000;

fn spec(repo: &str) -> JobSpec {
    JobSpec {
        repository: repo.to_string(),
        repo_path: format!("/tmp/{repo}"),
        profile: None,
    }
}

fn no_jitter_policy() -> RetryPolicy {
    RetryPolicy {
        base_ms: 100,
        multiplier: 2.0,
        cap_ms: 10_000,
        jitter_ms: 0,
    }
}

async fn mem_db() -> Database {
    Database::new_in_memory().await.expect("in-memory db")
}

#[tokio::test]
async fn test_create_and_get_job() {
    let db = mem_db().await;
    let created = db.create_job(&spec("acme/widget"), None, 3).await.unwrap();
    assert!(!created.deduped);

    let job = db.get_job(&created.id).await.unwrap().expect("job exists");
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.attempts, 0);
    assert_eq!(job.max_attempts, 3);
    assert_eq!(job.repository, "acme/widget");
    assert_eq!(job.spec.repo_path, "/tmp/acme/widget");
    assert!(job.run_at.is_none());
    assert!(job.locked_by.is_none());
}

#[tokio::test]
async fn test_get_unknown_job_is_none() {
    let db = mem_db().await;
    assert!(db.get_job("nope").await.unwrap().is_none());
}

#[tokio::test]
async fn test_claim_on_empty_queue_returns_none() {
    let db = mem_db().await;
    assert!(db.claim_one("w1", LEASE_MS).await.unwrap().is_none());
}

#[tokio::test]
async fn test_claim_sets_lock_fields() {
    let db = mem_db().await;
    let created = db.create_job(&spec("r"), None, 3).await.unwrap();

    let job = db.claim_one("w1", LEASE_MS).await.unwrap().expect("claims");
    assert_eq!(job.id, created.id);
    assert_eq!(job.status, JobStatus::Claimed);
    assert_eq!(job.locked_by.as_deref(), Some("w1"));
    let lease = job.lease_until.expect("lease set");
    assert!(lease > job.updated_at, "lease extends beyond claim time");

    // Nothing left to claim.
    assert!(db.claim_one("w2", LEASE_MS).await.unwrap().is_none());
}

#[tokio::test]
async fn test_concurrent_claims_exactly_one_winner() {
    // File-based DB: real lock contention across pool connections.
    let tmp = tempfile::tempdir().unwrap();
    let db = Database::new(&tmp.path().join("race.db")).await.unwrap();
    db.create_job(&spec("r"), None, 3).await.unwrap();

    let mut handles = Vec::new();
    for i in 0..8 {
        let db = db.clone();
        handles.push(tokio::spawn(async move {
            db.claim_one(&format!("w{i}"), LEASE_MS).await.unwrap()
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap().is_some() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1, "exactly one concurrent claimer may win");
}

#[tokio::test]
async fn test_claim_respects_run_at() {
    let db = mem_db().await;
    let created = db.create_job(&spec("r"), None, 3).await.unwrap();

    // Push eligibility into the future.
    let future = chrono::Utc::now().timestamp_millis() + 60_000;
    sqlx::query("UPDATE jobs SET run_at = ?1 WHERE id = ?2")
        .bind(future)
        .bind(&created.id)
        .execute(db.pool())
        .await
        .unwrap();

    assert!(db.claim_one("w1", LEASE_MS).await.unwrap().is_none());
}

#[tokio::test]
async fn test_claim_prefers_oldest_pending() {
    let db = mem_db().await;
    let first = db.create_job(&spec("a"), None, 3).await.unwrap();
    let second = db.create_job(&spec("b"), None, 3).await.unwrap();

    // Force distinct creation times (same-millisecond inserts tie otherwise).
    sqlx::query("UPDATE jobs SET created_at = created_at - 1000 WHERE id = ?1")
        .bind(&first.id)
        .execute(db.pool())
        .await
        .unwrap();

    let job = db.claim_one("w1", LEASE_MS).await.unwrap().unwrap();
    assert_eq!(job.id, first.id);
    let job = db.claim_one("w1", LEASE_MS).await.unwrap().unwrap();
    assert_eq!(job.id, second.id);
}

#[tokio::test]
async fn test_heartbeat_extends_lease() {
    let db = mem_db().await;
    let created = db.create_job(&spec("r"), None, 3).await.unwrap();
    let job = db.claim_one("w1", 1_000).await.unwrap().unwrap();
    let short_lease = job.lease_until.unwrap();

    let cancel = db.heartbeat(&created.id, "w1", 60_000).await.unwrap();
    assert!(!cancel);

    let job = db.get_job(&created.id).await.unwrap().unwrap();
    assert!(job.lease_until.unwrap() > short_lease);
}

#[tokio::test]
async fn test_heartbeat_by_non_owner_is_lease_conflict() {
    let db = mem_db().await;
    let created = db.create_job(&spec("r"), None, 3).await.unwrap();
    db.claim_one("w1", LEASE_MS).await.unwrap().unwrap();

    let err = db.heartbeat(&created.id, "w2", LEASE_MS).await.unwrap_err();
    assert!(matches!(err, DbError::LeaseConflict { .. }));
}

#[tokio::test]
async fn test_heartbeat_after_reclaim_is_lease_conflict() {
    let db = mem_db().await;
    let created = db.create_job(&spec("r"), None, 3).await.unwrap();
    db.claim_one("w1", 0).await.unwrap().unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert_eq!(db.reclaim_expired().await.unwrap(), 1);

    // Ownership moved; the old holder must never silently succeed.
    let err = db.heartbeat(&created.id, "w1", LEASE_MS).await.unwrap_err();
    assert!(matches!(err, DbError::LeaseConflict { .. }));

    let job = db.get_job(&created.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.last_error.as_deref(), Some("Lease expired"));
    assert!(job.locked_by.is_none());
}

#[tokio::test]
async fn test_reclaim_leaves_live_leases_alone() {
    let db = mem_db().await;
    let expired = db.create_job(&spec("a"), None, 3).await.unwrap();
    db.claim_one("w1", 0).await.unwrap().unwrap();

    let live = db.create_job(&spec("b"), None, 3).await.unwrap();
    db.claim_one("w2", 60_000).await.unwrap().unwrap();

    let untouched = db.create_job(&spec("c"), None, 3).await.unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert_eq!(db.reclaim_expired().await.unwrap(), 1);

    let a = db.get_job(&expired.id).await.unwrap().unwrap();
    assert_eq!(a.status, JobStatus::Pending);
    let b = db.get_job(&live.id).await.unwrap().unwrap();
    assert_eq!(b.status, JobStatus::Claimed);
    assert_eq!(b.locked_by.as_deref(), Some("w2"));
    let c = db.get_job(&untouched.id).await.unwrap().unwrap();
    assert_eq!(c.status, JobStatus::Pending);
    assert!(c.last_error.is_none());
}

#[tokio::test]
async fn test_complete_job_stores_result() {
    let db = mem_db().await;
    let created = db.create_job(&spec("r"), None, 3).await.unwrap();
    db.claim_one("w1", LEASE_MS).await.unwrap().unwrap();

    let result = serde_json::json!({"documents": 7, "warnings": []});
    db.complete_job(&created.id, "w1", &result).await.unwrap();

    let job = db.get_job(&created.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.locked_by.is_none());
    assert!(job.lease_until.is_none());
    assert!(job.completed_at.is_some());
    assert_eq!(job.result.unwrap()["documents"], 7);
}

#[tokio::test]
async fn test_complete_by_non_owner_is_lease_conflict() {
    let db = mem_db().await;
    let created = db.create_job(&spec("r"), None, 3).await.unwrap();
    db.claim_one("w1", LEASE_MS).await.unwrap().unwrap();

    let err = db
        .complete_job(&created.id, "w2", &serde_json::json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::LeaseConflict { .. }));

    // The rightful owner still completes.
    db.complete_job(&created.id, "w1", &serde_json::json!({}))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_retry_or_fail_progression_to_dead() {
    let db = mem_db().await;
    let policy = no_jitter_policy();
    let created = db.create_job(&spec("r"), None, 3).await.unwrap();

    db.claim_one("w1", LEASE_MS).await.unwrap().unwrap();
    let first = db
        .retry_or_fail(&created.id, "tool exited with code 1", &policy)
        .await
        .unwrap();
    let run_at_1 = match first {
        RetryOutcome::Retried { run_at } => run_at,
        other => panic!("expected retry, got {other:?}"),
    };
    let job = db.get_job(&created.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.attempts, 1);
    assert!(job.locked_by.is_none());

    // Backoff keeps the job ineligible until run_at.
    assert!(db.claim_one("w1", LEASE_MS).await.unwrap().is_none());

    let second = db
        .retry_or_fail(&created.id, "tool exited with code 1", &policy)
        .await
        .unwrap();
    let run_at_2 = match second {
        RetryOutcome::Retried { run_at } => run_at,
        other => panic!("expected retry, got {other:?}"),
    };
    assert!(run_at_2 > run_at_1, "backoff must strictly increase");

    let third = db
        .retry_or_fail(&created.id, "analysis timed out after 30s", &policy)
        .await
        .unwrap();
    assert_eq!(third, RetryOutcome::Dead);

    let job = db.get_job(&created.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Dead);
    assert_eq!(job.attempts, 3);
    assert!(job.completed_at.is_some());
    assert!(job.last_error.unwrap().contains("timed out"));

    // Dead jobs are never auto-revived.
    assert!(db.claim_one("w1", LEASE_MS).await.unwrap().is_none());
    assert_eq!(
        db.retry_or_fail(&created.id, "again", &policy).await.unwrap(),
        RetryOutcome::AlreadyTerminal
    );
}

#[tokio::test]
async fn test_retry_or_fail_unknown_job() {
    let db = mem_db().await;
    let err = db
        .retry_or_fail("missing", "boom", &no_jitter_policy())
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::JobNotFound(_)));
}

#[tokio::test]
async fn test_dedupe_returns_same_id_while_active() {
    let db = mem_db().await;
    let first = db
        .create_job(&spec("acme/widget"), Some("repo-42"), 3)
        .await
        .unwrap();
    let second = db
        .create_job(&spec("acme/widget"), Some("repo-42"), 3)
        .await
        .unwrap();
    assert_eq!(first.id, second.id);
    assert!(second.deduped);

    // Still deduped while the job is claimed.
    db.claim_one("w1", LEASE_MS).await.unwrap().unwrap();
    let third = db
        .create_job(&spec("acme/widget"), Some("repo-42"), 3)
        .await
        .unwrap();
    assert_eq!(third.id, first.id);

    // After completion the key is free again.
    db.complete_job(&first.id, "w1", &serde_json::json!({}))
        .await
        .unwrap();
    let fourth = db
        .create_job(&spec("acme/widget"), Some("repo-42"), 3)
        .await
        .unwrap();
    assert_ne!(fourth.id, first.id);
    assert!(!fourth.deduped);
}

#[tokio::test]
async fn test_different_dedupe_keys_do_not_collide() {
    let db = mem_db().await;
    let a = db.create_job(&spec("a"), Some("repo-1"), 3).await.unwrap();
    let b = db.create_job(&spec("b"), Some("repo-2"), 3).await.unwrap();
    assert_ne!(a.id, b.id);
}

#[tokio::test]
async fn test_request_cancel_pending_job_cancels_immediately() {
    let db = mem_db().await;
    let created = db.create_job(&spec("r"), None, 3).await.unwrap();

    assert!(db.request_cancel(&created.id).await.unwrap());
    let job = db.get_job(&created.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Canceled);
    assert!(job.completed_at.is_some());

    // Terminal: a second request is a no-op, and the job is unclaimable.
    assert!(!db.request_cancel(&created.id).await.unwrap());
    assert!(db.claim_one("w1", LEASE_MS).await.unwrap().is_none());
}

#[tokio::test]
async fn test_cancel_flag_surfaces_through_heartbeat() {
    let db = mem_db().await;
    let created = db.create_job(&spec("r"), None, 3).await.unwrap();
    db.claim_one("w1", LEASE_MS).await.unwrap().unwrap();

    assert!(!db.heartbeat(&created.id, "w1", LEASE_MS).await.unwrap());
    assert!(db.request_cancel(&created.id).await.unwrap());
    assert!(db.heartbeat(&created.id, "w1", LEASE_MS).await.unwrap());

    // The owner acknowledges by marking the job canceled.
    db.mark_canceled(&created.id, "w1").await.unwrap();
    let job = db.get_job(&created.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Canceled);
    assert!(job.locked_by.is_none());
}

#[tokio::test]
async fn test_mark_canceled_by_non_owner_is_lease_conflict() {
    let db = mem_db().await;
    let created = db.create_job(&spec("r"), None, 3).await.unwrap();
    db.claim_one("w1", LEASE_MS).await.unwrap().unwrap();

    let err = db.mark_canceled(&created.id, "w2").await.unwrap_err();
    assert!(matches!(err, DbError::LeaseConflict { .. }));
}

#[tokio::test]
async fn test_queue_metrics_counts() {
    let db = mem_db().await;
    let policy = no_jitter_policy();

    // pending
    db.create_job(&spec("a"), None, 3).await.unwrap();
    // running
    db.create_job(&spec("b"), None, 3).await.unwrap();
    // completed
    db.create_job(&spec("c"), None, 3).await.unwrap();
    // dead (max_attempts = 1 dead-letters on the first failure)
    let doomed = db.create_job(&spec("d"), None, 1).await.unwrap();

    // Claim order is oldest-first, but same-millisecond inserts can tie;
    // pin distinct creation times.
    for (i, repo) in ["a", "b", "c", "d"].iter().enumerate() {
        sqlx::query("UPDATE jobs SET created_at = created_at + ?1 WHERE repository = ?2")
            .bind(i as i64)
            .bind(repo)
            .execute(db.pool())
            .await
            .unwrap();
    }

    let to_retry = db.claim_one("w1", LEASE_MS).await.unwrap().unwrap(); // a
    let _running = db.claim_one("w1", LEASE_MS).await.unwrap().unwrap(); // b
    let to_complete = db.claim_one("w1", LEASE_MS).await.unwrap().unwrap(); // c
    db.complete_job(&to_complete.id, "w1", &serde_json::json!({}))
        .await
        .unwrap();
    assert_eq!(
        db.retry_or_fail(&doomed.id, "boom", &policy).await.unwrap(),
        RetryOutcome::Dead
    );
    // Release the first claim back to pending via retry.
    db.retry_or_fail(&to_retry.id, "flaky", &policy)
        .await
        .unwrap();

    let metrics = db.queue_metrics(60_000).await.unwrap();
    assert_eq!(metrics.pending, 1); // "a", waiting on backoff
    assert_eq!(metrics.running, 1); // "b"
    assert_eq!(metrics.completed_recent, 1); // "c"
    assert_eq!(metrics.dead, 1); // "d"
    assert_eq!(metrics.failed_recent, 2); // one retry + one dead-letter
    assert!(metrics.avg_duration_ms.is_some());
}
