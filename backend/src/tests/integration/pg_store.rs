// Postgres-backed store tests. Skipped unless TEST_DATABASE_URL points at a scratch database.

use autoflow_shared::{JobStatus, QueueJob, ResultStatus, RunStatus, StepResult};
use chrono::Utc;
use serde_json::{json, Map, Value};
use serial_test::serial;
use sqlx::PgPool;
use std::sync::Arc;

use crate::database;
use crate::store::{PgAutomationStore, QueueStore, RecordStore, RunStore, StepTransition};
use crate::tests::fixtures::{user_payload, workflow_input};
use crate::workflows::{ActionSpec, WorkflowEngine};

async fn test_store() -> Option<Arc<PgAutomationStore>> {
    let url = std::env::var("TEST_DATABASE_URL").ok()?;
    let pool = PgPool::connect(&url).await.expect("Failed to connect to test database");
    database::migrate(&pool).await.expect("Failed to run migrations");

    for table in [
        "automation_queue",
        "automation_logs",
        "automation_runs",
        "workflows",
        "user_tags",
        "support_tickets",
    ] {
        sqlx::query(&format!("TRUNCATE TABLE {} CASCADE", table))
            .execute(&pool)
            .await
            .expect("truncate failed");
    }

    Some(Arc::new(PgAutomationStore::new(pool)))
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

#[tokio::test]
#[serial]
async fn test_dispatch_claim_and_resolve() {
    let Some(store) = test_store().await else {
        return;
    };
    let engine = WorkflowEngine::new(store.clone());

    engine
        .create_workflow(workflow_input(
            "user.created",
            None,
            vec![ActionSpec::tag_user("{{user.id}}", "a"), ActionSpec::tag_user("{{user.id}}", "b")],
        ))
        .await
        .unwrap();
    let run_id = engine.dispatch("user.created", user_payload("u1", "pro")).await.unwrap()[0];

    let now = Utc::now();
    let due = store.due_jobs(now, 10).await.unwrap();
    assert_eq!(due.len(), 1);
    let job = &due[0];

    assert!(store.claim_job(job.id, now).await.unwrap());
    assert!(!store.claim_job(job.id, now).await.unwrap());
    assert!(store.due_jobs(now, 10).await.unwrap().is_empty());

    let result = StepResult {
        step_index: 0,
        action_type: "tag_user".to_string(),
        status: ResultStatus::Success,
        output: Some(json!({"tag": "a"})),
        error: None,
        attempts: 1,
        duration_ms: 2,
        completed_at: now,
    };
    let next = QueueJob::new(run_id, 1, now);
    assert!(store
        .resolve_step(job.id, now, run_id, &result, StepTransition::Next(next.clone()), now)
        .await
        .unwrap());

    let jobs = store.jobs_for_run(run_id).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].id, next.id);
    assert_eq!(jobs[0].status, JobStatus::Queued);

    let run = store.get_run(run_id).await.unwrap().unwrap();
    assert_eq!(run.results, vec![result.clone()]);
    assert_eq!(run.status, RunStatus::Running);

    assert!(store.claim_job(next.id, now).await.unwrap());
    let stale = StepResult { step_index: 1, ..result.clone() };
    // a claim stamped at another instant no longer owns the job
    let other = now - chrono::Duration::seconds(5);
    assert!(!store
        .resolve_step(next.id, other, run_id, &stale, StepTransition::Complete, now)
        .await
        .unwrap());
    assert!(!store.delete_job(next.id, other).await.unwrap());
    assert!(store
        .resolve_step(next.id, now, run_id, &stale, StepTransition::Complete, now)
        .await
        .unwrap());

    let run = store.get_run(run_id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.results.len(), 2);
    assert!(store.jobs_for_run(run_id).await.unwrap().is_empty());
}

#[tokio::test]
#[serial]
async fn test_record_operations() {
    let Some(store) = test_store().await else {
        return;
    };

    let tag = object(json!({"user_id": "u1", "tag": "pro"}));
    assert!(store.upsert_record("user_tags", &tag, &["user_id", "tag"]).await.unwrap());
    assert!(!store.upsert_record("user_tags", &tag, &["user_id", "tag"]).await.unwrap());

    store
        .insert_record("support_tickets", &object(json!({"id": "t-1", "subject": "Help"})))
        .await
        .unwrap();
    let affected = store
        .update_records(
            "support_tickets",
            &object(json!({"id": "t-1"})),
            &object(json!({"assigned_to": "staff-1"})),
        )
        .await
        .unwrap();
    assert_eq!(affected, 1);

    let assigned: Option<String> = sqlx::query_scalar("SELECT assigned_to FROM support_tickets WHERE id = 't-1'")
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert_eq!(assigned.as_deref(), Some("staff-1"));

    assert!(store
        .insert_record("support_tickets; DROP TABLE workflows", &object(json!({"id": "x"})))
        .await
        .is_err());
}
