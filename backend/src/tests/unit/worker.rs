use autoflow_shared::{JobStatus, QueueJob, ResultStatus, RunStatus};
use chrono::Duration as ChronoDuration;
use rust_decimal::Decimal;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::jobs::{JobConfig, MaintenanceJobs};
use crate::services::LoggingMailer;
use crate::store::{AutomationStore, LogStore, QueueStore, RecordStore, RunStore};
use crate::tests::fixtures::{payout_review_workflow, ticket_triage_workflow, user_payload, workflow_input};
use crate::tests::helpers::{
    far_future, FlakyHandler, GatedHandler, HandlerExt, OutageStore, RecordingHandler, TestHarness,
};
use crate::workflows::actions::REDACTED;
use crate::workflows::handlers::{
    DelayHandler, ADMIN_NOTIFICATIONS_TABLE, CREATOR_NOTIFICATIONS_TABLE, PAYOUT_REQUESTS_TABLE, SUPPORT_TICKETS_TABLE,
};
use crate::workflows::worker::WORKFLOW_MISSING;
use crate::workflows::{
    ActionExecutor, ActionKind, ActionSpec, AutomationRun, HandlerDeps, RetryPolicy, TriggerEvent, Worker,
    WorkerConfig,
};

fn builtin_executor(harness: &TestHarness) -> ActionExecutor {
    ActionExecutor::with_builtin_handlers(
        HandlerDeps {
            mailer: Arc::new(LoggingMailer),
            records: harness.store.clone(),
            http: reqwest::Client::new(),
        },
        Duration::from_secs(5),
    )
}

#[tokio::test]
async fn test_steps_run_in_order_and_complete_the_run() {
    let harness = TestHarness::new();
    let recorder = Arc::new(RecordingHandler::default());
    let executor = harness.executor()
        .with(ActionKind::TagUser, recorder.clone())
        .with(ActionKind::AdminNotify, recorder.clone());
    let worker = harness.worker(executor);

    harness
        .engine
        .create_workflow(workflow_input(
            "user.created",
            None,
            vec![
                ActionSpec::tag_user("{{user.id}}", "first"),
                ActionSpec::tag_user("{{user.id}}", "after-{{last.step}}"),
                ActionSpec::admin_notify("Welcome {{user.email}}", "steps: {{steps.1.step}}"),
            ],
        ))
        .await
        .unwrap();
    let run_id = harness.engine.dispatch("user.created", user_payload("u1", "free")).await.unwrap()[0];

    // one job per cycle, each step enqueued only after the previous one resolved
    let now = far_future();
    assert_eq!(worker.run_cycle(now).await.unwrap(), 1);
    let pending = harness.store.jobs_for_run(run_id).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].action_step_index, 1);

    harness.drain(&worker, now).await;

    let run = harness.engine.get_run(run_id).await.unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert!(run.completed_at.is_some());
    assert_eq!(
        run.results.iter().map(|r| r.step_index).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );
    assert!(run.results.iter().all(|r| r.status == ResultStatus::Success));

    let calls = recorder.calls();
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[1].action, ActionSpec::tag_user("u1", "after-0"));
    assert_eq!(calls[2].action, ActionSpec::admin_notify("Welcome u1@example.com", "steps: 1"));
    assert!(calls.iter().all(|c| c.attempt == 1));

    assert_eq!(harness.store.logs_for_run(run_id).await.unwrap().len(), 3);
    assert_eq!(worker.stats().snapshot().succeeded, 3);
}

#[tokio::test]
async fn test_transient_failures_retry_with_growing_backoff() {
    let harness = TestHarness::new();
    let flaky = Arc::new(FlakyHandler::new(2));
    let worker = harness.worker_with_retry(
        harness.executor().with(ActionKind::TagUser, flaky.clone()),
        RetryPolicy::default(),
    );

    harness
        .engine
        .create_workflow(workflow_input("user.created", None, vec![ActionSpec::tag_user("u1", "x")]))
        .await
        .unwrap();
    let run_id = harness.engine.dispatch("user.created", json!({})).await.unwrap()[0];

    let t0 = far_future();
    worker.run_cycle(t0).await.unwrap();
    let job = harness.store.jobs_for_run(run_id).await.unwrap().remove(0);
    assert_eq!(job.status, JobStatus::Queued);
    assert_eq!(job.attempts, 1);
    assert_eq!(job.next_attempt_at, t0 + ChronoDuration::seconds(30));
    assert!(job.last_error.is_some());

    // not due yet
    assert_eq!(worker.run_cycle(t0 + ChronoDuration::seconds(10)).await.unwrap(), 0);

    let t1 = t0 + ChronoDuration::seconds(30);
    worker.run_cycle(t1).await.unwrap();
    let job = harness.store.jobs_for_run(run_id).await.unwrap().remove(0);
    assert_eq!(job.attempts, 2);
    assert_eq!(job.next_attempt_at, t1 + ChronoDuration::seconds(60));

    worker.run_cycle(t1 + ChronoDuration::seconds(60)).await.unwrap();

    let run = harness.engine.get_run(run_id).await.unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.results.len(), 1);
    assert_eq!(run.results[0].attempts, 3);

    let logs = harness.store.logs_for_run(run_id).await.unwrap();
    assert_eq!(
        logs.iter().map(|l| (l.attempt, l.result_status)).collect::<Vec<_>>(),
        vec![
            (1, ResultStatus::Failed),
            (2, ResultStatus::Failed),
            (3, ResultStatus::Success)
        ]
    );
    assert_eq!(flaky.calls(), 3);

    let stats = worker.stats().snapshot();
    assert_eq!((stats.retried, stats.succeeded, stats.failed), (2, 1, 0));
}

#[tokio::test]
async fn test_exhausted_retries_fail_the_run() {
    let harness = TestHarness::new();
    let failing = Arc::new(FlakyHandler::always_failing());
    let recorder = Arc::new(RecordingHandler::default());
    let worker = harness.worker(
        harness
            .executor()
            .with(ActionKind::SendWebhook, failing.clone())
            .with(ActionKind::AdminNotify, recorder.clone()),
    );

    harness
        .engine
        .create_workflow(workflow_input(
            "ticket.created",
            None,
            vec![
                ActionSpec::send_webhook("https://hooks.example.com/t", json!({})),
                ActionSpec::admin_notify("never", "sent"),
            ],
        ))
        .await
        .unwrap();
    let run_id = harness.engine.dispatch("ticket.created", json!({})).await.unwrap()[0];

    harness.drain(&worker, far_future()).await;

    let run = harness.engine.get_run(run_id).await.unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    let error = run.error.unwrap();
    assert!(error.contains("failed after 3 attempt(s)"), "{}", error);
    assert_eq!(run.results.len(), 1);
    assert_eq!(run.results[0].status, ResultStatus::Failed);

    let logs = harness.store.logs_for_run(run_id).await.unwrap();
    assert_eq!(logs.len(), 3);
    assert!(logs.iter().all(|l| l.result_status == ResultStatus::Failed));

    assert_eq!(failing.calls(), 3);
    assert!(recorder.calls().is_empty());
    assert!(harness.store.jobs_for_run(run_id).await.unwrap().is_empty());

    let stats = worker.stats().snapshot();
    assert_eq!((stats.retried, stats.failed), (2, 1));
}

#[tokio::test]
async fn test_invalid_interpolated_params_count_as_failures() {
    let harness = TestHarness::new();
    let recorder = Arc::new(RecordingHandler::default());
    let worker = harness.worker_with_retry(
        harness.executor().with(ActionKind::SendEmail, recorder.clone()),
        RetryPolicy {
            max_attempts: 1,
            ..RetryPolicy::default()
        },
    );

    harness
        .engine
        .create_workflow(workflow_input(
            "user.created",
            None,
            vec![ActionSpec::send_email("{{user.email}}", "Hi", "Hello")],
        ))
        .await
        .unwrap();
    // no user.email in the payload, so the recipient renders empty
    let run_id = harness.engine.dispatch("user.created", json!({})).await.unwrap()[0];

    harness.drain(&worker, far_future()).await;

    let run = harness.engine.get_run(run_id).await.unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert!(recorder.calls().is_empty());
    let logs = harness.store.logs_for_run(run_id).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert!(logs[0].error_message.as_deref().unwrap_or_default().contains("Invalid parameters"));
}

#[tokio::test]
async fn test_delay_defers_the_next_step() {
    let harness = TestHarness::new();
    let recorder = Arc::new(RecordingHandler::default());
    let worker = harness.worker(
        harness
            .executor()
            .with(ActionKind::Delay, Arc::new(DelayHandler))
            .with(ActionKind::TagUser, recorder.clone()),
    );

    harness
        .engine
        .create_workflow(workflow_input(
            "user.created",
            None,
            vec![ActionSpec::delay_seconds(60), ActionSpec::tag_user("u1", "later")],
        ))
        .await
        .unwrap();
    let run_id = harness.engine.dispatch("user.created", json!({})).await.unwrap()[0];

    let t0 = far_future();
    worker.run_cycle(t0).await.unwrap();
    let next = harness.store.jobs_for_run(run_id).await.unwrap().remove(0);
    assert_eq!(next.action_step_index, 1);
    assert_eq!(next.next_attempt_at, t0 + ChronoDuration::seconds(60));

    assert_eq!(worker.run_cycle(t0 + ChronoDuration::seconds(30)).await.unwrap(), 0);
    assert!(recorder.calls().is_empty());

    assert_eq!(worker.run_cycle(t0 + ChronoDuration::seconds(60)).await.unwrap(), 1);
    assert_eq!(recorder.calls().len(), 1);
    assert_eq!(harness.engine.get_run(run_id).await.unwrap().status, RunStatus::Completed);
}

#[tokio::test]
async fn test_deleted_workflow_fails_pending_run() {
    let harness = TestHarness::new();
    let recorder = Arc::new(RecordingHandler::default());
    let worker = harness.worker(harness.executor().with(ActionKind::TagUser, recorder.clone()));

    let workflow = harness
        .engine
        .create_workflow(workflow_input("user.created", None, vec![ActionSpec::tag_user("u1", "x")]))
        .await
        .unwrap();
    let run_id = harness.engine.dispatch("user.created", json!({})).await.unwrap()[0];
    harness.engine.delete_workflow(workflow.id).await.unwrap();

    assert_eq!(worker.run_cycle(far_future()).await.unwrap(), 1);

    let run = harness.store.get_run(run_id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.error.as_deref(), Some(WORKFLOW_MISSING));
    assert!(harness.store.all_jobs().is_empty());
    assert!(recorder.calls().is_empty());
    assert_eq!(worker.stats().snapshot().orphaned, 1);
}

#[tokio::test]
async fn test_disabling_a_workflow_does_not_stop_started_runs() {
    let harness = TestHarness::new();
    let recorder = Arc::new(RecordingHandler::default());
    let worker = harness.worker(harness.executor().with(ActionKind::TagUser, recorder.clone()));

    let workflow = harness
        .engine
        .create_workflow(workflow_input("user.created", None, vec![ActionSpec::tag_user("u1", "x")]))
        .await
        .unwrap();
    let run_id = harness.engine.dispatch("user.created", json!({})).await.unwrap()[0];
    harness.engine.toggle_workflow(workflow.id).await.unwrap();

    harness.drain(&worker, far_future()).await;
    assert_eq!(harness.engine.get_run(run_id).await.unwrap().status, RunStatus::Completed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_two_workers_never_process_the_same_job() {
    let harness = TestHarness::new();
    let recorder = Arc::new(RecordingHandler::default());
    let first = harness.worker(harness.executor().with(ActionKind::TagUser, recorder.clone()));
    let second = harness.worker(harness.executor().with(ActionKind::TagUser, recorder.clone()));

    harness
        .engine
        .create_workflow(workflow_input(
            "user.created",
            None,
            vec![ActionSpec::tag_user("{{user.id}}", "a"), ActionSpec::tag_user("{{user.id}}", "b")],
        ))
        .await
        .unwrap();

    let mut run_ids = Vec::new();
    for i in 0..8 {
        run_ids.extend(
            harness
                .engine
                .dispatch("user.created", user_payload(&format!("u{}", i), "free"))
                .await
                .unwrap(),
        );
    }

    let mut now = far_future();
    for _ in 0..10 {
        let (a, b) = tokio::join!(first.run_cycle(now), second.run_cycle(now));
        a.unwrap();
        b.unwrap();
        if harness.store.all_jobs().is_empty() {
            break;
        }
        now += ChronoDuration::seconds(1);
    }

    let mut seen: HashMap<(uuid::Uuid, i32), usize> = HashMap::new();
    for call in recorder.calls() {
        *seen.entry((call.run_id, call.step_index)).or_default() += 1;
    }
    assert_eq!(seen.len(), 16);
    assert!(seen.values().all(|&count| count == 1));

    for run_id in run_ids {
        let run = harness.engine.get_run(run_id).await.unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.results.len(), 2);
    }

    let total = first.stats().snapshot().succeeded + second.stats().snapshot().succeeded;
    assert_eq!(total, 16);
}

#[tokio::test]
async fn test_run_loop_processes_until_cancelled() {
    let harness = TestHarness::new();
    let recorder = Arc::new(RecordingHandler::default());
    let worker = harness.worker(harness.executor().with(ActionKind::TagUser, recorder.clone()));

    harness
        .engine
        .create_workflow(workflow_input("user.created", None, vec![ActionSpec::tag_user("u1", "x")]))
        .await
        .unwrap();
    let run_id = harness.engine.dispatch("user.created", json!({})).await.unwrap()[0];

    let token = CancellationToken::new();
    let loop_token = token.clone();
    let handle = tokio::spawn(async move { worker.run(loop_token).await });

    let engine = harness.engine.clone();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if engine.get_run(run_id).await.unwrap().status == RunStatus::Completed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("run did not complete");

    token.cancel();
    let summary = handle.await.unwrap();
    assert_eq!(summary.succeeded, 1);
    assert_eq!(recorder.calls().len(), 1);
}

#[tokio::test]
async fn test_job_past_the_last_step_completes_the_run() {
    let harness = TestHarness::new();
    let recorder = Arc::new(RecordingHandler::default());
    let worker = harness.worker(harness.executor().with(ActionKind::TagUser, recorder.clone()));

    let workflow = harness
        .engine
        .create_workflow(workflow_input("user.created", None, vec![ActionSpec::tag_user("u1", "x")]))
        .await
        .unwrap();

    let now = far_future();
    let run = AutomationRun {
        id: uuid::Uuid::new_v4(),
        workflow_id: workflow.id,
        workflow_name: workflow.name.clone(),
        trigger_event_type: "user.created".to_string(),
        trigger_data: json!({}),
        actions: workflow.actions.clone(),
        status: RunStatus::Running,
        results: Vec::new(),
        error: None,
        started_at: now,
        completed_at: None,
    };
    // step 1 of a one-step run
    harness
        .store
        .create_run(&run, Some(&QueueJob::new(run.id, 1, now)))
        .await
        .unwrap();

    assert_eq!(worker.run_cycle(now).await.unwrap(), 1);

    let run = harness.engine.get_run(run.id).await.unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert!(run.completed_at.is_some());
    assert!(run.results.is_empty());
    assert!(harness.store.all_jobs().is_empty());
    assert!(recorder.calls().is_empty());
}

#[tokio::test]
async fn test_run_loop_backs_off_while_the_store_is_unavailable() {
    let harness = TestHarness::new();
    let recorder = Arc::new(RecordingHandler::default());
    let store = Arc::new(OutageStore::new(harness.store.clone()));
    let config = WorkerConfig {
        poll_interval: Duration::from_millis(5),
        busy_pause: Duration::from_millis(1),
        error_backoff: Duration::from_millis(20),
        ..WorkerConfig::default()
    };
    let worker = Worker::new(
        store.clone(),
        Arc::new(harness.executor().with(ActionKind::TagUser, recorder.clone())),
        config,
    );

    harness
        .engine
        .create_workflow(workflow_input("user.created", None, vec![ActionSpec::tag_user("u1", "x")]))
        .await
        .unwrap();
    let run_id = harness.engine.dispatch("user.created", json!({})).await.unwrap()[0];

    let token = CancellationToken::new();
    let loop_token = token.clone();
    let handle = tokio::spawn(async move { worker.run(loop_token).await });

    tokio::time::sleep(Duration::from_millis(100)).await;
    let failed_polls = store.polls.load(Ordering::SeqCst);
    assert!(failed_polls >= 2, "worker stopped polling after {} failure(s)", failed_polls);
    // error backoff, not the poll interval, paces a failing store
    assert!(failed_polls <= 10, "{} polls in 100ms", failed_polls);
    assert!(!handle.is_finished());
    assert_eq!(harness.engine.get_run(run_id).await.unwrap().status, RunStatus::Running);

    store.down.store(false, Ordering::SeqCst);
    let engine = harness.engine.clone();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if engine.get_run(run_id).await.unwrap().status == RunStatus::Completed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("run did not complete after the store recovered");

    token.cancel();
    let summary = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("worker did not stop on cancel")
        .unwrap();
    assert_eq!(summary.succeeded, 1);
    assert_eq!(recorder.calls().len(), 1);
}

#[tokio::test]
async fn test_released_claim_leaves_the_step_to_its_new_owner() {
    let harness = TestHarness::new();
    let gate = Arc::new(GatedHandler::default());
    let first = Arc::new(harness.worker(harness.executor().with(ActionKind::TagUser, gate.clone())));
    let second = harness.worker(harness.executor().with(ActionKind::TagUser, gate.clone()));
    let store: Arc<dyn AutomationStore> = harness.store.clone();

    harness
        .engine
        .create_workflow(workflow_input("user.created", None, vec![ActionSpec::tag_user("u1", "x")]))
        .await
        .unwrap();
    let run_id = harness.engine.dispatch("user.created", json!({})).await.unwrap()[0];

    let t0 = far_future();
    let slow = {
        let first = first.clone();
        tokio::spawn(async move { first.run_cycle(t0).await })
    };
    gate.entered.notified().await;

    // the first worker is still inside the handler when recovery gives its job away
    let later = t0 + ChronoDuration::hours(1);
    let released = MaintenanceJobs::recover_stale_jobs(&store, Duration::from_secs(60), later)
        .await
        .unwrap();
    assert_eq!(released, 1);
    assert_eq!(second.run_cycle(later).await.unwrap(), 1);

    gate.release.notify_one();
    assert_eq!(slow.await.unwrap().unwrap(), 1);

    let run = harness.engine.get_run(run_id).await.unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.results.len(), 1);
    assert!(harness.store.all_jobs().is_empty());
    assert_eq!(gate.calls(), 2);

    let stale = first.stats().snapshot();
    assert_eq!((stale.succeeded, stale.lost_claims), (0, 1));
    let owner = second.stats().snapshot();
    assert_eq!((owner.succeeded, owner.lost_claims), (1, 0));
    // both executions happened, so both are logged
    assert_eq!(harness.store.logs_for_run(run_id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_maintenance_never_removes_logs_of_finished_runs() {
    let harness = TestHarness::new();
    let worker = harness.worker(
        harness
            .executor()
            .with(ActionKind::SendWebhook, Arc::new(FlakyHandler::always_failing())),
    );
    let store: Arc<dyn AutomationStore> = harness.store.clone();

    harness
        .engine
        .create_workflow(workflow_input(
            "ticket.created",
            None,
            vec![ActionSpec::send_webhook("https://hooks.example.com/t", json!({}))],
        ))
        .await
        .unwrap();
    let run_id = harness.engine.dispatch("ticket.created", json!({})).await.unwrap()[0];

    let start = far_future();
    harness.drain(&worker, start).await;
    assert_eq!(harness.engine.get_run(run_id).await.unwrap().status, RunStatus::Failed);
    assert_eq!(harness.store.logs_for_run(run_id).await.unwrap().len(), 3);

    let report = MaintenanceJobs::run_all(
        &store,
        JobConfig::default().stale_job_timeout,
        start + ChronoDuration::days(120),
    )
    .await
    .unwrap();
    assert_eq!(report.stale_jobs_released, 0);
    assert_eq!(harness.store.logs_for_run(run_id).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_logged_webhook_secret_is_redacted() {
    let harness = TestHarness::new();
    let recorder = Arc::new(RecordingHandler::default());
    let worker = harness.worker(harness.executor().with(ActionKind::SendWebhook, recorder.clone()));

    let mut webhook = ActionSpec::send_webhook("https://hooks.example.com/in", json!({"id": "{{user.id}}"}));
    if let ActionSpec::SendWebhook(params) = &mut webhook {
        params.secret = Some("whsec_live".to_string());
    }
    harness
        .engine
        .create_workflow(workflow_input("user.created", None, vec![webhook]))
        .await
        .unwrap();
    let run_id = harness.engine.dispatch("user.created", user_payload("u1", "pro")).await.unwrap()[0];

    harness.drain(&worker, far_future()).await;

    let logs = harness.store.logs_for_run(run_id).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].action_data["secret"], REDACTED);
    assert_eq!(logs[0].action_data["body"]["id"], "u1");
    assert!(!logs[0].action_data.to_string().contains("whsec_live"));

    // the handler still signs with the real secret
    match &recorder.calls()[0].action {
        ActionSpec::SendWebhook(params) => assert_eq!(params.secret.as_deref(), Some("whsec_live")),
        other => panic!("unexpected action {:?}", other),
    }
}

#[tokio::test]
async fn test_payout_review_holds_then_pays_once() {
    let harness = TestHarness::new();
    let worker = harness.worker(builtin_executor(&harness));

    harness.engine.create_workflow(payout_review_workflow(1)).await.unwrap();
    let event = TriggerEvent::payout_requested("c1", Decimal::new(12550, 2), "usd");
    let run_id = harness.engine.dispatch_event(&event).await.unwrap()[0];

    let t0 = far_future();
    // admin notice, then the hold
    assert_eq!(worker.run_cycle(t0).await.unwrap(), 1);
    assert_eq!(worker.run_cycle(t0).await.unwrap(), 1);
    let held = harness.store.jobs_for_run(run_id).await.unwrap().remove(0);
    assert_eq!(held.action_step_index, 2);
    assert_eq!(held.next_attempt_at, t0 + ChronoDuration::hours(1));
    assert_eq!(worker.run_cycle(t0 + ChronoDuration::minutes(30)).await.unwrap(), 0);
    assert!(harness.store.records(PAYOUT_REQUESTS_TABLE).is_empty());

    harness.drain(&worker, t0 + ChronoDuration::hours(1)).await;

    let run = harness.engine.get_run(run_id).await.unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.results.len(), 4);

    let payouts = harness.store.records(PAYOUT_REQUESTS_TABLE);
    assert_eq!(payouts.len(), 1);
    assert_eq!(payouts[0]["creator_id"], "c1");
    assert_eq!(payouts[0]["amount"], "125.50");

    let notices = harness.store.records(ADMIN_NOTIFICATIONS_TABLE);
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0]["message"], "Creator c1 requested 125.50 usd");
    let confirmations = harness.store.records(CREATOR_NOTIFICATIONS_TABLE);
    assert_eq!(confirmations.len(), 1);
    assert_eq!(confirmations[0]["message"], "Your payout of 125.50 has been scheduled.");
}

#[tokio::test]
async fn test_ticket_triage_assigns_and_notifies() {
    let harness = TestHarness::new();
    let worker = harness.worker(builtin_executor(&harness));

    let ticket: Map<String, Value> = json!({"id": "t-1", "subject": "Help", "assigned_to": null})
        .as_object()
        .cloned()
        .unwrap();
    harness.store.insert_record(SUPPORT_TICKETS_TABLE, &ticket).await.unwrap();

    harness.engine.create_workflow(ticket_triage_workflow("staff-1")).await.unwrap();
    let event = TriggerEvent::ticket_created("t-1", "u1", "Help", "high");
    let run_id = harness.engine.dispatch_event(&event).await.unwrap()[0];

    harness.drain(&worker, far_future()).await;

    assert_eq!(harness.engine.get_run(run_id).await.unwrap().status, RunStatus::Completed);
    let tickets = harness.store.records(SUPPORT_TICKETS_TABLE);
    assert_eq!(tickets[0]["assigned_to"], "staff-1");
    let notices = harness.store.records(ADMIN_NOTIFICATIONS_TABLE);
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0]["title"], "New ticket");
    assert_eq!(notices[0]["message"], "Help");
}
