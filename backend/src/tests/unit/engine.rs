use autoflow_shared::RunStatus;
use rust_decimal::Decimal;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::store::RunFilter;
use crate::tests::fixtures::{pro_welcome_workflow, user_payload, workflow_input};
use crate::tests::helpers::{far_future, HandlerExt, RecordingHandler, TestHarness};
use crate::workflows::conditions::presets::payout_above;
use crate::workflows::{ActionKind, ActionSpec, EngineError, TriggerEvent};

#[tokio::test]
async fn test_platform_event_dispatch() {
    let harness = TestHarness::new();
    harness.engine.create_workflow(pro_welcome_workflow()).await.unwrap();

    let pro = TriggerEvent::user_created("u1", "u1@example.com", "Ada", "pro");
    let free = TriggerEvent::user_created("u2", "u2@example.com", "Bob", "free");

    assert_eq!(harness.engine.dispatch_event(&pro).await.unwrap().len(), 1);
    assert!(harness.engine.dispatch_event(&free).await.unwrap().is_empty());

    let (runs, total) = harness.engine.list_runs(&RunFilter::default(), 10, 0).await.unwrap();
    assert_eq!(total, 1);
    assert_eq!(runs[0].trigger_data, pro.payload);
    assert_eq!(runs[0].trigger_event_type, "user.created");
}

#[tokio::test]
async fn test_payout_condition_on_decimal_amount() {
    let harness = TestHarness::new();
    harness
        .engine
        .create_workflow(workflow_input(
            "payout.requested",
            Some(payout_above(500.0).into_tree()),
            vec![ActionSpec::admin_notify("Large payout", "{{payout.amount}}")],
        ))
        .await
        .unwrap();

    let small = TriggerEvent::payout_requested("c1", Decimal::new(49999, 2), "USD");
    let large = TriggerEvent::payout_requested("c1", Decimal::new(150000, 2), "USD");

    assert!(harness.engine.dispatch_event(&small).await.unwrap().is_empty());
    assert_eq!(harness.engine.dispatch_event(&large).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_run_filters_and_logs() {
    let harness = TestHarness::new();
    let recorder = Arc::new(RecordingHandler::default());
    let worker = harness.worker(harness.executor().with(ActionKind::TagUser, recorder));

    let tagging = harness
        .engine
        .create_workflow(workflow_input("user.created", None, vec![ActionSpec::tag_user("{{user.id}}", "new")]))
        .await
        .unwrap();
    let other = harness
        .engine
        .create_workflow(workflow_input("user.created", None, vec![ActionSpec::admin_notify("t", "m")]))
        .await
        .unwrap();

    let run_ids = harness.engine.dispatch("user.created", user_payload("u1", "free")).await.unwrap();
    assert_eq!(run_ids.len(), 2);

    // only the tagging step has a handler; the other run stays pending
    worker.run_cycle(far_future()).await.unwrap();

    let by_workflow = RunFilter {
        workflow_id: Some(tagging.id),
        status: None,
    };
    let (runs, total) = harness.engine.list_runs(&by_workflow, 10, 0).await.unwrap();
    assert_eq!(total, 1);
    assert_eq!(runs[0].status, RunStatus::Completed);

    let completed = RunFilter {
        workflow_id: None,
        status: Some(RunStatus::Completed),
    };
    let (runs, _) = harness.engine.list_runs(&completed, 10, 0).await.unwrap();
    assert!(runs.iter().all(|r| r.workflow_id == tagging.id));

    let logs = harness.engine.run_logs(runs[0].id).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].action_type, "tag_user");
    assert_eq!(logs[0].action_data["user_id"], json!("u1"));

    let other_run = run_ids.iter().find(|id| **id != runs[0].id).unwrap();
    assert_eq!(harness.engine.get_run(*other_run).await.unwrap().workflow_id, other.id);

    assert!(matches!(
        harness.engine.run_logs(Uuid::new_v4()).await,
        Err(EngineError::RunNotFound(_))
    ));
}
