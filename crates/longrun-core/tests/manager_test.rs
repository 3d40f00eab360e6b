// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! E2E tests for the workflow runner manager lifecycle.

mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use common::*;
use longrun_core::context::{
    ContextValue, InMemoryContextProvider, WORKFLOW_ACTION_NAME_KEY, WORKFLOW_STEP_INDEX_KEY,
};
use longrun_core::error::CoreError;
use longrun_core::workflow::{
    Action, RunOutcome, Step, StepInputs, StepOutputs, Workflow, WorkflowRunnerManager,
};

/// Step that parks briefly so tests can observe a live run.
struct ShortPause;

#[async_trait]
impl Step for ShortPause {
    fn name(&self) -> &'static str {
        "pause"
    }

    async fn run(&self, _inputs: StepInputs) -> anyhow::Result<StepOutputs> {
        tokio::time::sleep(Duration::from_millis(200)).await;
        Ok(StepOutputs::none())
    }
}

fn manager_for(workflow: Workflow) -> WorkflowRunnerManager {
    WorkflowRunnerManager::new(workflow, Arc::new(InMemoryContextProvider), &fast_config())
}

#[tokio::test]
async fn test_run_completes_and_is_torn_down() {
    let log = step_log();
    let workflow = Workflow::builder()
        .action(
            Action::new("start")
                .step(ShortPause)
                .step(RecordingStep::new("s1", &log))
                .next("finish"),
        )
        .action(Action::new("finish").step(RecordingStep::new("s2", &log)))
        .start_with("start")
        .build()
        .unwrap();
    let manager = manager_for(workflow);

    manager.start("sidecar-1", "start").await.unwrap();

    let outcome = manager.wait("sidecar-1").await.unwrap();
    assert_eq!(outcome, RunOutcome::Completed);
    assert_eq!(logged(&log), vec!["s1", "s2"]);

    // the run was removed on completion; waiting again fails
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(matches!(
        manager.wait("sidecar-1").await.unwrap_err(),
        CoreError::RunNotFound { .. }
    ));
}

#[tokio::test]
async fn test_one_live_run_per_name() {
    let log = step_log();
    let workflow = Workflow::builder()
        .action(Action::new("start").step(SlowStep::new("slow", &log)))
        .start_with("start")
        .build()
        .unwrap();
    let manager = manager_for(workflow);

    manager.start("sidecar-1", "start").await.unwrap();
    let err = manager.start("sidecar-1", "start").await.unwrap_err();
    assert!(matches!(err, CoreError::WorkflowAlreadyRunning { .. }));

    // a different name is fine
    manager.start("sidecar-2", "start").await.unwrap();

    manager.teardown().await;
}

#[tokio::test]
async fn test_start_with_unknown_action_fails() {
    let workflow = Workflow::builder()
        .action(Action::new("start"))
        .start_with("start")
        .build()
        .unwrap();
    let manager = manager_for(workflow);

    let err = manager.start("sidecar-1", "missing").await.unwrap_err();
    assert!(matches!(err, CoreError::ActionNotRegistered { .. }));
}

#[tokio::test]
async fn test_cancel_and_wait_is_bounded() {
    let log = step_log();
    let workflow = Workflow::builder()
        .action(Action::new("start").step(SlowStep::new("slow", &log)))
        .start_with("start")
        .build()
        .unwrap();
    let config = fast_config();
    let grace = config.cancel_grace_period;
    let manager =
        WorkflowRunnerManager::new(workflow, Arc::new(InMemoryContextProvider), &config);

    manager.start("sidecar-1", "start").await.unwrap();
    // let the run enter the slow step
    tokio::time::sleep(Duration::from_millis(100)).await;

    let before = Instant::now();
    manager.cancel_and_wait("sidecar-1").await.unwrap();
    assert!(
        before.elapsed() < grace + Duration::from_secs(1),
        "cancel took {:?}",
        before.elapsed()
    );

    // the run deregistered; waiting now fails
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(matches!(
        manager.wait("sidecar-1").await.unwrap_err(),
        CoreError::RunNotFound { .. }
    ));

    assert!(matches!(
        manager.cancel_and_wait("nope").await.unwrap_err(),
        CoreError::RunNotFound { .. }
    ));
}

#[tokio::test]
async fn test_resume_from_exported_entries() {
    let log = step_log();
    let workflow = Workflow::builder()
        .action(
            Action::new("start")
                .step(RecordingStep::new("s1", &log))
                .step(RecordingStep::new("s2", &log))
                .step(RecordingStep::new("s3", &log)),
        )
        .start_with("start")
        .build()
        .unwrap();
    let manager = manager_for(workflow);

    // a snapshot taken after step 1 of "start" completed
    let mut entries = HashMap::new();
    entries.insert(
        WORKFLOW_ACTION_NAME_KEY.to_string(),
        ContextValue::of(&"start".to_string()).unwrap(),
    );
    entries.insert(
        WORKFLOW_STEP_INDEX_KEY.to_string(),
        ContextValue::of(&2usize).unwrap(),
    );

    manager.resume("sidecar-1", entries).await.unwrap();
    match manager.wait("sidecar-1").await {
        Ok(RunOutcome::Completed) | Err(CoreError::RunNotFound { .. }) => {}
        other => panic!("unexpected: {other:?}"),
    }

    // give the teardown bookkeeping a moment, then check the order
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(logged(&log), vec!["s3"]);
}

#[tokio::test]
async fn test_panicking_step_fails_run_and_deregisters() {
    struct PanickingStep;

    #[async_trait]
    impl Step for PanickingStep {
        fn name(&self) -> &'static str {
            "explode"
        }

        async fn run(&self, _inputs: StepInputs) -> anyhow::Result<StepOutputs> {
            panic!("container runtime disappeared")
        }
    }

    let workflow = Workflow::builder()
        .action(Action::new("start").step(ShortPause).step(PanickingStep))
        .start_with("start")
        .build()
        .unwrap();
    let manager = manager_for(workflow);

    manager.start("sidecar-1", "start").await.unwrap();

    // a waiter must be released even though the run task unwound
    let waited = tokio::time::timeout(Duration::from_secs(3), manager.wait("sidecar-1"))
        .await
        .expect("wait() must return after the run task panics");
    match waited {
        Err(CoreError::StepFailed {
            action,
            step,
            cause,
        }) => {
            assert_eq!(action, "start");
            assert_eq!(step, "explode");
            assert!(cause.contains("container runtime disappeared"));
        }
        other => panic!("expected StepFailed, got {other:?}"),
    }

    // the run deregistered like any other failed run
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(matches!(
        manager.wait("sidecar-1").await.unwrap_err(),
        CoreError::RunNotFound { .. }
    ));
}

#[tokio::test]
async fn test_failed_run_reports_step_failure() {
    let log = step_log();
    let workflow = Workflow::builder()
        .action(
            Action::new("start")
                .step(ShortPause)
                .step(FailingStep::new("boom", &log)),
        )
        .start_with("start")
        .build()
        .unwrap();
    let manager = manager_for(workflow);

    manager.start("sidecar-1", "start").await.unwrap();
    let err = manager.wait("sidecar-1").await.unwrap_err();
    assert!(matches!(err, CoreError::StepFailed { .. }));
}

#[tokio::test]
async fn test_teardown_stops_everything() {
    let log = step_log();
    let workflow = Workflow::builder()
        .action(Action::new("start").step(SlowStep::new("slow", &log)))
        .start_with("start")
        .build()
        .unwrap();
    let manager = manager_for(workflow);

    manager.start("sidecar-1", "start").await.unwrap();
    manager.start("sidecar-2", "start").await.unwrap();

    manager.teardown().await;

    for name in ["sidecar-1", "sidecar-2"] {
        assert!(matches!(
            manager.wait(name).await.unwrap_err(),
            CoreError::RunNotFound { .. }
        ));
    }
}
