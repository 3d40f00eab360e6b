// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! E2E tests for the workflow runner: ordering, resumption, error branching.

mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::*;
use longrun_core::context::{
    ContextValue, InMemoryContextStore, WORKFLOW_ACTION_NAME_KEY, WORKFLOW_EXCEPTION_KEY,
    WORKFLOW_STEP_INDEX_KEY, WorkflowContext,
};
use longrun_core::error::CoreError;
use longrun_core::workflow::{
    Action, ExceptionInfo, InputSpec, RunOutcome, Step, StepInputs, StepOutputs, Workflow,
    WorkflowRunner,
};
use tokio_util::sync::CancellationToken;

fn memory_context() -> WorkflowContext {
    WorkflowContext::new(Box::new(InMemoryContextStore::new()))
}

/// Context entries putting a run at `action`, next step `index`.
fn position(action: &str, index: usize) -> HashMap<String, ContextValue> {
    let mut entries = HashMap::new();
    entries.insert(
        WORKFLOW_ACTION_NAME_KEY.to_string(),
        ContextValue::of(&action.to_string()).unwrap(),
    );
    entries.insert(
        WORKFLOW_STEP_INDEX_KEY.to_string(),
        ContextValue::of(&index).unwrap(),
    );
    entries
}

#[tokio::test]
async fn test_runs_actions_and_steps_in_order() {
    let log = step_log();
    let workflow = Workflow::builder()
        .action(
            Action::new("start")
                .step(RecordingStep::new("s1", &log))
                .step(RecordingStep::new("s2", &log))
                .next("finish"),
        )
        .action(Action::new("finish").step(RecordingStep::new("s3", &log)))
        .start_with("start")
        .build()
        .unwrap();

    let ctx = memory_context();
    let outcome = WorkflowRunner::new(workflow)
        .run(&ctx, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome, RunOutcome::Completed);
    assert_eq!(logged(&log), vec!["s1", "s2", "s3"]);
    // final position: past the last step of the terminal action
    assert_eq!(ctx.get::<usize>(WORKFLOW_STEP_INDEX_KEY).await.unwrap(), 1);
    assert_eq!(
        ctx.get::<String>(WORKFLOW_ACTION_NAME_KEY).await.unwrap(),
        "finish"
    );
}

#[tokio::test]
async fn test_resume_skips_completed_steps() {
    let log = step_log();
    let workflow = Workflow::builder()
        .action(
            Action::new("start")
                .step(RecordingStep::new("s1", &log))
                .step(RecordingStep::new("s2", &log))
                .step(RecordingStep::new("s3", &log))
                .next("finish"),
        )
        .action(Action::new("finish").step(RecordingStep::new("s4", &log)))
        .start_with("start")
        .build()
        .unwrap();

    // paused after completing step 0 of "start": persisted index is 1
    let ctx = memory_context();
    ctx.import(position("start", 1)).await.unwrap();

    let outcome = WorkflowRunner::new(workflow)
        .run(&ctx, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome, RunOutcome::Completed);
    assert_eq!(logged(&log), vec!["s2", "s3", "s4"]);
}

#[tokio::test]
async fn test_step_failure_branches_to_error_action() {
    let log = step_log();
    let workflow = Workflow::builder()
        .action(
            Action::new("start")
                .step(RecordingStep::new("ok", &log))
                .step(FailingStep::new("boom", &log))
                .step(RecordingStep::new("never", &log))
                .next("finish")
                .on_error("cleanup"),
        )
        .action(Action::new("finish").step(RecordingStep::new("done", &log)))
        .action(Action::new("cleanup").step(RecordingStep::new("undo", &log)))
        .start_with("start")
        .build()
        .unwrap();

    let ctx = memory_context();
    let outcome = WorkflowRunner::new(workflow)
        .run(&ctx, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome, RunOutcome::Completed);
    assert_eq!(logged(&log), vec!["ok", "boom", "undo"]);

    let info: ExceptionInfo = ctx.get(WORKFLOW_EXCEPTION_KEY).await.unwrap();
    assert_eq!(info.action_name, "start");
    assert_eq!(info.step_name, "boom");
    assert!(info.error.contains("induced failure"));
}

#[tokio::test]
async fn test_step_failure_without_handler_propagates() {
    let log = step_log();
    let workflow = Workflow::builder()
        .action(Action::new("start").step(FailingStep::new("boom", &log)))
        .start_with("start")
        .build()
        .unwrap();

    let ctx = memory_context();
    let err = WorkflowRunner::new(workflow)
        .run(&ctx, &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        CoreError::StepFailed { action, step, .. } => {
            assert_eq!(action, "start");
            assert_eq!(step, "boom");
        }
        other => panic!("expected StepFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn test_failure_in_error_branch_propagates() {
    let log = step_log();
    let workflow = Workflow::builder()
        .action(
            Action::new("start")
                .step(FailingStep::new("boom", &log))
                .on_error("cleanup"),
        )
        .action(
            Action::new("cleanup")
                .step(FailingStep::new("boom_again", &log))
                .on_error("cleanup"),
        )
        .start_with("start")
        .build()
        .unwrap();

    let ctx = memory_context();
    let err = WorkflowRunner::new(workflow)
        .run(&ctx, &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        CoreError::StepFailed { action, step, .. } => {
            assert_eq!(action, "cleanup");
            assert_eq!(step, "boom_again");
        }
        other => panic!("expected StepFailed, got {other:?}"),
    }
    assert_eq!(logged(&log), vec!["boom", "boom_again"]);
}

#[tokio::test]
async fn test_outputs_flow_between_steps() {
    struct ProduceStep;

    #[async_trait]
    impl Step for ProduceStep {
        fn name(&self) -> &'static str {
            "produce"
        }

        async fn run(&self, _inputs: StepInputs) -> anyhow::Result<StepOutputs> {
            Ok(StepOutputs::none()
                .set("service_name", &"jupyter".to_string())?
                .set("port", &8888u16)?)
        }
    }

    struct ConsumeStep;

    #[async_trait]
    impl Step for ConsumeStep {
        fn name(&self) -> &'static str {
            "consume"
        }

        fn input_spec(&self) -> Vec<InputSpec> {
            vec![
                InputSpec::of::<String>("service_name"),
                InputSpec::of::<u16>("port"),
            ]
        }

        async fn run(&self, inputs: StepInputs) -> anyhow::Result<StepOutputs> {
            let name: String = inputs.get("service_name")?;
            let port: u16 = inputs.get("port")?;
            Ok(StepOutputs::none().set("endpoint", &format!("{name}:{port}"))?)
        }
    }

    let workflow = Workflow::builder()
        .action(Action::new("start").step(ProduceStep).step(ConsumeStep))
        .start_with("start")
        .build()
        .unwrap();

    let ctx = memory_context();
    let outcome = WorkflowRunner::new(workflow)
        .run(&ctx, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome, RunOutcome::Completed);
    assert_eq!(ctx.get::<String>("endpoint").await.unwrap(), "jupyter:8888");
}

#[tokio::test]
async fn test_missing_declared_input_fails_step() {
    struct NeedsInput;

    #[async_trait]
    impl Step for NeedsInput {
        fn name(&self) -> &'static str {
            "needs_input"
        }

        fn input_spec(&self) -> Vec<InputSpec> {
            vec![InputSpec::of::<String>("never_written")]
        }

        async fn run(&self, _inputs: StepInputs) -> anyhow::Result<StepOutputs> {
            Ok(StepOutputs::none())
        }
    }

    let workflow = Workflow::builder()
        .action(Action::new("start").step(NeedsInput))
        .start_with("start")
        .build()
        .unwrap();

    let err = WorkflowRunner::new(workflow)
        .run(&memory_context(), &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        CoreError::StepFailed { step, cause, .. } => {
            assert_eq!(step, "needs_input");
            assert!(cause.contains("never_written"));
        }
        other => panic!("expected StepFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn test_cancellation_preserves_resume_position() {
    let log = step_log();
    let workflow = Workflow::builder()
        .action(
            Action::new("start")
                .step(RecordingStep::new("s1", &log))
                .step(SlowStep::new("slow", &log))
                .step(RecordingStep::new("s3", &log)),
        )
        .start_with("start")
        .build()
        .unwrap();

    let ctx = Arc::new(memory_context());
    let token = CancellationToken::new();

    let run_ctx = ctx.clone();
    let run_token = token.clone();
    let run_workflow = workflow.clone();
    let handle = tokio::spawn(async move {
        WorkflowRunner::new(run_workflow)
            .run(&run_ctx, &run_token)
            .await
    });

    // let the run reach the slow step, then cancel
    tokio::time::sleep(Duration::from_millis(100)).await;
    token.cancel();

    let outcome = handle.await.unwrap().unwrap();
    assert_eq!(outcome, RunOutcome::Cancelled);
    assert_eq!(logged(&log), vec!["s1", "slow"]);

    // position points at the unfinished step, so a resume re-enters it
    assert_eq!(ctx.get::<usize>(WORKFLOW_STEP_INDEX_KEY).await.unwrap(), 1);

    // resuming from the exported context re-runs the unfinished step
    let snapshot = ctx.export().await.unwrap();
    let log2 = step_log();
    let workflow2 = Workflow::builder()
        .action(
            Action::new("start")
                .step(RecordingStep::new("s1", &log2))
                .step(RecordingStep::new("slow", &log2))
                .step(RecordingStep::new("s3", &log2)),
        )
        .start_with("start")
        .build()
        .unwrap();

    let resumed = memory_context();
    resumed.import(snapshot).await.unwrap();
    let outcome = WorkflowRunner::new(workflow2)
        .run(&resumed, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome, RunOutcome::Completed);
    assert_eq!(logged(&log2), vec!["slow", "s3"]);
}

#[tokio::test]
async fn test_precancelled_token_stops_before_any_step() {
    let log = step_log();
    let workflow = Workflow::builder()
        .action(Action::new("start").step(RecordingStep::new("s1", &log)))
        .start_with("start")
        .build()
        .unwrap();

    let token = CancellationToken::new();
    token.cancel();

    let outcome = WorkflowRunner::new(workflow)
        .run(&memory_context(), &token)
        .await
        .unwrap();

    assert_eq!(outcome, RunOutcome::Cancelled);
    assert!(logged(&log).is_empty());
}
