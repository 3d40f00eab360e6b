// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Resumable execution of a workflow over a context.
//!
//! The runner walks the workflow one action at a time, persisting its
//! position (action name, step name, step index) to reserved context
//! keys before every step and advancing the index only after the step's
//! outputs were merged. A run that stops for any reason can therefore be
//! resumed from the same context: a crash mid-step re-enters the
//! unfinished step, a stop after step `k` resumes at `k + 1`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::{
    WORKFLOW_ACTION_NAME_KEY, WORKFLOW_EXCEPTION_KEY, WORKFLOW_STEP_INDEX_KEY,
    WORKFLOW_STEP_NAME_KEY, WorkflowContext,
};
use crate::error::CoreError;

use super::{Action, Step, StepInputs, Workflow};

/// Snapshot of a step failure, recorded under the reserved exception key
/// before the runner branches to the error action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceptionInfo {
    /// Rendered error message, including the cause chain.
    pub error: String,
    /// Debug rendering of the full error.
    pub trace: String,
    /// Action the failing step belongs to.
    pub action_name: String,
    /// The failing step.
    pub step_name: String,
}

/// Observability hooks invoked around every step.
///
/// Hooks must not influence control flow; the runner ignores nothing
/// they return because they return nothing.
#[async_trait]
pub trait RunnerHooks: Send + Sync {
    /// Called after inputs were gathered, before the step runs.
    async fn before_step(&self, action: &str, step: &str) {
        let _ = (action, step);
    }

    /// Called after the step's outputs were merged into the context.
    async fn after_step(&self, action: &str, step: &str) {
        let _ = (action, step);
    }
}

/// Hooks that do nothing.
pub struct NoopHooks;

#[async_trait]
impl RunnerHooks for NoopHooks {}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The final action completed and had no `next_action`.
    Completed,
    /// The cancellation token fired; the context holds the resume position.
    Cancelled,
}

/// Executes one workflow over one context.
pub struct WorkflowRunner {
    workflow: Workflow,
    hooks: Arc<dyn RunnerHooks>,
}

impl WorkflowRunner {
    /// Create a runner with no-op hooks.
    pub fn new(workflow: Workflow) -> Self {
        Self {
            workflow,
            hooks: Arc::new(NoopHooks),
        }
    }

    /// Create a runner with custom hooks.
    pub fn with_hooks(workflow: Workflow, hooks: Arc<dyn RunnerHooks>) -> Self {
        Self { workflow, hooks }
    }

    /// Run (or resume) the workflow over `ctx` until it completes, a
    /// step fails terminally, or `cancel` fires.
    ///
    /// The initial action is the reserved action-name key when present
    /// (resume) and the declared start action otherwise. On a step
    /// failure the captured [`ExceptionInfo`] is written to the reserved
    /// exception key; if the action declares an `on_error_action` the
    /// run branches there, otherwise it fails with
    /// [`CoreError::StepFailed`]. A failure inside the error branch
    /// always propagates.
    pub async fn run(
        &self,
        ctx: &WorkflowContext,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, CoreError> {
        let mut current = match ctx.load_raw(WORKFLOW_ACTION_NAME_KEY).await? {
            Some(value) => value.decode::<String>(WORKFLOW_ACTION_NAME_KEY)?,
            None => self.workflow.start_action().to_string(),
        };
        let mut resume_index = match ctx.load_raw(WORKFLOW_STEP_INDEX_KEY).await? {
            Some(value) => value.decode::<usize>(WORKFLOW_STEP_INDEX_KEY)?,
            None => 0,
        };
        let mut in_error_branch = false;

        loop {
            let action = self.workflow.action(&current)?;
            ctx.set_reserved(WORKFLOW_ACTION_NAME_KEY, &current).await?;
            info!(action = %current, start_step = resume_index, "entering action");

            match self
                .run_action(action, ctx, cancel, resume_index)
                .await?
            {
                ActionOutcome::Cancelled => {
                    info!(action = %current, "run cancelled");
                    return Ok(RunOutcome::Cancelled);
                }
                ActionOutcome::Completed => match action.next_action() {
                    Some(next) => {
                        current = next.to_string();
                        resume_index = 0;
                        ctx.set_reserved(WORKFLOW_STEP_INDEX_KEY, &0usize).await?;
                        in_error_branch = false;
                    }
                    None => {
                        info!(action = %current, "workflow completed");
                        return Ok(RunOutcome::Completed);
                    }
                },
                ActionOutcome::Failed { step, error } => {
                    let info = ExceptionInfo {
                        error: format!("{:#}", error),
                        trace: format!("{:?}", error),
                        action_name: current.clone(),
                        step_name: step.clone(),
                    };
                    ctx.set_reserved(WORKFLOW_EXCEPTION_KEY, &info).await?;

                    match action.on_error_action() {
                        Some(next) if !in_error_branch => {
                            warn!(
                                action = %current,
                                step = %step,
                                error = %info.error,
                                error_action = %next,
                                "step failed, branching to error action"
                            );
                            current = next.to_string();
                            resume_index = 0;
                            ctx.set_reserved(WORKFLOW_STEP_INDEX_KEY, &0usize).await?;
                            in_error_branch = true;
                        }
                        _ => {
                            return Err(CoreError::StepFailed {
                                action: current,
                                step,
                                cause: info.error,
                            });
                        }
                    }
                }
            }
        }
    }

    async fn run_action(
        &self,
        action: &Action,
        ctx: &WorkflowContext,
        cancel: &CancellationToken,
        start_index: usize,
    ) -> Result<ActionOutcome, CoreError> {
        for (index, step) in action.steps().iter().enumerate().skip(start_index) {
            if cancel.is_cancelled() {
                return Ok(ActionOutcome::Cancelled);
            }

            let inputs = match self.gather_inputs(step.as_ref(), ctx).await {
                Ok(inputs) => inputs,
                Err(error) => {
                    return Ok(ActionOutcome::Failed {
                        step: step.name().to_string(),
                        error: error.into(),
                    });
                }
            };

            // position is recorded before the step runs so a crash
            // mid-step re-enters exactly here on resume
            ctx.set_reserved(WORKFLOW_STEP_NAME_KEY, &step.name().to_string())
                .await?;
            ctx.set_reserved(WORKFLOW_STEP_INDEX_KEY, &index).await?;

            self.hooks.before_step(action.name(), step.name()).await;
            debug!(action = %action.name(), step = %step.name(), index, "running step");

            let result = tokio::select! {
                _ = cancel.cancelled() => return Ok(ActionOutcome::Cancelled),
                result = step.run(inputs) => result,
            };

            let outputs = match result {
                Ok(outputs) => outputs,
                Err(error) => {
                    return Ok(ActionOutcome::Failed {
                        step: step.name().to_string(),
                        error,
                    });
                }
            };

            if let Err(error) = self.merge_outputs(ctx, outputs.into_values()).await {
                return Ok(ActionOutcome::Failed {
                    step: step.name().to_string(),
                    error: error.into(),
                });
            }

            // the step is durably done only once its outputs landed
            ctx.set_reserved(WORKFLOW_STEP_INDEX_KEY, &(index + 1)).await?;

            self.hooks.after_step(action.name(), step.name()).await;
        }

        Ok(ActionOutcome::Completed)
    }

    async fn gather_inputs(
        &self,
        step: &dyn Step,
        ctx: &WorkflowContext,
    ) -> Result<StepInputs, CoreError> {
        let mut values = HashMap::new();
        for spec in step.input_spec() {
            let Some(value) = ctx.load_raw(spec.name).await? else {
                return Err(CoreError::NotInContext {
                    key: spec.name.to_string(),
                });
            };
            if value.type_name != spec.type_name {
                return Err(CoreError::TypeMismatch {
                    key: spec.name.to_string(),
                    expected: spec.type_name.to_string(),
                    actual: value.type_name,
                });
            }
            values.insert(spec.name.to_string(), value);
        }
        Ok(StepInputs::new(values))
    }

    async fn merge_outputs(
        &self,
        ctx: &WorkflowContext,
        values: HashMap<String, crate::context::ContextValue>,
    ) -> Result<(), CoreError> {
        for (key, value) in values {
            ctx.merge_output(&key, value).await?;
        }
        Ok(())
    }
}

enum ActionOutcome {
    Completed,
    Cancelled,
    Failed { step: String, error: anyhow::Error },
}
