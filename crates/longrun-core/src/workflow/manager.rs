// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Lifecycle management of named workflow runs.
//!
//! The manager owns the run index: it creates a provider-backed context
//! per run, spawns the runner as a cancellable background task, and
//! tears everything down on shutdown. Context close is scheduled as a
//! detached cleanup task so finishing a run never blocks on storage.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::context::{
    ContextStoreProvider, ContextValue, WORKFLOW_ACTION_NAME_KEY, WORKFLOW_EXCEPTION_KEY,
    WORKFLOW_NAME_KEY, WORKFLOW_STEP_INDEX_KEY, WORKFLOW_STEP_NAME_KEY, WorkflowContext,
};
use crate::error::{CoreError, panic_message};

use super::runner::{ExceptionInfo, NoopHooks, RunOutcome, RunnerHooks, WorkflowRunner};
use super::Workflow;

type RunResult = Result<RunOutcome, CoreError>;

struct RunEntry {
    cancel: CancellationToken,
    done_tx: Arc<watch::Sender<bool>>,
    done_rx: watch::Receiver<bool>,
    result: Arc<StdMutex<Option<RunResult>>>,
    handle: JoinHandle<()>,
    ctx: Arc<WorkflowContext>,
}

/// Starts, resumes, observes, and cancels named workflow runs.
///
/// At most one live run per name; the name doubles as the context scope
/// handed to the [`ContextStoreProvider`].
pub struct WorkflowRunnerManager {
    workflow: Workflow,
    provider: Arc<dyn ContextStoreProvider>,
    hooks: Arc<dyn RunnerHooks>,
    grace_period: Duration,
    runs: Arc<Mutex<HashMap<String, RunEntry>>>,
    cleanups: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl WorkflowRunnerManager {
    /// Create a manager for `workflow`, backing run contexts with `provider`.
    pub fn new(
        workflow: Workflow,
        provider: Arc<dyn ContextStoreProvider>,
        config: &Config,
    ) -> Self {
        Self {
            workflow,
            provider,
            hooks: Arc::new(NoopHooks),
            grace_period: config.cancel_grace_period,
            runs: Arc::new(Mutex::new(HashMap::new())),
            cleanups: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Install observability hooks forwarded to every runner.
    pub fn with_hooks(mut self, hooks: Arc<dyn RunnerHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Start a fresh run named `workflow_name` from `start_action`.
    ///
    /// Fails with `WorkflowAlreadyRunning` if a run with that name is
    /// registered and `ActionNotRegistered` if the start action does not
    /// resolve. The new context is seeded with the reserved run name,
    /// action name, and a zero step index before the runner spawns.
    pub async fn start(&self, workflow_name: &str, start_action: &str) -> Result<(), CoreError> {
        let mut runs = self.runs.lock().await;
        if runs.contains_key(workflow_name) {
            return Err(CoreError::WorkflowAlreadyRunning {
                workflow_name: workflow_name.to_string(),
            });
        }
        if !self.workflow.has_action(start_action) {
            return Err(CoreError::ActionNotRegistered {
                action: start_action.to_string(),
            });
        }

        let store = self.provider.create(workflow_name).await?;
        let ctx = Arc::new(WorkflowContext::new(store));
        ctx.open().await?;
        ctx.set_reserved(WORKFLOW_NAME_KEY, &workflow_name.to_string())
            .await?;
        ctx.set_reserved(WORKFLOW_ACTION_NAME_KEY, &start_action.to_string())
            .await?;
        ctx.set_reserved(WORKFLOW_STEP_INDEX_KEY, &0usize).await?;

        let entry = self.spawn_run(workflow_name.to_string(), ctx);
        runs.insert(workflow_name.to_string(), entry);
        info!(workflow = %workflow_name, start_action = %start_action, "workflow run started");
        Ok(())
    }

    /// Resume a run from previously exported context entries.
    ///
    /// The restored reserved keys determine where execution picks up;
    /// the run name key is overwritten with `workflow_name`.
    pub async fn resume(
        &self,
        workflow_name: &str,
        entries: HashMap<String, ContextValue>,
    ) -> Result<(), CoreError> {
        let mut runs = self.runs.lock().await;
        if runs.contains_key(workflow_name) {
            return Err(CoreError::WorkflowAlreadyRunning {
                workflow_name: workflow_name.to_string(),
            });
        }

        let store = self.provider.create(workflow_name).await?;
        let ctx = Arc::new(WorkflowContext::new(store));
        ctx.open().await?;
        ctx.import(entries).await?;
        ctx.set_reserved(WORKFLOW_NAME_KEY, &workflow_name.to_string())
            .await?;

        let entry = self.spawn_run(workflow_name.to_string(), ctx);
        runs.insert(workflow_name.to_string(), entry);
        info!(workflow = %workflow_name, "workflow run resumed");
        Ok(())
    }

    /// Await the completion of the run named `workflow_name`.
    ///
    /// Returns the run's outcome; `RunNotFound` if no such run is
    /// registered (including runs that already finished and were removed).
    /// Waiters are always released: a run whose background task panics
    /// reports the panic as a `StepFailed` at the recorded position.
    pub async fn wait(&self, workflow_name: &str) -> Result<RunOutcome, CoreError> {
        let (done_rx, result) = {
            let runs = self.runs.lock().await;
            let Some(entry) = runs.get(workflow_name) else {
                return Err(CoreError::RunNotFound {
                    workflow_name: workflow_name.to_string(),
                });
            };
            (entry.done_rx.clone(), entry.result.clone())
        };

        wait_done(done_rx).await;

        let outcome = result.lock().ok().and_then(|slot| slot.clone());
        outcome.unwrap_or(Err(CoreError::RunNotFound {
            workflow_name: workflow_name.to_string(),
        }))
    }

    /// Cancel the run named `workflow_name` and wait for it to stop.
    ///
    /// The wait is bounded by the configured grace period; a run that
    /// does not acknowledge in time is aborted and logged rather than
    /// hung on. `RunNotFound` if no such run is registered.
    pub async fn cancel_and_wait(&self, workflow_name: &str) -> Result<(), CoreError> {
        let (cancel, done_tx, done_rx, result, abort, ctx) = {
            let runs = self.runs.lock().await;
            let Some(entry) = runs.get(workflow_name) else {
                return Err(CoreError::RunNotFound {
                    workflow_name: workflow_name.to_string(),
                });
            };
            (
                entry.cancel.clone(),
                entry.done_tx.clone(),
                entry.done_rx.clone(),
                entry.result.clone(),
                entry.handle.abort_handle(),
                entry.ctx.clone(),
            )
        };

        cancel.cancel();

        if timeout(self.grace_period, wait_done(done_rx)).await.is_err() {
            warn!(
                workflow = %workflow_name,
                grace_period_secs = self.grace_period.as_secs_f64(),
                "run did not acknowledge cancellation within grace period, aborting"
            );
            abort.abort();
            if let Ok(mut slot) = result.lock() {
                slot.get_or_insert(Ok(RunOutcome::Cancelled));
            }
            let _ = done_tx.send(true);
            self.runs.lock().await.remove(workflow_name);
            self.schedule_close(workflow_name.to_string(), ctx).await;
        }

        Ok(())
    }

    /// Cancel every live run and pending cleanup, closing all contexts.
    ///
    /// Per-run errors are logged and suppressed so shutdown always
    /// completes.
    pub async fn teardown(&self) {
        let entries: Vec<(String, RunEntry)> = self.runs.lock().await.drain().collect();

        for (name, entry) in entries {
            entry.cancel.cancel();
            if timeout(self.grace_period, wait_done(entry.done_rx.clone()))
                .await
                .is_err()
            {
                warn!(workflow = %name, "run did not stop within grace period, aborting");
                entry.handle.abort();
            }
            if let Err(error) = entry.ctx.close().await {
                warn!(workflow = %name, error = %error, "context close failed during teardown");
            }
        }

        let cleanups: Vec<JoinHandle<()>> = {
            let mut guard = self.cleanups.lock().await;
            guard.drain(..).collect()
        };
        for handle in cleanups {
            handle.abort();
        }
    }

    fn spawn_run(&self, workflow_name: String, ctx: Arc<WorkflowContext>) -> RunEntry {
        let cancel = CancellationToken::new();
        let (done_tx, done_rx) = watch::channel(false);
        let done_tx = Arc::new(done_tx);
        let result: Arc<StdMutex<Option<RunResult>>> = Arc::new(StdMutex::new(None));

        let runner = WorkflowRunner::with_hooks(self.workflow.clone(), self.hooks.clone());
        let runs = self.runs.clone();
        let cleanups = self.cleanups.clone();
        let task_ctx = ctx.clone();
        let task_done = done_tx.clone();
        let task_result = result.clone();
        let token = cancel.clone();
        let name = workflow_name.clone();

        let handle = tokio::spawn(async move {
            // panics from user steps are caught so waiters always see a
            // result and the run is always deregistered
            let outcome = match AssertUnwindSafe(runner.run(&task_ctx, &token))
                .catch_unwind()
                .await
            {
                Ok(outcome) => outcome,
                Err(payload) => Err(record_panic(&task_ctx, &name, payload).await),
            };
            match &outcome {
                Ok(RunOutcome::Completed) => info!(workflow = %name, "workflow run completed"),
                Ok(RunOutcome::Cancelled) => info!(workflow = %name, "workflow run cancelled"),
                Err(e) => error!(workflow = %name, error = %e, "workflow run failed"),
            }

            if let Ok(mut slot) = task_result.lock() {
                *slot = Some(outcome);
            }
            let _ = task_done.send(true);

            runs.lock().await.remove(&name);

            let cleanup = tokio::spawn(async move {
                if let Err(error) = task_ctx.close().await {
                    warn!(workflow = %name, error = %error, "context close failed");
                }
            });
            let mut cleanups = cleanups.lock().await;
            cleanups.retain(|h| !h.is_finished());
            cleanups.push(cleanup);
        });

        RunEntry {
            cancel,
            done_tx,
            done_rx,
            result,
            handle,
            ctx,
        }
    }

    async fn schedule_close(&self, workflow_name: String, ctx: Arc<WorkflowContext>) {
        let cleanup = tokio::spawn(async move {
            if let Err(error) = ctx.close().await {
                warn!(workflow = %workflow_name, error = %error, "context close failed");
            }
        });
        let mut cleanups = self.cleanups.lock().await;
        cleanups.retain(|h| !h.is_finished());
        cleanups.push(cleanup);
    }
}

/// Turns a panic from the run task into the run's failure: the cause is
/// attributed to the position recorded in the reserved keys and stored
/// as exception info before the error is returned.
async fn record_panic(
    ctx: &WorkflowContext,
    workflow_name: &str,
    payload: Box<dyn std::any::Any + Send>,
) -> CoreError {
    let cause = panic_message(payload);
    let action = ctx
        .get::<String>(WORKFLOW_ACTION_NAME_KEY)
        .await
        .unwrap_or_else(|_| "unknown".to_string());
    let step = ctx
        .get::<String>(WORKFLOW_STEP_NAME_KEY)
        .await
        .unwrap_or_else(|_| "unknown".to_string());

    let info = ExceptionInfo {
        error: cause.clone(),
        trace: cause.clone(),
        action_name: action.clone(),
        step_name: step.clone(),
    };
    if let Err(error) = ctx.set_reserved(WORKFLOW_EXCEPTION_KEY, &info).await {
        warn!(workflow = %workflow_name, error = %error, "failed to record panic exception info");
    }

    CoreError::StepFailed {
        action,
        step,
        cause,
    }
}

async fn wait_done(mut rx: watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}
