// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tracking of long-running async operations.
//!
//! The tracker assigns every submitted operation a unique task id,
//! drives it as a background tokio task, and answers status/result
//! queries without ever blocking on the operation itself. Cancellation
//! is cooperative: the operation observes a [`CancellationToken`] at its
//! await points, and the tracker waits a bounded grace period before
//! abandoning a task that does not acknowledge. A periodic sweep
//! removes tasks whose status nobody polls, so abandoned handles do
//! not accumulate.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{CoreError, panic_message};
use crate::models::{ProgressReporter, TaskBase, TaskId, TaskProgress, TaskStatus};

#[derive(Debug, Clone)]
enum TaskOutcome {
    Completed(serde_json::Value),
    Failed { cause: String },
    Cancelled,
}

struct TrackedTask {
    base: TaskBase,
    progress_rx: watch::Receiver<TaskProgress>,
    cancel: CancellationToken,
    done_rx: watch::Receiver<bool>,
    outcome: Arc<StdMutex<Option<TaskOutcome>>>,
    handle: JoinHandle<()>,
    fire_and_forget: bool,
    last_status_check: StdMutex<DateTime<Utc>>,
}

impl TrackedTask {
    fn is_done(&self) -> bool {
        self.outcome.lock().map(|o| o.is_some()).unwrap_or(true)
    }

    fn touch(&self) {
        if let Ok(mut checked) = self.last_status_check.lock() {
            *checked = Utc::now();
        }
    }

    fn unpolled_for(&self, now: DateTime<Utc>) -> Duration {
        self.last_status_check
            .lock()
            .map(|checked| (now - *checked).to_std().unwrap_or_default())
            .unwrap_or_default()
    }
}

/// Tracks long-running async operations by task id.
pub struct TaskTracker {
    config: Config,
    tasks: Arc<Mutex<HashMap<TaskId, TrackedTask>>>,
    sweep_cancel: CancellationToken,
    sweeper: JoinHandle<()>,
}

impl TaskTracker {
    /// Create a tracker with the given configuration.
    ///
    /// Must be called inside a tokio runtime: the stale-task sweep is
    /// spawned on construction.
    pub fn new(config: Config) -> Self {
        let tasks: Arc<Mutex<HashMap<TaskId, TrackedTask>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let sweep_cancel = CancellationToken::new();
        let sweeper = tokio::spawn(sweep_stale_tasks(
            tasks.clone(),
            sweep_cancel.clone(),
            config.clone(),
        ));

        Self {
            config,
            tasks,
            sweep_cancel,
            sweeper,
        }
    }

    /// Submit an operation for background execution.
    ///
    /// The returned task id is `<logical-name>.<uuid>`. With
    /// `unique = true` the submission fails with `TaskAlreadyRunning`
    /// (naming the existing task id) while any unfinished task shares
    /// the logical name; finished tasks never block resubmission.
    ///
    /// The operation receives a [`ProgressReporter`] and a
    /// [`CancellationToken`] it is expected to observe at await points.
    /// Progress is forced to `("starting", 0.0)` before the operation
    /// runs and to `("finished", 1.0)` after it succeeds, so observers
    /// always see both endpoints. A panicking operation is recorded as
    /// failed with the panic message as its cause.
    ///
    /// The caller is expected to poll the task's status; handles that
    /// go unpolled for longer than the configured stale timeout are
    /// reaped by the sweep.
    pub async fn start_task<F, Fut>(
        &self,
        logical_name: &str,
        unique: bool,
        op: F,
    ) -> Result<TaskId, CoreError>
    where
        F: FnOnce(ProgressReporter, CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<serde_json::Value>> + Send + 'static,
    {
        self.submit(logical_name, unique, false, op).await
    }

    /// Submit an operation nobody is expected to poll.
    ///
    /// Same contract as [`TaskTracker::start_task`], but the task is
    /// exempt from the stale-task sweep: it stays tracked until it is
    /// explicitly removed or the tracker shuts down.
    pub async fn start_fire_and_forget_task<F, Fut>(
        &self,
        logical_name: &str,
        unique: bool,
        op: F,
    ) -> Result<TaskId, CoreError>
    where
        F: FnOnce(ProgressReporter, CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<serde_json::Value>> + Send + 'static,
    {
        self.submit(logical_name, unique, true, op).await
    }

    async fn submit<F, Fut>(
        &self,
        logical_name: &str,
        unique: bool,
        fire_and_forget: bool,
        op: F,
    ) -> Result<TaskId, CoreError>
    where
        F: FnOnce(ProgressReporter, CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<serde_json::Value>> + Send + 'static,
    {
        let mut tasks = self.tasks.lock().await;

        if unique
            && let Some(existing) = tasks
                .values()
                .find(|t| t.base.logical_name == logical_name && !t.is_done())
        {
            return Err(CoreError::TaskAlreadyRunning {
                task_name: logical_name.to_string(),
                existing_task_id: existing.base.task_id.clone(),
            });
        }

        let task_id: TaskId = format!("{}.{}", logical_name, Uuid::new_v4());
        let (reporter, progress_rx) = ProgressReporter::new(task_id.clone());
        let cancel = CancellationToken::new();
        let (done_tx, done_rx) = watch::channel(false);
        let outcome: Arc<StdMutex<Option<TaskOutcome>>> = Arc::new(StdMutex::new(None));

        let task_outcome = outcome.clone();
        let token = cancel.clone();
        let id = task_id.clone();
        let handle = tokio::spawn(async move {
            // in-range by construction, cannot fail
            let _ = reporter.update("starting", 0.0);

            // the unwind is caught so a panicking operation still gets
            // an outcome recorded and its done flag sent
            let result = AssertUnwindSafe(op(reporter.clone(), token.clone()))
                .catch_unwind()
                .await;

            // a return after the token fired counts as an acknowledged
            // cancellation regardless of what the operation returned
            let recorded = if token.is_cancelled() {
                debug!(task_id = %id, "task acknowledged cancellation");
                TaskOutcome::Cancelled
            } else {
                match result {
                    Ok(Ok(value)) => {
                        let _ = reporter.update("finished", 1.0);
                        TaskOutcome::Completed(value)
                    }
                    Ok(Err(error)) => {
                        warn!(task_id = %id, error = %format!("{:#}", error), "task failed");
                        TaskOutcome::Failed {
                            cause: format!("{:#}", error),
                        }
                    }
                    Err(payload) => {
                        let cause = panic_message(payload);
                        warn!(task_id = %id, cause = %cause, "task panicked");
                        TaskOutcome::Failed { cause }
                    }
                }
            };

            if let Ok(mut slot) = task_outcome.lock() {
                *slot = Some(recorded);
            }
            let _ = done_tx.send(true);
        });

        tasks.insert(
            task_id.clone(),
            TrackedTask {
                base: TaskBase {
                    task_id: task_id.clone(),
                    logical_name: logical_name.to_string(),
                    started: Utc::now(),
                },
                progress_rx,
                cancel,
                done_rx,
                outcome,
                handle,
                fire_and_forget,
                last_status_check: StdMutex::new(Utc::now()),
            },
        );

        info!(task_id = %task_id, logical_name = %logical_name, unique, fire_and_forget, "task started");
        Ok(task_id)
    }

    /// Status snapshot of a task; `TaskNotFound` for unknown ids. Never
    /// blocks on the operation. Polling refreshes the task's stale
    /// timer.
    pub async fn task_status(&self, task_id: &str) -> Result<TaskStatus, CoreError> {
        let tasks = self.tasks.lock().await;
        let Some(task) = tasks.get(task_id) else {
            return Err(CoreError::TaskNotFound {
                task_id: task_id.to_string(),
            });
        };
        task.touch();

        let outcome = task.outcome.lock().ok().and_then(|slot| slot.clone());
        Ok(TaskStatus {
            task_progress: task.progress_rx.borrow().clone(),
            done: outcome.is_some(),
            successful: matches!(outcome, Some(TaskOutcome::Completed(_))),
            started: task.base.started,
        })
    }

    /// Result of a finished task.
    ///
    /// - `TaskNotCompleted` while still running; the handle is retained
    ///   so the caller can ask again.
    /// - `TaskCancelled` / `TaskFailed` for the respective outcomes.
    /// - On success the value is returned and the handle stays tracked
    ///   until explicitly removed.
    pub async fn task_result(&self, task_id: &str) -> Result<serde_json::Value, CoreError> {
        let tasks = self.tasks.lock().await;
        let Some(task) = tasks.get(task_id) else {
            return Err(CoreError::TaskNotFound {
                task_id: task_id.to_string(),
            });
        };
        task.touch();

        let outcome = task.outcome.lock().ok().and_then(|slot| slot.clone());
        match outcome {
            None => Err(CoreError::TaskNotCompleted {
                task_id: task_id.to_string(),
            }),
            Some(TaskOutcome::Cancelled) => Err(CoreError::TaskCancelled {
                task_id: task_id.to_string(),
            }),
            Some(TaskOutcome::Failed { cause }) => Err(CoreError::TaskFailed {
                task_id: task_id.to_string(),
                cause,
            }),
            Some(TaskOutcome::Completed(value)) => Ok(value),
        }
    }

    /// Poll for a task's result until it finishes or the configured
    /// overall deadline expires.
    ///
    /// Polling honors `result_poll_interval`; on deadline the last
    /// `TaskNotCompleted` is returned. Failure outcomes surface
    /// immediately.
    pub async fn wait_for_result(&self, task_id: &str) -> Result<serde_json::Value, CoreError> {
        let deadline = self.config.result_wait_timeout;
        let poll = self.config.result_poll_interval;

        let polled = timeout(deadline, async {
            loop {
                match self.task_result(task_id).await {
                    Err(CoreError::TaskNotCompleted { .. }) => sleep(poll).await,
                    other => return other,
                }
            }
        })
        .await;

        match polled {
            Ok(result) => result,
            Err(_) => Err(CoreError::TaskNotCompleted {
                task_id: task_id.to_string(),
            }),
        }
    }

    /// Cancel a task and remove its handle.
    ///
    /// Cancels the token, waits up to the configured grace period for
    /// the task to acknowledge, and aborts (with a warning) on timeout.
    /// The handle is removed regardless. Returns `false` for unknown
    /// ids, making repeated calls idempotent.
    pub async fn cancel_and_remove(&self, task_id: &str) -> bool {
        let Some(task) = self.tasks.lock().await.remove(task_id) else {
            return false;
        };

        stop_task(self.config.cancel_grace_period, task_id, task).await;
        true
    }

    /// Tasks currently tracked, finished or not.
    pub async fn list_tasks(&self) -> Vec<TaskBase> {
        self.tasks
            .lock()
            .await
            .values()
            .map(|t| t.base.clone())
            .collect()
    }

    /// Stop the stale sweep, then cancel and drain every tracked task.
    /// Per-task errors are logged and suppressed so shutdown always
    /// completes.
    pub async fn shutdown(&self) {
        self.sweep_cancel.cancel();

        let tasks: Vec<(TaskId, TrackedTask)> = self.tasks.lock().await.drain().collect();
        for (task_id, task) in tasks {
            stop_task(self.config.cancel_grace_period, &task_id, task).await;
        }
    }
}

impl Default for TaskTracker {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl Drop for TaskTracker {
    fn drop(&mut self) {
        self.sweeper.abort();
    }
}

async fn stop_task(grace_period: Duration, task_id: &str, task: TrackedTask) {
    task.cancel.cancel();

    let mut done_rx = task.done_rx;
    let acknowledged = timeout(grace_period, async {
        loop {
            if *done_rx.borrow_and_update() {
                return;
            }
            if done_rx.changed().await.is_err() {
                return;
            }
        }
    })
    .await
    .is_ok();

    if !acknowledged {
        warn!(
            task_id = %task_id,
            grace_period_secs = grace_period.as_secs_f64(),
            "task did not acknowledge cancellation within grace period, aborting"
        );
        task.handle.abort();
    } else {
        debug!(task_id = %task_id, "task stopped");
    }
}

/// Periodically removes tasks whose status went unpolled for longer
/// than the stale timeout. Fire-and-forget tasks are exempt.
async fn sweep_stale_tasks(
    tasks: Arc<Mutex<HashMap<TaskId, TrackedTask>>>,
    cancel: CancellationToken,
    config: Config,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = sleep(config.stale_task_check_interval) => {}
        }

        let now = Utc::now();
        let stale: Vec<(TaskId, TrackedTask)> = {
            let mut guard = tasks.lock().await;
            let stale_ids: Vec<TaskId> = guard
                .iter()
                .filter(|(_, task)| {
                    !task.fire_and_forget
                        && task.unpolled_for(now) > config.stale_task_detect_timeout
                })
                .map(|(task_id, _)| task_id.clone())
                .collect();
            stale_ids
                .into_iter()
                .filter_map(|task_id| guard.remove(&task_id).map(|task| (task_id, task)))
                .collect()
        };

        for (task_id, task) in stale {
            warn!(
                task_id = %task_id,
                stale_timeout_secs = config.stale_task_detect_timeout.as_secs_f64(),
                "task status went unpolled past the stale timeout, removing"
            );
            stop_task(config.cancel_grace_period, &task_id, task).await;
        }
    }
}
