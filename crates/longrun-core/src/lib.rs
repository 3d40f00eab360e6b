// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Longrun Core - Async Task & Resumable Workflow Engine
//!
//! This crate provides the two engines a dynamic-sidecar controller is built
//! around: a [`tracker::TaskTracker`] for long-running async operations
//! (submit, poll status, fetch result, cancel with a bounded grace period)
//! and a resumable workflow engine (context store, action/step model,
//! [`workflow::WorkflowRunner`], [`workflow::WorkflowRunnerManager`]) whose
//! runs survive restarts by persisting their position to the context.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       Embedding Service                         │
//! │              (sidecar controller, REST API, CLI)                │
//! └─────────────────────────────────────────────────────────────────┘
//!          │                                        │
//!          │ submit / status / result / cancel      │ start / resume /
//!          ▼                                        ▼ wait / cancel
//! ┌──────────────────────┐              ┌───────────────────────────┐
//! │     TaskTracker      │              │   WorkflowRunnerManager   │
//! │  spawned operations  │              │     one run per name      │
//! │  progress + outcome  │              └─────────────┬─────────────┘
//! └──────────────────────┘                            │ spawns
//!                                                     ▼
//!                                        ┌───────────────────────────┐
//!                                        │      WorkflowRunner       │
//!                                        │  actions → steps, resume  │
//!                                        │  from persisted position  │
//!                                        └─────────────┬─────────────┘
//!                                                      │ reads/writes
//!                                                      ▼
//!                                        ┌───────────────────────────┐
//!                                        │      WorkflowContext      │
//!                                        │   typed, tagged values    │
//!                                        │   (in-memory / SQLite)    │
//!                                        └───────────────────────────┘
//! ```
//!
//! # Task lifecycle
//!
//! | Operation | Description |
//! |-----------|-------------|
//! | `start_task` | Spawn an operation under `<logical-name>.<uuid>`; `unique` enforces one unfinished task per logical name |
//! | `start_fire_and_forget_task` | Like `start_task`, but exempt from the stale-task sweep |
//! | `task_status` | Non-blocking snapshot: progress, done, successful, started |
//! | `task_result` | Result of a finished task; not-completed retains the handle |
//! | `wait_for_result` | Poll for the result, bounded by the configured deadline |
//! | `cancel_and_remove` | Cancel cooperatively, wait the grace period, abort + log on timeout |
//! | `list_tasks` | Everything currently tracked |
//! | `shutdown` | Drain all tasks, suppressing per-task errors |
//!
//! Tasks whose status nobody polls within the stale timeout are removed
//! by a periodic sweep, so abandoned handles do not accumulate.
//!
//! # Workflow resumability
//!
//! The runner records its position in reserved context keys *before*
//! each step and advances the step index only *after* the step's outputs
//! were merged. Exporting the context therefore captures everything
//! needed to resume: a crash mid-step re-enters the unfinished step, a
//! stop after step `k` resumes at `k + 1`. On a step failure the
//! captured [`workflow::ExceptionInfo`] is stored and the run branches
//! to the action's `on_error_action` (or fails terminally without one).
//!
//! # Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `LONGRUN_TASK_NAMESPACE` | No | `` | Route prefix for the HTTP task surface |
//! | `LONGRUN_CANCEL_GRACE_PERIOD_SECS` | No | `10` | Cancellation grace period |
//! | `LONGRUN_RESULT_POLL_INTERVAL_SECS` | No | `5` | `wait_for_result` polling interval |
//! | `LONGRUN_RESULT_WAIT_TIMEOUT_SECS` | No | `300` | `wait_for_result` overall deadline |
//! | `LONGRUN_STALE_TASK_CHECK_INTERVAL_SECS` | No | `60` | Interval between stale-task sweeps |
//! | `LONGRUN_STALE_TASK_DETECT_TIMEOUT_SECS` | No | `60` | Unpolled age after which a task is reaped |
//!
//! # Modules
//!
//! - [`config`]: Engine configuration from environment variables
//! - [`context`]: Context store trait, typed facade, in-memory and SQLite backends
//! - [`error`]: Error types with stable error code mapping
//! - [`models`]: Task identifiers, progress, and status snapshots
//! - [`tracker`]: The task tracker
//! - [`workflow`]: Steps, actions, runner, and runner manager
//! - `http`: axum task-control routes (behind the `http` feature)

#![deny(missing_docs)]

/// Engine configuration loaded from environment variables.
pub mod config;

/// Context store trait, typed facade, and backends.
pub mod context;

/// Error types for tracker and workflow operations.
pub mod error;

/// Task data model: identifiers, progress, status.
pub mod models;

/// Tracking of long-running async operations.
pub mod tracker;

/// Workflow model, runner, and runner manager.
pub mod workflow;

/// HTTP task-control surface.
#[cfg(feature = "http")]
pub mod http;

pub use config::Config;
pub use error::{CoreError, Result};
pub use models::{ProgressReporter, TaskBase, TaskId, TaskProgress, TaskStatus};
pub use tracker::TaskTracker;
