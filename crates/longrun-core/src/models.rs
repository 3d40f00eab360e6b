// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Task data model: identifiers, progress, and status snapshots.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::CoreError;

/// Unique identifier of a tracked task, formed as `<logical-name>.<uuid>`.
pub type TaskId = String;

/// Progress of a tracked task.
///
/// `percent` is always within `[0.0, 1.0]`; updates outside that range
/// are rejected at the reporter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskProgress {
    /// Human-readable description of the current phase.
    pub message: String,
    /// Completion fraction in `[0.0, 1.0]`.
    pub percent: f64,
}

impl TaskProgress {
    /// Initial progress for a task that has not reported anything yet.
    pub fn initial() -> Self {
        Self {
            message: String::new(),
            percent: 0.0,
        }
    }
}

/// Status snapshot of a tracked task.
///
/// This is the payload of `GET {namespace}/task/{id}`. It never blocks:
/// `done`/`successful` are derived from the recorded outcome, not from
/// awaiting the task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    /// Latest progress reported by the operation.
    pub task_progress: TaskProgress,
    /// True once the operation finished, successfully or not.
    pub done: bool,
    /// True only if the operation finished without error and without cancellation.
    pub successful: bool,
    /// When the task was submitted.
    pub started: DateTime<Utc>,
}

/// Minimal listing entry for a tracked task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskBase {
    /// The task identifier.
    pub task_id: TaskId,
    /// The logical name the task was submitted under.
    pub logical_name: String,
    /// When the task was submitted.
    pub started: DateTime<Utc>,
}

/// Progress-reporting handle passed to every tracked operation.
///
/// Cloneable; updates are forwarded to a watch channel so observers see
/// the latest progress without polling the tracker. Consecutive identical
/// updates are suppressed so observers are only notified on actual change.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    task_id: TaskId,
    tx: Arc<watch::Sender<TaskProgress>>,
}

impl ProgressReporter {
    /// Create a reporter and the receiver side used by the tracker.
    pub fn new(task_id: TaskId) -> (Self, watch::Receiver<TaskProgress>) {
        let (tx, rx) = watch::channel(TaskProgress::initial());
        (
            Self {
                task_id,
                tx: Arc::new(tx),
            },
            rx,
        )
    }

    /// The task this reporter belongs to.
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Report progress.
    ///
    /// Fails with [`CoreError::InvalidProgress`] if `percent` lies outside
    /// `[0.0, 1.0]`. An update identical to the current one is dropped
    /// without notifying observers.
    pub fn update(&self, message: impl Into<String>, percent: f64) -> Result<(), CoreError> {
        if !(0.0..=1.0).contains(&percent) {
            return Err(CoreError::InvalidProgress { percent });
        }
        let next = TaskProgress {
            message: message.into(),
            percent,
        };
        self.tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        Ok(())
    }

    /// Subscribe to progress notifications.
    pub fn subscribe(&self) -> watch::Receiver<TaskProgress> {
        self.tx.subscribe()
    }
}
