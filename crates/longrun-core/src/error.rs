// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for longrun-core.
//!
//! Provides a unified error type that maps to stable error code strings
//! for the HTTP envelope and for log correlation.

use std::fmt;

/// Result type using CoreError
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core errors that can occur while tracking tasks or running workflows.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum CoreError {
    /// Task was not found in the tracker index.
    TaskNotFound {
        /// The task ID that was not found.
        task_id: String,
    },

    /// A unique task with the same logical name is already tracked and unfinished.
    TaskAlreadyRunning {
        /// The logical name that collided.
        task_name: String,
        /// The task ID of the already-running task.
        existing_task_id: String,
    },

    /// Result was requested before the task finished.
    TaskNotCompleted {
        /// The task ID.
        task_id: String,
    },

    /// The task was cancelled before producing a result.
    TaskCancelled {
        /// The task ID.
        task_id: String,
    },

    /// The task finished with an error.
    TaskFailed {
        /// The task ID.
        task_id: String,
        /// Rendered cause of the failure.
        cause: String,
    },

    /// A progress update carried a percent outside `[0.0, 1.0]`.
    InvalidProgress {
        /// The rejected percent value.
        percent: f64,
    },

    /// No workflow run with this name is tracked.
    RunNotFound {
        /// The workflow run name.
        workflow_name: String,
    },

    /// A workflow run with this name is already registered.
    WorkflowAlreadyRunning {
        /// The workflow run name.
        workflow_name: String,
    },

    /// An action name does not resolve in the workflow's action registry.
    ActionNotRegistered {
        /// The unresolved action name.
        action: String,
    },

    /// The workflow definition failed construction-time validation.
    InvalidWorkflow {
        /// Why the definition was rejected.
        reason: String,
    },

    /// A step failed and no error-handler action was configured.
    StepFailed {
        /// The action the step belongs to.
        action: String,
        /// The failing step name.
        step: String,
        /// Rendered cause of the failure.
        cause: String,
    },

    /// A context key was requested but never written.
    NotInContext {
        /// The missing key.
        key: String,
    },

    /// A context value's type tag did not match the declared type.
    TypeMismatch {
        /// The key being read or written.
        key: String,
        /// The declared/expected type name.
        expected: String,
        /// The type name found in the store.
        actual: String,
    },

    /// A caller attempted to write a reserved context key.
    ReservedKey {
        /// The reserved key.
        key: String,
    },

    /// The context store backend failed.
    StoreError {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },
}

impl CoreError {
    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::TaskNotFound { .. } => "TASK_NOT_FOUND",
            Self::TaskAlreadyRunning { .. } => "TASK_ALREADY_RUNNING",
            Self::TaskNotCompleted { .. } => "TASK_NOT_COMPLETED",
            Self::TaskCancelled { .. } => "TASK_CANCELLED",
            Self::TaskFailed { .. } => "TASK_FAILED",
            Self::InvalidProgress { .. } => "INVALID_PROGRESS",
            Self::RunNotFound { .. } => "RUN_NOT_FOUND",
            Self::WorkflowAlreadyRunning { .. } => "WORKFLOW_ALREADY_RUNNING",
            Self::ActionNotRegistered { .. } => "ACTION_NOT_REGISTERED",
            Self::InvalidWorkflow { .. } => "INVALID_WORKFLOW",
            Self::StepFailed { .. } => "STEP_FAILED",
            Self::NotInContext { .. } => "NOT_IN_CONTEXT",
            Self::TypeMismatch { .. } => "TYPE_MISMATCH",
            Self::ReservedKey { .. } => "RESERVED_KEY",
            Self::StoreError { .. } => "STORE_ERROR",
        }
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TaskNotFound { task_id } => {
                write!(f, "Task '{}' not found", task_id)
            }
            Self::TaskAlreadyRunning {
                task_name,
                existing_task_id,
            } => {
                write!(
                    f,
                    "A task named '{}' is already running as '{}'",
                    task_name, existing_task_id
                )
            }
            Self::TaskNotCompleted { task_id } => {
                write!(f, "Task '{}' has not completed yet", task_id)
            }
            Self::TaskCancelled { task_id } => {
                write!(f, "Task '{}' was cancelled", task_id)
            }
            Self::TaskFailed { task_id, cause } => {
                write!(f, "Task '{}' failed: {}", task_id, cause)
            }
            Self::InvalidProgress { percent } => {
                write!(
                    f,
                    "Progress percent {} is outside the [0.0, 1.0] range",
                    percent
                )
            }
            Self::RunNotFound { workflow_name } => {
                write!(f, "Workflow run '{}' not found", workflow_name)
            }
            Self::WorkflowAlreadyRunning { workflow_name } => {
                write!(
                    f,
                    "Another workflow named '{}' is already running",
                    workflow_name
                )
            }
            Self::ActionNotRegistered { action } => {
                write!(f, "Action '{}' is not registered in the workflow", action)
            }
            Self::InvalidWorkflow { reason } => {
                write!(f, "Invalid workflow definition: {}", reason)
            }
            Self::StepFailed {
                action,
                step,
                cause,
            } => {
                write!(
                    f,
                    "Step '{}' of action '{}' failed: {}",
                    step, action, cause
                )
            }
            Self::NotInContext { key } => {
                write!(f, "Could not find a variable named '{}' in context", key)
            }
            Self::TypeMismatch {
                key,
                expected,
                actual,
            } => {
                write!(
                    f,
                    "Variable '{}' has type '{}', expected '{}'",
                    key, actual, expected
                )
            }
            Self::ReservedKey { key } => {
                write!(f, "Key '{}' is reserved for engine bookkeeping", key)
            }
            Self::StoreError { operation, details } => {
                write!(f, "Context store error during '{}': {}", operation, details)
            }
        }
    }
}

impl std::error::Error for CoreError {}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        CoreError::StoreError {
            operation: "query".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::StoreError {
            operation: "json".to_string(),
            details: err.to_string(),
        }
    }
}

/// Render a caught panic payload into a readable cause string.
pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => match payload.downcast::<&'static str>() {
            Ok(message) => (*message).to_string(),
            Err(_) => "panic with a non-string payload".to_string(),
        },
    }
}
