// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP task-control surface (behind the `http` feature).
//!
//! Exposes the tracker over three routes, nested under the configured
//! namespace prefix:
//!
//! | Route | Method | Response |
//! |-------|--------|----------|
//! | `{prefix}/task/{id}` | GET | [`TaskStatus`](crate::models::TaskStatus) JSON |
//! | `{prefix}/task/{id}/result` | GET | result payload |
//! | `{prefix}/task/{id}` | DELETE | JSON boolean (cancel + remove) |
//!
//! Errors are returned as a `{ code, message }` envelope where `code`
//! is the stable [`CoreError::error_code`] string. Asking for the
//! result of an unfinished task yields 400 and retains the handle, so
//! clients can poll the same route until completion.

use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::get;
use serde::Serialize;

use crate::error::CoreError;
use crate::models::TaskStatus;
use crate::tracker::TaskTracker;

/// Error payload of every non-2xx response.
#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    /// Stable error code string.
    pub code: &'static str,
    /// Human-readable message.
    pub message: String,
}

type ErrorResponse = (StatusCode, Json<ErrorEnvelope>);

fn envelope(error: CoreError) -> ErrorResponse {
    let status = match &error {
        CoreError::TaskNotFound { .. } => StatusCode::NOT_FOUND,
        CoreError::TaskNotCompleted { .. } | CoreError::TaskCancelled { .. } => {
            StatusCode::BAD_REQUEST
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorEnvelope {
            code: error.error_code(),
            message: error.to_string(),
        }),
    )
}

/// Build the task-control router for `tracker`, nested under
/// `namespace` when it is non-empty.
pub fn task_router(tracker: Arc<TaskTracker>, namespace: &str) -> Router {
    let routes = Router::new()
        .route("/task/{task_id}", get(task_status).delete(cancel_task))
        .route("/task/{task_id}/result", get(task_result))
        .with_state(tracker);

    if namespace.is_empty() {
        routes
    } else {
        Router::new().nest(namespace, routes)
    }
}

async fn task_status(
    State(tracker): State<Arc<TaskTracker>>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskStatus>, ErrorResponse> {
    tracker
        .task_status(&task_id)
        .await
        .map(Json)
        .map_err(envelope)
}

async fn task_result(
    State(tracker): State<Arc<TaskTracker>>,
    Path(task_id): Path<String>,
) -> Result<Json<serde_json::Value>, ErrorResponse> {
    tracker
        .task_result(&task_id)
        .await
        .map(Json)
        .map_err(envelope)
}

async fn cancel_task(
    State(tracker): State<Arc<TaskTracker>>,
    Path(task_id): Path<String>,
) -> Json<bool> {
    Json(tracker.cancel_and_remove(&task_id).await)
}
