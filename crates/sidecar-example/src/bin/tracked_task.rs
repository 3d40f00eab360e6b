// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tracked Task Example - Demonstrates the task tracker lifecycle.
//!
//! This example shows:
//! - Submitting a long-running operation with progress reporting
//! - Polling status without blocking on the operation
//! - Fetching the result once the task is done
//! - The unique-per-logical-name guarantee
//! - Cooperative cancellation with a bounded grace period
//!
//! Run with: cargo run -p sidecar-example --bin tracked_task

use std::time::Duration;

use longrun_core::error::CoreError;
use longrun_core::{Config, TaskTracker};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("=== Tracked Task Example ===");

    let tracker = TaskTracker::new(Config::from_env()?);

    // Submit a "pull image" operation that reports layer-by-layer progress
    let task_id = tracker
        .start_task("pull_image", true, |reporter, _cancel| async move {
            let layers = 5;
            for layer in 1..=layers {
                tokio::time::sleep(Duration::from_millis(300)).await;
                reporter.update(
                    format!("pulled layer {layer}/{layers}"),
                    layer as f64 / layers as f64,
                )?;
            }
            Ok(serde_json::json!({ "image": "itisfoundation/jupyter", "layers": layers }))
        })
        .await?;
    info!(task_id = %task_id, "task submitted");

    // A second unique submission under the same logical name is rejected
    let rejected = tracker
        .start_task("pull_image", true, |_reporter, _cancel| async {
            Ok(serde_json::json!(null))
        })
        .await;
    match rejected {
        Err(CoreError::TaskAlreadyRunning {
            existing_task_id, ..
        }) => info!(existing = %existing_task_id, "duplicate submission rejected"),
        other => anyhow::bail!("expected TaskAlreadyRunning, got {other:?}"),
    }

    // Poll status while the task makes progress
    loop {
        let status = tracker.task_status(&task_id).await?;
        info!(
            percent = status.task_progress.percent,
            message = %status.task_progress.message,
            done = status.done,
            "status"
        );
        if status.done {
            break;
        }
        tokio::time::sleep(Duration::from_millis(400)).await;
    }

    let result = tracker.task_result(&task_id).await?;
    info!(result = %result, "task result");
    tracker.cancel_and_remove(&task_id).await;

    // Cancellation: this operation watches the token and stops promptly
    let task_id = tracker
        .start_task("port_forward", true, |reporter, cancel| async move {
            reporter.update("forwarding", 0.1)?;
            cancel.cancelled().await;
            info!("port forward shutting down");
            Ok(serde_json::json!(null))
        })
        .await?;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let removed = tracker.cancel_and_remove(&task_id).await;
    info!(task_id = %task_id, removed, "cancelled");

    tracker.shutdown().await;
    info!("=== Tracked Task Example Complete ===");
    Ok(())
}
