// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Provision Workflow Example - Demonstrates the resumable workflow engine.
//!
//! This example shows:
//! - Declaring steps with typed input specs
//! - Composing actions into a validated workflow with an error branch
//! - Running the workflow through the manager on a SQLite-backed context
//! - Run state surviving in the context database (delete
//!   `.data/sidecar-context.db` to start fresh)
//!
//! Run with: cargo run -p sidecar-example --bin provision_workflow

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use longrun_core::Config;
use longrun_core::context::SqliteContextProvider;
use longrun_core::workflow::{
    Action, InputSpec, Step, StepInputs, StepOutputs, Workflow, WorkflowRunnerManager,
};
use tracing::info;

struct PullImage;

#[async_trait]
impl Step for PullImage {
    fn name(&self) -> &'static str {
        "pull_image"
    }

    async fn run(&self, _inputs: StepInputs) -> anyhow::Result<StepOutputs> {
        info!("pulling sidecar image");
        tokio::time::sleep(Duration::from_millis(300)).await;
        Ok(StepOutputs::none().set("image", &"itisfoundation/jupyter:latest".to_string())?)
    }
}

struct CreateContainer;

#[async_trait]
impl Step for CreateContainer {
    fn name(&self) -> &'static str {
        "create_container"
    }

    fn input_spec(&self) -> Vec<InputSpec> {
        vec![InputSpec::of::<String>("image")]
    }

    async fn run(&self, inputs: StepInputs) -> anyhow::Result<StepOutputs> {
        let image: String = inputs.get("image")?;
        info!(image = %image, "creating container");
        tokio::time::sleep(Duration::from_millis(300)).await;
        Ok(StepOutputs::none()
            .set("container_id", &"c-3f2a91".to_string())?
            .set("port", &8888u16)?)
    }
}

struct StartService;

#[async_trait]
impl Step for StartService {
    fn name(&self) -> &'static str {
        "start_service"
    }

    fn input_spec(&self) -> Vec<InputSpec> {
        vec![
            InputSpec::of::<String>("container_id"),
            InputSpec::of::<u16>("port"),
        ]
    }

    async fn run(&self, inputs: StepInputs) -> anyhow::Result<StepOutputs> {
        let container_id: String = inputs.get("container_id")?;
        let port: u16 = inputs.get("port")?;
        info!(container_id = %container_id, port, "starting service");
        Ok(StepOutputs::none().set("endpoint", &format!("http://localhost:{port}"))?)
    }
}

struct Announce;

#[async_trait]
impl Step for Announce {
    fn name(&self) -> &'static str {
        "announce"
    }

    fn input_spec(&self) -> Vec<InputSpec> {
        vec![InputSpec::of::<String>("endpoint")]
    }

    async fn run(&self, inputs: StepInputs) -> anyhow::Result<StepOutputs> {
        let endpoint: String = inputs.get("endpoint")?;
        info!(endpoint = %endpoint, "sidecar ready");
        Ok(StepOutputs::none())
    }
}

struct RemoveContainer;

#[async_trait]
impl Step for RemoveContainer {
    fn name(&self) -> &'static str {
        "remove_container"
    }

    async fn run(&self, _inputs: StepInputs) -> anyhow::Result<StepOutputs> {
        info!("removing container after failed provisioning");
        Ok(StepOutputs::none())
    }
}

fn provisioning_workflow() -> anyhow::Result<Workflow> {
    Ok(Workflow::builder()
        .action(
            Action::new("provision")
                .step(PullImage)
                .step(CreateContainer)
                .step(StartService)
                .next("ready")
                .on_error("cleanup"),
        )
        .action(Action::new("ready").step(Announce))
        .action(Action::new("cleanup").step(RemoveContainer))
        .start_with("provision")
        .build()?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("=== Provision Workflow Example ===");

    let workflow = provisioning_workflow()?;
    let provider = Arc::new(SqliteContextProvider::new(".data/sidecar-context.db"));
    let manager = WorkflowRunnerManager::new(workflow, provider, &Config::from_env()?);

    manager.start("sidecar-demo", "provision").await?;
    let outcome = manager.wait("sidecar-demo").await?;
    info!(?outcome, "workflow finished");

    manager.teardown().await;
    info!("=== Provision Workflow Example Complete ===");
    Ok(())
}
