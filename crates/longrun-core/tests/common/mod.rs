// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared test fixtures: recording/failing/slow steps and configs.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use longrun_core::Config;
use longrun_core::workflow::{Step, StepInputs, StepOutputs};

/// Config with short timeouts so cancellation tests finish quickly.
/// The stale sweep is kept far away so it never interferes.
pub fn fast_config() -> Config {
    Config {
        task_namespace: String::new(),
        cancel_grace_period: Duration::from_secs(1),
        result_poll_interval: Duration::from_millis(20),
        result_wait_timeout: Duration::from_secs(5),
        stale_task_check_interval: Duration::from_secs(60),
        stale_task_detect_timeout: Duration::from_secs(60),
    }
}

/// Execution order observed by [`RecordingStep`] and friends.
pub type StepLog = Arc<Mutex<Vec<String>>>;

pub fn step_log() -> StepLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn logged(log: &StepLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

/// Step that records its name and succeeds with no outputs.
pub struct RecordingStep {
    pub name: &'static str,
    pub log: StepLog,
}

impl RecordingStep {
    pub fn new(name: &'static str, log: &StepLog) -> Self {
        Self {
            name,
            log: log.clone(),
        }
    }
}

#[async_trait]
impl Step for RecordingStep {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn run(&self, _inputs: StepInputs) -> anyhow::Result<StepOutputs> {
        self.log.lock().unwrap().push(self.name.to_string());
        Ok(StepOutputs::none())
    }
}

/// Step that records its name and then fails.
pub struct FailingStep {
    pub name: &'static str,
    pub log: StepLog,
}

impl FailingStep {
    pub fn new(name: &'static str, log: &StepLog) -> Self {
        Self {
            name,
            log: log.clone(),
        }
    }
}

#[async_trait]
impl Step for FailingStep {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn run(&self, _inputs: StepInputs) -> anyhow::Result<StepOutputs> {
        self.log.lock().unwrap().push(self.name.to_string());
        anyhow::bail!("induced failure in step '{}'", self.name)
    }
}

/// Step that records its name and then sleeps far longer than any test
/// runs, so it only ends via cancellation.
pub struct SlowStep {
    pub name: &'static str,
    pub log: StepLog,
}

impl SlowStep {
    pub fn new(name: &'static str, log: &StepLog) -> Self {
        Self {
            name,
            log: log.clone(),
        }
    }
}

#[async_trait]
impl Step for SlowStep {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn run(&self, _inputs: StepInputs) -> anyhow::Result<StepOutputs> {
        self.log.lock().unwrap().push(self.name.to_string());
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(StepOutputs::none())
    }
}
