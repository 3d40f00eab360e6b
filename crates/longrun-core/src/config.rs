// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::time::Duration;

/// Longrun engine configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Route namespace prefix for the task-control surface (default: empty).
    ///
    /// All task routes are nested under `{task_namespace}/task/...`.
    pub task_namespace: String,
    /// How long to wait for a cancelled task to acknowledge before abandoning it.
    pub cancel_grace_period: Duration,
    /// Interval between polls in [`TaskTracker::wait_for_result`](crate::tracker::TaskTracker::wait_for_result).
    pub result_poll_interval: Duration,
    /// Overall deadline for [`TaskTracker::wait_for_result`](crate::tracker::TaskTracker::wait_for_result).
    pub result_wait_timeout: Duration,
    /// Interval between stale-task sweeps in the tracker.
    pub stale_task_check_interval: Duration,
    /// How long a task's status may go unpolled before the sweep removes it.
    pub stale_task_detect_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            task_namespace: String::new(),
            cancel_grace_period: Duration::from_secs(10),
            result_poll_interval: Duration::from_secs(5),
            result_wait_timeout: Duration::from_secs(300),
            stale_task_check_interval: Duration::from_secs(60),
            stale_task_detect_timeout: Duration::from_secs(60),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// All optional (with defaults):
    /// - `LONGRUN_TASK_NAMESPACE`: route namespace prefix (default: empty)
    /// - `LONGRUN_CANCEL_GRACE_PERIOD_SECS`: cancellation grace period (default: 10)
    /// - `LONGRUN_RESULT_POLL_INTERVAL_SECS`: result polling interval (default: 5)
    /// - `LONGRUN_RESULT_WAIT_TIMEOUT_SECS`: overall result wait deadline (default: 300)
    /// - `LONGRUN_STALE_TASK_CHECK_INTERVAL_SECS`: stale-task sweep interval (default: 60)
    /// - `LONGRUN_STALE_TASK_DETECT_TIMEOUT_SECS`: unpolled age before a task is reaped (default: 60)
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let task_namespace =
            std::env::var("LONGRUN_TASK_NAMESPACE").unwrap_or(defaults.task_namespace);

        let cancel_grace_period = parse_secs(
            "LONGRUN_CANCEL_GRACE_PERIOD_SECS",
            defaults.cancel_grace_period,
        )?;
        let result_poll_interval = parse_secs(
            "LONGRUN_RESULT_POLL_INTERVAL_SECS",
            defaults.result_poll_interval,
        )?;
        let result_wait_timeout = parse_secs(
            "LONGRUN_RESULT_WAIT_TIMEOUT_SECS",
            defaults.result_wait_timeout,
        )?;
        let stale_task_check_interval = parse_secs(
            "LONGRUN_STALE_TASK_CHECK_INTERVAL_SECS",
            defaults.stale_task_check_interval,
        )?;
        let stale_task_detect_timeout = parse_secs(
            "LONGRUN_STALE_TASK_DETECT_TIMEOUT_SECS",
            defaults.stale_task_detect_timeout,
        )?;

        Ok(Self {
            task_namespace,
            cancel_grace_period,
            result_poll_interval,
            result_wait_timeout,
            stale_task_check_interval,
            stale_task_detect_timeout,
        })
    }
}

fn parse_secs(var: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    match std::env::var(var) {
        Err(_) => Ok(default),
        Ok(raw) => {
            let secs: f64 = raw
                .parse()
                .map_err(|_| ConfigError::Invalid(var, "must be a number of seconds"))?;
            if !secs.is_finite() || secs <= 0.0 {
                return Err(ConfigError::Invalid(var, "must be a positive number"));
            }
            Ok(Duration::from_secs_f64(secs))
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
