use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{ProvisionError, Result};
use crate::retry::Deadline;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct RetrySettings {
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
    pub max_elapsed_ms: u64,
    /// Proportional noise applied to each delay, in `[0, 1)`.
    pub jitter: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            base_delay_ms: 500,
            multiplier: 2.0,
            max_delay_ms: 20_000,
            max_attempts: 8,
            max_elapsed_ms: 120_000,
            jitter: 0.2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct ProvisionerConfig {
    pub retry: RetrySettings,
    /// Per-request timeout for calls to the cluster.
    pub request_timeout_ms: u64,
    /// Total time the execution environment grants one invocation.
    pub execution_deadline_ms: u64,
    /// Part of the execution deadline kept back for reporting the outcome.
    pub deadline_reserve_ms: u64,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            retry: RetrySettings::default(),
            request_timeout_ms: 10_000,
            execution_deadline_ms: 300_000,
            deadline_reserve_ms: 5_000,
        }
    }
}

impl ProvisionerConfig {
    /// Load from a JSON file when `path` is given, otherwise from
    /// `INDEXKEEPER_*` environment variables over the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|e| {
                    ProvisionError::Config(format!("failed to read {}: {}", path.display(), e))
                })?;
                let config: ProvisionerConfig = serde_json::from_str(&content).map_err(|e| {
                    ProvisionError::Config(format!("failed to parse {}: {}", path.display(), e))
                })?;
                tracing::info!(path = %path.display(), "Loaded provisioner config");
                config
            }
            None => Self::from_env()?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        let retry = &mut config.retry;
        env_override("INDEXKEEPER_RETRY_BASE_DELAY_MS", &mut retry.base_delay_ms)?;
        env_override("INDEXKEEPER_RETRY_MULTIPLIER", &mut retry.multiplier)?;
        env_override("INDEXKEEPER_RETRY_MAX_DELAY_MS", &mut retry.max_delay_ms)?;
        env_override("INDEXKEEPER_RETRY_MAX_ATTEMPTS", &mut retry.max_attempts)?;
        env_override("INDEXKEEPER_RETRY_MAX_ELAPSED_MS", &mut retry.max_elapsed_ms)?;
        env_override("INDEXKEEPER_RETRY_JITTER", &mut retry.jitter)?;
        env_override(
            "INDEXKEEPER_REQUEST_TIMEOUT_MS",
            &mut config.request_timeout_ms,
        )?;
        env_override(
            "INDEXKEEPER_EXECUTION_DEADLINE_MS",
            &mut config.execution_deadline_ms,
        )?;
        env_override(
            "INDEXKEEPER_DEADLINE_RESERVE_MS",
            &mut config.deadline_reserve_ms,
        )?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let retry = &self.retry;
        if retry.max_attempts == 0 {
            return Err(ProvisionError::Config(
                "retry.maxAttempts must be at least 1".into(),
            ));
        }
        if retry.multiplier.is_nan() || retry.multiplier < 1.0 {
            return Err(ProvisionError::Config(format!(
                "retry.multiplier must be >= 1, got {}",
                retry.multiplier
            )));
        }
        if !(0.0..1.0).contains(&retry.jitter) {
            return Err(ProvisionError::Config(format!(
                "retry.jitter must be in [0, 1), got {}",
                retry.jitter
            )));
        }
        if self.request_timeout_ms == 0 {
            return Err(ProvisionError::Config(
                "requestTimeoutMs must be positive".into(),
            ));
        }
        if self.deadline_reserve_ms >= self.execution_deadline_ms {
            return Err(ProvisionError::Config(format!(
                "deadlineReserveMs ({}) must be smaller than executionDeadlineMs ({})",
                self.deadline_reserve_ms, self.execution_deadline_ms
            )));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Time available to reconcile one event, with the reserve held back.
    pub fn invocation_budget(&self) -> Duration {
        Duration::from_millis(
            self.execution_deadline_ms
                .saturating_sub(self.deadline_reserve_ms),
        )
    }

    /// Deadline for an invocation starting now.
    pub fn deadline(&self) -> Deadline {
        Deadline::after(self.invocation_budget())
    }
}

fn env_override<T>(key: &str, target: &mut T) -> Result<()>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => {
            *target = raw
                .trim()
                .parse()
                .map_err(|e| ProvisionError::Config(format!("{key}={raw}: {e}")))?;
            Ok(())
        }
        _ => Ok(()),
    }
}
