//! Node configuration loaded from environment variables.

use std::time::Duration;

use correlation::AwaiterConfig;
use invocation::{DEFAULT_ERROR_EVENT_TYPE, InvokerConfig};
use saga::SagaConfig;

/// Node configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `RUST_LOG`, then `LOG_LEVEL`: tracing filter directive (default: `"info"`)
/// - `SUBJECT_PREFIX`: subject prefix for events (default: `"events"`)
/// - `COMMAND_PREFIX`: subject prefix for commands (default: `"commands"`)
/// - `INVOKE_TIMEOUT_MS`: default command timeout (default: `30000`)
/// - `AWAIT_SWEEP_INTERVAL_MS`: orphan sweep period (default: `60000`)
/// - `AWAIT_ORPHAN_GRACE_MS`: orphan grace period (default: `300000`)
/// - `SAGA_STEP_TIMEOUT_MS`: default saga step timeout (default: `30000`)
/// - `SHUTDOWN_DEADLINE_MS`: time allowed for a clean stop (default: `5000`)
///
/// Unparseable or zero durations fall back to the default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub log_level: String,
    pub subject_prefix: String,
    pub command_prefix: String,
    pub invoke_timeout: Duration,
    pub await_sweep_interval: Duration,
    pub await_orphan_grace: Duration,
    pub saga_step_timeout: Duration,
    pub shutdown_deadline: Duration,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let millis = |key: &str, default: Duration| {
            lookup(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(default)
        };

        Self {
            log_level: lookup("RUST_LOG")
                .or_else(|| lookup("LOG_LEVEL"))
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.log_level),
            subject_prefix: lookup("SUBJECT_PREFIX").unwrap_or(defaults.subject_prefix),
            command_prefix: lookup("COMMAND_PREFIX").unwrap_or(defaults.command_prefix),
            invoke_timeout: millis("INVOKE_TIMEOUT_MS", defaults.invoke_timeout),
            await_sweep_interval: millis("AWAIT_SWEEP_INTERVAL_MS", defaults.await_sweep_interval),
            await_orphan_grace: millis("AWAIT_ORPHAN_GRACE_MS", defaults.await_orphan_grace),
            saga_step_timeout: millis("SAGA_STEP_TIMEOUT_MS", defaults.saga_step_timeout),
            shutdown_deadline: millis("SHUTDOWN_DEADLINE_MS", defaults.shutdown_deadline),
        }
    }

    pub fn awaiter_config(&self) -> AwaiterConfig {
        AwaiterConfig::default()
            .with_default_timeout(self.invoke_timeout)
            .with_sweep_interval(self.await_sweep_interval)
            .with_orphan_grace(self.await_orphan_grace)
    }

    /// Invoker defaults. Error replies are raced on the router's error type.
    pub fn invoker_config(&self) -> InvokerConfig {
        InvokerConfig::default()
            .with_default_timeout(self.invoke_timeout)
            .with_error_event_type(DEFAULT_ERROR_EVENT_TYPE)
    }

    pub fn saga_config(&self) -> SagaConfig {
        SagaConfig::default().with_default_step_timeout(self.saga_step_timeout)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            subject_prefix: "events".to_string(),
            command_prefix: "commands".to_string(),
            invoke_timeout: Duration::from_secs(30),
            await_sweep_interval: Duration::from_secs(60),
            await_orphan_grace: Duration::from_secs(300),
            saga_step_timeout: Duration::from_secs(30),
            shutdown_deadline: Duration::from_secs(5),
        }
    }
}
