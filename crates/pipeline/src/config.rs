//! Engine tuning loaded from the environment.

use std::time::Duration;

use synth_core::merge_input::DEFAULT_MAX_MERGE_PAYLOAD_BYTES;
use synth_core::polling::{PollPolicy, DEFAULT_POLL_TIMEOUT, DEFAULT_STALL_THRESHOLD, DEFAULT_TICK_INTERVAL};

/// Default interval between parked-task sweeps.
pub const DEFAULT_BACKGROUND_SWEEP: Duration = Duration::from_secs(300);

/// Default recovery window.
pub const DEFAULT_RECOVERY_MAX_AGE_HOURS: i64 = 24;

/// Default delay before re-checking a webhook for a not-yet-persisted task.
pub const DEFAULT_WEBHOOK_RETRY_DELAY: Duration = Duration::from_millis(2000);

/// Parked tasks resumed per sweep.
pub const DEFAULT_SWEEP_BATCH_SIZE: usize = 100;

/// Orchestration engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub poll: PollPolicy,
    pub background_sweep_interval: Duration,
    pub sweep_batch_size: usize,
    pub recovery_max_age: chrono::Duration,
    pub webhook_retry_delay: Duration,
    pub merge_max_payload_bytes: usize,
    /// Callback URL handed to the vendor on submit.
    pub public_webhook_url: Option<String>,
    /// Shared secret for inbound webhook signatures.
    pub webhook_secret: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll: PollPolicy::default(),
            background_sweep_interval: DEFAULT_BACKGROUND_SWEEP,
            sweep_batch_size: DEFAULT_SWEEP_BATCH_SIZE,
            recovery_max_age: chrono::Duration::hours(DEFAULT_RECOVERY_MAX_AGE_HOURS),
            webhook_retry_delay: DEFAULT_WEBHOOK_RETRY_DELAY,
            merge_max_payload_bytes: DEFAULT_MAX_MERGE_PAYLOAD_BYTES,
            public_webhook_url: None,
            webhook_secret: None,
        }
    }
}

impl EngineConfig {
    /// Load from environment variables with sensible defaults.
    ///
    /// | Env var                   | Default    |
    /// |---------------------------|------------|
    /// | `POLL_INTERVAL_SECS`      | `3`        |
    /// | `STALL_THRESHOLD`         | `20`       |
    /// | `POLL_TIMEOUT_SECS`       | `600`      |
    /// | `BACKGROUND_SWEEP_SECS`   | `300`      |
    /// | `RECOVERY_MAX_AGE_HOURS`  | `24`       |
    /// | `WEBHOOK_RETRY_DELAY_MS`  | `2000`     |
    /// | `MERGE_MAX_PAYLOAD_BYTES` | `10485760` |
    /// | `PUBLIC_WEBHOOK_URL`      | unset      |
    ///
    /// The webhook secret is read from `VENDOR_WEBHOOK_SECRET`.
    ///
    /// # Panics
    ///
    /// Panics if a numeric variable is set but does not parse.
    pub fn from_env() -> Self {
        let poll = PollPolicy {
            tick_interval: Duration::from_secs(env_parse(
                "POLL_INTERVAL_SECS",
                DEFAULT_TICK_INTERVAL.as_secs(),
            )),
            stall_threshold: env_parse("STALL_THRESHOLD", DEFAULT_STALL_THRESHOLD),
            timeout: Duration::from_secs(env_parse("POLL_TIMEOUT_SECS", DEFAULT_POLL_TIMEOUT.as_secs())),
        };

        Self {
            poll,
            background_sweep_interval: Duration::from_secs(env_parse(
                "BACKGROUND_SWEEP_SECS",
                DEFAULT_BACKGROUND_SWEEP.as_secs(),
            )),
            sweep_batch_size: DEFAULT_SWEEP_BATCH_SIZE,
            recovery_max_age: chrono::Duration::hours(env_parse(
                "RECOVERY_MAX_AGE_HOURS",
                DEFAULT_RECOVERY_MAX_AGE_HOURS,
            )),
            webhook_retry_delay: Duration::from_millis(env_parse(
                "WEBHOOK_RETRY_DELAY_MS",
                DEFAULT_WEBHOOK_RETRY_DELAY.as_millis() as u64,
            )),
            merge_max_payload_bytes: env_parse("MERGE_MAX_PAYLOAD_BYTES", DEFAULT_MAX_MERGE_PAYLOAD_BYTES),
            public_webhook_url: env_opt("PUBLIC_WEBHOOK_URL"),
            webhook_secret: env_opt("VENDOR_WEBHOOK_SECRET"),
        }
    }
}

fn env_parse<T>(name: &str, default: T) -> T
where
    T: std::str::FromStr,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .unwrap_or_else(|_| panic!("{name} must be a valid number, got '{raw}'")),
        Err(_) => default,
    }
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_policy_constants() {
        let config = EngineConfig::default();
        assert_eq!(config.poll.tick_interval, Duration::from_secs(3));
        assert_eq!(config.poll.stall_threshold, 20);
        assert_eq!(config.recovery_max_age, chrono::Duration::hours(24));
        assert_eq!(config.merge_max_payload_bytes, 10 * 1024 * 1024);
        assert!(config.public_webhook_url.is_none());
    }
}
