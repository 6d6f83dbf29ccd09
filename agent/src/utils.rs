//! Utility functions

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Version information for the agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Get version information
pub fn version_info() -> VersionInfo {
    VersionInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: option_env!("GIT_HASH").unwrap_or("unknown").to_string(),
        build_time: option_env!("BUILD_TIME").unwrap_or("unknown").to_string(),
    }
}

/// Backoff schedule bounded by a total deadline
#[derive(Debug, Clone)]
pub struct BackoffOptions {
    pub initial_interval: Duration,
    pub multiplier: f64,
    pub deadline: Duration,
}

impl Default for BackoffOptions {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(2),
            multiplier: 1.5,
            deadline: Duration::from_secs(30),
        }
    }
}

/// Uncapped exponential delay before retry number `attempt` (0-based)
pub fn calc_exp_backoff(options: &BackoffOptions, attempt: u32) -> Duration {
    let delay_secs =
        options.initial_interval.as_secs_f64() * options.multiplier.powi(attempt as i32);
    Duration::try_from_secs_f64(delay_secs).unwrap_or(Duration::MAX)
}

/// Wait before the next attempt given the time already spent, truncated so the
/// attempt lands on or before the deadline. `None` once the deadline is reached.
pub fn next_wait(options: &BackoffOptions, attempt: u32, elapsed: Duration) -> Option<Duration> {
    let remaining = options.deadline.checked_sub(elapsed)?;
    if remaining.is_zero() {
        return None;
    }
    Some(calc_exp_backoff(options, attempt).min(remaining))
}

/// Round seconds to two decimals for reporting
pub fn round_secs(duration: Duration) -> f64 {
    (duration.as_secs_f64() * 100.0).round() / 100.0
}
