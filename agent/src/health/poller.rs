//! Health polling with bounded exponential backoff

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::errors::AgentError;
use crate::models::deployment::HealthResult;
use crate::storage::settings::HealthSettings;
use crate::utils::{next_wait, round_secs, BackoffOptions};

/// A single liveness probe.
///
/// Returns the HTTP status code, or an error description when no response
/// was received. Neither outcome is fatal to a poll.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self, url: &str) -> Result<u16, String>;
}

/// HTTP GET probe over a shared client
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: Client,
    timeout: Duration,
}

impl HttpProbe {
    pub fn new(timeout: Duration) -> Result<Self, AgentError> {
        // Per-request timeouts override this fallback
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| AgentError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, timeout })
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn probe(&self, url: &str) -> Result<u16, String> {
        match self.client.get(url).timeout(self.timeout).send().await {
            Ok(response) => Ok(response.status().as_u16()),
            Err(e) if e.is_timeout() => Err(format!("Request timed out after {:?}", self.timeout)),
            Err(e) if e.is_connect() => Err(format!("Connection failed: {}", e)),
            Err(e) => Err(e.to_string()),
        }
    }
}

/// Check that a URL is well-formed and uses HTTP/HTTPS
pub fn validate_target(url: &str) -> Result<(), AgentError> {
    match url::Url::parse(url) {
        Ok(parsed) => {
            let scheme = parsed.scheme();
            if scheme != "http" && scheme != "https" {
                return Err(AgentError::InvalidTarget {
                    url: url.to_string(),
                    reason: format!("scheme must be http or https, got '{}'", scheme),
                });
            }
            if parsed.host_str().is_none() {
                return Err(AgentError::InvalidTarget {
                    url: url.to_string(),
                    reason: "missing host".to_string(),
                });
            }
            Ok(())
        }
        Err(e) => Err(AgentError::InvalidTarget {
            url: url.to_string(),
            reason: e.to_string(),
        }),
    }
}

/// Poll parameters
#[derive(Debug, Clone, PartialEq)]
pub struct PollOptions {
    pub timeout: Duration,
    pub initial_interval: Duration,
    pub backoff_multiplier: f64,
    pub expected_status: u16,
}

impl PollOptions {
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.timeout.is_zero() {
            return Err(AgentError::ValidationError(
                "Health check timeout must be positive".to_string(),
            ));
        }
        if self.initial_interval.is_zero() {
            return Err(AgentError::ValidationError(
                "Health check interval must be positive".to_string(),
            ));
        }
        if !(self.backoff_multiplier >= 1.0) {
            return Err(AgentError::ValidationError(format!(
                "Backoff multiplier must be at least 1.0, got {}",
                self.backoff_multiplier
            )));
        }
        Ok(())
    }
}

impl From<&HealthSettings> for PollOptions {
    fn from(settings: &HealthSettings) -> Self {
        Self {
            timeout: Duration::from_secs(settings.timeout_secs),
            initial_interval: Duration::from_secs_f64(settings.initial_interval_secs),
            backoff_multiplier: settings.backoff_multiplier,
            expected_status: settings.expected_status,
        }
    }
}

/// Drives probe sequences. Each poll is an independent chain of
/// probe-then-sleep steps, so polls of different deployments run concurrently.
#[derive(Clone)]
pub struct HealthPoller {
    probe: Arc<dyn Probe>,
}

impl HealthPoller {
    pub fn new(probe: Arc<dyn Probe>) -> Self {
        Self { probe }
    }

    /// Probe `url` until it answers with the expected status or the timeout
    /// elapses. The last wait is shortened so no attempt happens after the
    /// deadline. Only a malformed target is an error.
    pub async fn poll(&self, url: &str, options: &PollOptions) -> Result<HealthResult, AgentError> {
        validate_target(url)?;
        options.validate()?;

        let backoff = BackoffOptions {
            initial_interval: options.initial_interval,
            multiplier: options.backoff_multiplier,
            deadline: options.timeout,
        };

        let started = Instant::now();
        let mut attempts: u32 = 0;
        let mut response_code = None;
        let mut error: Option<String>;

        loop {
            attempts += 1;
            match self.probe.probe(url).await {
                Ok(code) => {
                    response_code = Some(code);
                    error = None;
                    if code == options.expected_status {
                        let elapsed = round_secs(started.elapsed());
                        info!("{} healthy after {} attempt(s) in {:.2}s", url, attempts, elapsed);
                        return Ok(HealthResult {
                            healthy: true,
                            url: url.to_string(),
                            response_code,
                            attempts,
                            elapsed_seconds: elapsed,
                            message: format!(
                                "Service healthy after {} attempt(s) in {:.2}s",
                                attempts, elapsed
                            ),
                            error: None,
                        });
                    }
                    debug!(
                        "Probe {} of {} returned {}, expecting {}",
                        attempts, url, code, options.expected_status
                    );
                }
                Err(e) => {
                    debug!("Probe {} of {} failed: {}", attempts, url, e);
                    error = Some(e);
                }
            }

            match next_wait(&backoff, attempts - 1, started.elapsed()) {
                Some(wait) => sleep(wait).await,
                None => break,
            }
        }

        let elapsed = round_secs(started.elapsed());
        warn!("{} unhealthy after {} attempt(s) in {:.2}s", url, attempts, elapsed);
        Ok(HealthResult {
            healthy: false,
            url: url.to_string(),
            response_code,
            attempts,
            elapsed_seconds: elapsed,
            message: format!(
                "Service unhealthy after {} attempt(s) in {:.2}s",
                attempts, elapsed
            ),
            error,
        })
    }
}
