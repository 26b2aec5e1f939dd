//! HTTP reachability check.

use chrono::Utc;
use std::error::Error as StdError;
use std::time::{Duration, Instant};

use super::{BackoffPolicy, CheckOutcome, ProbeError};

/// Performs HTTP GET checks with a per-attempt timeout and bounded retries.
///
/// Only transport failures are retried; the first HTTP response of any
/// status ends the check.
#[derive(Clone)]
pub struct HttpChecker {
    client: reqwest::Client,
    timeout: Duration,
    max_attempts: u32,
    backoff: BackoffPolicy,
}

impl HttpChecker {
    pub fn new(
        timeout: Duration,
        max_attempts: u32,
        backoff: BackoffPolicy,
    ) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("uptime-monitor/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProbeError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            timeout,
            max_attempts: max_attempts.max(1),
            backoff,
        })
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Check `url` on behalf of `target_id`.
    pub async fn check(&self, target_id: &str, url: &str) -> CheckOutcome {
        let started = Utc::now();
        let mut last_error = ProbeError::Transport("no attempt made".to_string());

        for attempt in 1..=self.max_attempts {
            let attempt_start = Instant::now();

            match self.attempt(url).await {
                Ok(code) => {
                    tracing::debug!(target_id, url, attempt, code, "Check received response");
                    return CheckOutcome::responded(
                        target_id,
                        url,
                        started,
                        code,
                        attempt,
                        attempt_start.elapsed(),
                    );
                }
                Err(e) => {
                    tracing::debug!(target_id, url, attempt, error = %e, "Check attempt failed");
                    last_error = e;
                }
            }

            if attempt < self.max_attempts {
                let delay = self.backoff.delay(attempt);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
        }

        CheckOutcome::unreachable(target_id, url, started, self.max_attempts, &last_error)
    }

    async fn attempt(&self, url: &str) -> Result<u16, ProbeError> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                ProbeError::Timeout(self.timeout)
            } else {
                ProbeError::Transport(error_chain(&e))
            }
        })?;

        Ok(response.status().as_u16())
    }
}

/// Flatten an error and its sources into one line.
fn error_chain(err: &dyn StdError) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}
