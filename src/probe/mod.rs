//! Probe module: reachability checks with bounded retries.

mod backoff;
mod http;

pub use backoff::*;
pub use http::*;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Transport-level probe failure. These are the only failures that are retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("transport error: {0}")]
    Transport(String),
}

/// Classified result of one check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// A 2xx response was received.
    Up,
    /// The server answered outside [200, 300).
    Down,
    /// Every attempt failed before a response arrived.
    Unreachable,
}

impl Status {
    pub fn is_up(&self) -> bool {
        matches!(self, Status::Up)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Up => write!(f, "up"),
            Status::Down => write!(f, "down"),
            Status::Unreachable => write!(f, "unreachable"),
        }
    }
}

/// Outcome of probing one target during one pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub target_id: String,
    pub url: String,
    /// When the first attempt started.
    pub timestamp: DateTime<Utc>,
    pub status: Status,
    pub http_status_code: Option<u16>,
    pub attempts: u32,
    /// Last transport error, for `Unreachable` outcomes.
    pub error: Option<String>,
    /// Duration of the attempt that produced a response.
    pub latency_ms: Option<u64>,
}

impl CheckOutcome {
    /// Classify a received HTTP status code.
    pub fn responded(
        target_id: &str,
        url: &str,
        timestamp: DateTime<Utc>,
        code: u16,
        attempts: u32,
        latency: Duration,
    ) -> Self {
        let status = if (200..300).contains(&code) {
            Status::Up
        } else {
            Status::Down
        };
        Self {
            target_id: target_id.to_string(),
            url: url.to_string(),
            timestamp,
            status,
            http_status_code: Some(code),
            attempts,
            error: None,
            latency_ms: Some(latency.as_millis() as u64),
        }
    }

    pub fn unreachable(
        target_id: &str,
        url: &str,
        timestamp: DateTime<Utc>,
        attempts: u32,
        error: &ProbeError,
    ) -> Self {
        Self {
            target_id: target_id.to_string(),
            url: url.to_string(),
            timestamp,
            status: Status::Unreachable,
            http_status_code: None,
            attempts,
            error: Some(error.to_string()),
            latency_ms: None,
        }
    }

    /// Short human description, e.g. "HTTP Status Code: 503".
    pub fn describe(&self) -> String {
        match (self.http_status_code, &self.error) {
            (Some(code), _) => format!("HTTP Status Code: {}", code),
            (None, Some(err)) => format!("unreachable ({})", err),
            (None, None) => "unreachable".to_string(),
        }
    }
}
