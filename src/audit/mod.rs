//! Audit log.
//!
//! Append-only, file-backed record of every check outcome and alert action.
//! Appends go through a channel to a single writer task, so callers never wait
//! on disk I/O and concurrent appends cannot interleave within a record.

mod format;
mod writer;

pub use format::*;
pub use writer::*;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Audit log error types.
#[derive(Error, Debug)]
pub enum AuditError {
    #[error("no log has been written yet")]
    NotFound,
    #[error("log I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("log serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("log writer is not running")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Info,
    Error,
    Debug,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Info => "info",
            Level::Error => "error",
            Level::Debug => "debug",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(Level::Info),
            "error" => Ok(Level::Error),
            "debug" => Ok(Level::Debug),
            other => Err(format!("unknown log level: {}", other)),
        }
    }
}

/// One entry of the audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub level: Level,
    pub message: String,
    #[serde(default)]
    pub data: Value,
}

impl LogRecord {
    pub fn new(level: Level, message: impl Into<String>, data: Value) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
            data,
        }
    }

    pub fn info(message: impl Into<String>, data: Value) -> Self {
        Self::new(Level::Info, message, data)
    }

    pub fn error(message: impl Into<String>, data: Value) -> Self {
        Self::new(Level::Error, message, data)
    }

    pub fn debug(message: impl Into<String>, data: Value) -> Self {
        Self::new(Level::Debug, message, data)
    }

    /// Add a key to the structured data, turning it into an object if needed.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        if !self.data.is_object() {
            self.data = json!({});
        }
        if let Some(obj) = self.data.as_object_mut() {
            obj.insert(key.to_string(), value.into());
        }
        self
    }
}
