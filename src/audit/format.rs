//! On-disk line formats for log records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::{AuditError, Level, LogRecord};

/// Line encoding of the log file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per line.
    #[default]
    Structured,
    /// `<rfc3339>\t<level>\t<message>\t<data-json>`
    PlainText,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "structured" | "json" => Ok(LogFormat::Structured),
            "plain" | "plaintext" | "text" => Ok(LogFormat::PlainText),
            other => Err(format!("unknown log format: {}", other)),
        }
    }
}

impl LogFormat {
    /// Encode one record as a single line, without the trailing newline.
    pub fn encode(&self, record: &LogRecord) -> Result<String, AuditError> {
        match self {
            LogFormat::Structured => Ok(serde_json::to_string(record)?),
            LogFormat::PlainText => {
                let message: String = record
                    .message
                    .chars()
                    .map(|c| if matches!(c, '\t' | '\n' | '\r') { ' ' } else { c })
                    .collect();
                Ok(format!(
                    "{}\t{}\t{}\t{}",
                    record.timestamp.to_rfc3339(),
                    record.level,
                    message,
                    serde_json::to_string(&record.data)?
                ))
            }
        }
    }

    /// Decode one line produced by `encode`.
    pub fn decode(&self, line: &str) -> Option<LogRecord> {
        match self {
            LogFormat::Structured => serde_json::from_str(line).ok(),
            LogFormat::PlainText => {
                let mut parts = line.splitn(4, '\t');
                let timestamp = DateTime::parse_from_rfc3339(parts.next()?).ok()?;
                let level = parts.next()?.parse::<Level>().ok()?;
                let message = parts.next()?.to_string();
                let data = serde_json::from_str(parts.next()?).ok()?;
                Some(LogRecord {
                    timestamp: timestamp.with_timezone(&Utc),
                    level,
                    message,
                    data,
                })
            }
        }
    }

    /// Decode a whole file, oldest first.
    ///
    /// A trailing line without a newline is an append still in flight and is
    /// left out; lines that fail to decode are skipped.
    pub fn decode_all(&self, contents: &str) -> Vec<LogRecord> {
        let complete = match contents.rfind('\n') {
            Some(end) => &contents[..end],
            None => return Vec::new(),
        };

        complete
            .split('\n')
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| {
                let record = self.decode(line);
                if record.is_none() {
                    tracing::warn!("Skipping undecodable audit log line: {:?}", line);
                }
                record
            })
            .collect()
    }
}
