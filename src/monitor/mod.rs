//! Monitor engine and its interval driver.

mod driver;
mod engine;

pub use driver::*;
pub use engine::*;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::str::FromStr;

/// When a failing target triggers its alert channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AlertPolicy {
    /// Alert on every pass the target is failing.
    #[default]
    EveryPass,
    /// Alert only when a target goes from up (or unknown) to failing.
    OnTransition,
}

impl FromStr for AlertPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "every-pass" | "every_pass" | "always" => Ok(AlertPolicy::EveryPass),
            "on-transition" | "on_transition" | "transition" => Ok(AlertPolicy::OnTransition),
            other => Err(format!("unknown alert policy: {}", other)),
        }
    }
}

/// Engine settings taken from the process configuration.
#[derive(Debug, Clone)]
pub struct MonitorOptions {
    /// Maximum number of targets checked at once.
    pub concurrency: usize,
    /// Honour the per-target `enabled` flag.
    pub supports_toggle: bool,
    pub alert_policy: AlertPolicy,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            concurrency: 8,
            supports_toggle: true,
            alert_policy: AlertPolicy::EveryPass,
        }
    }
}

/// Tally of one monitoring pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassSummary {
    pub pass_id: String,
    pub started_at: DateTime<Utc>,
    pub checked: usize,
    pub up: usize,
    pub down: usize,
    pub unreachable: usize,
    pub skipped: usize,
    pub alerts: usize,
    /// Per-target tasks that died before finishing.
    pub task_failures: usize,
    /// The target list could not be read.
    pub aborted: bool,
}
