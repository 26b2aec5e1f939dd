//! Configuration module for the uptime monitor.
//!
//! Loads process-wide settings from environment variables with sensible defaults.
//! The check interval is not configured here: it lives in the target registry so
//! that configuration imports can replace it.

use crate::audit::LogFormat;
use crate::monitor::AlertPolicy;
use crate::probe::BackoffPolicy;

use regex::Regex;
use std::env;
use std::sync::OnceLock;
use std::time::Duration;

/// Default Pushover messages endpoint.
pub const PUSHOVER_API_URL: &str = "https://api.pushover.net/1/messages.json";

/// Process-wide configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// HTTP port for the operator API (default: 8080)
    pub http_port: u16,
    /// Path to the SQLite registry database (default: "uptime-monitor.db")
    pub db_path: String,
    /// Path to the append-only audit log (default: "uptime-monitor.log")
    pub log_path: String,
    pub log_format: LogFormat,
    /// Whether the per-target `enabled` flag is honoured.
    pub supports_toggle: bool,
    /// Per-attempt HTTP timeout (default: 10s)
    pub check_timeout: Duration,
    /// Total attempts per check (default: 3)
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
    /// Maximum number of targets checked at once (default: 8)
    pub concurrency: usize,
    pub alert_policy: AlertPolicy,
    /// Operator address for email alerts.
    pub admin_email: Option<String>,
    pub sendmail_path: String,
    pub pushover_user_key: Option<String>,
    pub pushover_api_token: Option<String>,
    pub pushover_url: String,
    /// Bearer token guarding the operator API.
    pub admin_token: Option<String>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            db_path: "uptime-monitor.db".to_string(),
            log_path: "uptime-monitor.log".to_string(),
            log_format: LogFormat::Structured,
            supports_toggle: true,
            check_timeout: Duration::from_secs(10),
            max_attempts: 3,
            backoff: BackoffPolicy::None,
            concurrency: 8,
            alert_policy: AlertPolicy::EveryPass,
            admin_email: None,
            sendmail_path: "/usr/sbin/sendmail".to_string(),
            pushover_user_key: None,
            pushover_api_token: None,
            pushover_url: PUSHOVER_API_URL.to_string(),
            admin_token: None,
        }
    }
}

impl MonitorConfig {
    /// Load configuration from environment variables.
    ///
    /// Unparsable values are ignored and the default is kept.
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut cfg = Self::default();

        if let Some(port) = get("UPTIME_HTTP_PORT").and_then(|v| v.parse().ok()) {
            cfg.http_port = port;
        }
        if let Some(path) = get("UPTIME_DB_PATH") {
            cfg.db_path = path;
        }
        if let Some(path) = get("UPTIME_LOG_PATH") {
            cfg.log_path = path;
        }
        if let Some(format) = get("UPTIME_LOG_FORMAT").and_then(|v| v.parse().ok()) {
            cfg.log_format = format;
        }
        if let Some(toggle) = get("UPTIME_SUPPORTS_TOGGLE").and_then(|v| parse_bool(&v)) {
            cfg.supports_toggle = toggle;
        }
        if let Some(secs) = get("UPTIME_CHECK_TIMEOUT_SECS").and_then(|v| v.parse::<f64>().ok()) {
            if secs > 0.0 {
                cfg.check_timeout = Duration::from_secs_f64(secs);
            }
        }
        if let Some(attempts) = get("UPTIME_MAX_ATTEMPTS").and_then(|v| v.parse::<u32>().ok()) {
            cfg.max_attempts = attempts.max(1);
        }
        if let Some(backoff) = get("UPTIME_BACKOFF") {
            match backoff.parse() {
                Ok(policy) => cfg.backoff = policy,
                Err(e) => tracing::warn!("Ignoring UPTIME_BACKOFF: {}", e),
            }
        }
        if let Some(concurrency) = get("UPTIME_CONCURRENCY").and_then(|v| v.parse::<usize>().ok()) {
            cfg.concurrency = concurrency.max(1);
        }
        if let Some(policy) = get("UPTIME_ALERT_POLICY").and_then(|v| v.parse().ok()) {
            cfg.alert_policy = policy;
        }
        if let Some(email) = get("UPTIME_ADMIN_EMAIL") {
            if is_plausible_email(&email) {
                cfg.admin_email = Some(email);
            } else {
                tracing::warn!("Ignoring UPTIME_ADMIN_EMAIL {:?}: not an email address", email);
            }
        }
        if let Some(path) = get("UPTIME_SENDMAIL_PATH") {
            cfg.sendmail_path = path;
        }
        cfg.pushover_user_key = get("PUSHOVER_USER_KEY");
        cfg.pushover_api_token = get("PUSHOVER_API_TOKEN");
        if let Some(url) = get("UPTIME_PUSHOVER_URL") {
            cfg.pushover_url = url;
        }
        cfg.admin_token = get("UPTIME_ADMIN_TOKEN");

        cfg
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn is_plausible_email(value: &str) -> bool {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    let re = EMAIL.get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap());
    re.is_match(value)
}
