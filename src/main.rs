//! Uptime Monitor
//!
//! Periodically checks a registry of URLs, records every outcome in an
//! append-only audit log and alerts the operator by email or push when a
//! site is down.

mod alerts;
mod audit;
mod config;
mod db;
mod monitor;
mod probe;
mod web;

#[cfg(test)]
mod testutil;

use alerts::{Dispatcher, EmailChannel, PushChannel, SendmailTransport};
use audit::AuditLog;
use config::MonitorConfig;
use db::{Store, TargetRegistry};
use monitor::{Driver, Monitor, MonitorOptions};
use probe::HttpChecker;
use web::{AppState, Server};

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("uptime_monitor=info".parse()?))
        .init();

    // Load configuration
    let cfg = MonitorConfig::load();
    tracing::info!("Starting uptime monitor on port {}...", cfg.http_port);
    tracing::info!("Using database at {}", cfg.db_path);
    tracing::info!("Writing audit log to {} ({:?})", cfg.log_path, cfg.log_format);

    // Initialize registry
    let store = Arc::new(Store::new(&cfg.db_path)?);
    tracing::info!(
        "Registry initialized with {} targets, interval {}s",
        store.list_targets()?.len(),
        store.monitor_interval()?
    );

    let audit = AuditLog::open(&cfg.log_path, cfg.log_format);
    let checker = HttpChecker::new(cfg.check_timeout, cfg.max_attempts, cfg.backoff)?;

    if cfg.admin_email.is_none() {
        tracing::warn!("UPTIME_ADMIN_EMAIL is not set; email alerts will be skipped");
    }
    if cfg.pushover_user_key.is_none() || cfg.pushover_api_token.is_none() {
        tracing::warn!("Pushover credentials are not set; push alerts will be skipped");
    }

    let dispatcher = Dispatcher::new()
        .with_channel(Arc::new(EmailChannel::new(
            cfg.admin_email.clone(),
            Arc::new(SendmailTransport::new(cfg.sendmail_path.clone())),
        )))
        .with_channel(Arc::new(PushChannel::new(
            cfg.pushover_url.clone(),
            cfg.pushover_user_key.clone(),
            cfg.pushover_api_token.clone(),
        )));

    let options = MonitorOptions {
        concurrency: cfg.concurrency,
        supports_toggle: cfg.supports_toggle,
        alert_policy: cfg.alert_policy,
    };
    let monitor = Monitor::new(store.clone(), checker.clone(), dispatcher, audit, options);

    // Start driver
    let driver = Driver::new(store.clone(), monitor.clone());
    driver.start();

    // Start web server
    let server = Server::new(AppState {
        config: Arc::new(cfg),
        store,
        monitor,
        checker,
    });
    let result = server.start().await;

    driver.stop();
    result
}
