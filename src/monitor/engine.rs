//! One monitoring pass over every registered target.

use chrono::Utc;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::Semaphore;
use uuid::Uuid;

use super::{AlertPolicy, MonitorOptions, PassSummary};
use crate::alerts::{AlertEvent, AlertResult, Dispatcher};
use crate::audit::{AuditLog, Level, LogRecord};
use crate::db::{Target, TargetRegistry};
use crate::probe::{CheckOutcome, HttpChecker, Status};

const SUPPRESSED: &str = "suppressed";

/// Runs monitoring passes. Cheap to clone; clones share the in-flight guard.
#[derive(Clone)]
pub struct Monitor {
    inner: Arc<Inner>,
}

struct Inner {
    registry: Arc<dyn TargetRegistry>,
    checker: HttpChecker,
    dispatcher: Dispatcher,
    audit: AuditLog,
    options: MonitorOptions,
    running: AtomicBool,
    last_status: Mutex<HashMap<String, Status>>,
}

/// What one target contributed to a pass.
struct TargetReport {
    status: Status,
    alerts: usize,
}

/// Clears the in-flight flag when the pass ends, however it ends.
struct PassGuard<'a>(&'a AtomicBool);

impl<'a> PassGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| PassGuard(flag))
    }
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Monitor {
    pub fn new(
        registry: Arc<dyn TargetRegistry>,
        checker: HttpChecker,
        dispatcher: Dispatcher,
        audit: AuditLog,
        options: MonitorOptions,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                checker,
                dispatcher,
                audit,
                options,
                running: AtomicBool::new(false),
                last_status: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn audit(&self) -> &AuditLog {
        &self.inner.audit
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Scheduler tick: start a pass in the background and return immediately.
    pub fn trigger(&self) {
        let monitor = self.clone();
        tokio::spawn(async move {
            monitor.run_pass().await;
        });
    }

    /// Run one pass to completion.
    ///
    /// Returns `None` without doing anything if another pass is still running.
    pub async fn run_pass(&self) -> Option<PassSummary> {
        let inner = &self.inner;
        let Some(_guard) = PassGuard::acquire(&inner.running) else {
            tracing::warn!("Previous pass still running, skipping this tick");
            inner
                .audit
                .append(LogRecord::debug("Pass skipped: previous pass still running.", json!({})))
                .await;
            return None;
        };

        let start = Instant::now();
        let mut summary = PassSummary {
            pass_id: Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            ..Default::default()
        };
        let pass_id = summary.pass_id.clone();

        inner
            .audit
            .append(LogRecord::info("Pass started.", json!({ "pass_id": pass_id })))
            .await;

        let targets = match inner.registry.list_targets() {
            Ok(targets) => targets,
            Err(e) => {
                tracing::error!("Failed to list targets: {}", e);
                inner
                    .audit
                    .append(LogRecord::error(
                        "Failed to list targets.",
                        json!({ "pass_id": pass_id, "error": e.to_string() }),
                    ))
                    .await;
                summary.aborted = true;
                self.finish(&summary, start).await;
                return Some(summary);
            }
        };

        inner
            .audit
            .append(LogRecord::info(
                "Targets to monitor.",
                json!({
                    "pass_id": pass_id,
                    "count": targets.len(),
                    "urls": targets.iter().map(|t| t.url.as_str()).collect::<Vec<_>>(),
                }),
            ))
            .await;
        inner.forget_missing(&targets);

        let semaphore = Arc::new(Semaphore::new(inner.options.concurrency.max(1)));
        let mut handles = Vec::with_capacity(targets.len());

        for target in targets {
            if inner.options.supports_toggle && !target.enabled {
                summary.skipped += 1;
                inner
                    .audit
                    .append(LogRecord::debug(
                        "Monitoring disabled for target.",
                        json!({ "pass_id": pass_id, "target_id": target.id, "url": target.url }),
                    ))
                    .await;
                continue;
            }

            let task_inner = Arc::clone(inner);
            let semaphore = Arc::clone(&semaphore);
            let task_pass_id = pass_id.clone();
            let target_id = target.id.clone();
            let url = target.url.clone();

            let handle = tokio::spawn(async move {
                // Hold the permit until the target is fully processed
                let _permit = semaphore.acquire_owned().await.ok();
                task_inner.process_target(&target, &task_pass_id).await
            });
            handles.push((target_id, url, handle));
        }

        for (target_id, url, handle) in handles {
            match handle.await {
                Ok(report) => {
                    summary.checked += 1;
                    summary.alerts += report.alerts;
                    match report.status {
                        Status::Up => summary.up += 1,
                        Status::Down => summary.down += 1,
                        Status::Unreachable => summary.unreachable += 1,
                    }
                }
                Err(e) => {
                    summary.task_failures += 1;
                    tracing::error!(target_id = %target_id, "Check task failed: {}", e);
                    inner
                        .audit
                        .append(LogRecord::error(
                            "Check task failed.",
                            json!({
                                "pass_id": pass_id,
                                "target_id": target_id,
                                "url": url,
                                "error": e.to_string(),
                            }),
                        ))
                        .await;
                }
            }
        }

        self.finish(&summary, start).await;
        Some(summary)
    }

    async fn finish(&self, summary: &PassSummary, start: Instant) {
        let duration_ms = start.elapsed().as_millis() as u64;
        tracing::info!(
            pass_id = %summary.pass_id,
            checked = summary.checked,
            up = summary.up,
            down = summary.down,
            unreachable = summary.unreachable,
            skipped = summary.skipped,
            duration_ms,
            "Pass finished"
        );

        let mut data = serde_json::to_value(summary).unwrap_or_else(|_| json!({}));
        if let Some(obj) = data.as_object_mut() {
            obj.insert("duration_ms".to_string(), duration_ms.into());
        }
        let level = if summary.aborted { Level::Error } else { Level::Info };
        self.inner
            .audit
            .append(LogRecord::new(level, "Pass finished.", data))
            .await;

        if let Err(e) = self.inner.audit.flush().await {
            tracing::error!("Failed to flush audit log: {}", e);
        }
    }
}

impl Inner {
    /// Check one target, record the outcome and alert if needed.
    async fn process_target(&self, target: &Target, pass_id: &str) -> TargetReport {
        let outcome = self.checker.check(&target.id, &target.url).await;
        self.audit.append(outcome_record(&outcome, pass_id)).await;

        let mut alerts = 0;
        if !outcome.status.is_up() {
            let events = if self.should_alert(&target.id) {
                self.dispatcher.dispatch(target, &outcome).await
            } else {
                target
                    .alert_channels
                    .iter()
                    .map(|c| AlertEvent::new(&target.id, *c, AlertResult::Skipped(SUPPRESSED.to_string())))
                    .collect()
            };

            for event in &events {
                if event.result == AlertResult::Sent {
                    alerts += 1;
                }
                self.audit.append(alert_record(event, &target.url, pass_id)).await;
            }
        }

        self.remember(&target.id, outcome.status);
        TargetReport {
            status: outcome.status,
            alerts,
        }
    }

    fn should_alert(&self, target_id: &str) -> bool {
        match self.options.alert_policy {
            AlertPolicy::EveryPass => true,
            AlertPolicy::OnTransition => {
                let last = self.last_status.lock().ok().and_then(|m| m.get(target_id).copied());
                matches!(last, None | Some(Status::Up))
            }
        }
    }

    fn remember(&self, target_id: &str, status: Status) {
        if let Ok(mut last) = self.last_status.lock() {
            last.insert(target_id.to_string(), status);
        }
    }

    /// Drop remembered statuses of targets no longer registered.
    fn forget_missing(&self, targets: &[Target]) {
        let ids: HashSet<&str> = targets.iter().map(|t| t.id.as_str()).collect();
        if let Ok(mut last) = self.last_status.lock() {
            last.retain(|id, _| ids.contains(id.as_str()));
        }
    }
}

fn outcome_record(outcome: &CheckOutcome, pass_id: &str) -> LogRecord {
    let (level, message) = match outcome.status {
        Status::Up => (Level::Info, "URL is up."),
        Status::Down => (Level::Error, "URL is down."),
        Status::Unreachable => (Level::Error, "Failed to fetch URL."),
    };

    let mut data = serde_json::to_value(outcome).unwrap_or_else(|_| json!({}));
    if let Value::Object(obj) = &mut data {
        obj.insert("pass_id".to_string(), pass_id.into());
        obj.insert("checked_at".to_string(), outcome.timestamp.to_rfc3339().into());
        obj.remove("timestamp");
    }
    LogRecord::new(level, message, data)
}

fn alert_record(event: &AlertEvent, url: &str, pass_id: &str) -> LogRecord {
    let (level, message) = match &event.result {
        AlertResult::Sent => (Level::Info, "Alert sent."),
        AlertResult::Skipped(reason) if reason == SUPPRESSED => (Level::Debug, "Alert suppressed."),
        AlertResult::Skipped(_) => (Level::Error, "Alert skipped."),
        AlertResult::Failed(_) => (Level::Error, "Alert failed."),
    };

    let mut data = serde_json::to_value(event).unwrap_or_else(|_| json!({}));
    if let Value::Object(obj) = &mut data {
        obj.insert("pass_id".to_string(), pass_id.into());
        obj.insert("url".to_string(), url.into());
        obj.remove("timestamp");
    }
    LogRecord::new(level, message, data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::{EmailChannel, PushChannel};
    use crate::audit::LogFormat;
    use crate::db::{Channel, DbError, Store};
    use crate::probe::BackoffPolicy;
    use crate::testutil::{closed_port_url, RecordingTransport, TestServer};
    use std::time::Duration;
    use tempfile::TempDir;

    struct Harness {
        monitor: Monitor,
        store: Arc<Store>,
        mail: Arc<RecordingTransport>,
        _dir: TempDir,
    }

    fn harness(options: MonitorOptions, push_url: &str) -> Harness {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(Store::in_memory().unwrap());
        let mail = Arc::new(RecordingTransport::default());
        let dispatcher = Dispatcher::new()
            .with_channel(Arc::new(EmailChannel::new(
                Some("ops@example.com".to_string()),
                mail.clone(),
            )))
            .with_channel(Arc::new(PushChannel::new(push_url, None, None)));
        let checker = HttpChecker::new(Duration::from_secs(2), 3, BackoffPolicy::None).unwrap();
        let audit = AuditLog::open(dir.path().join("audit.log"), LogFormat::Structured);

        let monitor = Monitor::new(store.clone(), checker, dispatcher, audit, options);
        Harness {
            monitor,
            store,
            mail,
            _dir: dir,
        }
    }

    fn for_target<'a>(records: &'a [LogRecord], id: &str) -> Vec<&'a LogRecord> {
        records.iter().filter(|r| r.data["target_id"] == id).collect()
    }

    #[tokio::test]
    async fn test_up_target_logs_once_without_alerts() {
        let server = TestServer::start().await;
        let h = harness(MonitorOptions::default(), &server.url("/status/200"));
        let target = Target::new(server.url("/status/200"), []);
        h.store.upsert(&target).unwrap();

        let summary = h.monitor.run_pass().await.unwrap();
        assert_eq!(summary.up, 1);
        assert_eq!(summary.alerts, 0);

        let records = h.monitor.audit().read_all().await.unwrap();
        let mine = for_target(&records, &target.id);
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].message, "URL is up.");
        assert_eq!(mine[0].data["status"], "up");
        assert_eq!(mine[0].data["pass_id"], summary.pass_id.as_str());
    }

    #[tokio::test]
    async fn test_down_target_sends_email() {
        let server = TestServer::start().await;
        let h = harness(MonitorOptions::default(), &server.url("/status/200"));
        let target = Target::new(server.url("/status/503"), [Channel::Email]);
        h.store.upsert(&target).unwrap();

        let summary = h.monitor.run_pass().await.unwrap();
        assert_eq!(summary.down, 1);
        assert_eq!(summary.alerts, 1);

        let records = h.monitor.audit().read_all().await.unwrap();
        let mine = for_target(&records, &target.id);
        assert_eq!(mine.len(), 2);
        assert_eq!(mine[0].message, "URL is down.");
        assert_eq!(mine[0].data["http_status_code"], 503);
        assert_eq!(mine[1].data["channel"], "email");
        assert_eq!(mine[1].data["result"], "sent");
        assert_eq!(h.mail.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_target_without_push_credentials() {
        let server = TestServer::start().await;
        let h = harness(MonitorOptions::default(), &server.url("/status/200"));
        let target = Target::new(closed_port_url().await, [Channel::Push]);
        h.store.upsert(&target).unwrap();

        let summary = h.monitor.run_pass().await.unwrap();
        assert_eq!(summary.unreachable, 1);

        let records = h.monitor.audit().read_all().await.unwrap();
        let mine = for_target(&records, &target.id);
        assert_eq!(mine.len(), 2);
        assert_eq!(mine[0].data["status"], "unreachable");
        assert_eq!(mine[0].data["attempts"], 3);
        assert_eq!(mine[1].data["channel"], "push");
        assert_eq!(mine[1].data["result"], "skipped");
        assert_eq!(mine[1].data["reason"], "missing credentials");
        assert_eq!(server.total_hits(), 0, "push endpoint must not be called");
    }

    #[tokio::test]
    async fn test_disabled_target_gets_single_debug_record() {
        let server = TestServer::start().await;
        let h = harness(MonitorOptions::default(), &server.url("/status/200"));
        let enabled = Target::new(server.url("/status/200"), []);
        let disabled = Target::new(server.url("/status/503"), [Channel::Email]).with_enabled(false);
        h.store.upsert(&enabled).unwrap();
        h.store.upsert(&disabled).unwrap();

        let summary = h.monitor.run_pass().await.unwrap();
        assert_eq!(summary.checked, 1);
        assert_eq!(summary.skipped, 1);

        let records = h.monitor.audit().read_all().await.unwrap();
        assert_eq!(for_target(&records, &enabled.id).len(), 1);
        let skipped = for_target(&records, &disabled.id);
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].level, Level::Debug);
        assert_eq!(server.hits("/status/503"), 0);
        assert!(h.mail.sent().is_empty());
    }

    #[tokio::test]
    async fn test_toggle_unsupported_checks_disabled_targets() {
        let server = TestServer::start().await;
        let options = MonitorOptions {
            supports_toggle: false,
            ..Default::default()
        };
        let h = harness(options, &server.url("/status/200"));
        h.store
            .upsert(&Target::new(server.url("/status/200"), []).with_enabled(false))
            .unwrap();

        let summary = h.monitor.run_pass().await.unwrap();
        assert_eq!(summary.checked, 1);
        assert_eq!(summary.skipped, 0);
    }

    #[tokio::test]
    async fn test_bad_url_does_not_block_the_rest() {
        let server = TestServer::start().await;
        let h = harness(MonitorOptions::default(), &server.url("/status/200"));
        let bad = Target::new("not a url", [Channel::Email]);
        let good = Target::new(server.url("/status/200"), []);
        h.store.upsert(&bad).unwrap();
        h.store.upsert(&good).unwrap();

        let summary = h.monitor.run_pass().await.unwrap();
        assert_eq!(summary.checked, 2);
        assert_eq!(summary.unreachable, 1);
        assert_eq!(summary.up, 1);
        assert_eq!(server.hits("/status/200"), 1);
    }

    #[tokio::test]
    async fn test_checks_run_concurrently() {
        let server = TestServer::start().await;
        let h = harness(MonitorOptions::default(), &server.url("/status/200"));
        for _ in 0..5 {
            h.store.upsert(&Target::new(server.url("/delay/400"), [])).unwrap();
        }

        let start = Instant::now();
        let summary = h.monitor.run_pass().await.unwrap();
        assert_eq!(summary.up, 5);
        assert!(start.elapsed() < Duration::from_millis(1500));
        assert_eq!(server.hits("/delay/400"), 5);
    }

    #[tokio::test]
    async fn test_overlapping_pass_is_rejected() {
        let server = TestServer::start().await;
        let h = harness(MonitorOptions::default(), &server.url("/status/200"));
        h.store.upsert(&Target::new(server.url("/delay/500"), [])).unwrap();

        let slow = h.monitor.clone();
        let first = tokio::spawn(async move { slow.run_pass().await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(h.monitor.is_running());
        assert!(h.monitor.run_pass().await.is_none());

        assert!(first.await.unwrap().is_some());
        assert!(!h.monitor.is_running());
        assert!(h.monitor.run_pass().await.is_some());
    }

    #[tokio::test]
    async fn test_on_transition_alerts_once_per_outage() {
        let server = TestServer::start().await;
        let options = MonitorOptions {
            alert_policy: AlertPolicy::OnTransition,
            ..Default::default()
        };
        let h = harness(options, &server.url("/status/200"));
        let target = Target::new(server.url("/status/500"), [Channel::Email]);
        h.store.upsert(&target).unwrap();

        for _ in 0..3 {
            h.monitor.run_pass().await.unwrap();
        }
        assert_eq!(h.mail.sent().len(), 1);

        let records = h.monitor.audit().read_all().await.unwrap();
        let suppressed = records
            .iter()
            .filter(|r| r.message == "Alert suppressed.")
            .count();
        assert_eq!(suppressed, 2);
    }

    #[tokio::test]
    async fn test_every_pass_alerts_repeatedly() {
        let server = TestServer::start().await;
        let h = harness(MonitorOptions::default(), &server.url("/status/200"));
        h.store
            .upsert(&Target::new(server.url("/status/500"), [Channel::Email]))
            .unwrap();

        for _ in 0..3 {
            h.monitor.run_pass().await.unwrap();
        }
        assert_eq!(h.mail.sent().len(), 3);
    }

    struct BrokenRegistry;

    impl TargetRegistry for BrokenRegistry {
        fn list_targets(&self) -> Result<Vec<Target>, DbError> {
            Err(DbError::Poisoned)
        }
        fn get(&self, _: &str) -> Result<Target, DbError> {
            Err(DbError::Poisoned)
        }
        fn upsert(&self, _: &Target) -> Result<(), DbError> {
            Err(DbError::Poisoned)
        }
        fn remove(&self, _: &str) -> Result<(), DbError> {
            Err(DbError::Poisoned)
        }
        fn set_enabled(&self, _: &str, _: bool) -> Result<(), DbError> {
            Err(DbError::Poisoned)
        }
        fn set_channel(&self, _: &str, _: Channel, _: bool) -> Result<(), DbError> {
            Err(DbError::Poisoned)
        }
        fn monitor_interval(&self) -> Result<u64, DbError> {
            Err(DbError::Poisoned)
        }
        fn set_monitor_interval(&self, _: u64) -> Result<(), DbError> {
            Err(DbError::Poisoned)
        }
    }

    #[tokio::test]
    async fn test_registry_failure_aborts_pass() {
        let dir = TempDir::new().unwrap();
        let audit = AuditLog::open(dir.path().join("audit.log"), LogFormat::Structured);
        let checker = HttpChecker::new(Duration::from_secs(1), 1, BackoffPolicy::None).unwrap();
        let monitor = Monitor::new(
            Arc::new(BrokenRegistry),
            checker,
            Dispatcher::new(),
            audit,
            MonitorOptions::default(),
        );

        let summary = monitor.run_pass().await.unwrap();
        assert!(summary.aborted);
        assert_eq!(summary.checked, 0);

        let records = monitor.audit().read_all().await.unwrap();
        let failures: Vec<_> = records
            .iter()
            .filter(|r| r.message == "Failed to list targets.")
            .collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].level, Level::Error);
    }
}
