//! Recurring trigger for monitoring passes.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::Monitor;
use crate::db::{TargetRegistry, DEFAULT_MONITOR_INTERVAL};

/// Fires a pass right away and then once per registry interval.
///
/// The interval is read again after every tick, so an import or settings
/// change takes effect from the next pass on.
pub struct Driver {
    registry: Arc<dyn TargetRegistry>,
    monitor: Monitor,
    stop: broadcast::Sender<()>,
}

impl Driver {
    pub fn new(registry: Arc<dyn TargetRegistry>, monitor: Monitor) -> Self {
        let (stop, _) = broadcast::channel(1);
        Self {
            registry,
            monitor,
            stop,
        }
    }

    /// Start the driver background task.
    pub fn start(&self) -> JoinHandle<()> {
        let registry = self.registry.clone();
        let monitor = self.monitor.clone();
        let mut rx = self.stop.subscribe();

        tokio::spawn(async move {
            let mut next = Instant::now();
            loop {
                tokio::select! {
                    _ = rx.recv() => break,
                    _ = tokio::time::sleep_until(next) => {
                        monitor.trigger();
                        let period = current_interval(registry.as_ref());
                        next = Instant::now() + period;
                        tracing::debug!("Next pass in {:?}", period);
                    }
                }
            }
            tracing::info!("Monitor driver stopped");
        })
    }

    /// Stop scheduling new passes. A pass already running is left to finish.
    pub fn stop(&self) {
        let _ = self.stop.send(());
    }
}

fn current_interval(registry: &dyn TargetRegistry) -> Duration {
    let secs = registry.monitor_interval().unwrap_or_else(|e| {
        tracing::error!("Failed to read monitor interval: {}", e);
        DEFAULT_MONITOR_INTERVAL
    });
    Duration::from_secs(secs)
}
