//! Target registry contract.

use super::models::{Channel, Target};
use super::store::DbError;

/// Default interval between monitoring passes, in seconds.
pub const DEFAULT_MONITOR_INTERVAL: u64 = 120;
/// Shortest interval the driver will honour, in seconds.
pub const MIN_MONITOR_INTERVAL: u64 = 60;

/// Storage of monitored targets and the monitoring interval.
///
/// The engine only calls `list_targets`; the operator API is the only writer.
/// `list_targets` must return a consistent snapshot.
pub trait TargetRegistry: Send + Sync {
    /// All targets, in insertion order.
    fn list_targets(&self) -> Result<Vec<Target>, DbError>;

    fn get(&self, id: &str) -> Result<Target, DbError>;

    /// Insert a new target or replace the one with the same id.
    fn upsert(&self, target: &Target) -> Result<(), DbError>;

    fn remove(&self, id: &str) -> Result<(), DbError>;

    fn set_enabled(&self, id: &str, enabled: bool) -> Result<(), DbError>;

    /// Turn a single alert channel on or off for a target.
    fn set_channel(&self, id: &str, channel: Channel, on: bool) -> Result<(), DbError>;

    /// Pass interval in seconds, never below `MIN_MONITOR_INTERVAL`.
    fn monitor_interval(&self) -> Result<u64, DbError>;

    fn set_monitor_interval(&self, seconds: u64) -> Result<(), DbError>;
}
