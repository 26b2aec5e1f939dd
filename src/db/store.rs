//! SQLite target registry implementation.

use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult, Row};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

use super::models::*;
use super::registry::{TargetRegistry, DEFAULT_MONITOR_INTERVAL, MIN_MONITOR_INTERVAL};

const MONITOR_INTERVAL_KEY: &str = "monitor_interval";

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("Not found")]
    NotFound,
    #[error("Database connection lock poisoned")]
    Poisoned,
}

/// Thread-safe database store.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create a new store with the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    /// Create a store backed by a private in-memory database.
    pub fn in_memory() -> Result<Self, DbError> {
        let store = Self {
            conn: Arc::new(Mutex::new(Connection::open_in_memory()?)),
        };
        store.init()?;
        Ok(store)
    }

    /// Initialize the database with migrations.
    fn init(&self) -> Result<(), DbError> {
        let conn = self.conn()?;
        conn.execute_batch(include_str!("../../migrations/000001_init.up.sql"))
            .map_err(|e| DbError::Migration(format!("Migration 1 failed: {}", e)))?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }

    /// Replace the target list and/or the interval in one transaction.
    ///
    /// `None` leaves the corresponding part untouched.
    pub fn replace_all(
        &self,
        targets: Option<&[Target]>,
        monitor_interval: Option<u64>,
    ) -> Result<(), DbError> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;

        if let Some(targets) = targets {
            tx.execute("DELETE FROM targets", [])?;
            let mut stmt = tx.prepare(
                "INSERT INTO targets (id, position, url, email_alert, push_alert, enabled) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for (position, t) in targets.iter().enumerate() {
                stmt.execute(params![
                    t.id,
                    position as i64 + 1,
                    t.url,
                    t.has_channel(Channel::Email),
                    t.has_channel(Channel::Push),
                    t.enabled,
                ])?;
            }
        }

        if let Some(seconds) = monitor_interval {
            write_setting(&tx, MONITOR_INTERVAL_KEY, &seconds.to_string())?;
        }

        tx.commit()?;
        Ok(())
    }

    fn update_flag(&self, id: &str, column: &str, value: bool) -> Result<(), DbError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            &format!("UPDATE targets SET {} = ?1 WHERE id = ?2", column),
            params![value, id],
        )?;
        if changed == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }
}

impl TargetRegistry for Store {
    fn list_targets(&self) -> Result<Vec<Target>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, url, email_alert, push_alert, enabled FROM targets ORDER BY position ASC",
        )?;

        let targets = stmt
            .query_map([], target_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(targets)
    }

    fn get(&self, id: &str) -> Result<Target, DbError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, url, email_alert, push_alert, enabled FROM targets WHERE id = ?1",
            params![id],
            target_from_row,
        )
        .optional()?
        .ok_or(DbError::NotFound)
    }

    fn upsert(&self, target: &Target) -> Result<(), DbError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO targets (id, position, url, email_alert, push_alert, enabled)
             VALUES (?1, (SELECT COALESCE(MAX(position), 0) + 1 FROM targets), ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
             url=excluded.url, email_alert=excluded.email_alert,
             push_alert=excluded.push_alert, enabled=excluded.enabled",
            params![
                target.id,
                target.url,
                target.has_channel(Channel::Email),
                target.has_channel(Channel::Push),
                target.enabled,
            ],
        )?;
        Ok(())
    }

    fn remove(&self, id: &str) -> Result<(), DbError> {
        let conn = self.conn()?;
        let changed = conn.execute("DELETE FROM targets WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    fn set_enabled(&self, id: &str, enabled: bool) -> Result<(), DbError> {
        self.update_flag(id, "enabled", enabled)
    }

    fn set_channel(&self, id: &str, channel: Channel, on: bool) -> Result<(), DbError> {
        let column = match channel {
            Channel::Email => "email_alert",
            Channel::Push => "push_alert",
        };
        self.update_flag(id, column, on)
    }

    fn monitor_interval(&self) -> Result<u64, DbError> {
        let conn = self.conn()?;
        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![MONITOR_INTERVAL_KEY],
                |row| row.get(0),
            )
            .optional()?;

        let seconds = value
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_MONITOR_INTERVAL);
        Ok(seconds.max(MIN_MONITOR_INTERVAL))
    }

    fn set_monitor_interval(&self, seconds: u64) -> Result<(), DbError> {
        let conn = self.conn()?;
        write_setting(&conn, MONITOR_INTERVAL_KEY, &seconds.to_string())?;
        Ok(())
    }
}

fn write_setting(conn: &Connection, key: &str, value: &str) -> Result<(), DbError> {
    conn.execute(
        "INSERT INTO settings (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
        params![key, value],
    )?;
    Ok(())
}

fn target_from_row(row: &Row<'_>) -> SqlResult<Target> {
    let email: bool = row.get(2)?;
    let push: bool = row.get(3)?;
    let mut channels = BTreeSet::new();
    if email {
        channels.insert(Channel::Email);
    }
    if push {
        channels.insert(Channel::Push);
    }

    Ok(Target {
        id: row.get(0)?,
        url: row.get(1)?,
        alert_channels: channels,
        enabled: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_target_crud() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();

        // Create
        let target = Target::new("https://example.com", [Channel::Email]);
        store.upsert(&target).unwrap();

        // Read
        let fetched = store.get(&target.id).unwrap();
        assert_eq!(fetched, target);

        // Update
        let mut updated = fetched;
        updated.url = "https://example.org".to_string();
        store.upsert(&updated).unwrap();
        assert_eq!(store.get(&target.id).unwrap().url, "https://example.org");
        assert_eq!(store.list_targets().unwrap().len(), 1);

        // Delete
        store.remove(&target.id).unwrap();
        assert!(matches!(store.get(&target.id), Err(DbError::NotFound)));
        assert!(matches!(store.remove(&target.id), Err(DbError::NotFound)));
    }

    #[test]
    fn test_list_preserves_insertion_order() {
        let store = Store::in_memory().unwrap();
        let urls = ["https://c.example", "https://a.example", "https://b.example"];
        for url in urls {
            store.upsert(&Target::new(url, [])).unwrap();
        }

        let listed: Vec<String> = store.list_targets().unwrap().into_iter().map(|t| t.url).collect();
        assert_eq!(listed, urls);
    }

    #[test]
    fn test_toggles() {
        let store = Store::in_memory().unwrap();
        let target = Target::new("https://example.com", [Channel::Email]);
        store.upsert(&target).unwrap();

        store.set_enabled(&target.id, false).unwrap();
        store.set_channel(&target.id, Channel::Push, true).unwrap();
        store.set_channel(&target.id, Channel::Email, false).unwrap();

        let fetched = store.get(&target.id).unwrap();
        assert!(!fetched.enabled);
        assert!(fetched.has_channel(Channel::Push));
        assert!(!fetched.has_channel(Channel::Email));

        assert!(matches!(store.set_enabled("missing", true), Err(DbError::NotFound)));
    }

    #[test]
    fn test_monitor_interval_default_and_floor() {
        let store = Store::in_memory().unwrap();
        assert_eq!(store.monitor_interval().unwrap(), DEFAULT_MONITOR_INTERVAL);

        store.set_monitor_interval(300).unwrap();
        assert_eq!(store.monitor_interval().unwrap(), 300);

        store.set_monitor_interval(5).unwrap();
        assert_eq!(store.monitor_interval().unwrap(), MIN_MONITOR_INTERVAL);
    }
}
