//! Configuration export and import.
//!
//! The document shape is
//! `{ "settings": { "monitor_interval": 120 }, "urls": [ {id, url, email, pushover, enabled} ] }`.
//! Imports are validated in full before anything is written, so a rejected
//! document never changes the registry.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashSet};
use thiserror::Error;
use uuid::Uuid;

use super::models::{Channel, Target};
use super::registry::TargetRegistry;
use super::store::{DbError, Store};

/// Import rejection reasons.
#[derive(Error, Debug)]
pub enum ImportError {
    #[error("invalid JSON: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("configuration must be a JSON object")]
    NotAnObject,
    #[error("\"urls\" must be an array")]
    UrlsNotArray,
    #[error("\"settings.monitor_interval\" must be a non-negative integer")]
    InvalidInterval,
    #[error("entry {index}: {reason}")]
    InvalidEntry { index: usize, reason: String },
    #[error("duplicate target id: {0}")]
    DuplicateId(String),
    #[error("storage error: {0}")]
    Storage(#[from] DbError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub monitor_interval: u64,
}

/// One exported target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetEntry {
    pub id: String,
    pub url: String,
    pub email: bool,
    pub pushover: bool,
    pub enabled: bool,
}

impl From<&Target> for TargetEntry {
    fn from(t: &Target) -> Self {
        Self {
            id: t.id.clone(),
            url: t.url.clone(),
            email: t.has_channel(Channel::Email),
            pushover: t.has_channel(Channel::Push),
            enabled: t.enabled,
        }
    }
}

impl From<TargetEntry> for Target {
    fn from(e: TargetEntry) -> Self {
        let mut alert_channels = BTreeSet::new();
        if e.email {
            alert_channels.insert(Channel::Email);
        }
        if e.pushover {
            alert_channels.insert(Channel::Push);
        }
        Self {
            id: e.id,
            url: e.url,
            alert_channels,
            enabled: e.enabled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigDocument {
    pub settings: Settings,
    pub urls: Vec<TargetEntry>,
}

/// A validated import, ready to be applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportPlan {
    pub monitor_interval: Option<u64>,
    pub targets: Option<Vec<Target>>,
}

/// Snapshot the registry as an export document.
pub fn export_config(store: &Store) -> Result<ConfigDocument, DbError> {
    let targets = store.list_targets()?;
    Ok(ConfigDocument {
        settings: Settings {
            monitor_interval: store.monitor_interval()?,
        },
        urls: targets.iter().map(TargetEntry::from).collect(),
    })
}

/// Validate and apply an import document.
///
/// Keys missing from the document leave the corresponding state unchanged.
pub fn import_config(store: &Store, json: &str) -> Result<ImportPlan, ImportError> {
    let plan = parse_import(json)?;
    store.replace_all(plan.targets.as_deref(), plan.monitor_interval)?;
    Ok(plan)
}

/// Parse an import document without touching storage.
pub fn parse_import(json: &str) -> Result<ImportPlan, ImportError> {
    let doc: Value = serde_json::from_str(json.trim())?;
    let obj = doc.as_object().ok_or(ImportError::NotAnObject)?;

    let mut plan = ImportPlan::default();

    if let Some(interval) = obj.get("settings").and_then(|s| s.get("monitor_interval")) {
        plan.monitor_interval = Some(parse_interval(interval)?);
    }

    if let Some(urls) = obj.get("urls") {
        let entries = urls.as_array().ok_or(ImportError::UrlsNotArray)?;
        let mut seen = HashSet::new();
        let mut targets = Vec::with_capacity(entries.len());

        for (index, entry) in entries.iter().enumerate() {
            let target = parse_entry(index, entry)?;
            if !seen.insert(target.id.clone()) {
                return Err(ImportError::DuplicateId(target.id));
            }
            targets.push(target);
        }
        plan.targets = Some(targets);
    }

    Ok(plan)
}

fn parse_interval(value: &Value) -> Result<u64, ImportError> {
    match value {
        Value::Number(n) => n.as_u64().ok_or(ImportError::InvalidInterval),
        Value::String(s) => s.trim().parse().map_err(|_| ImportError::InvalidInterval),
        _ => Err(ImportError::InvalidInterval),
    }
}

fn parse_entry(index: usize, entry: &Value) -> Result<Target, ImportError> {
    let invalid = |reason: &str| ImportError::InvalidEntry {
        index,
        reason: reason.to_string(),
    };

    let obj = entry.as_object().ok_or_else(|| invalid("not an object"))?;
    let url = obj
        .get("url")
        .and_then(Value::as_str)
        .filter(|u| !u.trim().is_empty())
        .ok_or_else(|| invalid("missing \"url\""))?;

    let id = match obj.get("id") {
        None | Some(Value::Null) => Uuid::new_v4().to_string(),
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(_) => return Err(invalid("\"id\" must be a non-empty string")),
    };

    let flag = |key: &str, default: bool| -> Result<bool, ImportError> {
        match obj.get(key) {
            None | Some(Value::Null) => Ok(default),
            Some(Value::Bool(b)) => Ok(*b),
            Some(_) => Err(invalid(&format!("\"{}\" must be a boolean", key))),
        }
    };

    Ok(TargetEntry {
        id,
        url: url.to_string(),
        email: flag("email", false)?,
        pushover: flag("pushover", false)?,
        enabled: flag("enabled", true)?,
    }
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_store() -> (Store, Target) {
        let store = Store::in_memory().unwrap();
        let target = Target::new("https://keep.example", [Channel::Email]);
        store.upsert(&target).unwrap();
        store.set_monitor_interval(300).unwrap();
        (store, target)
    }

    #[test]
    fn test_export_shape() {
        let (store, target) = seeded_store();
        let doc = export_config(&store).unwrap();
        let json = serde_json::to_value(&doc).unwrap();

        assert_eq!(json["settings"]["monitor_interval"], 300);
        assert_eq!(json["urls"][0]["id"], target.id.as_str());
        assert_eq!(json["urls"][0]["email"], true);
        assert_eq!(json["urls"][0]["pushover"], false);
        assert_eq!(json["urls"][0]["enabled"], true);
    }

    #[test]
    fn test_import_replaces_targets_and_interval() {
        let (store, _) = seeded_store();
        let json = r#"{
            "settings": {"monitor_interval": 600},
            "urls": [
                {"id": "a", "url": "https://a.example", "email": true, "pushover": true},
                {"id": "b", "url": "https://b.example", "email": false, "pushover": false, "enabled": false}
            ]
        }"#;

        import_config(&store, json).unwrap();

        let targets = store.list_targets().unwrap();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].id, "a");
        assert!(targets[0].enabled, "missing enabled defaults to true");
        assert!(targets[0].has_channel(Channel::Push));
        assert!(!targets[1].enabled);
        assert_eq!(store.monitor_interval().unwrap(), 600);
    }

    #[test]
    fn test_malformed_import_leaves_state_unchanged() {
        let (store, target) = seeded_store();

        for bad in [
            "{not json",
            "[1, 2, 3]",
            r#"{"urls": {"id": "x"}}"#,
            r#"{"settings": {"monitor_interval": 90}, "urls": [{"id": "x"}]}"#,
            r#"{"urls": [{"id": "x", "url": "https://x"}, {"id": "x", "url": "https://y"}]}"#,
        ] {
            assert!(import_config(&store, bad).is_err(), "accepted {}", bad);
        }

        let targets = store.list_targets().unwrap();
        assert_eq!(targets, vec![target]);
        assert_eq!(store.monitor_interval().unwrap(), 300);
    }

    #[test]
    fn test_import_generates_missing_ids() {
        let plan = parse_import(r#"{"urls": [{"url": "https://a"}, {"url": "https://b"}]}"#).unwrap();
        let targets = plan.targets.unwrap();
        assert_ne!(targets[0].id, targets[1].id);
        assert!(plan.monitor_interval.is_none());
    }
}
