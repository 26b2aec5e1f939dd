//! Alert dispatch for failing checks.
//!
//! Each target lists the channels it wants; the dispatcher calls every one of
//! them and reports what happened as `AlertEvent`s. Channel failures are
//! recorded, never retried and never propagated.

mod email;
mod push;

pub use email::*;
pub use push::*;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::db::{Channel, Target};
use crate::probe::CheckOutcome;

pub const ALERT_TITLE: &str = "Website Down Alert";

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("missing credentials")]
    MissingCredentials,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("unexpected response status {0}")]
    UnexpectedStatus(u16),
    #[error("mail delivery failed: {0}")]
    Mail(String),
}

/// What happened on one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", content = "reason", rename_all = "lowercase")]
pub enum AlertResult {
    Sent,
    Skipped(String),
    Failed(String),
}

impl From<Result<(), ChannelError>> for AlertResult {
    fn from(result: Result<(), ChannelError>) -> Self {
        match result {
            Ok(()) => AlertResult::Sent,
            Err(ChannelError::MissingCredentials) => {
                AlertResult::Skipped(ChannelError::MissingCredentials.to_string())
            }
            Err(e) => AlertResult::Failed(e.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlertEvent {
    pub target_id: String,
    pub channel: Channel,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub result: AlertResult,
}

impl AlertEvent {
    pub fn new(target_id: &str, channel: Channel, result: AlertResult) -> Self {
        Self {
            target_id: target_id.to_string(),
            channel,
            timestamp: Utc::now(),
            result,
        }
    }
}

/// A notification delivery mechanism.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn kind(&self) -> Channel;

    async fn send(&self, target: &Target, outcome: &CheckOutcome) -> Result<(), ChannelError>;
}

/// Alert text shared by all channels.
pub fn alert_message(outcome: &CheckOutcome) -> String {
    format!("The website {} is down. {}.", outcome.url, outcome.describe())
}

/// Routes failing outcomes to the channels a target asked for.
#[derive(Clone, Default)]
pub struct Dispatcher {
    channels: HashMap<Channel, Arc<dyn NotificationChannel>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_channel(mut self, channel: Arc<dyn NotificationChannel>) -> Self {
        self.channels.insert(channel.kind(), channel);
        self
    }

    /// Notify every channel of `target`. Returns no events for an `Up` outcome.
    pub async fn dispatch(&self, target: &Target, outcome: &CheckOutcome) -> Vec<AlertEvent> {
        if outcome.status.is_up() {
            return Vec::new();
        }

        let mut events = Vec::with_capacity(target.alert_channels.len());
        for kind in &target.alert_channels {
            let result = match self.channels.get(kind) {
                Some(channel) => channel.send(target, outcome).await.into(),
                None => AlertResult::Skipped("channel not configured".to_string()),
            };

            match &result {
                AlertResult::Failed(reason) => {
                    tracing::warn!(target_id = %target.id, channel = %kind, "Alert failed: {}", reason)
                }
                other => tracing::debug!(target_id = %target.id, channel = %kind, "Alert result: {:?}", other),
            }

            events.push(AlertEvent::new(&target.id, *kind, result));
        }
        events
    }
}
