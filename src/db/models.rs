//! Registry model types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A notification delivery mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    Push,
}

impl Channel {
    pub const ALL: [Channel; 2] = [Channel::Email, Channel::Push];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::Push => "push",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "email" => Ok(Channel::Email),
            "push" | "pushover" => Ok(Channel::Push),
            other => Err(format!("unknown alert channel: {}", other)),
        }
    }
}

/// A monitored URL with its alert preferences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// Generated once at creation, never changed afterwards.
    pub id: String,
    /// Opaque; not normalized.
    pub url: String,
    pub alert_channels: BTreeSet<Channel>,
    pub enabled: bool,
}

impl Target {
    /// Create an enabled target with a freshly generated id.
    pub fn new(url: impl Into<String>, channels: impl IntoIterator<Item = Channel>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            url: url.into(),
            alert_channels: channels.into_iter().collect(),
            enabled: true,
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn has_channel(&self, channel: Channel) -> bool {
        self.alert_channels.contains(&channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_target_ids_are_unique() {
        let a = Target::new("https://a.example", []);
        let b = Target::new("https://a.example", []);
        assert_ne!(a.id, b.id);
        assert!(a.enabled);
        assert!(a.alert_channels.is_empty());
    }

    #[test]
    fn test_channel_parsing() {
        assert_eq!("pushover".parse::<Channel>(), Ok(Channel::Push));
        assert_eq!("EMAIL".parse::<Channel>(), Ok(Channel::Email));
        assert!("sms".parse::<Channel>().is_err());
    }
}
