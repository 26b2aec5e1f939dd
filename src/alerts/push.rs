//! Pushover push notifications.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use super::{alert_message, ChannelError, NotificationChannel, ALERT_TITLE};
use crate::db::{Channel, Target};
use crate::probe::CheckOutcome;

/// Posts alerts to a Pushover-compatible messages endpoint.
///
/// Credentials are process-wide; with either one missing every send is
/// skipped without touching the network.
pub struct PushChannel {
    client: Client,
    api_url: String,
    user_key: Option<String>,
    api_token: Option<String>,
}

impl PushChannel {
    pub fn new(api_url: impl Into<String>, user_key: Option<String>, api_token: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            api_url: api_url.into(),
            user_key,
            api_token,
        }
    }

    fn credentials(&self) -> Option<(&str, &str)> {
        match (self.user_key.as_deref(), self.api_token.as_deref()) {
            (Some(user), Some(token)) if !user.is_empty() && !token.is_empty() => Some((user, token)),
            _ => None,
        }
    }
}

#[async_trait]
impl NotificationChannel for PushChannel {
    fn kind(&self) -> Channel {
        Channel::Push
    }

    async fn send(&self, target: &Target, outcome: &CheckOutcome) -> Result<(), ChannelError> {
        let (user, token) = self.credentials().ok_or(ChannelError::MissingCredentials)?;

        let message = alert_message(outcome);
        let form = [
            ("token", token),
            ("user", user),
            ("title", ALERT_TITLE),
            ("message", message.as_str()),
        ];

        let response = self
            .client
            .post(&self.api_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        if status != 200 {
            return Err(ChannelError::UnexpectedStatus(status));
        }

        tracing::debug!(target_id = %target.id, "Pushover notification sent");
        Ok(())
    }
}
