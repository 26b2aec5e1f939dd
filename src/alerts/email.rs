//! Email alerts to the operator address.

use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{alert_message, ChannelError, NotificationChannel, ALERT_TITLE};
use crate::db::{Channel, Target};
use crate::probe::CheckOutcome;

const SENDMAIL_TIMEOUT: Duration = Duration::from_secs(30);

/// A plain-text message ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

impl Mail {
    /// Render as an RFC 5322 message. Header values are kept on one line.
    pub fn to_message(&self) -> String {
        format!(
            "To: {}\r\nSubject: {}\r\nContent-Type: text/plain; charset=utf-8\r\n\r\n{}\r\n",
            single_line(&self.to),
            single_line(&self.subject),
            self.body
        )
    }
}

fn single_line(value: &str) -> String {
    value.replace(&['\r', '\n'][..], " ")
}

/// Delivers a rendered mail.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn deliver(&self, mail: &Mail) -> Result<(), ChannelError>;
}

/// Hands messages to the local `sendmail` binary (`sendmail -t -i`).
pub struct SendmailTransport {
    program: String,
}

impl SendmailTransport {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl MailTransport for SendmailTransport {
    async fn deliver(&self, mail: &Mail) -> Result<(), ChannelError> {
        let mut child = Command::new(&self.program)
            .arg("-t")
            .arg("-i")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ChannelError::Mail(format!("failed to start {}: {}", self.program, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            // A program that exits without reading stdin is judged by its exit status
            let _ = stdin.write_all(mail.to_message().as_bytes()).await;
        }

        let output = tokio::time::timeout(SENDMAIL_TIMEOUT, child.wait_with_output())
            .await
            .map_err(|_| ChannelError::Mail(format!("{} timed out", self.program)))?
            .map_err(|e| ChannelError::Mail(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ChannelError::Mail(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        Ok(())
    }
}

/// Sends alerts to a single operator address, whatever the target.
pub struct EmailChannel {
    to: Option<String>,
    transport: Arc<dyn MailTransport>,
}

impl EmailChannel {
    pub fn new(to: Option<String>, transport: Arc<dyn MailTransport>) -> Self {
        Self { to, transport }
    }
}

#[async_trait]
impl NotificationChannel for EmailChannel {
    fn kind(&self) -> Channel {
        Channel::Email
    }

    async fn send(&self, target: &Target, outcome: &CheckOutcome) -> Result<(), ChannelError> {
        let to = self.to.as_deref().ok_or(ChannelError::MissingCredentials)?;

        let mail = Mail {
            to: to.to_string(),
            subject: format!("{}: {}", ALERT_TITLE, target.url),
            body: alert_message(outcome),
        };

        self.transport.deliver(&mail).await?;
        tracing::debug!(target_id = %target.id, to, "Email alert delivered");
        Ok(())
    }
}
