//! Applicant notifications
//!
//! Sending is best-effort: a failure is logged and reported as `false`,
//! never as an error that would abort the operation that triggered it.

use async_trait::async_trait;
use iasp_common::config::NotificationConfig;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Returns whether the message was handed over for delivery
    async fn send_email(&self, to: &str, subject: &str, body: &str) -> bool;
}

/// Posts messages to an HTTP mail relay
pub struct HttpRelayNotifier {
    client: reqwest::Client,
    relay_url: String,
    from: String,
}

#[derive(Serialize)]
struct RelayMessage<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    body: &'a str,
}

impl HttpRelayNotifier {
    pub fn new(relay_url: String, from: String, timeout: Duration) -> iasp_common::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            relay_url,
            from,
        })
    }
}

#[async_trait]
impl Notifier for HttpRelayNotifier {
    async fn send_email(&self, to: &str, subject: &str, body: &str) -> bool {
        let message = RelayMessage {
            from: &self.from,
            to,
            subject,
            body,
        };

        match self.client.post(&self.relay_url).json(&message).send().await {
            Ok(response) if response.status().is_success() => {
                info!(to = %to, subject = %subject, "Email handed to relay");
                true
            }
            Ok(response) => {
                warn!(to = %to, status = %response.status(), "Mail relay rejected message");
                false
            }
            Err(e) => {
                warn!(to = %to, error = %e, "Mail relay unreachable");
                false
            }
        }
    }
}

/// Logs messages instead of sending them; keeps them for inspection
#[derive(Default)]
pub struct LogNotifier {
    sent: Mutex<Vec<(String, String, String)>>,
}

impl LogNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// (to, subject, body) of every message so far
    pub fn sent(&self) -> Vec<(String, String, String)> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_email(&self, to: &str, subject: &str, body: &str) -> bool {
        info!(to = %to, subject = %subject, "Email (not sent, no relay configured)");
        if let Ok(mut sent) = self.sent.lock() {
            sent.push((to.to_string(), subject.to_string(), body.to_string()));
        }
        true
    }
}

/// Relay notifier when a relay is configured, log notifier otherwise
pub fn from_config(config: &NotificationConfig) -> iasp_common::Result<Arc<dyn Notifier>> {
    let notifier: Arc<dyn Notifier> = match &config.relay_url {
        Some(url) => Arc::new(HttpRelayNotifier::new(
            url.clone(),
            config.from.clone(),
            Duration::from_secs(config.timeout_secs),
        )?),
        None => Arc::new(LogNotifier::new()),
    };
    Ok(notifier)
}
