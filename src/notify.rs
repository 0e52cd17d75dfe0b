//! Notification channel: short title/body messages to an optional webhook.
//!
//! Purely observational. No configured endpoint means notifications are
//! disabled; delivery failures are logged and swallowed — they must never
//! influence the loop.

use reqwest::Client;
use serde::Serialize;

#[derive(Debug, Serialize)]
struct Payload<'a> {
    title: &'a str,
    body: &'a str,
}

/// Fire-and-forget webhook notifier.
#[derive(Debug, Clone)]
pub struct Notifier {
    endpoint: Option<String>,
    client: Client,
}

impl Notifier {
    pub fn new(endpoint: Option<String>) -> Self {
        Self {
            endpoint: endpoint.filter(|e| !e.trim().is_empty()),
            client: Client::new(),
        }
    }

    /// Notifier that never sends anything.
    pub fn disabled() -> Self {
        Self::new(None)
    }

    pub fn is_enabled(&self) -> bool {
        self.endpoint.is_some()
    }

    /// Send one message. All failures are swallowed.
    pub async fn send(&self, title: &str, body: &str) {
        let Some(endpoint) = &self.endpoint else {
            return;
        };
        let payload = Payload { title, body };
        match self
            .client
            .post(endpoint)
            .json(&payload)
            .timeout(std::time::Duration::from_secs(10))
            .send()
            .await
        {
            Ok(response) if !response.status().is_success() => {
                log::warn!("notification '{}' rejected: HTTP {}", title, response.status());
            }
            Err(e) => log::warn!("notification '{}' failed: {}", title, e),
            _ => {}
        }
    }
}
