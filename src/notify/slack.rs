//! Slack incoming-webhook delivery.

use super::{Alert, Notifier, NotifyError};
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

pub struct SlackNotifier {
    client: Client,
    webhook_url: String,
    channel: String,
    username: String,
}

impl SlackNotifier {
    pub fn new(webhook_url: &str, channel: &str, username: &str, timeout: Duration) -> reqwest::Result<Self> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            webhook_url: webhook_url.to_string(),
            channel: channel.to_string(),
            username: username.to_string(),
        })
    }

    fn payload(&self, alert: &Alert) -> Value {
        json!({
            "channel": self.channel,
            "username": self.username,
            "text": alert.summary,
            "attachments": [{
                "color": "danger",
                "title": alert.test_name,
                "title_link": alert.url,
                "text": alert.error,
                "footer": format!("test {}", alert.test_id),
            }]
        })
    }
}

#[async_trait::async_trait]
impl Notifier for SlackNotifier {
    async fn notify(&self, alert: &Alert) -> Result<(), NotifyError> {
        let resp = self
            .client
            .post(&self.webhook_url)
            .json(&self.payload(alert))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(NotifyError::Rejected(resp.status().as_u16()));
        }
        Ok(())
    }
}
