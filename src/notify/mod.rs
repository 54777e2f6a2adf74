//! Failure alerting.
//!
//! The scheduler hands every failed firing to a [`Notifier`]. Delivery is
//! best-effort: callers log a [`NotifyError`] and move on.

pub mod slack;

use crate::config::SlackConfig;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub use self::slack::SlackNotifier;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("webhook request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("webhook rejected alert with status {0}")]
    Rejected(u16),
}

/// A single failure alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Alert {
    pub test_id: String,
    pub test_name: String,
    pub url: String,
    /// One-line headline, e.g. `Test [home (http://..)] failed`.
    pub summary: String,
    /// Captured error detail.
    pub error: String,
}

#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, alert: &Alert) -> Result<(), NotifyError>;
}

/// Notifier used when no webhook is configured: alerts only reach the log.
pub struct LogNotifier;

#[async_trait::async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, alert: &Alert) -> Result<(), NotifyError> {
        tracing::warn!(
            test = %alert.test_name,
            url = %alert.url,
            error = %alert.error,
            "{}",
            alert.summary
        );
        Ok(())
    }
}

/// Pick the notifier for a configuration.
pub fn from_config(slack: &SlackConfig, timeout: Duration) -> reqwest::Result<Arc<dyn Notifier>> {
    match slack.webhook_url.as_deref().filter(|u| !u.trim().is_empty()) {
        Some(url) => {
            tracing::info!(channel = %slack.channel, "Slack alerts enabled");
            Ok(Arc::new(SlackNotifier::new(
                url,
                &slack.channel,
                &slack.username,
                timeout,
            )?))
        }
        None => {
            tracing::info!("No Slack webhook configured; alerts are logged only");
            Ok(Arc::new(LogNotifier))
        }
    }
}
