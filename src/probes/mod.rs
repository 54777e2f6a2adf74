//! Probe definitions and execution.
//!
//! A [`TestDefinition`] describes one HTTP check; a [`Probe`] turns it into a
//! [`ProbeResult`] by performing the request. Classification is deliberately
//! narrow: only HTTP 200 counts as a pass.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub mod http;

pub use self::http::HttpProbe;

/// A user-defined HTTP test, as ingested from JSON or the admin API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestDefinition {
    /// Assigned at ingestion when absent.
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// Six-field cron expression: sec min hour day-of-month month day-of-week.
    pub cron: String,
}

fn default_method() -> String {
    "GET".to_string()
}

impl TestDefinition {
    /// Build a GET test with no headers or body.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        url: impl Into<String>,
        cron: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            url: url.into(),
            method: default_method(),
            headers: BTreeMap::new(),
            body: None,
            cron: cron.into(),
        }
    }
}

/// Outcome of a single firing, as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub test_id: String,
    pub timestamp: DateTime<Utc>,
    /// Observed status code; `None` when the request never got a response.
    pub status: Option<u16>,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl ProbeResult {
    /// Only a 200 is a pass.
    pub fn is_success(&self) -> bool {
        self.status == Some(200)
    }

    /// Error text for alerts, falling back to the status line.
    pub fn failure_detail(&self) -> String {
        match (&self.error, self.status) {
            (Some(err), _) => err.clone(),
            (None, Some(code)) => format!("unexpected status code {}", code),
            (None, None) => "no response".to_string(),
        }
    }
}

/// Trait for anything that can execute a test definition.
///
/// Implementations never fail: transport problems are folded into the
/// returned [`ProbeResult`].
#[async_trait::async_trait]
pub trait Probe: Send + Sync {
    async fn run(&self, test: &TestDefinition) -> ProbeResult;
}
