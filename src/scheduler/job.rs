//! A job binds one test definition to the probe, store and notifier.

use super::clock::Task;
use crate::config::OverlapPolicy;
use crate::notify::{Alert, Notifier};
use crate::probes::{Probe, ProbeResult, TestDefinition};
use crate::storage::Store;
use futures::FutureExt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Shared dependencies handed to every job.
#[derive(Clone)]
pub struct JobContext {
    pub probe: Arc<dyn Probe>,
    pub store: Arc<dyn Store>,
    pub notifier: Arc<dyn Notifier>,
    pub overlap: OverlapPolicy,
}

/// How the failure alert of a firing went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// The probe passed.
    NotNeeded,
    Sent,
    Failed(String),
}

/// What one firing did. Informational only: nothing upstream acts on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Firing {
    /// The previous firing of the same job was still running.
    Skipped,
    Completed {
        result: ProbeResult,
        persisted: bool,
        alert: Delivery,
    },
}

pub struct Job {
    test: TestDefinition,
    ctx: JobContext,
    /// Held for the duration of a firing; serializes firings of this job.
    gate: Mutex<()>,
}

impl Job {
    pub fn new(test: TestDefinition, ctx: JobContext) -> Self {
        Self {
            test,
            ctx,
            gate: Mutex::new(()),
        }
    }

    pub fn test(&self) -> &TestDefinition {
        &self.test
    }

    pub fn id(&self) -> &str {
        &self.test.id
    }

    /// Run one firing: probe, persist, alert on failure. Never fails;
    /// every problem ends up in the log and in the returned [`Firing`].
    pub async fn run(&self) -> Firing {
        let _running = match self.ctx.overlap {
            OverlapPolicy::Skip => match self.gate.try_lock() {
                Ok(guard) => guard,
                Err(_) => {
                    warn!(test = %self.test.name, "Previous run still in progress, skipping");
                    return Firing::Skipped;
                }
            },
            OverlapPolicy::Queue => self.gate.lock().await,
        };

        info!(test = %self.test.name, url = %self.test.url, "Running test [{} ({})]", self.test.name, self.test.url);
        let result = self.ctx.probe.run(&self.test).await;
        let persisted = self.persist(&result).await;

        if result.is_success() {
            info!(
                test = %self.test.name,
                duration_ms = result.duration_ms,
                "Test [{} ({})] succeeded",
                self.test.name,
                self.test.url
            );
            return Firing::Completed {
                result,
                persisted,
                alert: Delivery::NotNeeded,
            };
        }

        let detail = result.failure_detail();
        error!(test = %self.test.name, status = ?result.status, error = %detail, "Test {} failed", self.test.name);

        let alert = Alert {
            test_id: self.test.id.clone(),
            test_name: self.test.name.clone(),
            url: self.test.url.clone(),
            summary: format!("Test [{} ({})] failed", self.test.name, self.test.url),
            error: detail,
        };
        let delivery = match self.ctx.notifier.notify(&alert).await {
            Ok(()) => Delivery::Sent,
            Err(e) => {
                error!(test = %self.test.name, "Failed to send alert: {}", e);
                Delivery::Failed(e.to_string())
            }
        };

        Firing::Completed {
            result,
            persisted,
            alert: delivery,
        }
    }

    async fn persist(&self, result: &ProbeResult) -> bool {
        let store = self.ctx.store.clone();
        let record = result.clone();
        match tokio::task::spawn_blocking(move || store.save_result(&record)).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                error!(test = %self.test.name, "Failed to save result: {}", e);
                false
            }
            Err(e) => {
                error!(test = %self.test.name, "Result writer panicked: {}", e);
                false
            }
        }
    }
}

/// Clock task that fires `job`.
pub fn task(job: Arc<Job>) -> Task {
    Arc::new(move || {
        let job = job.clone();
        async move {
            job.run().await;
        }
        .boxed()
    })
}
