//! In-process doubles for probe, store and notifier.

use super::job::JobContext;
use crate::config::OverlapPolicy;
use crate::notify::{Alert, Notifier, NotifyError};
use crate::probes::{Probe, ProbeResult, TestDefinition};
use crate::storage::{Store, StoreError};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

pub(crate) fn context(
    probe: &Arc<ScriptedProbe>,
    store: &Arc<MemoryStore>,
    notifier: &Arc<RecordingNotifier>,
    overlap: OverlapPolicy,
) -> JobContext {
    JobContext {
        probe: probe.clone(),
        store: store.clone(),
        notifier: notifier.clone(),
        overlap,
    }
}

enum Reply {
    Status(u16),
    Transport(String),
}

/// Probe answering with a fixed reply, optionally held until released.
pub(crate) struct ScriptedProbe {
    reply: Reply,
    hold: Option<Semaphore>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedProbe {
    fn build(reply: Reply, hold: bool) -> Arc<Self> {
        Arc::new(Self {
            reply,
            hold: hold.then(|| Semaphore::new(0)),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    pub(crate) fn status(code: u16) -> Arc<Self> {
        Self::build(Reply::Status(code), false)
    }

    pub(crate) fn transport(error: &str) -> Arc<Self> {
        Self::build(Reply::Transport(error.to_string()), false)
    }

    /// Every run blocks until [`ScriptedProbe::release`].
    pub(crate) fn held(code: u16) -> Arc<Self> {
        Self::build(Reply::Status(code), true)
    }

    pub(crate) fn release(&self) {
        if let Some(hold) = &self.hold {
            hold.close();
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub(crate) async fn wait_started(&self, n: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.calls() < n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("probe never started");
    }
}

#[async_trait::async_trait]
impl Probe for ScriptedProbe {
    async fn run(&self, test: &TestDefinition) -> ProbeResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(hold) = &self.hold {
            // closed semaphore == released
            let _ = hold.acquire().await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let (status, error) = match &self.reply {
            Reply::Status(200) => (Some(200), None),
            Reply::Status(code) => (Some(*code), Some(format!("unexpected status code {}", code))),
            Reply::Transport(e) => (None, Some(e.clone())),
        };
        ProbeResult {
            test_id: test.id.clone(),
            timestamp: Utc::now(),
            status,
            error,
            duration_ms: 1,
        }
    }
}

pub(crate) fn disk_full() -> StoreError {
    StoreError::Sqlite(rusqlite::Error::SqliteFailure(
        rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_FULL),
        None,
    ))
}

/// Store keeping results in memory; writes for listed test ids fail.
#[derive(Default)]
pub(crate) struct MemoryStore {
    tests: Mutex<Vec<TestDefinition>>,
    results: Mutex<Vec<ProbeResult>>,
    fail_for: HashSet<String>,
    reject_puts: bool,
}

impl MemoryStore {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn rejecting_puts() -> Arc<Self> {
        Arc::new(Self {
            reject_puts: true,
            ..Self::default()
        })
    }

    pub(crate) fn failing_for(ids: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            fail_for: ids.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        })
    }

    pub(crate) fn results(&self) -> Vec<ProbeResult> {
        self.results.lock().clone()
    }
}

impl Store for MemoryStore {
    fn all_tests(&self) -> Result<Vec<TestDefinition>, StoreError> {
        Ok(self.tests.lock().clone())
    }

    fn get_test(&self, id: &str) -> Result<Option<TestDefinition>, StoreError> {
        Ok(self.tests.lock().iter().find(|t| t.id == id).cloned())
    }

    fn get_test_by_name(&self, name: &str) -> Result<Option<TestDefinition>, StoreError> {
        Ok(self.tests.lock().iter().find(|t| t.name == name).cloned())
    }

    fn put_test(&self, test: &TestDefinition) -> Result<(), StoreError> {
        if self.reject_puts {
            return Err(disk_full());
        }
        let mut tests = self.tests.lock();
        tests.retain(|t| t.name != test.name && t.id != test.id);
        tests.push(test.clone());
        Ok(())
    }

    fn delete_test(&self, id: &str) -> Result<(), StoreError> {
        self.tests.lock().retain(|t| t.id != id);
        self.results.lock().retain(|r| r.test_id != id);
        Ok(())
    }

    fn save_result(&self, result: &ProbeResult) -> Result<(), StoreError> {
        if self.fail_for.contains(&result.test_id) {
            return Err(disk_full());
        }
        self.results.lock().push(result.clone());
        Ok(())
    }

    fn results_for(&self, test_id: &str, limit: usize) -> Result<Vec<ProbeResult>, StoreError> {
        Ok(self
            .results
            .lock()
            .iter()
            .rev()
            .filter(|r| r.test_id == test_id)
            .take(limit)
            .cloned()
            .collect())
    }
}

/// Notifier recording every alert it is given.
#[derive(Default)]
pub(crate) struct RecordingNotifier {
    alerts: Mutex<Vec<Alert>>,
    fail: bool,
}

impl RecordingNotifier {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Self::default()
        })
    }

    pub(crate) fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().clone()
    }
}

#[async_trait::async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, alert: &Alert) -> Result<(), NotifyError> {
        self.alerts.lock().push(alert.clone());
        if self.fail {
            return Err(NotifyError::Rejected(503));
        }
        Ok(())
    }
}
