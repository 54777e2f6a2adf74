use super::clock::{Clock, Entries, EntryId, Task, Timing};
use chrono::Utc;
use cron::Schedule;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// How long the driver sleeps when no entry has a next fire time.
const IDLE_WAIT: Duration = Duration::from_secs(60);

/// Wall-clock driven [`Clock`]: one tokio task sleeps until the earliest
/// due entry and dispatches every due firing as its own task.
pub struct CronClock {
    entries: Arc<Mutex<Entries>>,
    wake: Arc<Notify>,
    cancel: CancellationToken,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl CronClock {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(Entries::default())),
            wake: Arc::new(Notify::new()),
            cancel: CancellationToken::new(),
            driver: Mutex::new(None),
        }
    }
}

impl Default for CronClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for CronClock {
    fn register(&self, schedule: Schedule, task: Task) -> EntryId {
        let id = self.entries.lock().insert(schedule, task, Utc::now());
        self.wake.notify_one();
        id
    }

    fn timing(&self, id: EntryId) -> Option<Timing> {
        self.entries.lock().timing(id)
    }

    fn start(&self) {
        let mut driver = self.driver.lock();
        if driver.is_some() || self.cancel.is_cancelled() {
            return;
        }
        self.entries.lock().reset(Utc::now());
        *driver = Some(tokio::spawn(run_clock_loop(
            self.entries.clone(),
            self.wake.clone(),
            self.cancel.clone(),
        )));
    }

    fn stop(&self) {
        self.cancel.cancel();
    }
}

impl Drop for CronClock {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Main clock loop. Firings are spawned, never awaited here.
async fn run_clock_loop(entries: Arc<Mutex<Entries>>, wake: Arc<Notify>, cancel: CancellationToken) {
    info!("Scheduler clock started");

    loop {
        let earliest = entries.lock().earliest();
        let wait = earliest
            .map(|at| (at - Utc::now()).to_std().unwrap_or(Duration::ZERO))
            .unwrap_or(IDLE_WAIT);

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = wake.notified() => continue,
            _ = tokio::time::sleep(wait) => {}
        }

        let due = entries.lock().take_due(Utc::now());
        if !due.is_empty() {
            debug!(count = due.len(), "Dispatching due firings");
        }
        for task in due {
            tokio::spawn(task());
        }
    }

    info!("Scheduler clock stopped");
}
