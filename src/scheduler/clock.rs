//! Firing clocks.
//!
//! A [`Clock`] owns the recurring triggers. It decides *when* an entry is
//! due and dispatches the entry's [`Task`] onto the runtime; it never runs a
//! task inline, so one slow firing cannot hold up the others.
//!
//! [`ManualClock`] is driven explicitly and exists so the scheduling core can
//! be exercised without waiting on wall-clock time. The real-time clock lives
//! in [`super::engine`].

use chrono::{DateTime, Utc};
use cron::Schedule;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Opaque handle to a registered trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EntryId(u64);

impl std::fmt::Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Work dispatched on every firing of an entry.
pub type Task = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Informational fire times of an entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Timing {
    pub next: Option<DateTime<Utc>>,
    pub prev: Option<DateTime<Utc>>,
}

pub trait Clock: Send + Sync {
    /// Install a recurring trigger.
    fn register(&self, schedule: Schedule, task: Task) -> EntryId;

    fn timing(&self, id: EntryId) -> Option<Timing>;

    /// Begin dispatching. Must be called from within a tokio runtime.
    fn start(&self);

    /// Stop dispatching future firings. Firings already dispatched keep running.
    fn stop(&self);
}

struct Entry {
    id: EntryId,
    schedule: Schedule,
    task: Task,
    timing: Timing,
}

/// Trigger table shared by both clock implementations.
#[derive(Default)]
pub(crate) struct Entries {
    last_id: u64,
    list: Vec<Entry>,
}

impl Entries {
    pub(crate) fn insert(&mut self, schedule: Schedule, task: Task, now: DateTime<Utc>) -> EntryId {
        self.last_id += 1;
        let id = EntryId(self.last_id);
        let next = schedule.after(&now).next();
        self.list.push(Entry {
            id,
            schedule,
            task,
            timing: Timing { next, prev: None },
        });
        id
    }

    /// Recompute every next fire time from `now`.
    pub(crate) fn reset(&mut self, now: DateTime<Utc>) {
        for entry in &mut self.list {
            entry.timing.next = entry.schedule.after(&now).next();
        }
    }

    pub(crate) fn earliest(&self) -> Option<DateTime<Utc>> {
        self.list.iter().filter_map(|e| e.timing.next).min()
    }

    /// Tasks due at `now`. Each due entry fires once, however many of its
    /// fire times were missed.
    pub(crate) fn take_due(&mut self, now: DateTime<Utc>) -> Vec<Task> {
        let mut due = Vec::new();
        for entry in &mut self.list {
            match entry.timing.next {
                Some(next) if next <= now => {
                    entry.timing.prev = Some(next);
                    entry.timing.next = entry.schedule.after(&now).next();
                    due.push(entry.task.clone());
                }
                _ => {}
            }
        }
        due
    }

    pub(crate) fn timing(&self, id: EntryId) -> Option<Timing> {
        self.list.iter().find(|e| e.id == id).map(|e| e.timing)
    }

    pub(crate) fn len(&self) -> usize {
        self.list.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ManualState {
    Idle,
    Running,
    Stopped,
}

/// Clock advanced by hand.
pub struct ManualClock {
    entries: Mutex<Entries>,
    now: Mutex<DateTime<Utc>>,
    state: Mutex<ManualState>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            entries: Mutex::new(Entries::default()),
            now: Mutex::new(now),
            state: Mutex::new(ManualState::Idle),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }

    pub fn is_running(&self) -> bool {
        *self.state.lock() == ManualState::Running
    }

    pub fn entry_count(&self) -> usize {
        self.entries.lock().len()
    }

    /// Set the time to `at` and dispatch every due entry without waiting
    /// for the firings to finish. Nothing is dispatched unless running.
    pub fn tick_to(&self, at: DateTime<Utc>) -> Vec<JoinHandle<()>> {
        *self.now.lock() = at;
        if !self.is_running() {
            return Vec::new();
        }
        let due = self.entries.lock().take_due(at);
        due.into_iter().map(|task| tokio::spawn(task())).collect()
    }

    /// Advance by `by`, wait for the dispatched firings, and return how many ran.
    pub async fn advance(&self, by: chrono::Duration) -> usize {
        let handles = self.tick_to(self.now() + by);
        let fired = handles.len();
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                tracing::error!("Firing task failed: {}", e);
            }
        }
        fired
    }
}

impl Clock for ManualClock {
    fn register(&self, schedule: Schedule, task: Task) -> EntryId {
        let now = self.now();
        self.entries.lock().insert(schedule, task, now)
    }

    fn timing(&self, id: EntryId) -> Option<Timing> {
        self.entries.lock().timing(id)
    }

    fn start(&self) {
        let mut state = self.state.lock();
        if *state == ManualState::Idle {
            let now = self.now();
            self.entries.lock().reset(now);
            *state = ManualState::Running;
        }
    }

    fn stop(&self) {
        *self.state.lock() = ManualState::Stopped;
    }
}
