//! Job scheduling: turns test definitions into recurring firings.
//!
//! The [`Scheduler`] owns the registry (`test_id -> EntryId`) and the
//! lifecycle `Unstarted -> Running -> Stopped`. The [`Clock`] owns the
//! "when"; each [`Job`] owns the "what".

pub mod cadence;
pub mod clock;
pub mod engine;
pub mod job;

#[cfg(test)]
pub(crate) mod testing;

pub use self::cadence::CadenceError;
pub use self::clock::{Clock, EntryId, ManualClock, Task, Timing};
pub use self::engine::CronClock;
pub use self::job::{Delivery, Firing, Job, JobContext};

use crate::probes::TestDefinition;
use chrono::{DateTime, Utc};
use cron::Schedule;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    Unstarted,
    Running,
    Stopped,
}

impl std::fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedulerState::Unstarted => write!(f, "unstarted"),
            SchedulerState::Running => write!(f, "running"),
            SchedulerState::Stopped => write!(f, "stopped"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("invalid cron {cadence:?} for test {name}: {source}")]
    InvalidCadence {
        test_id: String,
        name: String,
        cadence: String,
        #[source]
        source: CadenceError,
    },
    #[error("test {0} is already scheduled")]
    DuplicateTest(String),
    #[error("cannot {action} a {state} scheduler")]
    InvalidState {
        action: &'static str,
        state: SchedulerState,
    },
}

/// Registry row, as exposed to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduledEntry {
    pub test_id: String,
    pub name: String,
    pub cron: String,
    pub entry: EntryId,
    pub next: Option<DateTime<Utc>>,
    pub prev: Option<DateTime<Utc>>,
}

struct Registered {
    job: Arc<Job>,
    entry: EntryId,
}

struct Inner {
    state: SchedulerState,
    /// Added but not yet registered; registered by `start`.
    pending: Vec<Arc<Job>>,
    registry: HashMap<String, Registered>,
}

impl Inner {
    fn expect_unstarted(&self, action: &'static str) -> Result<(), ScheduleError> {
        match self.state {
            SchedulerState::Unstarted => Ok(()),
            state => Err(ScheduleError::InvalidState { action, state }),
        }
    }
}

pub struct Scheduler {
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
}

impl Scheduler {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            inner: Mutex::new(Inner {
                state: SchedulerState::Unstarted,
                pending: Vec::new(),
                registry: HashMap::new(),
            }),
        }
    }

    /// One job per definition, all sharing `ctx`.
    pub fn with_tests(tests: Vec<TestDefinition>, ctx: JobContext, clock: Arc<dyn Clock>) -> Self {
        let scheduler = Self::new(clock);
        for test in tests {
            scheduler.add_job(Job::new(test, ctx.clone()));
        }
        scheduler
    }

    /// Queue a job for registration at [`Scheduler::start`].
    pub fn add_job(&self, job: Job) {
        self.inner.lock().pending.push(Arc::new(job));
    }

    /// Parse the job's cadence and install its trigger right away.
    pub fn register(&self, job: Arc<Job>) -> Result<EntryId, ScheduleError> {
        let mut inner = self.inner.lock();
        inner.expect_unstarted("register jobs on")?;
        if inner.registry.contains_key(job.id()) {
            return Err(ScheduleError::DuplicateTest(job.id().to_string()));
        }
        let schedule = parse_cadence(job.test())?;
        Ok(self.install(&mut inner, job, schedule))
    }

    /// Register every queued job, then start the clock.
    ///
    /// All-or-nothing: every cadence is checked before any trigger is
    /// installed, and on error the clock is never started.
    pub fn start(&self) -> Result<(), ScheduleError> {
        let mut inner = self.inner.lock();
        inner.expect_unstarted("start")?;

        let mut schedules = Vec::with_capacity(inner.pending.len());
        let mut seen = HashSet::new();
        for job in &inner.pending {
            schedules.push(parse_cadence(job.test())?);
            if inner.registry.contains_key(job.id()) || !seen.insert(job.id()) {
                return Err(ScheduleError::DuplicateTest(job.id().to_string()));
            }
        }

        let pending = std::mem::take(&mut inner.pending);
        for (job, schedule) in pending.into_iter().zip(schedules) {
            self.install(&mut inner, job, schedule);
        }

        self.clock.start();
        inner.state = SchedulerState::Running;
        info!(jobs = inner.registry.len(), "Started job scheduler");
        Ok(())
    }

    /// Stop future firings. In-flight firings finish on their own.
    pub fn stop(&self) {
        let mut inner = self.inner.lock();
        if inner.state == SchedulerState::Stopped {
            return;
        }
        self.clock.stop();
        inner.state = SchedulerState::Stopped;
        info!("Stopped job scheduler");
    }

    pub fn state(&self) -> SchedulerState {
        self.inner.lock().state
    }

    pub fn entry(&self, test_id: &str) -> Option<EntryId> {
        self.inner.lock().registry.get(test_id).map(|r| r.entry)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered tests with their fire times, ordered by name.
    pub fn entries(&self) -> Vec<ScheduledEntry> {
        let inner = self.inner.lock();
        let mut entries: Vec<_> = inner
            .registry
            .values()
            .map(|r| {
                let timing = self.clock.timing(r.entry).unwrap_or_default();
                let test = r.job.test();
                ScheduledEntry {
                    test_id: test.id.clone(),
                    name: test.name.clone(),
                    cron: test.cron.clone(),
                    entry: r.entry,
                    next: timing.next,
                    prev: timing.prev,
                }
            })
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.test_id.cmp(&b.test_id)));
        entries
    }

    fn install(&self, inner: &mut Inner, job: Arc<Job>, schedule: Schedule) -> EntryId {
        let entry = self.clock.register(schedule, self::job::task(job.clone()));
        info!(test = %job.test().name, cron = %job.test().cron, "Scheduled [{}]", job.test().name);
        inner.registry.insert(job.id().to_string(), Registered { job, entry });
        entry
    }
}

fn parse_cadence(test: &TestDefinition) -> Result<Schedule, ScheduleError> {
    cadence::parse(&test.cron).map_err(|source| ScheduleError::InvalidCadence {
        test_id: test.id.clone(),
        name: test.name.clone(),
        cadence: test.cron.clone(),
        source,
    })
}
