//! Cron-driven job scheduler.
//!
//! A single driver task ticks at a fixed interval, compares each job's next
//! fire time with the clock, and spawns due runs onto a [`TaskTracker`].
//! A job that is still running when it fires again is skipped. Missed fire
//! times are not caught up: the next fire time is always computed from the
//! tick that consumed the previous one.
//!
//! Every run goes through the same isolation boundary whether it was fired
//! by the clock or by [`Scheduler::trigger`]: errors and panics become a
//! [`JobOutcome::Failure`] in the run history and the scheduler keeps going.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Offset, Utc};
use cron::Schedule;
use serde::Serialize;
use thiserror::Error;
use tokio::task::{AbortHandle, JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::error::ConfigError;
use crate::jobs::{Job, JobError, JobReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub tick_interval: Duration,
    /// How long `stop` waits for in-flight runs before aborting them.
    pub shutdown_grace: Duration,
    pub history_limit: usize,
    /// Offset cron expressions are evaluated in.
    pub timezone: FixedOffset,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            shutdown_grace: Duration::from_secs(30),
            history_limit: 64,
            timezone: Utc.fix(),
        }
    }
}

/// A job paired with its cron schedule.
pub struct ScheduledJob {
    expression: String,
    schedule: Schedule,
    job: Arc<dyn Job>,
}

impl ScheduledJob {
    /// Parse `expression` (seconds-first, six or seven fields).
    pub fn new(expression: impl Into<String>, job: Arc<dyn Job>) -> Result<Self, ConfigError> {
        let expression = expression.into();
        let schedule = Schedule::from_str(&expression).map_err(|error| ConfigError::InvalidCron {
            job: job.name().to_owned(),
            expression: expression.clone(),
            reason: error.to_string(),
        })?;
        Ok(Self {
            expression,
            schedule,
            job,
        })
    }

    pub fn name(&self) -> &str {
        self.job.name()
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    fn next_after(&self, now: DateTime<Utc>, timezone: FixedOffset) -> Option<DateTime<Utc>> {
        self.schedule
            .after(&now.with_timezone(&timezone))
            .next()
            .map(|next| next.with_timezone(&Utc))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    Success,
    /// Ran to completion but some records were not stored.
    Partial,
    Failure,
    /// Fired while the previous run was still going.
    Skipped,
}

/// One recorded run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobRun {
    pub job: String,
    pub triggered_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: JobOutcome,
    pub counts: BTreeMap<&'static str, u64>,
    pub errors: Vec<String>,
}

impl JobRun {
    fn skipped(job: &str, triggered_at: DateTime<Utc>) -> Self {
        Self {
            job: job.to_owned(),
            triggered_at,
            finished_at: triggered_at,
            outcome: JobOutcome::Skipped,
            counts: Default::default(),
            errors: vec![String::from("previous run still in progress")],
        }
    }

    fn finished(
        job: &str,
        triggered_at: DateTime<Utc>,
        result: Result<Result<JobReport, JobError>, JoinError>,
    ) -> Self {
        let (outcome, report) = match result {
            Ok(Ok(report)) if report.is_partial() => (JobOutcome::Partial, report),
            Ok(Ok(report)) => (JobOutcome::Success, report),
            Ok(Err(error)) => (JobOutcome::Failure, failure_report(error.to_string())),
            Err(join) if join.is_panic() => {
                let error = JobError::Panicked {
                    message: panic_message(join),
                };
                (JobOutcome::Failure, failure_report(error.to_string()))
            }
            Err(_) => (
                JobOutcome::Failure,
                failure_report(String::from("run aborted during shutdown")),
            ),
        };
        Self {
            job: job.to_owned(),
            triggered_at,
            finished_at: Utc::now(),
            outcome,
            counts: report.counts,
            errors: report.errors,
        }
    }
}

fn failure_report(message: String) -> JobReport {
    JobReport {
        counts: Default::default(),
        errors: vec![message],
    }
}

fn panic_message(error: JoinError) -> String {
    let payload = error.into_panic();
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        String::from("non-string panic payload")
    }
}

/// Cron expression and upcoming fire time of one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobSchedule {
    pub job: String,
    pub expression: String,
    pub next_fire: Option<DateTime<Utc>>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("no job named '{name}' is registered")]
    UnknownJob { name: String },

    #[error("scheduler has been stopped")]
    Stopped,
}

struct Inner {
    entries: Vec<ScheduledJob>,
    config: SchedulerConfig,
    next_fire: Mutex<HashMap<String, Option<DateTime<Utc>>>>,
    running: Mutex<HashMap<String, AbortHandle>>,
    history: Mutex<VecDeque<JobRun>>,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

/// Owns the job table and the background driver.
pub struct Scheduler {
    inner: Arc<Inner>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(entries: Vec<ScheduledJob>, config: SchedulerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                entries,
                config,
                next_fire: Mutex::new(HashMap::new()),
                running: Mutex::new(HashMap::new()),
                history: Mutex::new(VecDeque::new()),
                tracker: TaskTracker::new(),
                cancel: CancellationToken::new(),
            }),
            driver: Mutex::new(None),
        }
    }

    pub fn job_names(&self) -> Vec<&str> {
        self.inner.entries.iter().map(ScheduledJob::name).collect()
    }

    /// Spawn the driver task. Calling it again while started is a no-op.
    pub fn start(&self) -> Result<(), SchedulerError> {
        if self.inner.cancel.is_cancelled() {
            return Err(SchedulerError::Stopped);
        }
        let mut driver = self
            .driver
            .lock()
            .expect("scheduler driver mutex should not be poisoned");
        if driver.is_some() {
            return Ok(());
        }

        let inner = Arc::clone(&self.inner);
        *driver = Some(tokio::spawn(async move {
            tracing::info!(jobs = inner.entries.len(), "scheduler started");
            let mut interval = tokio::time::interval(inner.config.tick_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = inner.cancel.cancelled() => break,
                    _ = interval.tick() => {
                        inner.tick_at(Utc::now());
                    }
                }
            }
            tracing::info!("scheduler driver stopped");
        }));
        Ok(())
    }

    /// Stop firing, wait up to the grace period for in-flight runs, then
    /// abort whatever is left.
    pub async fn stop(&self) {
        self.inner.cancel.cancel();
        let driver = self
            .driver
            .lock()
            .expect("scheduler driver mutex should not be poisoned")
            .take();
        if let Some(driver) = driver {
            let _ = driver.await;
        }

        self.inner.tracker.close();
        let grace = self.inner.config.shutdown_grace;
        if tokio::time::timeout(grace, self.inner.tracker.wait()).await.is_err() {
            let running: Vec<(String, AbortHandle)> = self
                .inner
                .running
                .lock()
                .expect("scheduler running mutex should not be poisoned")
                .iter()
                .map(|(name, handle)| (name.clone(), handle.clone()))
                .collect();
            for (job, handle) in running {
                tracing::warn!(job = %job, grace_ms = grace.as_millis() as u64, "aborting run after shutdown grace period");
                handle.abort();
            }
            self.inner.tracker.wait().await;
        }
        tracing::info!("scheduler stopped");
    }

    /// Run `name` now through the same isolation boundary as scheduled runs
    /// and wait for it to finish.
    pub async fn trigger(&self, name: &str) -> Result<JobRun, SchedulerError> {
        if self.inner.cancel.is_cancelled() {
            return Err(SchedulerError::Stopped);
        }
        let index = self
            .inner
            .entries
            .iter()
            .position(|entry| entry.name() == name)
            .ok_or_else(|| SchedulerError::UnknownJob {
                name: name.to_owned(),
            })?;

        match Inner::launch(&self.inner, index, Utc::now()) {
            Launch::Skipped(run) => Ok(run),
            Launch::Started(handle) => handle.await.map_err(|_| SchedulerError::Stopped),
        }
    }

    /// Evaluate every job against `now` and fire the due ones. Returns the
    /// names of the jobs that fired.
    pub fn tick_at(&self, now: DateTime<Utc>) -> Vec<String> {
        self.inner.tick_at(now)
    }

    pub fn schedules(&self, now: DateTime<Utc>) -> Vec<JobSchedule> {
        self.inner
            .entries
            .iter()
            .map(|entry| JobSchedule {
                job: entry.name().to_owned(),
                expression: entry.expression().to_owned(),
                next_fire: entry.next_after(now, self.inner.config.timezone),
            })
            .collect()
    }

    /// Recent runs, oldest first.
    pub fn history(&self) -> Vec<JobRun> {
        self.inner
            .history
            .lock()
            .expect("scheduler history mutex should not be poisoned")
            .iter()
            .cloned()
            .collect()
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.inner
            .running
            .lock()
            .expect("scheduler running mutex should not be poisoned")
            .contains_key(name)
    }
}

enum Launch {
    Skipped(JobRun),
    Started(JoinHandle<JobRun>),
}

impl Inner {
    fn tick_at(self: &Arc<Self>, now: DateTime<Utc>) -> Vec<String> {
        let mut fired = Vec::new();
        for (index, entry) in self.entries.iter().enumerate() {
            let due = {
                let mut next_fire = self
                    .next_fire
                    .lock()
                    .expect("scheduler next-fire mutex should not be poisoned");
                match next_fire.get(entry.name()).copied() {
                    None => {
                        next_fire.insert(
                            entry.name().to_owned(),
                            entry.next_after(now, self.config.timezone),
                        );
                        false
                    }
                    Some(Some(next)) if next <= now => {
                        next_fire.insert(
                            entry.name().to_owned(),
                            entry.next_after(now, self.config.timezone),
                        );
                        true
                    }
                    Some(_) => false,
                }
            };

            if due {
                tracing::info!(job = %entry.name(), "job is due, firing");
                // Scheduled runs report through the history only.
                drop(Self::launch(self, index, now));
                fired.push(entry.name().to_owned());
            }
        }
        fired
    }

    fn launch(self: &Arc<Self>, index: usize, triggered_at: DateTime<Utc>) -> Launch {
        let entry = &self.entries[index];
        let name = entry.name().to_owned();

        let mut running = self
            .running
            .lock()
            .expect("scheduler running mutex should not be poisoned");
        if running.contains_key(&name) {
            drop(running);
            tracing::warn!(job = %name, "previous run still in progress; skipping");
            let run = JobRun::skipped(&name, triggered_at);
            self.record(run.clone());
            return Launch::Skipped(run);
        }

        let job = Arc::clone(&entry.job);
        let body = tokio::spawn(async move { job.run().await });
        running.insert(name.clone(), body.abort_handle());
        drop(running);

        let inner = Arc::clone(self);
        Launch::Started(self.tracker.spawn(async move {
            let result = body.await;
            inner
                .running
                .lock()
                .expect("scheduler running mutex should not be poisoned")
                .remove(&name);

            let run = JobRun::finished(&name, triggered_at, result);
            match run.outcome {
                JobOutcome::Failure => {
                    tracing::error!(job = %name, errors = ?run.errors, "job run failed");
                }
                JobOutcome::Partial => {
                    tracing::warn!(job = %name, errors = run.errors.len(), "job run partially failed");
                }
                _ => tracing::info!(job = %name, "job run finished"),
            }
            inner.record(run.clone());
            run
        }))
    }

    fn record(&self, run: JobRun) {
        let mut history = self
            .history
            .lock()
            .expect("scheduler history mutex should not be poisoned");
        history.push_back(run);
        while history.len() > self.config.history_limit {
            history.pop_front();
        }
    }
}
