//! Periodic job runner
//!
//! Every registered job gets its own thread that wakes on its cadence. A job
//! never runs twice at once: a tick or manual trigger that finds the job busy
//! is skipped (tick) or refused (trigger).

/// The five engine jobs
pub mod jobs;

use crate::error::SchedulerError;
use crate::model::Timestamp;
use chrono::Utc;
use log::{debug, error, info, warn};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

pub use jobs::{BandwidthJob, DailySummaryJob, MonthlySlaJob, PingJob, SlaJob};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobName {
    Ping,
    Bandwidth,
    Sla,
    DailySummary,
    MonthlySla,
}

impl JobName {
    pub const ALL: [JobName; 5] = [
        JobName::Ping,
        JobName::Bandwidth,
        JobName::Sla,
        JobName::DailySummary,
        JobName::MonthlySla,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobName::Ping => "ping",
            JobName::Bandwidth => "bandwidth",
            JobName::Sla => "sla",
            JobName::DailySummary => "daily-summary",
            JobName::MonthlySla => "monthly-sla",
        }
    }

    /// Collection and detection start right away; summaries wait a full period
    pub fn fires_on_start(&self) -> bool {
        matches!(self, JobName::Ping | JobName::Bandwidth | JobName::Sla)
    }
}

impl fmt::Display for JobName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobName {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobName::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| SchedulerError::UnknownJob(s.to_string()))
    }
}

/// What one job run did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobReport {
    pub processed: usize,
    pub failures: usize,
    pub summary: String,
}

impl JobReport {
    pub fn new(processed: usize, failures: usize, summary: impl Into<String>) -> Self {
        Self {
            processed,
            failures,
            summary: summary.into(),
        }
    }
}

#[cfg_attr(test, mockall::automock)]
pub trait Job: Send + Sync {
    fn name(&self) -> JobName;

    fn run(&self, now: Timestamp) -> anyhow::Result<JobReport>;
}

/// Clears the running flag when the run ends, even by panic
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

struct Slot {
    job: Arc<dyn Job>,
    interval: Duration,
    running: AtomicBool,
}

impl Slot {
    fn run_exclusive(&self, now: Timestamp) -> Result<anyhow::Result<JobReport>, SchedulerError> {
        let name = self.job.name();
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SchedulerError::AlreadyRunning(name.to_string()));
        }
        let _guard = RunningGuard(&self.running);

        info!("Job {} started", name);
        let started = Instant::now();
        let result = self.job.run(now);
        match &result {
            Ok(report) => info!(
                "Job {} finished in {:?}: {} processed, {} failures. {}",
                name,
                started.elapsed(),
                report.processed,
                report.failures,
                report.summary
            ),
            Err(e) => error!("Job {} failed after {:?}: {:#}", name, started.elapsed(), e),
        }
        Ok(result)
    }
}

pub struct Scheduler {
    slots: Vec<Arc<Slot>>,
    shutdown_senders: Vec<Sender<()>>,
    thread_handles: Vec<JoinHandle<()>>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            shutdown_senders: Vec::new(),
            thread_handles: Vec::new(),
        }
    }

    /// Register a job; a second registration under the same name replaces the first
    pub fn register(&mut self, job: Arc<dyn Job>, interval: Duration) {
        let name = job.name();
        self.slots.retain(|slot| slot.job.name() != name);
        debug!("Registered job {} every {:?}", name, interval);
        self.slots.push(Arc::new(Slot {
            job,
            interval,
            running: AtomicBool::new(false),
        }));
    }

    pub fn job_names(&self) -> Vec<JobName> {
        self.slots.iter().map(|slot| slot.job.name()).collect()
    }

    pub fn is_running(&self) -> bool {
        !self.thread_handles.is_empty()
    }

    /// Run a job now on the calling thread
    ///
    /// # Errors
    ///
    /// `UnknownJob` if nothing is registered under `name`, `AlreadyRunning`
    /// if its scheduled run is in progress, `JobFailed` if the run errored.
    pub fn trigger(&self, name: &str) -> Result<JobReport, SchedulerError> {
        self.trigger_at(name, Utc::now())
    }

    pub fn trigger_at(&self, name: &str, now: Timestamp) -> Result<JobReport, SchedulerError> {
        let job_name: JobName = name.parse()?;
        let slot = self
            .slots
            .iter()
            .find(|slot| slot.job.name() == job_name)
            .ok_or_else(|| SchedulerError::UnknownJob(name.to_string()))?;
        slot.run_exclusive(now)?.map_err(|e| SchedulerError::JobFailed {
            job: job_name.to_string(),
            reason: format!("{:#}", e),
        })
    }

    /// Spawn one timer thread per registered job
    pub fn start(&mut self) -> Result<(), SchedulerError> {
        if self.is_running() {
            return Err(SchedulerError::AlreadyStarted);
        }
        for slot in &self.slots {
            let (shutdown_sender, shutdown_receiver) = mpsc::channel::<()>();
            self.shutdown_senders.push(shutdown_sender);
            let slot = Arc::clone(slot);

            let handle = std::thread::spawn(move || {
                let name = slot.job.name();
                info!("Job thread {} started (every {:?})", name, slot.interval);

                let fire = |slot: &Slot| {
                    if let Err(e) = slot.run_exclusive(Utc::now()) {
                        warn!("Skipping tick: {}", e);
                    }
                };
                if name.fires_on_start() {
                    fire(slot.as_ref());
                }
                loop {
                    match shutdown_receiver.recv_timeout(slot.interval) {
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                        Err(RecvTimeoutError::Timeout) => fire(slot.as_ref()),
                    }
                }
                info!("Job thread {} stopped", name);
            });
            self.thread_handles.push(handle);
        }
        info!("Scheduler started {} jobs", self.thread_handles.len());
        Ok(())
    }

    /// Signal every job thread and wait for in-flight runs to finish
    pub fn stop(&mut self) {
        for sender in self.shutdown_senders.drain(..) {
            if let Err(e) = sender.send(()) {
                debug!("Job thread already gone: {}", e);
            }
        }
        for handle in self.thread_handles.drain(..) {
            if let Err(e) = handle.join() {
                error!("Job thread panicked: {:?}", e);
            }
        }
        info!("Scheduler stopped");
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if self.is_running() {
            self.stop();
        }
    }
}
