//! Human-readable progress lines for a run.
//!
//! The scheduler hands every state transition to a [`ProgressReporter`]; the
//! reporter only formats and emits, it never feeds back into scheduling.

use std::sync::Mutex;
use std::time::Duration;

use crate::config::file_name_of;
use crate::scheduler::{JobId, JobOutcome, JobStatus, RunSummary};

#[derive(Debug, Clone)]
pub enum ProgressEvent {
    Discovered {
        total: usize,
        parallelism: usize,
    },
    Starting {
        job_id: JobId,
        /// Running jobs including this one
        running: usize,
    },
    /// Warning ahead of the job's `LaunchFailed` outcome
    LaunchFailed {
        job_id: JobId,
        reason: String,
    },
    Outcome {
        outcome: JobOutcome,
        completed: usize,
        total: usize,
    },
    Cancelled {
        terminated: usize,
        discarded: usize,
    },
    AllDone {
        summary: RunSummary,
    },
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: &ProgressEvent);
}

/// `3m 7s` style durations, truncated to whole seconds.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{}m {}s", secs / 60, secs % 60)
}

/// Render one event as a single line prefixed with `[timestamp]`.
pub fn format_event(event: &ProgressEvent, timestamp: &str) -> String {
    let body = match event {
        ProgressEvent::Discovered { total, parallelism } => format!(
            "Found {} jobs to run. Running a maximum of {} jobs in parallel.",
            total, parallelism
        ),
        ProgressEvent::Starting { job_id, running } => {
            format!("STARTING: '{}'... ({} running)", job_id, running)
        }
        ProgressEvent::LaunchFailed { job_id, reason } => {
            format!("WARNING: '{}' could not be started: {}", job_id, reason)
        }
        ProgressEvent::Outcome {
            outcome,
            completed,
            total,
        } => {
            let progress = format!("({}/{} complete)", completed, total);
            let duration = format_duration(outcome.elapsed);
            let log = file_name_of(&outcome.log_path);
            match &outcome.status {
                JobStatus::Succeeded => format!(
                    "SUCCESS: '{}'. Duration: {}. {}",
                    outcome.job_id, duration, progress
                ),
                JobStatus::Failed { exit_code, signal } => {
                    let detail = match (exit_code, signal) {
                        (Some(code), _) => format!("exit code {}", code),
                        (None, Some(sig)) => format!("signal {}", sig),
                        (None, None) => "unknown exit status".to_string(),
                    };
                    format!(
                        "FAILED:  '{}' ({}). Duration: {}. Check '{}' for errors. {}",
                        outcome.job_id, detail, duration, log, progress
                    )
                }
                JobStatus::LaunchFailed { .. } => format!(
                    "FAILED:  '{}' (not started). Check '{}' for errors. {}",
                    outcome.job_id, log, progress
                ),
                JobStatus::Cancelled => format!(
                    "CANCELLED: '{}'. Duration: {}. {}",
                    outcome.job_id, duration, progress
                ),
            }
        }
        ProgressEvent::Cancelled {
            terminated,
            discarded,
        } => format!(
            "CANCELLED: terminated {} running jobs, discarded {} queued jobs.",
            terminated, discarded
        ),
        ProgressEvent::AllDone { summary } => format!(
            "DONE: total={}, success={}, failure={}, cancelled={}. Wall time: {}.",
            summary.total,
            summary.succeeded,
            summary.failed,
            summary.cancelled,
            format_duration(summary.wall_time)
        ),
    };
    format!("[{}] {}", timestamp, body)
}

/// Prints progress lines with the local wall-clock time.
#[derive(Debug, Default)]
pub struct ConsoleReporter {
    to_stderr: bool,
}

impl ConsoleReporter {
    pub fn stdout() -> Self {
        Self { to_stderr: false }
    }

    /// Keep stdout free for machine-readable output.
    pub fn stderr() -> Self {
        Self { to_stderr: true }
    }
}

impl ProgressReporter for ConsoleReporter {
    fn report(&self, event: &ProgressEvent) {
        let timestamp = chrono::Local::now().format("%H:%M:%S").to_string();
        let line = format_event(event, &timestamp);
        if self.to_stderr {
            eprintln!("{}", line);
        } else {
            println!("{}", line);
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Ids from `Starting` events, in the order they were reported.
    pub fn started_ids(&self) -> Vec<JobId> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ProgressEvent::Starting { job_id, .. } => Some(job_id),
                _ => None,
            })
            .collect()
    }

    pub fn outcomes(&self) -> Vec<JobOutcome> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ProgressEvent::Outcome { outcome, .. } => Some(outcome),
                _ => None,
            })
            .collect()
    }
}

impl ProgressReporter for RecordingReporter {
    fn report(&self, event: &ProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}
