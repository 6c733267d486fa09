use std::time::Duration;

use serde::Serialize;

use crate::scheduler::job::{JobOutcome, JobStatus};

/// Totals for one run, accumulated as jobs retire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Jobs discovered
    pub total: usize,
    /// Jobs retired so far, in any state
    pub completed: usize,
    pub succeeded: usize,
    /// Non-zero exits, signals and launch failures
    pub failed: usize,
    /// Subset of `failed` that never got a process
    pub launch_failed: usize,
    pub cancelled: usize,
    /// Whether the run was cut short by a cancellation request
    pub interrupted: bool,
    /// Wall-clock time of the whole run
    #[serde(rename = "wall_time_secs", serialize_with = "serialize_secs")]
    pub wall_time: Duration,
    /// Sum of per-job run times
    #[serde(rename = "job_time_secs", serialize_with = "serialize_secs")]
    pub job_time: Duration,
}

impl RunSummary {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            ..Default::default()
        }
    }

    pub fn record(&mut self, outcome: &JobOutcome) {
        self.completed += 1;
        self.job_time += outcome.elapsed;
        match &outcome.status {
            JobStatus::Succeeded => self.succeeded += 1,
            JobStatus::Failed { .. } => self.failed += 1,
            JobStatus::LaunchFailed { .. } => {
                self.failed += 1;
                self.launch_failed += 1;
            }
            JobStatus::Cancelled => self.cancelled += 1,
        }
    }

    /// Every discovered job has been accounted for.
    pub fn is_complete(&self) -> bool {
        self.completed == self.total
    }

    pub fn all_succeeded(&self) -> bool {
        self.succeeded == self.total
    }
}

pub(crate) fn serialize_secs<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_f64(duration.as_secs_f64())
}
