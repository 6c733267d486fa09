use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::process::Child;

use crate::error::{Result, RunnerError};
use crate::scheduler::job::{JobId, JobOutcome, JobStatus};
use crate::worker::launcher::LogCapture;

/// How long terminated jobs get to exit on SIGTERM before SIGKILL.
const TERMINATE_GRACE: Duration = Duration::from_secs(2);

/// Live state of an admitted job.
#[derive(Debug)]
pub struct RunningJob {
    pub id: JobId,
    child: Child,
    /// Process group led by the child; kept after the child is reaped
    pgid: Option<Pid>,
    started: Instant,
    started_at: DateTime<Utc>,
    log: LogCapture,
}

impl RunningJob {
    /// `child` is expected to lead its own process group.
    pub fn new(id: JobId, child: Child, log: LogCapture) -> Self {
        let pgid = child.id().map(|pid| Pid::from_raw(pid as i32));
        Self {
            id,
            child,
            pgid,
            started: Instant::now(),
            started_at: Utc::now(),
            log,
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Signal every process in the job's group. Returns false if the group
    /// could not be signalled, e.g. because it is already empty.
    fn signal_group(&self, signal: Signal) -> bool {
        let Some(pgid) = self.pgid else {
            return false;
        };
        match killpg(pgid, signal) {
            Ok(()) => true,
            Err(Errno::ESRCH) => false,
            Err(e) => {
                tracing::warn!(job_id = %self.id, ?signal, error = %e, "Failed to signal process group");
                false
            }
        }
    }

    /// Kill the whole group without waiting. Falls back to the direct child
    /// when the group cannot be signalled.
    fn kill_group(&mut self) {
        if !self.signal_group(Signal::SIGKILL) {
            if let Err(e) = self.child.start_kill() {
                tracing::debug!(job_id = %self.id, error = %e, "Kill after failed group signal");
            }
        }
    }

    /// Wait for the child until `deadline`, then kill the group and reap.
    async fn stop(&mut self, deadline: tokio::time::Instant) {
        if tokio::time::timeout_at(deadline, self.child.wait())
            .await
            .is_ok()
        {
            return;
        }
        tracing::warn!(job_id = %self.id, "Job did not exit on SIGTERM, killing");
        self.kill_group();
        if let Err(e) = self.child.wait().await {
            tracing::warn!(job_id = %self.id, error = %e, "Failed to reap job");
        }
    }

    /// Turn the record into an outcome, closing the log handle.
    fn retire(self, status: JobStatus) -> JobOutcome {
        let elapsed = self.started.elapsed();
        let log_path = self.log.release();

        JobOutcome {
            job_id: self.id,
            status,
            elapsed,
            started_at: Some(self.started_at),
            log_path,
            result_artifact: None,
        }
    }
}

/// Tracks running jobs by id, bounded by a fixed capacity.
///
/// Capacity is checked by the scheduler before launching; `admit` refuses
/// rather than exceeding it.
#[derive(Debug)]
pub struct ProcessRegistry {
    running: HashMap<JobId, RunningJob>,
    capacity: usize,
}

impl ProcessRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            running: HashMap::with_capacity(capacity),
            capacity,
        }
    }

    /// Take ownership of a freshly launched job.
    ///
    /// A rejected job is dropped, which kills its process.
    pub fn admit(&mut self, job: RunningJob) -> Result<()> {
        if self.running.contains_key(&job.id) {
            tracing::error!(job_id = %job.id, "Job already running, killing duplicate");
            return Err(RunnerError::AlreadyRunning(job.id));
        }
        if self.running.len() >= self.capacity {
            tracing::error!(job_id = %job.id, capacity = self.capacity, "Registry full, killing job");
            return Err(RunnerError::AtCapacity(self.capacity));
        }
        tracing::debug!(job_id = %job.id, pid = ?job.pid(), "Job admitted");
        self.running.insert(job.id.clone(), job);
        Ok(())
    }

    /// Retire every job whose process has exited, without blocking.
    ///
    /// Outcomes are returned sorted by job id.
    pub fn retire_finished(&mut self) -> Vec<JobOutcome> {
        let mut finished: Vec<(JobId, JobStatus)> = Vec::new();

        for (id, job) in self.running.iter_mut() {
            match job.child.try_wait() {
                Ok(Some(status)) => {
                    finished.push((id.clone(), JobStatus::from_exit_status(status)));
                }
                Ok(None) => {}
                Err(e) => {
                    // Status is unknowable; make sure the processes go away
                    tracing::warn!(job_id = %id, error = %e, "Failed to probe job status, retiring as failed");
                    job.kill_group();
                    finished.push((
                        id.clone(),
                        JobStatus::Failed {
                            exit_code: None,
                            signal: None,
                        },
                    ));
                }
            }
        }

        finished.sort_by(|a, b| a.0.cmp(&b.0));
        finished
            .into_iter()
            .filter_map(|(id, status)| self.running.remove(&id).map(|job| job.retire(status)))
            .collect()
    }

    /// Terminate and reap every running job, including any processes the
    /// solver forked.
    ///
    /// Each process group gets SIGTERM, then SIGKILL once the grace period
    /// runs out. Jobs that had already exited keep their real status; the
    /// rest are reported as cancelled.
    pub async fn terminate_all(&mut self) -> Vec<JobOutcome> {
        let mut jobs: Vec<RunningJob> = self.running.drain().map(|(_, job)| job).collect();
        jobs.sort_by(|a, b| a.id.cmp(&b.id));

        let mut exited = Vec::with_capacity(jobs.len());
        for job in jobs.iter_mut() {
            match job.child.try_wait() {
                Ok(Some(status)) => exited.push(Some(JobStatus::from_exit_status(status))),
                _ => {
                    if !job.signal_group(Signal::SIGTERM) {
                        job.kill_group();
                    }
                    exited.push(None);
                }
            }
        }

        let deadline = tokio::time::Instant::now() + TERMINATE_GRACE;
        let mut outcomes = Vec::with_capacity(jobs.len());
        for (mut job, status) in jobs.into_iter().zip(exited) {
            let status = match status {
                Some(status) => status,
                None => {
                    job.stop(deadline).await;
                    tracing::info!(job_id = %job.id, "Job terminated");
                    JobStatus::Cancelled
                }
            };
            // Sweep up anything left in the group after its leader exited
            job.signal_group(Signal::SIGKILL);
            outcomes.push(job.retire(status));
        }
        outcomes
    }

    pub fn capacity_remaining(&self) -> usize {
        self.capacity.saturating_sub(self.running.len())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn contains(&self, id: &JobId) -> bool {
        self.running.contains_key(id)
    }

    /// Ids of running jobs, sorted
    pub fn running_ids(&self) -> Vec<JobId> {
        let mut ids: Vec<JobId> = self.running.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.running.len()
    }

    pub fn is_empty(&self) -> bool {
        self.running.is_empty()
    }
}
