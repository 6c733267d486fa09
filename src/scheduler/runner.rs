use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::RunnerConfig;
use crate::error::{Result, RunnerError};
use crate::manifest::RunManifest;
use crate::report::{ProgressEvent, ProgressReporter};
use crate::scheduler::discovery::discover_jobs;
use crate::scheduler::job::{JobDescriptor, JobOutcome, JobStatus};
use crate::scheduler::queue::JobQueue;
use crate::scheduler::registry::ProcessRegistry;
use crate::scheduler::summary::RunSummary;
use crate::worker::ProcessLauncher;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerPhase {
    /// Jobs still queued
    Filling,
    /// Queue empty, jobs still running
    Draining,
    /// Nothing queued, nothing running
    Idle,
}

impl SchedulerPhase {
    fn of(queue: &JobQueue, registry: &ProcessRegistry) -> Self {
        match (queue.is_empty(), registry.is_empty()) {
            (false, _) => SchedulerPhase::Filling,
            (true, false) => SchedulerPhase::Draining,
            (true, true) => SchedulerPhase::Idle,
        }
    }
}

/// Everything a finished run produced.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub summary: RunSummary,
    /// In retirement order
    pub outcomes: Vec<JobOutcome>,
    /// Loop iterations that admitted at least one job
    pub admission_rounds: usize,
    /// Highest number of jobs observed running at once
    pub peak_running: usize,
}

/// Bounded-concurrency runner for a directory of solver jobs.
///
/// A single loop owns all state: each iteration retires finished jobs, tops
/// the running set back up to the configured parallelism in discovery order,
/// then sleeps until the next poll, a child exit or cancellation.
pub struct Scheduler {
    config: RunnerConfig,
    launcher: ProcessLauncher,
    reporter: Arc<dyn ProgressReporter>,
    cancel: CancellationToken,
}

impl Scheduler {
    /// # Errors
    ///
    /// Returns [`RunnerError::InvalidConfig`] if the configuration cannot be run.
    pub fn new(config: RunnerConfig, reporter: Arc<dyn ProgressReporter>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            launcher: ProcessLauncher::new(config.clone()),
            config,
            reporter,
            cancel: CancellationToken::new(),
        })
    }

    /// Abort the run when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Discover jobs in the work directory and run them all.
    ///
    /// # Errors
    ///
    /// Only discovery failures are returned; failing jobs are part of the report.
    pub async fn run(&self) -> Result<RunReport> {
        let jobs = discover_jobs(&self.config.work_dir, &self.config.input_suffix)?;
        if jobs.is_empty() {
            tracing::info!(
                dir = ?self.config.work_dir,
                suffix = %self.config.input_suffix,
                "No input files found"
            );
        }
        Ok(self.run_jobs(jobs).await)
    }

    /// Run an explicit list of jobs, admitted in the given order.
    pub async fn run_jobs(&self, jobs: Vec<JobDescriptor>) -> RunReport {
        let started = Instant::now();
        let started_at = Utc::now();

        let mut queue: JobQueue = jobs.into_iter().collect();
        let mut registry = ProcessRegistry::new(self.config.parallelism);
        let mut run = RunState {
            summary: RunSummary::new(queue.len()),
            outcomes: Vec::with_capacity(queue.len()),
            admission_rounds: 0,
            peak_running: 0,
        };

        self.reporter.report(&ProgressEvent::Discovered {
            total: run.summary.total,
            parallelism: self.config.parallelism,
        });

        let mut child_exits = ChildExits::new(self.config.wake_on_child_exit);
        let poll_interval = self.config.poll_interval();

        loop {
            if self.cancel.is_cancelled() {
                self.cancel_run(&mut queue, &mut registry, &mut run).await;
                break;
            }

            for outcome in registry.retire_finished() {
                self.finish(outcome, &mut run);
            }

            let mut admitted = 0;
            while registry.capacity_remaining() > 0 {
                let Some(job) = queue.pop_next() else {
                    break;
                };
                if self.admit(job, &mut registry, &mut run) {
                    admitted += 1;
                }
            }
            if admitted > 0 {
                run.admission_rounds += 1;
            }
            debug_assert!(registry.len() <= self.config.parallelism);

            let phase = SchedulerPhase::of(&queue, &registry);
            tracing::debug!(
                ?phase,
                running = registry.len(),
                queued = queue.len(),
                completed = run.summary.completed,
                "Scheduler tick"
            );
            if phase == SchedulerPhase::Idle {
                break;
            }

            tokio::select! {
                _ = self.cancel.cancelled() => {}
                _ = tokio::time::sleep(poll_interval) => {}
                _ = child_exits.recv() => {}
            }
        }

        run.summary.wall_time = started.elapsed();
        self.reporter.report(&ProgressEvent::AllDone {
            summary: run.summary.clone(),
        });
        tracing::info!(
            total = run.summary.total,
            succeeded = run.summary.succeeded,
            failed = run.summary.failed,
            cancelled = run.summary.cancelled,
            "Run finished"
        );

        let report = RunReport {
            run_id: Uuid::new_v4(),
            started_at,
            summary: run.summary,
            outcomes: run.outcomes,
            admission_rounds: run.admission_rounds,
            peak_running: run.peak_running,
        };
        if report.summary.total > 0 {
            self.write_manifest(&report);
        }
        report
    }

    /// Launch one job and hand it to the registry. Returns false if it failed
    /// to start, in which case it is already accounted as a launch failure.
    fn admit(&self, job: JobDescriptor, registry: &mut ProcessRegistry, run: &mut RunState) -> bool {
        let log_path = self.config.log_path(job.id.as_str());

        let admitted = self
            .launcher
            .launch(&job)
            .and_then(|running| registry.admit(running));

        match admitted {
            Ok(()) => {
                run.peak_running = run.peak_running.max(registry.len());
                tracing::info!(job_id = %job.id, running = registry.len(), "Job started");
                self.reporter.report(&ProgressEvent::Starting {
                    job_id: job.id,
                    running: registry.len(),
                });
                true
            }
            Err(e) => {
                tracing::warn!(job_id = %job.id, error = %e, "Job could not be started, skipping");
                let reason = match e {
                    RunnerError::Launch { reason, .. } => reason,
                    other => other.to_string(),
                };
                self.reporter.report(&ProgressEvent::LaunchFailed {
                    job_id: job.id.clone(),
                    reason: reason.clone(),
                });
                let outcome =
                    JobOutcome::not_started(job.id, JobStatus::LaunchFailed { reason }, log_path);
                self.finish(outcome, run);
                false
            }
        }
    }

    /// Account for a retired job and report it.
    fn finish(&self, mut outcome: JobOutcome, run: &mut RunState) {
        if outcome.status.is_success() {
            let result = self.config.result_path(outcome.job_id.as_str());
            if result.is_file() {
                outcome.result_artifact = Some(result);
            } else {
                tracing::debug!(job_id = %outcome.job_id, expected = ?result, "No result archive after success");
            }
        }

        tracing::info!(
            job_id = %outcome.job_id,
            status = %outcome.status,
            elapsed_ms = outcome.elapsed.as_millis() as u64,
            "Job finished"
        );

        run.summary.record(&outcome);
        self.reporter.report(&ProgressEvent::Outcome {
            outcome: outcome.clone(),
            completed: run.summary.completed,
            total: run.summary.total,
        });
        run.outcomes.push(outcome);
    }

    /// Kill whatever is running and account for everything still queued.
    async fn cancel_run(
        &self,
        queue: &mut JobQueue,
        registry: &mut ProcessRegistry,
        run: &mut RunState,
    ) {
        tracing::warn!(
            running = registry.len(),
            queued = queue.len(),
            "Run cancelled"
        );
        run.summary.interrupted = true;

        let terminated = registry.terminate_all().await;
        let terminated_count = terminated.len();
        for outcome in terminated {
            self.finish(outcome, run);
        }

        let discarded = queue.drain_pending();
        let discarded_count = discarded.len();
        for job in discarded {
            let log_path = self.config.log_path(job.id.as_str());
            self.finish(
                JobOutcome::not_started(job.id, JobStatus::Cancelled, log_path),
                run,
            );
        }

        self.reporter.report(&ProgressEvent::Cancelled {
            terminated: terminated_count,
            discarded: discarded_count,
        });
    }

    fn write_manifest(&self, report: &RunReport) {
        let Some(path) = self.config.manifest_path() else {
            return;
        };
        let manifest = RunManifest::new(&self.config, report);
        if let Err(e) = manifest.write(&path) {
            tracing::warn!(path = ?path, error = %e, "Failed to write run manifest");
        }
    }
}

struct RunState {
    summary: RunSummary,
    outcomes: Vec<JobOutcome>,
    admission_rounds: usize,
    peak_running: usize,
}

/// Wakes the loop when any child process exits.
///
/// SIGCHLD only shortens the wait; the poll interval still bounds it when
/// the signal is unavailable or coalesced.
struct ChildExits {
    signal: Option<Signal>,
}

impl ChildExits {
    fn new(enabled: bool) -> Self {
        if !enabled {
            return Self { signal: None };
        }
        match signal(SignalKind::child()) {
            Ok(signal) => Self {
                signal: Some(signal),
            },
            Err(e) => {
                tracing::warn!(error = %e, "Cannot watch child exits, falling back to polling only");
                Self { signal: None }
            }
        }
    }

    async fn recv(&mut self) {
        let received = match self.signal.as_mut() {
            Some(signal) => signal.recv().await,
            None => None,
        };
        if received.is_none() {
            self.signal = None;
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SolverConfig;
    use crate::report::RecordingReporter;
    use crate::scheduler::JobId;
    use tempfile::TempDir;

    fn sh_config(dir: &TempDir, parallelism: usize) -> RunnerConfig {
        RunnerConfig::new(dir.path(), parallelism)
            .with_solver(SolverConfig::new("sh", vec!["{input}".to_string()]))
            .with_poll_interval_ms(50)
    }

    #[test]
    fn phase_follows_queue_and_registry() {
        let mut queue = JobQueue::new();
        let registry = ProcessRegistry::new(1);
        assert_eq!(SchedulerPhase::of(&queue, &registry), SchedulerPhase::Idle);

        queue.add_job(JobDescriptor::new("a", "a.inp"));
        assert_eq!(SchedulerPhase::of(&queue, &registry), SchedulerPhase::Filling);
    }

    #[test]
    fn new_rejects_invalid_config() {
        let dir = TempDir::new().unwrap();
        let reporter = Arc::new(RecordingReporter::new());
        let result = Scheduler::new(sh_config(&dir, 0), reporter);
        assert!(matches!(result, Err(RunnerError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn empty_job_list_finishes_immediately() {
        let dir = TempDir::new().unwrap();
        let reporter = Arc::new(RecordingReporter::new());
        let scheduler = Scheduler::new(sh_config(&dir, 2), reporter.clone()).unwrap();

        let report = scheduler.run_jobs(Vec::new()).await;

        assert_eq!(report.summary.total, 0);
        assert_eq!(report.admission_rounds, 0);
        assert!(report.outcomes.is_empty());
        let events = reporter.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], ProgressEvent::Discovered { total: 0, .. }));
        assert!(matches!(events[1], ProgressEvent::AllDone { .. }));
        // Nothing ran, so nothing is written
        assert!(!dir.path().join("run_manifest.json").exists());
    }

    #[tokio::test]
    async fn cancelled_before_start_discards_everything() {
        let dir = TempDir::new().unwrap();
        for id in ["a", "b"] {
            std::fs::write(dir.path().join(format!("{}.inp", id)), "exit 0\n").unwrap();
        }
        let reporter = Arc::new(RecordingReporter::new());
        let token = CancellationToken::new();
        token.cancel();
        let scheduler = Scheduler::new(sh_config(&dir, 2), reporter.clone())
            .unwrap()
            .with_cancellation(token);

        let report = scheduler
            .run_jobs(vec![
                JobDescriptor::new("a", "a.inp"),
                JobDescriptor::new("b", "b.inp"),
            ])
            .await;

        assert!(report.summary.interrupted);
        assert_eq!(report.summary.cancelled, 2);
        assert!(report.summary.is_complete());
        assert!(reporter.started_ids().is_empty());
        let ids: Vec<JobId> = report.outcomes.iter().map(|o| o.job_id.clone()).collect();
        assert_eq!(ids, vec![JobId::from("a"), JobId::from("b")]);
    }
}
