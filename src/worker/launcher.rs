use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;

use crate::config::RunnerConfig;
use crate::error::{Result, RunnerError};
use crate::scheduler::registry::RunningJob;
use crate::scheduler::JobDescriptor;

/// Log file receiving a job's combined stdout and stderr.
///
/// The runner keeps its own handle open for the lifetime of the job and
/// releases it when the job is retired.
#[derive(Debug)]
pub struct LogCapture {
    path: PathBuf,
    file: File,
}

impl LogCapture {
    /// Create (or truncate) the log at `path`.
    pub fn create(path: PathBuf) -> std::io::Result<Self> {
        let file = File::create(&path)?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Handles for the child's stdout and stderr, both pointing at the log.
    fn child_stdio(&self) -> std::io::Result<(Stdio, Stdio)> {
        let stdout = self.file.try_clone()?;
        let stderr = self.file.try_clone()?;
        Ok((Stdio::from(stdout), Stdio::from(stderr)))
    }

    /// Close the runner's handle. Writes already went straight to the file,
    /// so there is nothing to flush.
    pub fn release(self) -> PathBuf {
        drop(self.file);
        self.path
    }
}

/// Starts one solver process per job.
///
/// Every process runs with the work directory as its cwd, so whatever the
/// solver writes (result archives, scratch files) lands next to its input.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    config: RunnerConfig,
}

impl ProcessLauncher {
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    /// Spawn the solver for `job` and return immediately.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::Launch`] if the log file cannot be created or the
    /// solver binary cannot be started. No process is left behind in either case.
    pub fn launch(&self, job: &JobDescriptor) -> Result<RunningJob> {
        let log_path = self.config.log_path(job.id.as_str());
        let launch_error = |reason: String| RunnerError::Launch {
            job: job.id.clone(),
            reason,
        };

        let mut log = LogCapture::create(log_path.clone()).map_err(|e| {
            launch_error(format!("cannot create log {}: {}", log_path.display(), e))
        })?;
        let (stdout, stderr) = log
            .child_stdio()
            .map_err(|e| launch_error(format!("cannot attach log: {}", e)))?;

        let solver = &self.config.solver;
        let args = solver.expand_args(job.id.as_str(), &job.input_file);

        tracing::debug!(
            job_id = %job.id,
            program = %solver.program,
            args = ?args,
            cwd = ?self.config.work_dir,
            "Spawning solver"
        );

        let spawned = Command::new(&solver.program)
            .args(&args)
            .envs(solver.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .current_dir(&self.config.work_dir)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            // Own process group, so cancellation reaches whatever the solver forks
            .process_group(0)
            .kill_on_drop(true)
            .spawn();

        match spawned {
            Ok(child) => Ok(RunningJob::new(job.id.clone(), child, log)),
            Err(e) => {
                // Leave the reason where the operator will look for it
                if let Err(write_err) =
                    writeln!(log.file, "failed to start '{}': {}", solver.program, e)
                {
                    tracing::debug!(job_id = %job.id, error = %write_err, "Could not record launch failure in log");
                }
                Err(launch_error(format!("cannot start '{}': {}", solver.program, e)))
            }
        }
    }
}
