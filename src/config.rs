use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, RunnerError};

/// Placeholder in argument templates replaced by the job identifier.
pub const JOB_PLACEHOLDER: &str = "{job}";
/// Placeholder in argument templates replaced by the input file name.
pub const INPUT_PLACEHOLDER: &str = "{input}";

/// How a single solver process is invoked.
///
/// Environment variables are handed to each child command explicitly; the
/// runner never mutates its own environment.
#[derive(Debug, Clone)]
pub struct SolverConfig {
    /// Executable to run (looked up on PATH)
    pub program: String,
    /// Argument templates, see [`JOB_PLACEHOLDER`] and [`INPUT_PLACEHOLDER`]
    pub args: Vec<String>,
    /// Extra environment for every child
    pub env: Vec<(String, String)>,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            program: "abaqus".to_string(),
            args: vec![format!("job={}", JOB_PLACEHOLDER), "interactive".to_string()],
            // Abaqus' bundled Python chokes on ISO-8859-1 locales
            env: vec![
                ("LANG".to_string(), "en_US.UTF-8".to_string()),
                ("LC_ALL".to_string(), "en_US.UTF-8".to_string()),
            ],
        }
    }
}

impl SolverConfig {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            env: Vec::new(),
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Expand the argument templates for one job.
    pub fn expand_args(&self, job_id: &str, input_file: &str) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| expand_template(arg, job_id, input_file))
            .collect()
    }
}

/// Single left-to-right pass: substituted text is never scanned again.
fn expand_template(template: &str, job_id: &str, input_file: &str) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        rest = &rest[start..];
        if let Some(tail) = rest.strip_prefix(JOB_PLACEHOLDER) {
            out.push_str(job_id);
            rest = tail;
        } else if let Some(tail) = rest.strip_prefix(INPUT_PLACEHOLDER) {
            out.push_str(input_file);
            rest = tail;
        } else {
            out.push('{');
            rest = &rest[1..];
        }
    }
    out.push_str(rest);
    out
}

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Directory holding the input files; also the cwd of every solver
    pub work_dir: PathBuf,
    /// Maximum number of solver processes alive at once
    pub parallelism: usize,
    /// Upper bound between two completion scans
    pub poll_interval_ms: u64,
    /// Also rescan as soon as any child exits (Unix only)
    pub wake_on_child_exit: bool,
    /// Suffix identifying input files, including the dot
    pub input_suffix: String,
    /// Suffix of per-job log files, including the dot
    pub log_suffix: String,
    /// Suffix of the result archive a successful job leaves behind
    pub result_suffix: String,
    /// File name of the JSON manifest written after the run, if any
    pub manifest_file: Option<String>,
    pub solver: SolverConfig,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("simulations"),
            parallelism: 8,
            poll_interval_ms: 15_000,
            wake_on_child_exit: true,
            input_suffix: ".inp".to_string(),
            log_suffix: ".log".to_string(),
            result_suffix: ".odb".to_string(),
            manifest_file: Some("run_manifest.json".to_string()),
            solver: SolverConfig::default(),
        }
    }
}

impl RunnerConfig {
    pub fn new(work_dir: impl Into<PathBuf>, parallelism: usize) -> Self {
        Self {
            work_dir: work_dir.into(),
            parallelism,
            ..Default::default()
        }
    }

    pub fn with_solver(mut self, solver: SolverConfig) -> Self {
        self.solver = solver;
        self
    }

    pub fn with_poll_interval_ms(mut self, poll_interval_ms: u64) -> Self {
        self.poll_interval_ms = poll_interval_ms;
        self
    }

    pub fn with_manifest(mut self, manifest_file: Option<String>) -> Self {
        self.manifest_file = manifest_file;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn log_path(&self, job_id: &str) -> PathBuf {
        self.artifact_path(job_id, &self.log_suffix)
    }

    pub fn result_path(&self, job_id: &str) -> PathBuf {
        self.artifact_path(job_id, &self.result_suffix)
    }

    pub fn manifest_path(&self) -> Option<PathBuf> {
        self.manifest_file
            .as_ref()
            .map(|name| self.work_dir.join(name))
    }

    fn artifact_path(&self, job_id: &str, suffix: &str) -> PathBuf {
        self.work_dir.join(format!("{}{}", job_id, suffix))
    }

    /// Reject settings the scheduler cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.parallelism == 0 {
            return Err(RunnerError::InvalidConfig(
                "parallelism must be at least 1".to_string(),
            ));
        }
        // A zero interval turns the wait into a busy loop over try_wait
        if self.poll_interval_ms == 0 {
            return Err(RunnerError::InvalidConfig(
                "poll interval must be at least 1 ms".to_string(),
            ));
        }
        if self.solver.program.trim().is_empty() {
            return Err(RunnerError::InvalidConfig(
                "solver program must not be empty".to_string(),
            ));
        }
        for (name, suffix) in [
            ("input", &self.input_suffix),
            ("log", &self.log_suffix),
            ("result", &self.result_suffix),
        ] {
            if suffix.is_empty() {
                return Err(RunnerError::InvalidConfig(format!(
                    "{} suffix must not be empty",
                    name
                )));
            }
        }
        // A log named like an input would be rediscovered as a job next run
        if self.log_suffix == self.input_suffix {
            return Err(RunnerError::InvalidConfig(
                "log suffix must differ from input suffix".to_string(),
            ));
        }
        Ok(())
    }
}

/// Display helper for paths in progress lines.
pub fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
