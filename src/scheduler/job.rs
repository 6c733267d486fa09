use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Job identifier: the input file's base name without its suffix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// One unit of work found in the work directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDescriptor {
    pub id: JobId,
    /// Input file name relative to the work directory
    pub input_file: String,
}

impl JobDescriptor {
    pub fn new(id: impl Into<String>, input_file: impl Into<String>) -> Self {
        Self {
            id: JobId::new(id),
            input_file: input_file.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobStatus {
    Succeeded,
    /// Non-zero exit or killed by a signal
    Failed {
        exit_code: Option<i32>,
        signal: Option<i32>,
    },
    /// The process or its log file could not be created
    LaunchFailed { reason: String },
    /// Terminated or never started because the run was cancelled
    Cancelled,
}

impl JobStatus {
    pub fn from_exit_status(status: ExitStatus) -> Self {
        if status.success() {
            return JobStatus::Succeeded;
        }
        JobStatus::Failed {
            exit_code: status.code(),
            signal: exit_signal(&status),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, JobStatus::Succeeded)
    }

    /// Failed runs and failed launches both count against the batch.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            JobStatus::Failed { .. } | JobStatus::LaunchFailed { .. }
        )
    }
}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<i32> {
    None
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Succeeded => write!(f, "succeeded"),
            JobStatus::Failed {
                exit_code: Some(code),
                ..
            } => write!(f, "failed (exit code {})", code),
            JobStatus::Failed {
                signal: Some(sig), ..
            } => write!(f, "failed (signal {})", sig),
            JobStatus::Failed { .. } => write!(f, "failed"),
            JobStatus::LaunchFailed { reason } => write!(f, "launch failed: {}", reason),
            JobStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Final record of a retired job. Produced exactly once per job.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub job_id: JobId,
    pub status: JobStatus,
    pub elapsed: Duration,
    pub started_at: Option<DateTime<Utc>>,
    pub log_path: PathBuf,
    /// Result archive left by a successful solver run, if present
    pub result_artifact: Option<PathBuf>,
}

impl JobOutcome {
    /// Outcome for a job that never got a process.
    pub fn not_started(job_id: JobId, status: JobStatus, log_path: PathBuf) -> Self {
        Self {
            job_id,
            status,
            elapsed: Duration::ZERO,
            started_at: None,
            log_path,
            result_artifact: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    fn raw_status(raw: i32) -> ExitStatus {
        use std::os::unix::process::ExitStatusExt;
        ExitStatus::from_raw(raw)
    }

    #[test]
    fn job_ids_order_lexicographically() {
        let mut ids = vec![JobId::from("b"), JobId::from("a10"), JobId::from("a2")];
        ids.sort();
        assert_eq!(ids, vec![JobId::from("a10"), JobId::from("a2"), JobId::from("b")]);
    }

    #[cfg(unix)]
    #[test]
    fn status_from_exit_codes() {
        assert_eq!(JobStatus::from_exit_status(raw_status(0)), JobStatus::Succeeded);
        // wait(2) encoding: exit code in the high byte
        assert_eq!(
            JobStatus::from_exit_status(raw_status(1 << 8)),
            JobStatus::Failed {
                exit_code: Some(1),
                signal: None
            }
        );
        // SIGKILL
        assert_eq!(
            JobStatus::from_exit_status(raw_status(9)),
            JobStatus::Failed {
                exit_code: None,
                signal: Some(9)
            }
        );
    }

    #[test]
    fn launch_failure_counts_as_failure() {
        let status = JobStatus::LaunchFailed {
            reason: "no such file".to_string(),
        };
        assert!(status.is_failure());
        assert!(!status.is_success());
        assert!(!JobStatus::Cancelled.is_failure());
    }

    #[test]
    fn status_display() {
        assert_eq!(JobStatus::Succeeded.to_string(), "succeeded");
        assert_eq!(
            JobStatus::Failed {
                exit_code: Some(3),
                signal: None
            }
            .to_string(),
            "failed (exit code 3)"
        );
        assert_eq!(
            JobStatus::Failed {
                exit_code: None,
                signal: Some(15)
            }
            .to_string(),
            "failed (signal 15)"
        );
        assert_eq!(JobStatus::Cancelled.to_string(), "cancelled");
    }

    #[test]
    fn status_serializes_with_tag() {
        let json = serde_json::to_value(JobStatus::Failed {
            exit_code: Some(2),
            signal: None,
        })
        .unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["exit_code"], 2);
    }
}
