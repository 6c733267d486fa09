use std::path::PathBuf;

use thiserror::Error;

use crate::scheduler::JobId;

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Work directory {dir:?} could not be read: {source}")]
    Discovery {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to launch job {job}: {reason}")]
    Launch { job: JobId, reason: String },

    #[error("Job already running: {0}")]
    AlreadyRunning(JobId),

    #[error("Registry at capacity ({0} jobs running)")]
    AtCapacity(usize),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to encode run manifest: {0}")]
    Manifest(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RunnerError>;
