//! JSON record of a finished run.
//!
//! Result post-processing reads this file to map result archives back to
//! job ids without re-deriving the naming convention.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::config::{file_name_of, RunnerConfig};
use crate::error::Result;
use crate::scheduler::{JobId, JobOutcome, JobStatus, RunReport, RunSummary};

#[derive(Debug, Clone, Serialize)]
pub struct ManifestEntry {
    pub job_id: JobId,
    #[serde(flatten)]
    pub status: JobStatus,
    pub duration_secs: f64,
    pub started_at: Option<DateTime<Utc>>,
    pub log_file: String,
    pub result_file: Option<String>,
}

impl From<&JobOutcome> for ManifestEntry {
    fn from(outcome: &JobOutcome) -> Self {
        Self {
            job_id: outcome.job_id.clone(),
            status: outcome.status.clone(),
            duration_secs: outcome.elapsed.as_secs_f64(),
            started_at: outcome.started_at,
            log_file: file_name_of(&outcome.log_path),
            result_file: outcome.result_artifact.as_deref().map(file_name_of),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunManifest {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub work_dir: String,
    pub parallelism: usize,
    pub program: String,
    pub summary: RunSummary,
    /// Sorted by job id
    pub jobs: Vec<ManifestEntry>,
}

impl RunManifest {
    pub fn new(config: &RunnerConfig, report: &RunReport) -> Self {
        let mut jobs: Vec<ManifestEntry> =
            report.outcomes.iter().map(ManifestEntry::from).collect();
        jobs.sort_by(|a, b| a.job_id.cmp(&b.job_id));

        Self {
            run_id: report.run_id,
            started_at: report.started_at,
            work_dir: config.work_dir.display().to_string(),
            parallelism: config.parallelism,
            program: config.solver.program.clone(),
            summary: report.summary.clone(),
            jobs,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write via a temporary file so readers never see a partial manifest.
    pub fn write(&self, path: &Path) -> Result<()> {
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, self.to_json()?)?;
        std::fs::rename(&tmp, path)?;
        tracing::info!(path = ?path, jobs = self.jobs.len(), "Run manifest written");
        Ok(())
    }
}
