use std::path::Path;

use crate::error::{Result, RunnerError};
use crate::scheduler::job::JobDescriptor;

/// Scan `work_dir` for input files ending in `suffix`.
///
/// Jobs come back sorted by id so reruns admit them in the same order. An
/// existing directory without matches yields an empty list, not an error.
pub fn discover_jobs(work_dir: &Path, suffix: &str) -> Result<Vec<JobDescriptor>> {
    let discovery_error = |source| RunnerError::Discovery {
        dir: work_dir.to_path_buf(),
        source,
    };

    let entries = std::fs::read_dir(work_dir).map_err(discovery_error)?;

    let mut jobs = Vec::new();
    for entry in entries {
        let entry = entry.map_err(discovery_error)?;

        // Follows symlinks, so linked input files are picked up
        match entry.path().metadata() {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => continue,
            Err(e) => {
                tracing::debug!(path = ?entry.path(), error = %e, "Skipping unreadable entry");
                continue;
            }
        }

        let Some(file_name) = entry.file_name().to_str().map(str::to_owned) else {
            tracing::warn!(path = ?entry.path(), "Skipping non UTF-8 file name");
            continue;
        };

        match file_name.strip_suffix(suffix) {
            Some(id) if !id.is_empty() => {
                jobs.push(JobDescriptor::new(id, file_name.clone()));
            }
            _ => {}
        }
    }

    jobs.sort_by(|a, b| a.id.cmp(&b.id));

    tracing::debug!(dir = ?work_dir, count = jobs.len(), "Job discovery finished");
    Ok(jobs)
}
