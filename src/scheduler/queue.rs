use std::collections::{HashSet, VecDeque};

use crate::scheduler::job::{JobDescriptor, JobId};

/// FIFO of jobs that have been discovered but not yet admitted.
#[derive(Debug, Default)]
pub struct JobQueue {
    pending: VecDeque<JobDescriptor>,
    /// Every id ever enqueued; an id is only accepted once per run
    seen: HashSet<JobId>,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a job at the back. Returns false if the id was already enqueued.
    pub fn add_job(&mut self, job: JobDescriptor) -> bool {
        if !self.seen.insert(job.id.clone()) {
            return false;
        }
        self.pending.push_back(job);
        true
    }

    /// Next job in admission order
    pub fn pop_next(&mut self) -> Option<JobDescriptor> {
        self.pending.pop_front()
    }

    /// Remove every job still waiting, in admission order
    pub fn drain_pending(&mut self) -> Vec<JobDescriptor> {
        self.pending.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl FromIterator<JobDescriptor> for JobQueue {
    fn from_iter<I: IntoIterator<Item = JobDescriptor>>(iter: I) -> Self {
        let mut queue = JobQueue::new();
        for job in iter {
            if !queue.add_job(job.clone()) {
                tracing::warn!(job_id = %job.id, "Duplicate job id, ignored");
            }
        }
        queue
    }
}
