pub mod discovery;
pub mod job;
pub mod queue;
pub mod registry;
pub mod runner;
pub mod summary;

pub use discovery::discover_jobs;
pub use job::{JobDescriptor, JobId, JobOutcome, JobStatus};
pub use queue::JobQueue;
pub use registry::{ProcessRegistry, RunningJob};
pub use runner::{RunReport, Scheduler, SchedulerPhase};
pub use summary::RunSummary;
