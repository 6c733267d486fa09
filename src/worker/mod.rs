//! Process-level execution of solver jobs.
//!
//! - [`ProcessLauncher`]: spawns one solver per job with its output captured
//!   in `<job>.log` inside the work directory
//!
//! The launcher never waits on a process; the scheduler's registry owns the
//! child handle and log from the moment the launch returns.

pub mod launcher;

pub use launcher::{LogCapture, ProcessLauncher};
