pub mod config;
pub mod error;
pub mod manifest;
pub mod report;
pub mod scheduler;
pub mod shutdown;
pub mod worker;
