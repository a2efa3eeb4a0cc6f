//! Runtime glue: configuration, periodic scheduling, progress tracking,
//! telemetry, fatal-error propagation, and runner orchestration.

pub mod config;
pub mod fatal;
pub mod progress;
pub mod runner;
pub mod scheduler;
pub mod telemetry;
