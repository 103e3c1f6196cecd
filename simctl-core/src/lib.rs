//! # simctl-core
//!
//! Core library for simctl - a launcher and supervisor for long-running
//! simulation jobs.
//!
//! This library provides:
//! - Range validation: requested dates and interval to 1-based engine steps
//! - Job supervision: spawn a process, drain its output in the background,
//!   answer status queries from any thread
//! - A registry of supervised jobs keyed by scenario id
//! - A SQLite status source of record that jobs report into
//! - Configuration management and logging infrastructure
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use simctl_core::{JobId, JobRegistry, LaunchCommand, StatusDatabase, TimeRange};
//!
//! let range = TimeRange::from_profile_path("input/demand.csv".as_ref()).expect("bad profile");
//! let plan = simctl_core::validate_range(&range, "2016-01-02", "2016-01-02", 24).expect("invalid range");
//!
//! let status = StatusDatabase::open_in_memory().expect("failed to open status db");
//! status.migrate().expect("failed to run migrations");
//!
//! let registry = JobRegistry::new(Arc::new(status));
//! let command = LaunchCommand::new("engine")
//!     .args(["--start-index", "{start_index}", "--n-interval", "{step_count}"])
//!     .with_plan(JobId(1234), &plan);
//! registry.launch(JobId(1234), &command).expect("launch failed");
//!
//! let snapshot = registry.get(JobId(1234)).expect("job not tracked");
//! println!("{} {:?}", snapshot.status, snapshot.output);
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use error::{Error, Result, ValidationError};
pub use launch::LaunchCommand;
pub use registry::JobRegistry;
pub use status::{StatusDatabase, StatusSource};
pub use supervisor::{JobSupervisor, SupervisorOptions};
pub use types::*;
pub use validate::{validate_range, RangeValidator};

// Public modules
pub mod buffer;
pub mod config;
pub mod error;
pub mod format;
pub mod launch;
pub mod listener;
pub mod logging;
pub mod profile;
pub mod registry;
pub mod status;
pub mod supervisor;
pub mod types;
pub mod validate;
