//! Error types for simctl-core

use thiserror::Error;

use crate::types::JobId;

/// Failures produced while turning a requested date range into a plan.
///
/// All of these are detected before anything is launched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The string is not shaped like `YYYY-MM-DD[ HH[:MM[:SS]]]`
    #[error("invalid date format '{0}': expected YYYY-MM-DD[ HH[:MM[:SS]]]")]
    InvalidDateFormat(String),

    /// Well-formed but names an impossible calendar date or time
    #[error("invalid date value '{0}'")]
    InvalidDateValue(String),

    /// Outside the span covered by the input data
    #[error("date {date} is outside the available range [{start}, {end}]")]
    DateOutOfRange {
        date: String,
        start: String,
        end: String,
    },

    /// Start comes after end
    #[error("the start date ({start}) cannot be after the end date ({end})")]
    InvalidDateArgument { start: String, end: String },

    /// Not aligned with the sampling frequency of the input data
    #[error("timestamp {0} does not fall on a sample boundary")]
    TimestampNotOnGrid(String),

    /// The requested step range is not a multiple of the interval
    #[error("interval {interval} does not evenly divide the {steps} requested steps")]
    IntervalDoesNotDivide { interval: u32, steps: u64 },

    /// Interval of zero
    #[error("interval must be a positive integer")]
    InvalidInterval,

    /// The time range itself is malformed
    #[error("invalid time range: {0}")]
    InvalidTimeRange(String),
}

/// Main error type for the simctl-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Range validation error
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The external process could not be started
    #[error("failed to launch '{program}': {source}")]
    LaunchFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// A live job is already tracked under this id
    #[error("job {0} is already running")]
    JobAlreadyRunning(JobId),

    /// No job tracked under this id
    #[error("job not found: {0}")]
    JobNotFound(JobId),

    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Input profile could not be turned into a time range
    #[error("profile error: {0}")]
    Profile(String),
}

/// Result type alias for simctl-core
pub type Result<T> = std::result::Result<T, Error>;
