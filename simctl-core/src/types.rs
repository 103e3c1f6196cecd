//! Core domain types for simctl
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Job** | One invocation of the external simulation engine, keyed by its scenario id |
//! | **TimeRange** | Span and sampling cadence of the input data available to a scenario |
//! | **Step index** | 1-based position of a timestamp among the samples of a TimeRange |
//! | **Interval** | Number of steps the engine groups into one unit of work |
//! | **ValidatedPlan** | Start index, step count and interval handed to the engine |
//! | **Status source of record** | External table the job itself writes its lifecycle stage to |
//!
//! Step indices are 1-based because the engine counts from 1.

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

// ============================================
// Jobs
// ============================================

/// Unique identifier for a job (the scenario id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for JobId {
    fn from(id: u64) -> Self {
        JobId(id)
    }
}

/// Lifecycle stage of a job.
///
/// `Finished`, `Failed` and `Extracted` are written by the job itself to the
/// status source of record. `Unknown` covers any status string we do not
/// recognise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Process handle not yet confirmed started
    Pending,
    /// Process started and not reported done
    Running,
    /// Job reported successful completion
    Finished,
    /// Job reported failure
    Failed,
    /// Results were extracted after completion
    Extracted,
    /// Status string not recognised
    Unknown,
}

impl JobStatus {
    /// Parse a status string as written by a job. Never fails.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => JobStatus::Pending,
            "running" => JobStatus::Running,
            "finished" => JobStatus::Finished,
            "failed" => JobStatus::Failed,
            "extracted" => JobStatus::Extracted,
            _ => JobStatus::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Finished => "finished",
            JobStatus::Failed => "failed",
            JobStatus::Extracted => "extracted",
            JobStatus::Unknown => "unknown",
        }
    }

    /// Whether the job has reported that it is done.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Finished | JobStatus::Failed | JobStatus::Extracted
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a supervised job.
///
/// Holds no process handle, so it can be serialized and sent anywhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    /// Job ID
    pub id: JobId,
    /// Last-known status from the status source of record
    pub status: JobStatus,
    /// OS process id of the launched job
    pub pid: u32,
    /// Command line, for display
    pub command: String,
    /// When the process was started
    pub started_at: DateTime<Utc>,
    /// Retained stdout lines, oldest first
    pub output: Vec<String>,
    /// Retained stderr lines, oldest first
    pub errors: Vec<String>,
    /// Stdout lines discarded by the retention cap
    pub dropped_output: u64,
    /// Stderr lines discarded by the retention cap
    pub dropped_errors: u64,
    /// Both output streams reached end of stream
    pub streams_closed: bool,
    /// Exit code, once the process has been observed to exit
    pub exit_code: Option<i32>,
}

impl JobSnapshot {
    /// Whether the process has been observed to exit, either through an
    /// exit code or through both output streams closing.
    pub fn has_exited(&self) -> bool {
        self.exit_code.is_some() || self.streams_closed
    }
}

// ============================================
// Time ranges and plans
// ============================================

/// Span and sampling cadence of the input data for one scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    start: NaiveDateTime,
    end: NaiveDateTime,
    frequency: Duration,
}

impl TimeRange {
    /// Create a time range; `start` must not be after `end` and `frequency`
    /// must be at least one millisecond.
    pub fn new(
        start: NaiveDateTime,
        end: NaiveDateTime,
        frequency: Duration,
    ) -> std::result::Result<Self, ValidationError> {
        if start > end {
            return Err(ValidationError::InvalidTimeRange(format!(
                "start {start} is after end {end}"
            )));
        }
        // Step arithmetic works in whole milliseconds.
        if frequency.num_milliseconds() < 1 {
            return Err(ValidationError::InvalidTimeRange(format!(
                "frequency must be at least 1ms, got {}",
                frequency
            )));
        }
        Ok(Self {
            start,
            end,
            frequency,
        })
    }

    pub fn start(&self) -> NaiveDateTime {
        self.start
    }

    pub fn end(&self) -> NaiveDateTime {
        self.end
    }

    pub fn frequency(&self) -> Duration {
        self.frequency
    }

    /// Number of samples that fit in one day, at least 1.
    pub fn steps_per_day(&self) -> i64 {
        (Duration::days(1).num_milliseconds() / self.frequency.num_milliseconds()).max(1)
    }

    /// Whether `ts` lies within `[start, end]`.
    pub fn contains(&self, ts: NaiveDateTime) -> bool {
        ts >= self.start && ts <= self.end
    }

    /// 1-based position of `ts` among the samples, or `None` when `ts` is not
    /// on a sample boundary or lies before the start.
    pub fn step_index(&self, ts: NaiveDateTime) -> Option<u64> {
        let offset = (ts - self.start).num_milliseconds();
        let step = self.frequency.num_milliseconds();
        if offset < 0 || offset % step != 0 {
            return None;
        }
        Some((offset / step) as u64 + 1)
    }
}

/// Discrete step selection the engine expects, produced by
/// [`crate::validate::validate_range`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatedPlan {
    /// 1-based index of the first step
    pub start_index: u64,
    /// Number of intervals to run
    pub step_count: u64,
    /// Steps per interval
    pub interval: u32,
}

impl ValidatedPlan {
    /// Total number of steps covered by the plan.
    pub fn total_steps(&self) -> u64 {
        self.step_count * u64::from(self.interval)
    }

    /// 1-based index of the last step.
    pub fn end_index(&self) -> u64 {
        self.start_index + self.total_steps() - 1
    }
}
