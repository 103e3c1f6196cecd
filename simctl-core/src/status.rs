//! Status source of record
//!
//! Jobs write their own lifecycle stage (`running`, `finished`, `failed`,
//! `extracted`, ...) to an external table keyed by job id. Supervisors only
//! ever read it: status is whatever the job last reported, which may lag if a
//! job dies without reporting.
//!
//! [`StatusDatabase`] is the SQLite-backed table, migrated via
//! `PRAGMA user_version`.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;
use crate::types::{JobId, JobStatus};

/// Authoritative per-job status, written by the jobs themselves.
pub trait StatusSource: Send + Sync {
    /// Current recorded status, or `None` if the job has not reported yet.
    fn status(&self, id: JobId) -> Result<Option<JobStatus>>;
}

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

const MIGRATIONS: &[&str] = &[
    // Version 1: status table
    r#"
    CREATE TABLE IF NOT EXISTS job_status (
        id          INTEGER PRIMARY KEY,
        status      TEXT NOT NULL,
        updated_at  DATETIME NOT NULL
    );
    "#,
];

/// Run all pending migrations.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    let current_version: i32 = conn
        .query_row("PRAGMA user_version", [], |r| r.get(0))
        .unwrap_or(0);

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i32;
        if version > current_version {
            tracing::info!(version, "Running status migration");
            conn.execute_batch(migration)?;
            conn.execute(&format!("PRAGMA user_version = {}", version), [])?;
        }
    }

    Ok(())
}

/// SQLite table of job statuses.
pub struct StatusDatabase {
    conn: Mutex<Connection>,
}

impl StatusDatabase {
    /// Open or create a status database at the given path
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // Jobs and the supervisor touch this file from separate processes.
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run migrations on this database
    pub fn migrate(&self) -> Result<()> {
        run_migrations(&self.connection())
    }

    fn connection(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record the status of a job. Called by the job itself, never by a
    /// supervisor.
    pub fn set_status(&self, id: JobId, status: &str) -> Result<()> {
        self.connection().execute(
            r#"
            INSERT INTO job_status (id, status, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                updated_at = excluded.updated_at
            "#,
            params![id.0 as i64, status.trim(), Utc::now().to_rfc3339()],
        )?;
        tracing::debug!(job_id = %id, status, "Recorded job status");
        Ok(())
    }

    /// Raw status string as written by the job.
    pub fn raw_status(&self, id: JobId) -> Result<Option<String>> {
        let status = self
            .connection()
            .query_row(
                "SELECT status FROM job_status WHERE id = ?1",
                params![id.0 as i64],
                |row| row.get(0),
            )
            .optional()?;
        Ok(status)
    }

    /// Delete the record for a job. Returns whether one existed.
    pub fn remove(&self, id: JobId) -> Result<bool> {
        let n = self
            .connection()
            .execute("DELETE FROM job_status WHERE id = ?1", params![id.0 as i64])?;
        Ok(n > 0)
    }
}

impl StatusSource for StatusDatabase {
    fn status(&self, id: JobId) -> Result<Option<JobStatus>> {
        Ok(self.raw_status(id)?.as_deref().map(JobStatus::parse))
    }
}
