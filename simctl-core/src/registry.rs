//! Registry of supervised jobs.
//!
//! The map itself sits behind one coarse lock that is only held long enough to
//! insert, remove or clone out an entry. Refreshing a job happens outside it,
//! inside that job's own supervisor lock, so polling one job never blocks
//! another.
//!
//! Launch-type operations (`launch`, `add`, `evict`) are additionally
//! serialized by a gate so that the "is the previous job still running?" check
//! and the replacement cannot interleave with another launch of the same id.
//!
//! Entries are never expired automatically; callers evict them explicitly.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::config::JobsConfig;
use crate::error::{Error, Result};
use crate::launch::LaunchCommand;
use crate::status::StatusSource;
use crate::supervisor::{JobSupervisor, SupervisorOptions};
use crate::types::{JobId, JobSnapshot};

/// Concurrent map from job id to its supervisor.
pub struct JobRegistry {
    jobs: RwLock<BTreeMap<JobId, Arc<JobSupervisor>>>,
    launch_gate: Mutex<()>,
    source: Arc<dyn StatusSource>,
    options: SupervisorOptions,
    reject_active_relaunch: bool,
}

impl JobRegistry {
    /// Create a registry with default job settings.
    pub fn new(source: Arc<dyn StatusSource>) -> Self {
        Self::from_config(source, &JobsConfig::default())
    }

    pub fn from_config(source: Arc<dyn StatusSource>, config: &JobsConfig) -> Self {
        Self {
            jobs: RwLock::new(BTreeMap::new()),
            launch_gate: Mutex::new(()),
            source,
            options: SupervisorOptions::from(config),
            reject_active_relaunch: config.reject_active_relaunch,
        }
    }

    /// Start `command` as job `id` and track it.
    ///
    /// The active-job check happens before anything is spawned, so a rejected
    /// launch starts no process.
    pub fn launch(&self, id: JobId, command: &LaunchCommand) -> Result<JobSnapshot> {
        let _gate = self.gate();
        self.check_replaceable(id)?;

        let supervisor = Arc::new(JobSupervisor::spawn(
            id,
            command,
            self.source.clone(),
            self.options,
        )?);
        let snapshot = supervisor.snapshot();
        self.insert(supervisor);
        Ok(snapshot)
    }

    /// Track an already-started supervisor under its id.
    ///
    /// If a live job is already tracked under that id the newcomer is
    /// terminated and [`Error::JobAlreadyRunning`] is returned: nothing would
    /// be left to track it otherwise.
    pub fn add(&self, supervisor: JobSupervisor) -> Result<()> {
        let _gate = self.gate();
        let id = supervisor.id();
        if let Err(e) = self.check_replaceable(id) {
            tracing::warn!(job_id = %id, pid = supervisor.pid(), "Rejected duplicate job, terminating it");
            if let Err(term) = supervisor.terminate() {
                tracing::warn!(job_id = %id, error = %term, "Failed to terminate rejected job");
            }
            return Err(e);
        }
        self.insert(Arc::new(supervisor));
        Ok(())
    }

    /// Current snapshot of job `id`, or `None` if it is not tracked.
    pub fn get(&self, id: JobId) -> Option<JobSnapshot> {
        self.supervisor(id).map(|s| s.snapshot())
    }

    /// Shared handle to the supervisor of job `id`.
    pub fn supervisor(&self, id: JobId) -> Option<Arc<JobSupervisor>> {
        self.read_jobs().get(&id).cloned()
    }

    /// Snapshot of every tracked job, ordered by id. Refreshes each one.
    pub fn list(&self) -> BTreeMap<JobId, JobSnapshot> {
        let supervisors: Vec<Arc<JobSupervisor>> = self.read_jobs().values().cloned().collect();
        supervisors
            .into_iter()
            .map(|s| (s.id(), s.snapshot()))
            .collect()
    }

    /// Ask job `id` to stop. The entry stays tracked.
    ///
    /// Returns `false` if the process had already exited.
    pub fn cancel(&self, id: JobId) -> Result<bool> {
        let supervisor = self.supervisor(id).ok_or(Error::JobNotFound(id))?;
        supervisor.terminate()
    }

    /// Stop tracking job `id`, returning its final snapshot.
    ///
    /// Refuses with [`Error::JobAlreadyRunning`] while the job is live.
    pub fn evict(&self, id: JobId) -> Result<JobSnapshot> {
        let _gate = self.gate();
        let supervisor = self.supervisor(id).ok_or(Error::JobNotFound(id))?;
        if supervisor.is_active() {
            return Err(Error::JobAlreadyRunning(id));
        }
        self.write_jobs().remove(&id);
        tracing::info!(job_id = %id, "Evicted job");
        Ok(supervisor.snapshot())
    }

    pub fn contains(&self, id: JobId) -> bool {
        self.read_jobs().contains_key(&id)
    }

    pub fn ids(&self) -> Vec<JobId> {
        self.read_jobs().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.read_jobs().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_jobs().is_empty()
    }

    /// Stop tracking everything: terminate live processes, reap them and join
    /// all reader threads. Returns the first error after attempting every job.
    pub fn shutdown(&self) -> Result<()> {
        let _gate = self.gate();
        let jobs = std::mem::take(&mut *self.write_jobs());
        tracing::info!(jobs = jobs.len(), "Shutting down job registry");

        let mut first_err = None;
        for (id, supervisor) in jobs {
            if let Err(e) = supervisor.shutdown() {
                tracing::warn!(job_id = %id, error = %e, "Failed to shut down job");
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn check_replaceable(&self, id: JobId) -> Result<()> {
        let Some(existing) = self.supervisor(id) else {
            return Ok(());
        };
        if !existing.is_active() {
            return Ok(());
        }
        if self.reject_active_relaunch {
            return Err(Error::JobAlreadyRunning(id));
        }
        tracing::warn!(
            job_id = %id,
            pid = existing.pid(),
            "Replacing a running job; the previous process is left running untracked"
        );
        Ok(())
    }

    fn insert(&self, supervisor: Arc<JobSupervisor>) {
        let id = supervisor.id();
        let replaced = self.write_jobs().insert(id, supervisor);
        tracing::info!(job_id = %id, replaced = replaced.is_some(), "Registered job");
    }

    fn gate(&self) -> MutexGuard<'_, ()> {
        self.launch_gate.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn read_jobs(&self) -> RwLockReadGuard<'_, BTreeMap<JobId, Arc<JobSupervisor>>> {
        self.jobs.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_jobs(&self) -> RwLockWriteGuard<'_, BTreeMap<JobId, Arc<JobSupervisor>>> {
        self.jobs.write().unwrap_or_else(|e| e.into_inner())
    }
}
