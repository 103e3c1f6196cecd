//! Supervision of one external job process.
//!
//! A [`JobSupervisor`] starts the process, hands its stdout and stderr to two
//! [`StreamListener`]s, and answers status queries from any thread. Queries
//! never wait on the process: [`JobSupervisor::refresh`] drains whatever the
//! listeners have queued and re-reads the status source of record.
//!
//! State machine: `pending -> running -> {finished, failed, extracted}`. The
//! terminal transitions come from the status source; the supervisor has no
//! exit callback. As local hints it also reports when both streams have closed
//! and the exit code once a non-blocking `try_wait` sees the process gone.

use std::process::{Child, ExitStatus};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::buffer::LineBuffer;
use crate::config::JobsConfig;
use crate::error::{Error, Result};
use crate::launch::LaunchCommand;
use crate::listener::{join_reader, StreamKind, StreamListener};
use crate::status::StatusSource;
use crate::types::{JobId, JobSnapshot, JobStatus};

/// How often `shutdown` re-checks a terminated process.
const EXIT_POLL: Duration = Duration::from_millis(10);

/// Per-supervisor tuning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SupervisorOptions {
    /// Lines retained per stream; `None` keeps everything
    pub max_retained_lines: Option<usize>,
}

impl From<&JobsConfig> for SupervisorOptions {
    fn from(config: &JobsConfig) -> Self {
        Self {
            max_retained_lines: config.retention_cap(),
        }
    }
}

/// Owns one launched job from start to observed exit.
pub struct JobSupervisor {
    id: JobId,
    pid: u32,
    command: String,
    started_at: DateTime<Utc>,
    source: Arc<dyn StatusSource>,
    /// Lock order: `state` before `child`.
    state: Mutex<JobState>,
    child: Mutex<Child>,
}

/// Everything mutated by `refresh`, guarded by one lock so the two
/// listeners only ever have a single consumer.
struct JobState {
    status: JobStatus,
    output: LineBuffer,
    errors: LineBuffer,
    stdout: StreamListener,
    stderr: StreamListener,
    exit_code: Option<i32>,
    exited: bool,
}

impl JobSupervisor {
    /// Start `command` and attach readers to its output streams.
    ///
    /// Fails with [`Error::LaunchFailed`] if the process cannot be started;
    /// nothing is left running in that case.
    pub fn spawn(
        id: JobId,
        command: &LaunchCommand,
        source: Arc<dyn StatusSource>,
        options: SupervisorOptions,
    ) -> Result<Self> {
        let command_line = command.display();
        tracing::debug!(job_id = %id, command = %command_line, status = %JobStatus::Pending, "Launching job");

        let mut child = command
            .to_command()
            .spawn()
            .map_err(|e| Error::LaunchFailed {
                program: command.program.clone(),
                source: e,
            })?;
        let pid = child.id();

        let (stdout, stderr) = match attach_listeners(id, &mut child) {
            Ok(pair) => pair,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(Error::LaunchFailed {
                    program: command.program.clone(),
                    source: e,
                });
            }
        };

        tracing::info!(job_id = %id, pid, command = %command_line, "Job started");

        Ok(Self {
            id,
            pid,
            command: command_line,
            started_at: Utc::now(),
            source,
            state: Mutex::new(JobState {
                status: JobStatus::Running,
                output: LineBuffer::new(options.max_retained_lines),
                errors: LineBuffer::new(options.max_retained_lines),
                stdout,
                stderr,
                exit_code: None,
                exited: false,
            }),
            child: Mutex::new(child),
        })
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Drain both output queues and re-read the recorded status.
    pub fn refresh(&self) {
        let mut state = self.lock_state();
        self.refresh_locked(&mut state);
    }

    /// Refresh, then copy out the current view.
    pub fn snapshot(&self) -> JobSnapshot {
        let mut state = self.lock_state();
        self.refresh_locked(&mut state);
        JobSnapshot {
            id: self.id,
            status: state.status,
            pid: self.pid,
            command: self.command.clone(),
            started_at: self.started_at,
            output: state.output.to_vec(),
            errors: state.errors.to_vec(),
            dropped_output: state.output.dropped(),
            dropped_errors: state.errors.dropped(),
            streams_closed: state.stdout.is_closed() && state.stderr.is_closed(),
            exit_code: state.exit_code,
        }
    }

    /// Whether the job still counts as live: its recorded status is not
    /// terminal and the process has not been seen to exit.
    pub fn is_active(&self) -> bool {
        let mut state = self.lock_state();
        self.refresh_locked(&mut state);
        !state.status.is_terminal() && !state.exited
    }

    /// Ask the job's process group to stop (SIGTERM on unix).
    ///
    /// Returns `false` if the process had already exited.
    pub fn terminate(&self) -> Result<bool> {
        let mut state = self.lock_state();
        let mut child = self.lock_child();
        if state.exited {
            return Ok(false);
        }
        if let Some(status) = child.try_wait()? {
            record_exit(&mut state, status);
            return Ok(false);
        }

        signal_group(&mut child)?;
        tracing::info!(job_id = %self.id, pid = self.pid, "Sent termination signal");
        Ok(true)
    }

    /// Terminate if still running, reap the process and wait for both reader
    /// threads to finish. Blocks until the streams close; queries on this job
    /// are still answered meanwhile.
    pub fn shutdown(&self) -> Result<()> {
        self.terminate()?;
        self.wait_for_exit()?;
        self.join_readers();
        tracing::debug!(job_id = %self.id, "Supervisor shut down");
        Ok(())
    }

    /// Wait for both reader threads to reach end of stream, then drain what
    /// they queued. The threads are joined outside the state lock.
    pub fn join_readers(&self) {
        let readers = {
            let mut state = self.lock_state();
            [
                (StreamKind::Stdout, state.stdout.take_reader()),
                (StreamKind::Stderr, state.stderr.take_reader()),
            ]
        };
        for (kind, handle) in readers {
            if let Some(handle) = handle {
                join_reader(kind, handle);
            }
        }
        let mut state = self.lock_state();
        self.drain_locked(&mut state);
    }

    /// Poll until the process has exited. Locks are held only around each
    /// non-blocking `try_wait`.
    fn wait_for_exit(&self) -> Result<()> {
        loop {
            {
                let mut state = self.lock_state();
                if state.exited {
                    return Ok(());
                }
                if let Some(status) = self.lock_child().try_wait()? {
                    record_exit(&mut state, status);
                    return Ok(());
                }
            }
            thread::sleep(EXIT_POLL);
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, JobState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_child(&self) -> MutexGuard<'_, Child> {
        self.child.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn drain_locked(&self, state: &mut JobState) {
        let out = state.stdout.drain();
        let err = state.stderr.drain();
        if !out.is_empty() || !err.is_empty() {
            tracing::trace!(job_id = %self.id, stdout = out.len(), stderr = err.len(), "Drained output");
        }
        state.output.extend(out);
        state.errors.extend(err);
    }

    fn refresh_locked(&self, state: &mut JobState) {
        self.drain_locked(state);

        if !state.exited {
            match self.lock_child().try_wait() {
                Ok(Some(status)) => {
                    record_exit(state, status);
                    tracing::info!(job_id = %self.id, exit_code = ?state.exit_code, "Job process exited");
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(job_id = %self.id, error = %e, "Failed to poll job process");
                }
            }
        }

        match self.source.status(self.id) {
            Ok(Some(status)) => {
                if status != state.status {
                    tracing::debug!(job_id = %self.id, from = %state.status, to = %status, "Status changed");
                }
                state.status = status;
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(job_id = %self.id, error = %e, "Failed to read job status");
            }
        }
    }
}

impl Drop for JobSupervisor {
    fn drop(&mut self) {
        let exited = self.state.get_mut().unwrap_or_else(|e| e.into_inner()).exited;
        if exited {
            return;
        }
        let child = self.child.get_mut().unwrap_or_else(|e| e.into_inner());
        if let Ok(Some(_)) = child.try_wait() {
            return;
        }
        // The process outlives its supervisor; reap it once it exits.
        tracing::debug!(job_id = %self.id, pid = self.pid, "Supervisor dropped while job running");
        spawn_reaper(self.id, self.pid);
    }
}

impl std::fmt::Debug for JobSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobSupervisor")
            .field("id", &self.id)
            .field("pid", &self.pid)
            .field("command", &self.command)
            .finish_non_exhaustive()
    }
}

fn attach_listeners(
    id: JobId,
    child: &mut Child,
) -> std::io::Result<(StreamListener, StreamListener)> {
    let missing = |kind: StreamKind| {
        std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            format!("{kind} was not captured"),
        )
    };
    let stdout = child.stdout.take().ok_or_else(|| missing(StreamKind::Stdout))?;
    let stderr = child.stderr.take().ok_or_else(|| missing(StreamKind::Stderr))?;
    Ok((
        StreamListener::spawn(id, StreamKind::Stdout, stdout)?,
        StreamListener::spawn(id, StreamKind::Stderr, stderr)?,
    ))
}

fn record_exit(state: &mut JobState, status: ExitStatus) {
    state.exited = true;
    state.exit_code = exit_code(status);
}

#[cfg(unix)]
fn exit_code(status: ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    // Shell convention for signal deaths.
    status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> Option<i32> {
    status.code()
}

#[cfg(unix)]
fn signal_group(child: &mut Child) -> std::io::Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    // The job leads its own process group (see LaunchCommand::to_command).
    match killpg(Pid::from_raw(child.id() as i32), Signal::SIGTERM) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(not(unix))]
fn signal_group(child: &mut Child) -> std::io::Result<()> {
    child.kill()
}

#[cfg(unix)]
fn spawn_reaper(id: JobId, pid: u32) {
    use nix::errno::Errno;
    use nix::sys::wait::{waitpid, WaitStatus};
    use nix::unistd::Pid;

    let pid = Pid::from_raw(pid as i32);
    let spawned = thread::Builder::new()
        .name(format!("simctl-reap-{id}"))
        .spawn(move || loop {
            match waitpid(pid, None) {
                Ok(WaitStatus::Exited(..)) | Ok(WaitStatus::Signaled(..)) => break,
                Ok(_) | Err(Errno::EINTR) => continue,
                Err(_) => break,
            }
        });
    if let Err(e) = spawned {
        tracing::warn!(job_id = %id, error = %e, "Failed to start reaper thread");
    }
}

#[cfg(not(unix))]
fn spawn_reaper(_id: JobId, _pid: u32) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::StatusDatabase;
    use std::time::{Duration, Instant};

    fn source() -> Arc<StatusDatabase> {
        let db = StatusDatabase::open_in_memory().unwrap();
        db.migrate().unwrap();
        Arc::new(db)
    }

    fn sh(script: &str) -> LaunchCommand {
        LaunchCommand::new("sh").args(["-c", script])
    }

    fn wait_until_exited(sup: &JobSupervisor) -> JobSnapshot {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let snap = sup.snapshot();
            if snap.streams_closed && snap.exit_code.is_some() {
                return snap;
            }
            assert!(Instant::now() < deadline, "job did not exit in time");
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn test_launch_failure() {
        let err = JobSupervisor::spawn(
            JobId(1),
            &LaunchCommand::new("/nonexistent/simctl-engine"),
            source(),
            SupervisorOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::LaunchFailed { .. }));
    }

    #[test]
    fn test_starts_running() {
        let sup = JobSupervisor::spawn(JobId(2), &sh("sleep 5"), source(), SupervisorOptions::default())
            .unwrap();
        let snap = sup.snapshot();
        assert_eq!(snap.status, JobStatus::Running);
        assert!(!snap.has_exited());
        assert!(sup.is_active());
        assert!(sup.terminate().unwrap());
        sup.shutdown().unwrap();
        assert!(!sup.is_active());
    }

    #[test]
    fn test_exit_code_recorded() {
        let sup = JobSupervisor::spawn(
            JobId(3),
            &sh("echo out; echo err >&2; exit 3"),
            source(),
            SupervisorOptions::default(),
        )
        .unwrap();
        sup.join_readers();
        let snap = wait_until_exited(&sup);
        assert!(snap.streams_closed);
        assert_eq!(snap.exit_code, Some(3));
        assert_eq!(snap.output, vec!["out"]);
        assert_eq!(snap.errors, vec!["err"]);
        assert!(!sup.terminate().unwrap());
    }

    #[test]
    fn test_status_follows_source() {
        let db = source();
        let sup = JobSupervisor::spawn(JobId(4), &sh("sleep 5"), db.clone(), SupervisorOptions::default())
            .unwrap();
        db.set_status(JobId(4), "finished").unwrap();
        assert_eq!(sup.snapshot().status, JobStatus::Finished);
        assert!(!sup.is_active());
        sup.shutdown().unwrap();
    }

    #[test]
    fn test_retention_cap() {
        let sup = JobSupervisor::spawn(
            JobId(5),
            &sh("for i in 1 2 3 4 5; do echo $i; done"),
            source(),
            SupervisorOptions {
                max_retained_lines: Some(2),
            },
        )
        .unwrap();
        let snap = wait_until_exited(&sup);
        assert_eq!(snap.output, vec!["4", "5"]);
        assert_eq!(snap.dropped_output, 3);
    }

    #[test]
    fn test_snapshot_not_blocked_by_join_readers() {
        let sup = Arc::new(
            JobSupervisor::spawn(JobId(7), &sh("sleep 2"), source(), SupervisorOptions::default())
                .unwrap(),
        );
        let joiner = {
            let sup = sup.clone();
            std::thread::spawn(move || sup.join_readers())
        };
        std::thread::sleep(Duration::from_millis(200));

        let started = Instant::now();
        let snap = sup.snapshot();
        assert!(
            started.elapsed() < Duration::from_millis(1000),
            "snapshot waited {:?} on join_readers",
            started.elapsed()
        );
        assert!(!snap.streams_closed);

        joiner.join().unwrap();
        assert!(sup.snapshot().streams_closed);
    }

    #[test]
    fn test_shutdown_terminates_and_joins() {
        let sup = JobSupervisor::spawn(
            JobId(6),
            &sh("echo started; sleep 30"),
            source(),
            SupervisorOptions::default(),
        )
        .unwrap();
        let deadline = Instant::now() + Duration::from_secs(10);
        while sup.snapshot().output.is_empty() {
            assert!(Instant::now() < deadline, "job produced no output");
            std::thread::sleep(Duration::from_millis(10));
        }

        sup.shutdown().unwrap();
        let snap = sup.snapshot();
        assert!(snap.streams_closed);
        assert_eq!(snap.exit_code, Some(128 + 15));
        assert_eq!(snap.output, vec!["started"]);
    }
}
