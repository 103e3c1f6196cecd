//! Background readers for a job's output streams.
//!
//! Each stream gets its own thread that blocks on the next line and pushes it
//! onto a channel. The consumer side drains the channel without ever waiting:
//!
//! ```text
//!   stdout ──▶ reader thread ──▶ mpsc ──┐
//!                                       ├──▶ JobSupervisor::refresh (drain)
//!   stderr ──▶ reader thread ──▶ mpsc ──┘
//! ```
//!
//! When the stream ends the reader drops its sender, so a drain that sees the
//! channel disconnected knows every line has already been delivered.
//!
//! If the consumer goes away first the reader keeps reading and discards what
//! it reads. The job keeps a live reader on both pipes until it exits.

use std::io::{self, BufRead, BufReader, Read};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread::{self, JoinHandle};

use crate::types::JobId;

/// Which output stream a listener reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamKind::Stdout => write!(f, "stdout"),
            StreamKind::Stderr => write!(f, "stderr"),
        }
    }
}

/// Consumer half of one stream reader.
///
/// Single consumer: the owner must serialize calls to [`drain`](Self::drain).
pub struct StreamListener {
    kind: StreamKind,
    receiver: Receiver<String>,
    closed: bool,
    handle: Option<JoinHandle<()>>,
}

impl StreamListener {
    /// Start a reader thread over `stream`.
    pub fn spawn<R>(job_id: JobId, kind: StreamKind, stream: R) -> io::Result<Self>
    where
        R: Read + Send + 'static,
    {
        let (sender, receiver) = mpsc::channel();
        let handle = thread::Builder::new()
            .name(format!("simctl-{kind}-{job_id}"))
            .spawn(move || {
                let mut reader = BufReader::new(stream);
                let mut buf = Vec::new();
                let mut count = 0u64;
                let mut discarding = false;
                loop {
                    buf.clear();
                    match reader.read_until(b'\n', &mut buf) {
                        Ok(0) => break,
                        Ok(_) => {
                            let line = String::from_utf8_lossy(&buf);
                            let line = line.trim_end();
                            if line.is_empty() {
                                continue;
                            }
                            count += 1;
                            if discarding {
                                continue;
                            }
                            if sender.send(line.to_string()).is_err() {
                                tracing::debug!(job_id = %job_id, stream = %kind, "Listener dropped, discarding output");
                                discarding = true;
                            }
                        }
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(e) => {
                            tracing::warn!(job_id = %job_id, stream = %kind, error = %e, "Stream read failed");
                            break;
                        }
                    }
                }
                tracing::debug!(job_id = %job_id, stream = %kind, lines = count, "Stream closed");
            })?;

        Ok(Self {
            kind,
            receiver,
            closed: false,
            handle: Some(handle),
        })
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    /// Take every line currently queued. Never blocks.
    pub fn drain(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        loop {
            match self.receiver.try_recv() {
                Ok(line) => lines.push(line),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.closed = true;
                    break;
                }
            }
        }
        lines
    }

    /// Whether a drain has observed end of stream. Once true, no more lines
    /// will arrive.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Hand over the reader thread so it can be joined without holding
    /// whatever lock guards this listener. `None` once taken.
    pub fn take_reader(&mut self) -> Option<JoinHandle<()>> {
        self.handle.take()
    }

    /// Wait for the reader thread to finish. Blocks until the stream ends.
    pub fn join(&mut self) {
        if let Some(handle) = self.take_reader() {
            join_reader(self.kind, handle);
        }
    }
}

/// Join a reader thread, logging if it panicked.
pub fn join_reader(kind: StreamKind, handle: JoinHandle<()>) {
    if handle.join().is_err() {
        tracing::warn!(stream = %kind, "Stream reader thread panicked");
    }
}
