// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Client-side proxy for one out-of-process worker.
//!
//! The proxy owns the child process and its stdin; a background reader
//! thread pumps every inbound envelope into the engine's event channel, so
//! the control loop never blocks on a worker. Bookkeeping follows the
//! submit/acknowledge protocol: `outstanding` counts submitted items not yet
//! answered, and `is_available` gates least-loaded admission across a pool.

use std::io::{BufReader, BufWriter};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::errors::ExecutionError;

use super::protocol::{read_envelope, write_envelope, ClientEnvelope, ServerEnvelope};

/// What the reader thread observed on a worker's stdout.
#[derive(Debug)]
pub enum ProxyEvent {
    /// A well-formed envelope from the worker.
    Message(ServerEnvelope),
    /// The worker closed its stream or sent bytes that are not the
    /// protocol. No more events will follow for this worker.
    Disconnected,
}

/// Handle to one worker process with submit/receive bookkeeping.
pub struct WorkerProxy {
    index: usize,
    child: Child,
    writer: BufWriter<ChildStdin>,
    outstanding: usize,
    started: Arc<AtomicBool>,
    spawned_at: Instant,
    killed: bool,
}

impl WorkerProxy {
    /// Spawn the worker command and start pumping its stdout into `events`,
    /// tagged with `index` so a pool can tell its workers apart.
    pub fn spawn(
        index: usize,
        command: &[String],
        events: Sender<(usize, ProxyEvent)>,
    ) -> Result<Self, ExecutionError> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| ExecutionError::internal("empty worker command"))?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| ExecutionError::worker_io(format!("spawn '{}'", program), e))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ExecutionError::internal("worker stdin not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExecutionError::internal("worker stdout not captured"))?;

        let started = Arc::new(AtomicBool::new(false));
        let started_flag = started.clone();
        std::thread::spawn(move || {
            let mut reader = BufReader::new(stdout);
            loop {
                match read_envelope::<_, ServerEnvelope>(&mut reader) {
                    Ok(Some(envelope)) => {
                        if matches!(envelope, ServerEnvelope::Started { .. }) {
                            started_flag.store(true, Ordering::SeqCst);
                        }
                        if events.send((index, ProxyEvent::Message(envelope))).is_err() {
                            return;
                        }
                    }
                    Ok(None) => {
                        let _ = events.send((index, ProxyEvent::Disconnected));
                        return;
                    }
                    Err(error) => {
                        tracing::debug!(
                            worker_index = index,
                            error = %error,
                            "worker stream unreadable"
                        );
                        let _ = events.send((index, ProxyEvent::Disconnected));
                        return;
                    }
                }
            }
        });

        Ok(Self {
            index,
            child,
            writer: BufWriter::new(stdin),
            outstanding: 0,
            started,
            spawned_at: Instant::now(),
            killed: false,
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Send any envelope without touching the outstanding count.
    pub fn send(&mut self, envelope: &ClientEnvelope) -> Result<(), ExecutionError> {
        write_envelope(&mut self.writer, envelope)
    }

    /// Submit one item for the named work; incremented on submit,
    /// decremented by [`acknowledge`](Self::acknowledge) when the result
    /// arrives.
    pub fn submit(
        &mut self,
        work: impl Into<String>,
        key: impl Into<String>,
        payload: Vec<u8>,
    ) -> Result<(), ExecutionError> {
        self.send(&ClientEnvelope::Submit {
            work: work.into(),
            key: key.into(),
            payload,
        })?;
        self.outstanding += 1;
        Ok(())
    }

    /// One submitted item has been answered.
    pub fn acknowledge(&mut self) {
        self.outstanding = self.outstanding.saturating_sub(1);
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    /// Admission gate: alive and below the per-worker cap on
    /// unacknowledged submissions.
    pub fn is_available(&self, max_outstanding: usize) -> bool {
        !self.killed && self.outstanding < max_outstanding
    }

    /// Whether the worker has reported `Started` yet.
    pub fn has_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Time since spawn, compared against the watchdog timeout.
    pub fn age(&self) -> Duration {
        self.spawned_at.elapsed()
    }

    pub fn is_killed(&self) -> bool {
        self.killed
    }

    /// Ask the worker to exit on its own.
    pub fn request_shutdown(&mut self) {
        let _ = self.send(&ClientEnvelope::Shutdown);
    }

    /// Force-terminate the worker. Anything it was carrying is lost.
    pub fn kill(&mut self) {
        if !self.killed {
            let _ = self.child.kill();
            let _ = self.child.wait();
            self.killed = true;
        }
    }
}

impl Drop for WorkerProxy {
    fn drop(&mut self) {
        // Reap the child; an already-exited worker is a no-op.
        self.kill();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    /// `cat` echoes our own client envelopes back, which must surface as a
    /// disconnect (it does not speak the server side of the protocol), never
    /// as a started worker.
    #[test]
    fn non_protocol_worker_disconnects_and_never_starts() {
        let (events, inbox) = mpsc::channel();
        let mut proxy =
            WorkerProxy::spawn(0, &["cat".to_string()], events).expect("spawn cat");

        proxy.submit("scale", "k0", b"1".to_vec()).unwrap();
        assert_eq!(proxy.outstanding(), 1);

        let (index, event) = inbox.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(index, 0);
        assert!(matches!(event, ProxyEvent::Disconnected));
        assert!(!proxy.has_started());

        proxy.kill();
        assert!(proxy.is_killed());
        assert!(!proxy.is_available(4));
    }

    #[test]
    fn outstanding_tracks_submit_and_acknowledge() {
        let (events, _inbox) = mpsc::channel();
        let mut proxy =
            WorkerProxy::spawn(1, &["cat".to_string()], events).expect("spawn cat");

        assert!(proxy.is_available(2));
        proxy.submit("scale", "a", b"1".to_vec()).unwrap();
        proxy.submit("scale", "b", b"2".to_vec()).unwrap();
        assert_eq!(proxy.outstanding(), 2);
        assert!(!proxy.is_available(2));

        proxy.acknowledge();
        assert_eq!(proxy.outstanding(), 1);
        assert!(proxy.is_available(2));

        proxy.kill();
    }

    #[test]
    fn empty_command_is_rejected() {
        let (events, _inbox) = mpsc::channel();
        let result = WorkerProxy::spawn(0, &[], events);
        assert!(result.is_err());
    }
}
