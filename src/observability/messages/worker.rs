// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Message types for worker process liveness, memory pressure, and the
//! distributed server pool.

use crate::observability::messages::StructuredLog;
use std::fmt::{Display, Formatter};
use tracing::Span;

/// A worker process was spawned for one item.
///
/// # Log Level
/// `debug!` - Routine dispatch event
pub struct WorkerSpawned<'a> {
    pub work: &'a str,
    pub key: &'a str,
    pub pid: u32,
}

impl Display for WorkerSpawned<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Spawned worker process {} for work {} ({})",
            self.pid, self.work, self.key
        )
    }
}

impl StructuredLog for WorkerSpawned<'_> {
    fn log(&self) {
        tracing::debug!(work = self.work, key = self.key, pid = self.pid, "{}", self);
    }

    fn span(&self, name: &str) -> Span {
        tracing::debug_span!(
            "worker_spawned",
            span_name = name,
            work = self.work,
            key = self.key,
            pid = self.pid,
        )
    }
}

/// A launched worker never reported `Started` within the watchdog timeout.
/// The worker is force-terminated and its item counted lost. The timeout is
/// a liveness heuristic, not a bound on work duration.
///
/// # Log Level
/// `error!` - Failure requiring attention
pub struct WorkerNeverStarted<'a> {
    pub work: &'a str,
    pub key: &'a str,
    pub waited_secs: f64,
}

impl Display for WorkerNeverStarted<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "A launched worker has not started after {:.1} s; killing it ({}, key: {})",
            self.waited_secs, self.work, self.key
        )
    }
}

impl StructuredLog for WorkerNeverStarted<'_> {
    fn log(&self) {
        tracing::error!(
            work = self.work,
            key = self.key,
            waited_secs = self.waited_secs,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::error_span!(
            "worker_never_started",
            span_name = name,
            work = self.work,
            key = self.key,
        )
    }
}

/// Resident memory crossed the configured limit: the engine pauses worker
/// admission and drains only the final queue until the backlog clears.
///
/// # Log Level
/// `error!` - Degraded operation
pub struct MemoryPressure {
    pub resident_mb: f64,
    pub limit_mb: f64,
}

impl Display for MemoryPressure {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Memory full ({:.0} Mb resident, limit {:.0} Mb): no more computing job will be \
             launched while the last waiting queue is not empty",
            self.resident_mb, self.limit_mb
        )
    }
}

impl StructuredLog for MemoryPressure {
    fn log(&self) {
        tracing::error!(
            resident_mb = self.resident_mb,
            limit_mb = self.limit_mb,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::error_span!(
            "memory_pressure",
            span_name = name,
            resident_mb = self.resident_mb,
        )
    }
}

/// The final waiting queue was drained after a memory-pressure pause; normal
/// admission resumes.
///
/// # Log Level
/// `info!` - Recovery event
pub struct FinalQueueDrained<'a> {
    pub queue: &'a str,
}

impl Display for FinalQueueDrained<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "The last waiting queue '{}' has been emptied", self.queue)
    }
}

impl StructuredLog for FinalQueueDrained<'_> {
    fn log(&self) {
        tracing::info!(queue = self.queue, "{}", self);
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!("final_queue_drained", span_name = name, queue = self.queue)
    }
}

/// A server in the fan-out pool died before finishing its sub-range. The
/// partition's results are lost; there is no rebalancing or retry.
///
/// # Log Level
/// `error!` - Data loss event
pub struct ServerPartitionLost {
    pub index: usize,
    pub start: i64,
    pub stop: i64,
}

impl Display for ServerPartitionLost {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Server {} died; results for sub-range [{}, {}) are lost",
            self.index, self.start, self.stop
        )
    }
}

impl StructuredLog for ServerPartitionLost {
    fn log(&self) {
        tracing::error!(
            server_index = self.index,
            range_start = self.start,
            range_stop = self.stop,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::error_span!(
            "server_partition_lost",
            span_name = name,
            server_index = self.index,
        )
    }
}
