// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use std::collections::HashMap;

use crate::errors::ExecutionError;
use crate::topology::{ItemKey, ItemQueue, QueueEntry, Topology};

/// Why an executor run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExitReason {
    /// The topology reached quiescence: no worker in flight and no work able
    /// to make further progress.
    #[default]
    Completed,
    /// An external interrupt or preemption signal forced an orderly
    /// cancellation. Callers honoring `has_to_exit` map this to the distinct
    /// process exit code [`SIGNAL_EXIT_CODE`].
    Interrupted,
}

/// Process exit code reported when a run is cut short by a preemption signal
/// and the caller requested `has_to_exit`.
pub const SIGNAL_EXIT_CODE: i32 = 99;

/// Outcome of driving a topology to completion.
///
/// Executors consume the topology, so the report carries everything the
/// caller can still observe: the final queue contents (in insertion order)
/// plus counters over the run.
#[derive(Debug, Default)]
pub struct ExecutionReport {
    /// Final contents of every queue, keyed by queue name.
    pub queues: HashMap<String, Vec<(ItemKey, QueueEntry)>>,
    /// Item invocations that completed successfully.
    pub completed: usize,
    /// Item invocations that failed; their error-tagged entries were
    /// forwarded downstream (or counted here when the work had no output).
    pub failed: usize,
    /// Items lost to force-terminated workers (watchdog kills, dead server
    /// partitions).
    pub lost: usize,
    /// How the run ended.
    pub exit: ExitReason,
}

impl ExecutionReport {
    /// Assemble a report by draining the executor's final queue state.
    pub fn from_queues(
        mut queues: Vec<ItemQueue>,
        completed: usize,
        failed: usize,
        lost: usize,
        exit: ExitReason,
    ) -> Self {
        let queues = queues
            .iter_mut()
            .map(|queue| (queue.name().to_string(), queue.drain_entries()))
            .collect();
        Self {
            queues,
            completed,
            failed,
            lost,
            exit,
        }
    }

    /// Final entries of `queue`, in insertion order. Unknown queue names
    /// yield an empty slice.
    pub fn queue(&self, queue: &str) -> &[(ItemKey, QueueEntry)] {
        self.queues.get(queue).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Look up a single entry by queue and key.
    pub fn entry(&self, queue: &str, key: &str) -> Option<&QueueEntry> {
        self.queue(queue)
            .iter()
            .find(|(k, _)| k.as_str() == key)
            .map(|(_, entry)| entry)
    }

    /// Payload bytes for a successfully processed key, if present.
    pub fn payload(&self, queue: &str, key: &str) -> Option<&[u8]> {
        self.entry(queue, key)
            .and_then(QueueEntry::item)
            .map(|item| item.payload.as_slice())
    }
}

/// The strategy driving a [`Topology`] to completion.
///
/// Implementations differ in their concurrency model (none, cooperative
/// tasks, threads + processes, out-of-process servers) but share the same
/// contract: consume the topology, honor queue backpressure hints, detect
/// quiescence, and return the final queue state.
#[async_trait]
pub trait PipelineExecutor: Send + Sync {
    async fn execute(&self, topology: Topology) -> Result<ExecutionReport, ExecutionError>;
}
