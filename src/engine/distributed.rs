// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Distributed executor: a client process dispatching items to a pool of
//! out-of-process server workers.
//!
//! Two modes share the same proxy pool:
//!
//! * **Item dispatch** (default): one-shot and global works run locally
//!   (they need whole-queue access); every item work's items are submitted
//!   to the least-loaded available server and results are folded back into
//!   the local queues as they arrive.
//! * **Range fan-out**: a contiguous series index range is statically
//!   partitioned into near-equal contiguous sub-ranges, one per server;
//!   each server builds and runs an independent full pipeline over its
//!   sub-range. Load is only as balanced as the partition, and a dead
//!   server loses its sub-range's results — there is no rebalancing or
//!   retry.
//!
//! Cross-process coordination is limited to the submit/result protocol: no
//! shared memory, no distributed lock, no redelivery.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::mpsc::{Receiver, TryRecvError};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::errors::{ExecutionError, WorkError};
use crate::observability::messages::engine::{
    ExecutionCompleted, ExecutionStarted, WorkCompleted, WorkFailed, WorkLaunched,
};
use crate::observability::messages::worker::ServerPartitionLost;
use crate::observability::messages::StructuredLog;
use crate::server::{ClientEnvelope, ProxyEvent, ServerEnvelope, WorkerProxy};
use crate::topology::queue::disjoint_queues_mut;
use crate::topology::{ItemQueue, QueueEntry, Topology, WorkItem, WorkKind, WorkRunner};
use crate::traits::{ExecutionReport, ExitReason, PipelineExecutor};
use crate::util;

const STRATEGY: &str = "distributed";

/// A contiguous slice of a file series: indices `start, start+step, ...`
/// strictly below `stop`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesRange {
    pub start: i64,
    pub stop: i64,
    pub step: i64,
}

impl SeriesRange {
    pub fn new(start: i64, stop: i64, step: i64) -> Self {
        Self { start, stop, step }
    }

    /// Number of indices in the range.
    pub fn len(&self) -> usize {
        if self.step <= 0 || self.stop <= self.start {
            return 0;
        }
        ((self.stop - self.start + self.step - 1) / self.step) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn indices(&self) -> impl Iterator<Item = i64> + '_ {
        (self.start..self.stop).step_by(self.step.max(1) as usize)
    }
}

/// Statically partition `range` into `parts` contiguous sub-ranges of
/// near-equal length. The remainder is spread one index per leading
/// sub-range; trailing sub-ranges may be empty when there are more parts
/// than indices.
pub fn partition_range(range: SeriesRange, parts: usize) -> Vec<SeriesRange> {
    let parts = parts.max(1);
    let count = range.len();
    let base = count / parts;
    let remainder = count % parts;

    let mut out = Vec::with_capacity(parts);
    let mut offset = 0usize;
    for i in 0..parts {
        let take = base + usize::from(i < remainder);
        let start = range.start + (offset as i64) * range.step;
        let stop = range.start + ((offset + take) as i64) * range.step;
        out.push(SeriesRange {
            start,
            stop: stop.min(range.stop.max(start)),
            step: range.step,
        });
        offset += take;
    }
    out
}

/// Client-side distributed executor over a pool of worker servers.
pub struct DistributedExecutor {
    servers: usize,
    max_outstanding: usize,
    poll_interval: Duration,
    default_queue_capacity: usize,
    worker_command: Vec<String>,
    fan_out: Option<SeriesRange>,
}

impl DistributedExecutor {
    pub fn new(servers: usize, worker_command: Vec<String>) -> Self {
        Self {
            servers: servers.max(1),
            max_outstanding: 4,
            poll_interval: Duration::from_millis(10),
            default_queue_capacity: 8,
            worker_command,
            fan_out: None,
        }
    }

    pub fn with_max_outstanding(mut self, max_outstanding: usize) -> Self {
        self.max_outstanding = max_outstanding.max(1);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Switch to range fan-out mode: partition `series` across the pool and
    /// let each server run the full pipeline over its sub-range.
    pub fn with_fan_out(mut self, series: SeriesRange) -> Self {
        self.fan_out = Some(series);
        self
    }
}

#[async_trait]
impl PipelineExecutor for DistributedExecutor {
    async fn execute(&self, topology: Topology) -> Result<ExecutionReport, ExecutionError> {
        let servers = self.servers;
        let max_outstanding = self.max_outstanding;
        let poll_interval = self.poll_interval;
        let default_queue_capacity = self.default_queue_capacity;
        let worker_command = self.worker_command.clone();
        let fan_out = self.fan_out;

        tokio::task::spawn_blocking(move || {
            let (events_tx, events) = std::sync::mpsc::channel();
            let mut proxies = Vec::with_capacity(servers);
            let t_start_ms = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0);
            for index in 0..servers {
                let mut proxy = WorkerProxy::spawn(index, &worker_command, events_tx.clone())?;
                proxy.send(&ClientEnvelope::Start { t_start_ms })?;
                proxies.push(proxy);
            }

            let result = match fan_out {
                Some(series) => {
                    run_fan_out(topology, &mut proxies, &events, series, poll_interval)
                }
                None => run_item_dispatch(
                    topology,
                    &mut proxies,
                    &events,
                    max_outstanding,
                    default_queue_capacity,
                    poll_interval,
                ),
            };

            for proxy in &mut proxies {
                proxy.request_shutdown();
                proxy.kill();
            }
            result
        })
        .await
        .map_err(|e| ExecutionError::internal(format!("distributed client panicked: {}", e)))?
    }
}

/// Fan-out mode: one `RunPipeline` per server, then collect `PipelineDone`
/// acknowledgements (or count a lost partition when a server dies first).
fn run_fan_out(
    topology: Topology,
    proxies: &mut [WorkerProxy],
    events: &Receiver<(usize, ProxyEvent)>,
    series: SeriesRange,
    poll_interval: Duration,
) -> Result<ExecutionReport, ExecutionError> {
    let t_start = Instant::now();
    let partitions = partition_range(series, proxies.len());

    ExecutionStarted {
        strategy: STRATEGY,
        work_count: topology.works().len(),
        queue_count: topology.queues().len(),
        max_workers: proxies.len(),
    }
    .log();

    let mut awaiting = Vec::new();
    for (proxy, range) in proxies.iter_mut().zip(&partitions) {
        if range.is_empty() {
            continue;
        }
        proxy.send(&ClientEnvelope::RunPipeline {
            start: range.start,
            stop: range.stop,
            step: range.step,
        })?;
        awaiting.push(proxy.index());
    }

    let mut completed = 0usize;
    let mut failed = 0usize;
    let mut lost = 0usize;
    while !awaiting.is_empty() {
        match events.recv_timeout(poll_interval.max(Duration::from_millis(10))) {
            Ok((index, ProxyEvent::Message(ServerEnvelope::PipelineDone {
                completed: server_completed,
                failed: server_failed,
            }))) => {
                completed += server_completed;
                failed += server_failed;
                awaiting.retain(|&i| i != index);
            }
            Ok((index, ProxyEvent::Disconnected)) => {
                if awaiting.contains(&index) {
                    let range = partitions[index];
                    ServerPartitionLost {
                        index,
                        start: range.start,
                        stop: range.stop,
                    }
                    .log();
                    lost += range.len();
                    awaiting.retain(|&i| i != index);
                }
            }
            Ok(_) => {}
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {}
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    ExecutionCompleted {
        strategy: STRATEGY,
        completed,
        failed,
        duration: t_start.elapsed(),
    }
    .log();

    // The pipelines ran remotely; the local topology was only the template.
    let (queues, _works) = topology.into_parts();
    Ok(ExecutionReport::from_queues(
        queues,
        completed,
        failed,
        lost,
        ExitReason::Completed,
    ))
}

/// Resolved wiring of one steady-state work in item-dispatch mode.
struct RemoteSlot {
    name: String,
    kind: WorkKind,
    runner: WorkRunner,
    input: usize,
    output: Option<usize>,
    secondary: Option<usize>,
    global_stalled: Option<u64>,
}

fn run_item_dispatch(
    topology: Topology,
    proxies: &mut [WorkerProxy],
    events: &Receiver<(usize, ProxyEvent)>,
    max_outstanding: usize,
    default_queue_capacity: usize,
    poll_interval: Duration,
) -> Result<ExecutionReport, ExecutionError> {
    let t_start = Instant::now();
    let (mut queues, works) = topology.into_parts();

    ExecutionStarted {
        strategy: STRATEGY,
        work_count: works.len(),
        queue_count: queues.len(),
        max_workers: proxies.len() * max_outstanding,
    }
    .log();

    let index_of = |name: &str, queues: &[ItemQueue]| {
        queues
            .iter()
            .position(|q| q.name() == name)
            .expect("validated queue reference")
    };

    let mut completed = 0usize;
    let mut failed = 0usize;
    let mut lost = 0usize;

    for work in &works {
        if let WorkRunner::OneShot(f) = work.runner() {
            let out = index_of(work.output().primary().expect("one-shot output"), &queues);
            if let Err(error) = f.run(&mut queues[out]) {
                WorkFailed {
                    work: work.name(),
                    key: "-",
                    error: &error,
                }
                .log();
                failed += 1;
            }
        }
    }

    let mut slots: Vec<RemoteSlot> = works
        .iter()
        .filter(|work| work.kind() != WorkKind::OneShot)
        .map(|work| RemoteSlot {
            name: work.name().to_string(),
            kind: work.kind(),
            runner: work.runner().clone(),
            input: index_of(work.input_queue().expect("steady input"), &queues),
            output: work.output().primary().map(|n| index_of(n, &queues)),
            secondary: work.output().secondary().map(|n| index_of(n, &queues)),
            global_stalled: None,
        })
        .collect();

    // (work name, key) -> (slot, proxy) for results in flight.
    let mut in_flight: HashMap<(String, String), (usize, usize)> = HashMap::new();

    loop {
        // Fold completed results back into the local queues.
        loop {
            let (proxy_index, event) = match events.try_recv() {
                Ok(pair) => pair,
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            };
            match event {
                ProxyEvent::Message(ServerEnvelope::Result { work, key, outcome }) => {
                    let Some((slot_idx, proxy_idx)) = in_flight.remove(&(work, key.clone()))
                    else {
                        continue;
                    };
                    proxies[proxy_idx].acknowledge();
                    let slot = &slots[slot_idx];
                    match outcome {
                        Ok(payload) => {
                            completed += 1;
                            WorkCompleted {
                                work: &slot.name,
                                key: &key,
                                duration_secs: util::elapsed_secs(t_start),
                            }
                            .log();
                            if let Some(out) = slot.output {
                                queues[out].insert(key, WorkItem::new(payload));
                            }
                        }
                        Err(message) => {
                            failed += 1;
                            let error = WorkError::Failed { message };
                            WorkFailed {
                                work: &slot.name,
                                key: &key,
                                error: &error,
                            }
                            .log();
                            if let Some(out) = slot.output {
                                queues[out].insert_entry(key, QueueEntry::Failed(error));
                            }
                        }
                    }
                }
                ProxyEvent::Message(_) => {}
                ProxyEvent::Disconnected => {
                    // Everything outstanding on a dead server is lost.
                    proxies[proxy_index].kill();
                    let orphaned: Vec<(String, String)> = in_flight
                        .iter()
                        .filter(|(_, &(_, p))| p == proxy_index)
                        .map(|(k, _)| k.clone())
                        .collect();
                    for pair in orphaned {
                        let (slot_idx, _) = in_flight.remove(&pair).expect("orphan just listed");
                        lost += 1;
                        let slot = &slots[slot_idx];
                        let error = WorkError::WorkerLost;
                        WorkFailed {
                            work: &slot.name,
                            key: &pair.1,
                            error: &error,
                        }
                        .log();
                        if let Some(out) = slot.output {
                            queues[out].insert_entry(pair.1, QueueEntry::Failed(error));
                        }
                    }
                }
            }
        }

        // Drive the stages: globals locally, item works remotely.
        for slot_idx in 0..slots.len() {
            match slots[slot_idx].kind {
                WorkKind::Global => {
                    let primary = slots[slot_idx].output.expect("validated global output");
                    if queues[primary].is_saturated(default_queue_capacity) {
                        continue;
                    }
                    let input = slots[slot_idx].input;
                    let secondary = slots[slot_idx].secondary;
                    let WorkRunner::Global(f) = slots[slot_idx].runner.clone() else {
                        unreachable!("global slot carries a global callable");
                    };
                    let ready = {
                        let (input_q, primary_q, secondary_q) =
                            disjoint_queues_mut(&mut queues, input, primary, secondary);
                        f.poll(input_q, primary_q, secondary_q)
                    };
                    let revision: u64 = queues.iter().map(ItemQueue::revision).sum();
                    slots[slot_idx].global_stalled = if ready { None } else { Some(revision) };
                }
                WorkKind::OneShot => unreachable!("one-shot works filtered out"),
                _ => {
                    let slot = &slots[slot_idx];
                    if let Some(out) = slot.output {
                        if queues[out].is_saturated(default_queue_capacity) {
                            continue;
                        }
                    }
                    if queues[slot.input].is_empty() {
                        continue;
                    }
                    // Least-loaded admission across the pool.
                    let Some(proxy_idx) = proxies
                        .iter()
                        .enumerate()
                        .filter(|(_, p)| p.is_available(max_outstanding))
                        .min_by_key(|(_, p)| p.outstanding())
                        .map(|(i, _)| i)
                    else {
                        continue;
                    };
                    let input = slot.input;
                    let Some((key, entry)) = queues[input].pop_first() else {
                        continue;
                    };
                    match entry {
                        QueueEntry::Failed(_) => {
                            if let Some(out) = slots[slot_idx].output {
                                queues[out].insert_entry(key, entry);
                            }
                        }
                        QueueEntry::Item(item) => {
                            let slot = &slots[slot_idx];
                            WorkLaunched {
                                elapsed_secs: util::elapsed_secs(t_start),
                                work: &slot.name,
                                key: key.as_str(),
                                mem_mb: util::memory_usage_mb(),
                            }
                            .log();
                            let submitted = proxies[proxy_idx].submit(
                                slot.name.clone(),
                                key.to_string(),
                                item.payload,
                            );
                            match submitted {
                                Ok(()) => {
                                    in_flight.insert(
                                        (slot.name.clone(), key.to_string()),
                                        (slot_idx, proxy_idx),
                                    );
                                }
                                Err(error) => {
                                    failed += 1;
                                    WorkFailed {
                                        work: &slot.name,
                                        key: key.as_str(),
                                        error: &error,
                                    }
                                    .log();
                                    proxies[proxy_idx].kill();
                                    if let Some(out) = slots[slot_idx].output {
                                        queues[out].insert_entry(
                                            key,
                                            QueueEntry::Failed(WorkError::failed(
                                                error.to_string(),
                                            )),
                                        );
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }

        // Quiescence: nothing outstanding, nothing pending, globals stalled.
        if in_flight.is_empty() {
            let revision: u64 = queues.iter().map(ItemQueue::revision).sum();
            let quiescent = slots.iter().all(|slot| match slot.kind {
                WorkKind::Global => {
                    queues[slot.input].is_empty() || slot.global_stalled == Some(revision)
                }
                _ => queues[slot.input].is_empty(),
            });
            // A pool with every server dead can no longer make progress.
            let pool_dead = proxies.iter().all(WorkerProxy::is_killed);
            if quiescent || pool_dead {
                break;
            }
        }

        std::thread::sleep(poll_interval);
    }

    ExecutionCompleted {
        strategy: STRATEGY,
        completed,
        failed,
        duration: t_start.elapsed(),
    }
    .log();

    Ok(ExecutionReport::from_queues(
        queues,
        completed,
        failed,
        lost,
        ExitReason::Completed,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_covers_range_with_near_equal_parts() {
        let range = SeriesRange::new(0, 10, 1);
        let parts = partition_range(range, 3);
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], SeriesRange::new(0, 4, 1));
        assert_eq!(parts[1], SeriesRange::new(4, 7, 1));
        assert_eq!(parts[2], SeriesRange::new(7, 10, 1));

        let total: usize = parts.iter().map(SeriesRange::len).sum();
        assert_eq!(total, range.len());
        // Near-equal: lengths differ by at most one.
        let lens: Vec<usize> = parts.iter().map(SeriesRange::len).collect();
        assert!(lens.iter().max().unwrap() - lens.iter().min().unwrap() <= 1);
    }

    #[test]
    fn partition_respects_step() {
        let range = SeriesRange::new(0, 20, 2);
        let parts = partition_range(range, 3);
        let total: usize = parts.iter().map(SeriesRange::len).sum();
        assert_eq!(total, 10);

        // Contiguous: each part starts where the previous stopped.
        for pair in parts.windows(2) {
            assert_eq!(pair[0].stop, pair[1].start);
        }
        let indices: Vec<i64> = parts.iter().flat_map(|p| p.indices()).collect();
        assert_eq!(indices, range.indices().collect::<Vec<_>>());
    }

    #[test]
    fn more_parts_than_indices_leaves_empty_tails() {
        let range = SeriesRange::new(0, 2, 1);
        let parts = partition_range(range, 4);
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0].len(), 1);
        assert_eq!(parts[1].len(), 1);
        assert_eq!(parts[2].len(), 0);
        assert_eq!(parts[3].len(), 0);
    }

    #[test]
    fn empty_range_has_no_indices() {
        assert!(SeriesRange::new(5, 5, 1).is_empty());
        assert!(SeriesRange::new(5, 3, 1).is_empty());
        assert_eq!(SeriesRange::new(0, 7, 2).len(), 4);
    }
}
