// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Cooperative single-process executor.
//!
//! One long-lived task per steady-state work, all multiplexed on the tokio
//! runtime; blocking or CPU-heavy callables are offloaded with
//! `spawn_blocking` so the control tasks never stall. Two independent
//! admission counters (`active_io`, `active_cpu`) cap in-flight offloads,
//! and output-queue length caps admission per work.
//!
//! All queue and counter state lives behind a single mutex, so graph
//! mutation is serialized exactly as if it happened on one control thread;
//! workers report completions by locking that state and inserting their
//! result. Suspension points are explicit sleeps of one poll quantum
//! between attempts; ordering across sibling works is best-effort
//! round-robin.
//!
//! Cancellation is cooperative: a `CancellationToken` is checked at every
//! suspension point. A dedicated termination task trips the token once the
//! topology is quiescent (no pending input, idle counters, every global
//! work stalled at the current queue revision); Ctrl-C trips the same token
//! and marks the run interrupted. Already-offloaded blocking calls are not
//! awaited on cancellation — the scheduler just stops queuing new ones.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::errors::{ExecutionError, WorkError};
use crate::observability::messages::engine::{
    ExecutionCompleted, ExecutionInterrupted, ExecutionStarted, WorkCompleted, WorkFailed,
    WorkLaunched,
};
use crate::observability::messages::StructuredLog;
use crate::topology::queue::disjoint_queues_mut;
use crate::topology::{ItemQueue, QueueEntry, Topology, WorkKind, WorkRunner};
use crate::traits::{ExecutionReport, ExitReason, PipelineExecutor};
use crate::util;

const STRATEGY: &str = "cooperative";

/// All mutable engine state, serialized behind one lock. The queues, the
/// admission counters, and the per-global stall markers must be observed
/// together for quiescence detection to be race-free: an item is popped and
/// its counter incremented under the same guard.
struct GraphState {
    queues: Vec<ItemQueue>,
    active_io: usize,
    active_cpu: usize,
    completed: usize,
    failed: usize,
    /// Per global work: the queue revision sum at its last "not ready"
    /// poll. `Some(rev)` equal to the current sum proves the work cannot
    /// become ready without new input.
    global_stall: Vec<Option<u64>>,
}

impl GraphState {
    fn revision_sum(&self) -> u64 {
        self.queues.iter().map(ItemQueue::revision).sum()
    }

    fn counter(&mut self, kind: WorkKind) -> &mut usize {
        match kind {
            WorkKind::Io => &mut self.active_io,
            _ => &mut self.active_cpu,
        }
    }
}

/// Resolved wiring of one steady-state work.
#[derive(Clone)]
struct WorkSlot {
    name: Arc<str>,
    kind: WorkKind,
    input: usize,
    output: Option<usize>,
    secondary: Option<usize>,
    // Position in GraphState::global_stall for global works.
    global_index: Option<usize>,
}

/// Single-process cooperative executor with a bounded background pool.
pub struct CooperativeExecutor {
    max_workers: usize,
    default_queue_capacity: usize,
    poll_interval: Duration,
}

impl CooperativeExecutor {
    pub fn new(max_workers: usize, default_queue_capacity: usize) -> Self {
        Self {
            max_workers: max_workers.max(1),
            default_queue_capacity: default_queue_capacity.max(1),
            poll_interval: Duration::from_millis(10),
        }
    }

    /// Override the quantum slept between poll attempts.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Cooperative executor sized to the machine.
    pub fn default() -> Self {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self::new(workers, 8)
    }
}

#[async_trait]
impl PipelineExecutor for CooperativeExecutor {
    async fn execute(&self, topology: Topology) -> Result<ExecutionReport, ExecutionError> {
        let t_start = Instant::now();
        let (mut queues, works) = topology.into_parts();

        ExecutionStarted {
            strategy: STRATEGY,
            work_count: works.len(),
            queue_count: queues.len(),
            max_workers: self.max_workers,
        }
        .log();

        let index_of = |name: &str, queues: &[ItemQueue]| {
            queues
                .iter()
                .position(|q| q.name() == name)
                .expect("validated queue reference")
        };

        let mut initial_failed = 0usize;

        // One-shot works must be ancestors; they run once, before any task
        // is spawned, directly against the still-exclusive queue state.
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
                    initial_failed += 1;
                }
            }
        }

        // Resolve the steady-state works into index-based slots.
        let mut slots = Vec::new();
        let mut global_count = 0usize;
        for work in &works {
            let global_index = match work.kind() {
                WorkKind::OneShot => continue,
                WorkKind::Global => {
                    global_count += 1;
                    Some(global_count - 1)
                }
                _ => None,
            };
            slots.push((
                WorkSlot {
                    name: Arc::from(work.name()),
                    kind: work.kind(),
                    input: index_of(work.input_queue().expect("steady input"), &queues),
                    output: work.output().primary().map(|n| index_of(n, &queues)),
                    secondary: work.output().secondary().map(|n| index_of(n, &queues)),
                    global_index,
                },
                work.runner().clone(),
            ));
        }

        let graph = Arc::new(Mutex::new(GraphState {
            queues,
            active_io: 0,
            active_cpu: 0,
            completed: 0,
            failed: initial_failed,
            global_stall: vec![None; global_count],
        }));
        let token = CancellationToken::new();
        let interrupted = Arc::new(AtomicBool::new(false));

        // Operator interrupt: same stop flag as normal termination, but the
        // report says so.
        {
            let token = token.clone();
            let interrupted = interrupted.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = token.cancelled() => {}
                    result = tokio::signal::ctrl_c() => {
                        if result.is_ok() {
                            interrupted.store(true, Ordering::SeqCst);
                            ExecutionInterrupted { strategy: STRATEGY, in_flight: 0 }.log();
                            token.cancel();
                        }
                    }
                }
            });
        }

        let mut tasks = Vec::new();
        for (slot, runner) in slots.iter().cloned() {
            let task = match runner {
                WorkRunner::Global(f) => tokio::spawn(global_task(
                    slot,
                    f,
                    graph.clone(),
                    token.clone(),
                    self.default_queue_capacity,
                    self.poll_interval,
                )),
                WorkRunner::Io(f) | WorkRunner::Cpu(f) | WorkRunner::Plain(f) => {
                    tokio::spawn(item_task(
                        slot,
                        f,
                        graph.clone(),
                        token.clone(),
                        self.max_workers,
                        self.default_queue_capacity,
                        self.poll_interval,
                        t_start,
                    ))
                }
                WorkRunner::OneShot(_) => unreachable!("one-shot works filtered out"),
            };
            tasks.push(task);
        }

        // Termination watcher: running -> stopping once the graph is
        // quiescent; every task observing the token completes the
        // stopping -> stopped transition.
        {
            let graph = graph.clone();
            let token = token.clone();
            let slots: Vec<WorkSlot> = slots.iter().map(|(slot, _)| slot.clone()).collect();
            let poll_interval = self.poll_interval;
            tasks.push(tokio::spawn(async move {
                loop {
                    if token.is_cancelled() {
                        return;
                    }
                    tokio::time::sleep(poll_interval).await;
                    let state = graph.lock().await;
                    if state.active_io != 0 || state.active_cpu != 0 {
                        continue;
                    }
                    let revision = state.revision_sum();
                    let quiescent = slots.iter().all(|slot| match slot.global_index {
                        None => state.queues[slot.input].is_empty(),
                        Some(gi) => {
                            state.queues[slot.input].is_empty()
                                || state.global_stall[gi] == Some(revision)
                        }
                    });
                    if quiescent {
                        token.cancel();
                        return;
                    }
                }
            }));
        }

        for task in tasks {
            let _ = task.await;
        }

        let mut state = graph.lock().await;
        let completed = state.completed;
        let failed = state.failed;
        let exit = if interrupted.load(Ordering::SeqCst) {
            ExitReason::Interrupted
        } else {
            ExitReason::Completed
        };

        ExecutionCompleted {
            strategy: STRATEGY,
            completed,
            failed,
            duration: t_start.elapsed(),
        }
        .log();

        let queues = std::mem::take(&mut state.queues);
        Ok(ExecutionReport::from_queues(
            queues, completed, failed, 0, exit,
        ))
    }
}

/// Task loop for a global work: sequential semantics (poll with whole queue
/// handles, backpressure on the primary output, re-poll on `false`) inside
/// the cooperative loop.
async fn global_task(
    slot: WorkSlot,
    f: Arc<dyn crate::topology::GlobalFn>,
    graph: Arc<Mutex<GraphState>>,
    token: CancellationToken,
    default_capacity: usize,
    poll_interval: Duration,
) {
    let gi = slot.global_index.expect("global slot");
    let primary = slot.output.expect("validated global output");
    loop {
        if token.is_cancelled() {
            return;
        }
        {
            let mut state = graph.lock().await;
            if !state.queues[primary].is_saturated(default_capacity) {
                let t_work = Instant::now();
                let ready = {
                    let (input_q, primary_q, secondary_q) =
                        disjoint_queues_mut(&mut state.queues, slot.input, primary, slot.secondary);
                    f.poll(input_q, primary_q, secondary_q)
                };
                let revision = state.revision_sum();
                if ready {
                    state.global_stall[gi] = None;
                    WorkCompleted {
                        work: &slot.name,
                        key: "batch",
                        duration_secs: util::elapsed_secs(t_work),
                    }
                    .log();
                } else {
                    state.global_stall[gi] = Some(revision);
                }
            }
        }
        tokio::time::sleep(poll_interval).await;
    }
}

/// What the admission check decided for one iteration of an item-work task.
enum Admission {
    Wait,
    Forwarded,
    Run(crate::topology::ItemKey, crate::topology::WorkItem),
}

/// Task loop for an io/cpu/plain work: admission-check, pop, offload to the
/// blocking pool, report the completion back into the shared graph state.
#[allow(clippy::too_many_arguments)]
async fn item_task(
    slot: WorkSlot,
    f: Arc<dyn crate::topology::WorkFn>,
    graph: Arc<Mutex<GraphState>>,
    token: CancellationToken,
    max_workers: usize,
    default_capacity: usize,
    poll_interval: Duration,
    t_start: Instant,
) {
    loop {
        if token.is_cancelled() {
            return;
        }

        let admission = {
            let mut state = graph.lock().await;
            let at_cap = *state.counter(slot.kind) >= max_workers;
            let output_full = slot
                .output
                .map(|out| state.queues[out].is_saturated(default_capacity))
                .unwrap_or(false);
            if state.queues[slot.input].is_empty() || at_cap || output_full {
                Admission::Wait
            } else {
                let (key, entry) = state.queues[slot.input]
                    .pop_first()
                    .expect("non-empty input");
                match entry {
                    QueueEntry::Failed(_) => {
                        // Upstream failure: forward the tag, never re-run.
                        if let Some(out) = slot.output {
                            state.queues[out].insert_entry(key, entry);
                        }
                        Admission::Forwarded
                    }
                    QueueEntry::Item(item) => {
                        *state.counter(slot.kind) += 1;
                        Admission::Run(key, item)
                    }
                }
            }
        };

        match admission {
            Admission::Wait => tokio::time::sleep(poll_interval).await,
            Admission::Forwarded => {}
            Admission::Run(key, item) => {
                WorkLaunched {
                    elapsed_secs: util::elapsed_secs(t_start),
                    work: &slot.name,
                    key: key.as_str(),
                    mem_mb: util::memory_usage_mb(),
                }
                .log();

                let f = f.clone();
                let graph = graph.clone();
                let slot = slot.clone();
                tokio::spawn(async move {
                    let t_work = Instant::now();
                    let outcome = tokio::task::spawn_blocking(move || f.call(item)).await;
                    let result = match outcome {
                        Ok(result) => result,
                        Err(join_error) => Err(WorkError::Panicked {
                            message: join_error.to_string(),
                        }),
                    };

                    // After an interrupted run the queues may already be
                    // drained into the report; a late completion then has
                    // nowhere to land and is dropped.
                    let mut state = graph.lock().await;
                    match result {
                        Ok(output_item) => {
                            state.completed += 1;
                            WorkCompleted {
                                work: &slot.name,
                                key: key.as_str(),
                                duration_secs: util::elapsed_secs(t_work),
                            }
                            .log();
                            if let Some(out) = slot.output {
                                if let Some(queue) = state.queues.get_mut(out) {
                                    queue.insert(key, output_item);
                                }
                            }
                        }
                        Err(error) => {
                            state.failed += 1;
                            WorkFailed {
                                work: &slot.name,
                                key: key.as_str(),
                                error: &error,
                            }
                            .log();
                            if let Some(out) = slot.output {
                                if let Some(queue) = state.queues.get_mut(out) {
                                    queue.insert_entry(key, QueueEntry::Failed(error));
                                }
                            }
                        }
                    }
                    *state.counter(slot.kind) -= 1;
                });

                // Yield the quantum so sibling tasks get their turn.
                tokio::time::sleep(poll_interval).await;
            }
        }
    }
}
