// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Hybrid thread/process executor.
//!
//! Each steady-state work gets a waiting-queue wrapper owning its pending
//! items and a `check_and_act` step: if non-empty and under the worker cap,
//! pop exactly one item and dispatch exactly one worker — an OS thread for
//! io works, an out-of-process worker (speaking the stdio protocol) for cpu
//! and plain works, and control-loop polling of the callable for global
//! works, which aggregate items until they have matched a group. Popping
//! before dispatch gives at-most-one-worker-per-item.
//!
//! Completions funnel back through a channel and are applied by the single
//! control loop, so waiting-queue contents are never mutated concurrently.
//! A watchdog thread independently polls process liveness: a worker that
//! never reports `Started` within the timeout is force-terminated and its
//! item counted lost — a documented limitation, not guaranteed delivery.
//!
//! Under memory pressure the loop stops launching workers and drains only
//! the final waiting queue until the backlog clears. On an interrupt or
//! preemption signal it stops admitting, lets in-flight workers finish
//! (force-finishing the final queue when it is thread-backed), and reports
//! `Interrupted`.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::errors::{ExecutionError, WorkError};
use crate::observability::messages::engine::{
    ExecutionCompleted, ExecutionInterrupted, ExecutionStarted, WorkCompleted, WorkFailed,
    WorkLaunched,
};
use crate::observability::messages::worker::{
    FinalQueueDrained, MemoryPressure, WorkerNeverStarted, WorkerSpawned,
};
use crate::observability::messages::StructuredLog;
use crate::server::{ClientEnvelope, ProxyEvent, ServerEnvelope, WorkerProxy};
use crate::topology::queue::disjoint_queues_mut;
use crate::topology::{ItemKey, ItemQueue, QueueEntry, Topology, WorkItem, WorkKind, WorkRunner};
use crate::traits::{ExecutionReport, ExitReason, PipelineExecutor};
use crate::util;

const STRATEGY: &str = "hybrid";

/// Executor running io works on threads and cpu works on worker processes,
/// with a liveness watchdog.
pub struct HybridExecutor {
    max_workers: usize,
    default_queue_capacity: usize,
    tick: Duration,
    watchdog_timeout: Duration,
    memory_limit_mb: Option<f64>,
    worker_command: Vec<String>,
}

impl HybridExecutor {
    pub fn new(max_workers: usize, default_queue_capacity: usize, worker_command: Vec<String>) -> Self {
        Self {
            max_workers: max_workers.max(1),
            default_queue_capacity: default_queue_capacity.max(1),
            tick: Duration::from_millis(10),
            watchdog_timeout: Duration::from_secs(10),
            memory_limit_mb: None,
            worker_command,
        }
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// The watchdog's "worker never started" timeout. A heuristic safety
    /// net, not a deadline on work duration.
    pub fn with_watchdog_timeout(mut self, timeout: Duration) -> Self {
        self.watchdog_timeout = timeout;
        self
    }

    pub fn with_memory_limit_mb(mut self, limit: f64) -> Self {
        self.memory_limit_mb = Some(limit);
        self
    }
}

/// A completed (or failed) item reported by a worker, applied by the
/// control loop. Each worker reports exactly once.
struct Completion {
    slot: usize,
    key: ItemKey,
    result: Result<WorkItem, WorkError>,
}

/// The waiting-queue wrapper around one steady-state work.
struct StageSlot {
    name: String,
    kind: WorkKind,
    runner: WorkRunner,
    input: usize,
    output: Option<usize>,
    secondary: Option<usize>,
    in_flight: usize,
    /// Queue revision sum at this global work's last "not ready" poll.
    global_stalled: Option<u64>,
}

/// One live worker process, shared with the watchdog thread.
struct ProcTracker {
    slot: usize,
    key: ItemKey,
    work: String,
    proxy: WorkerProxy,
}

struct HybridRun {
    queues: Vec<ItemQueue>,
    slots: Vec<StageSlot>,
    completions_tx: Sender<Completion>,
    completions: Receiver<Completion>,
    events: Receiver<(usize, ProxyEvent)>,
    events_tx: Sender<(usize, ProxyEvent)>,
    trackers: Arc<Mutex<HashMap<usize, ProcTracker>>>,
    lost: Receiver<usize>,
    next_tracker: usize,
    worker_command: Vec<String>,
    max_workers: usize,
    default_queue_capacity: usize,
    t_start: Instant,
    completed: usize,
    failed: usize,
    lost_count: usize,
    draining_final: bool,
    admitting: bool,
}

impl HybridRun {
    fn active_workers(&self, kind_is_io: bool) -> usize {
        self.slots
            .iter()
            .filter(|slot| (slot.kind == WorkKind::Io) == kind_is_io)
            .map(|slot| slot.in_flight)
            .sum()
    }

    fn total_in_flight(&self) -> usize {
        self.slots.iter().map(|slot| slot.in_flight).sum()
    }

    fn revision_sum(&self) -> u64 {
        self.queues.iter().map(ItemQueue::revision).sum()
    }

    fn apply_completion(&mut self, completion: Completion) {
        let slot = &mut self.slots[completion.slot];
        slot.in_flight = slot.in_flight.saturating_sub(1);
        match completion.result {
            Ok(item) => {
                self.completed += 1;
                if let Some(out) = slot.output {
                    self.queues[out].insert(completion.key, item);
                }
            }
            Err(error) => {
                self.failed += 1;
                WorkFailed {
                    work: &slot.name,
                    key: completion.key.as_str(),
                    error: &error,
                }
                .log();
                if let Some(out) = slot.output {
                    self.queues[out].insert_entry(completion.key, QueueEntry::Failed(error));
                }
            }
        }
    }

    fn drain_reports(&mut self) {
        loop {
            match self.completions.try_recv() {
                Ok(completion) => self.apply_completion(completion),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }

        loop {
            let (tracker_id, event) = match self.events.try_recv() {
                Ok(pair) => pair,
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            };
            match event {
                ProxyEvent::Message(ServerEnvelope::Result { key, outcome, .. }) => {
                    let Some(mut tracker) = self.trackers.lock().unwrap().remove(&tracker_id)
                    else {
                        continue;
                    };
                    tracker.proxy.acknowledge();
                    tracker.proxy.request_shutdown();
                    let round_trip = tracker.proxy.age();
                    tracker.proxy.kill();
                    let result = match outcome {
                        Ok(payload) => {
                            WorkCompleted {
                                work: &tracker.work,
                                key: &key,
                                duration_secs: round_trip.as_secs_f64(),
                            }
                            .log();
                            Ok(WorkItem::new(payload))
                        }
                        Err(message) => Err(WorkError::Failed { message }),
                    };
                    self.apply_completion(Completion {
                        slot: tracker.slot,
                        key: tracker.key,
                        result,
                    });
                }
                ProxyEvent::Message(_) => {}
                ProxyEvent::Disconnected => {
                    // A worker that died mid-item without answering. A
                    // watchdog kill already removed its tracker.
                    let Some(tracker) = self.trackers.lock().unwrap().remove(&tracker_id) else {
                        continue;
                    };
                    self.apply_completion(Completion {
                        slot: tracker.slot,
                        key: tracker.key,
                        result: Err(WorkError::WorkerLost),
                    });
                }
            }
        }

        loop {
            match self.lost.try_recv() {
                Ok(slot) => {
                    self.slots[slot].in_flight = self.slots[slot].in_flight.saturating_sub(1);
                    self.lost_count += 1;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
    }

    /// One `check_and_act` pass over every waiting queue: pop at most one
    /// item per slot and dispatch one worker for it.
    fn dispatch_round(&mut self) {
        for slot_idx in 0..self.slots.len() {
            let final_slot = slot_idx == self.slots.len() - 1;
            if self.draining_final && !final_slot {
                continue;
            }
            if !self.admitting && !(final_slot && self.slots[slot_idx].kind == WorkKind::Io) {
                continue;
            }

            match self.slots[slot_idx].kind {
                WorkKind::Global => self.poll_global(slot_idx),
                WorkKind::Io => self.dispatch_thread(slot_idx),
                WorkKind::Cpu | WorkKind::Plain => self.dispatch_process(slot_idx),
                WorkKind::OneShot => unreachable!("one-shot works filtered out"),
            }
        }
    }

    fn admission(&mut self, slot_idx: usize) -> Option<(ItemKey, WorkItem)> {
        let is_io = self.slots[slot_idx].kind == WorkKind::Io;
        if self.active_workers(is_io) >= self.max_workers {
            return None;
        }
        let slot = &self.slots[slot_idx];
        if let Some(out) = slot.output {
            if self.queues[out].is_saturated(self.default_queue_capacity) {
                return None;
            }
        }
        let input = slot.input;
        let output = slot.output;
        let (key, entry) = self.queues[input].pop_first()?;
        match entry {
            QueueEntry::Failed(_) => {
                // Forward upstream failures untouched.
                if let Some(out) = output {
                    self.queues[out].insert_entry(key, entry);
                }
                None
            }
            QueueEntry::Item(item) => Some((key, item)),
        }
    }

    fn dispatch_thread(&mut self, slot_idx: usize) {
        let Some((key, item)) = self.admission(slot_idx) else {
            return;
        };
        let slot = &mut self.slots[slot_idx];
        slot.in_flight += 1;
        WorkLaunched {
            elapsed_secs: util::elapsed_secs(self.t_start),
            work: &slot.name,
            key: key.as_str(),
            mem_mb: util::memory_usage_mb(),
        }
        .log();

        let f = slot
            .runner
            .item_fn()
            .expect("io slot carries an item callable")
            .clone();
        let name = slot.name.clone();
        let tx = self.completions_tx.clone();
        std::thread::spawn(move || {
            let t_work = Instant::now();
            let result = f.call(item);
            if result.is_ok() {
                WorkCompleted {
                    work: &name,
                    key: key.as_str(),
                    duration_secs: util::elapsed_secs(t_work),
                }
                .log();
            }
            let _ = tx.send(Completion {
                slot: slot_idx,
                key,
                result,
            });
        });
    }

    fn dispatch_process(&mut self, slot_idx: usize) {
        let Some((key, item)) = self.admission(slot_idx) else {
            return;
        };

        let tracker_id = self.next_tracker;
        self.next_tracker += 1;

        // The proxy index doubles as the tracker id, so events come back
        // already tagged.
        let spawned = WorkerProxy::spawn(tracker_id, &self.worker_command, self.events_tx.clone());
        let mut proxy = match spawned {
            Ok(proxy) => proxy,
            Err(error) => {
                // Cannot even start a process: degrade like a failed item.
                let slot = &mut self.slots[slot_idx];
                WorkFailed {
                    work: &slot.name,
                    key: key.as_str(),
                    error: &error,
                }
                .log();
                self.failed += 1;
                let output = self.slots[slot_idx].output;
                if let Some(out) = output {
                    self.queues[out].insert_entry(
                        key,
                        QueueEntry::Failed(WorkError::failed(error.to_string())),
                    );
                }
                return;
            }
        };

        let slot = &mut self.slots[slot_idx];
        slot.in_flight += 1;
        WorkLaunched {
            elapsed_secs: util::elapsed_secs(self.t_start),
            work: &slot.name,
            key: key.as_str(),
            mem_mb: util::memory_usage_mb(),
        }
        .log();
        WorkerSpawned {
            work: &slot.name,
            key: key.as_str(),
            pid: proxy.pid(),
        }
        .log();

        let t_start_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let submit = proxy
            .send(&ClientEnvelope::Start { t_start_ms })
            .and_then(|_| proxy.submit(slot.name.clone(), key.to_string(), item.payload));
        if let Err(error) = submit {
            WorkFailed {
                work: &slot.name,
                key: key.as_str(),
                error: &error,
            }
            .log();
            proxy.kill();
            slot.in_flight -= 1;
            self.failed += 1;
            let output = self.slots[slot_idx].output;
            if let Some(out) = output {
                self.queues[out]
                    .insert_entry(key, QueueEntry::Failed(WorkError::failed(error.to_string())));
            }
            return;
        }

        let work = self.slots[slot_idx].name.clone();
        self.trackers.lock().unwrap().insert(
            tracker_id,
            ProcTracker {
                slot: slot_idx,
                key,
                work,
                proxy,
            },
        );
    }

    fn poll_global(&mut self, slot_idx: usize) {
        let primary = self.slots[slot_idx].output.expect("validated global output");
        if self.queues[primary].is_saturated(self.default_queue_capacity) {
            return;
        }
        let input = self.slots[slot_idx].input;
        let secondary = self.slots[slot_idx].secondary;
        let WorkRunner::Global(f) = self.slots[slot_idx].runner.clone() else {
            unreachable!("global slot carries a global callable");
        };
        let ready = {
            let (input_q, primary_q, secondary_q) =
                disjoint_queues_mut(&mut self.queues, input, primary, secondary);
            f.poll(input_q, primary_q, secondary_q)
        };
        let revision = self.revision_sum();
        let slot = &mut self.slots[slot_idx];
        if ready {
            slot.global_stalled = None;
            WorkCompleted {
                work: &slot.name,
                key: "batch",
                duration_secs: 0.0,
            }
            .log();
        } else {
            slot.global_stalled = Some(revision);
        }
    }

    fn quiescent(&self) -> bool {
        if self.total_in_flight() != 0 {
            return false;
        }
        let revision = self.revision_sum();
        self.slots.iter().all(|slot| match slot.kind {
            WorkKind::Global => {
                self.queues[slot.input].is_empty() || slot.global_stalled == Some(revision)
            }
            _ => self.queues[slot.input].is_empty(),
        })
    }
}

#[async_trait]
impl PipelineExecutor for HybridExecutor {
    async fn execute(&self, topology: Topology) -> Result<ExecutionReport, ExecutionError> {
        let interrupted = Arc::new(AtomicBool::new(false));
        {
            let interrupted = interrupted.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    interrupted.store(true, Ordering::SeqCst);
                }
            });
        }

        let max_workers = self.max_workers;
        let default_queue_capacity = self.default_queue_capacity;
        let tick = self.tick;
        let watchdog_timeout = self.watchdog_timeout;
        let memory_limit_mb = self.memory_limit_mb;
        let worker_command = self.worker_command.clone();

        // The control loop is fully synchronous; run it on the blocking
        // pool so the async runtime stays responsive.
        tokio::task::spawn_blocking(move || {
            run_control_loop(
                topology,
                max_workers,
                default_queue_capacity,
                tick,
                watchdog_timeout,
                memory_limit_mb,
                worker_command,
                interrupted,
            )
        })
        .await
        .map_err(|e| ExecutionError::internal(format!("hybrid control loop panicked: {}", e)))?
    }
}

#[allow(clippy::too_many_arguments)]
fn run_control_loop(
    topology: Topology,
    max_workers: usize,
    default_queue_capacity: usize,
    tick: Duration,
    watchdog_timeout: Duration,
    memory_limit_mb: Option<f64>,
    worker_command: Vec<String>,
    interrupted: Arc<AtomicBool>,
) -> Result<ExecutionReport, ExecutionError> {
    let t_start = Instant::now();
    let (mut queues, works) = topology.into_parts();

    ExecutionStarted {
        strategy: STRATEGY,
        work_count: works.len(),
        queue_count: queues.len(),
        max_workers,
    }
    .log();

    let index_of = |name: &str, queues: &[ItemQueue]| {
        queues
            .iter()
            .position(|q| q.name() == name)
            .expect("validated queue reference")
    };

    let mut failed = 0usize;
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

    let slots: Vec<StageSlot> = works
        .iter()
        .filter(|work| work.kind() != WorkKind::OneShot)
        .map(|work| StageSlot {
            name: work.name().to_string(),
            kind: work.kind(),
            runner: work.runner().clone(),
            input: index_of(work.input_queue().expect("steady input"), &queues),
            output: work.output().primary().map(|n| index_of(n, &queues)),
            secondary: work.output().secondary().map(|n| index_of(n, &queues)),
            in_flight: 0,
            global_stalled: None,
        })
        .collect();

    let (completions_tx, completions) = std::sync::mpsc::channel();
    let (events_tx, events) = std::sync::mpsc::channel();
    let (lost_tx, lost) = std::sync::mpsc::channel();
    let trackers: Arc<Mutex<HashMap<usize, ProcTracker>>> = Arc::new(Mutex::new(HashMap::new()));

    // Watchdog thread: independently polls process liveness and kills
    // workers that never reported `Started` within the timeout.
    let watchdog_stop = Arc::new(AtomicBool::new(false));
    let watchdog = {
        let trackers = trackers.clone();
        let stop = watchdog_stop.clone();
        std::thread::spawn(move || {
            while !stop.load(Ordering::SeqCst) {
                std::thread::sleep(tick);
                let mut guard = trackers.lock().unwrap();
                let stale: Vec<usize> = guard
                    .iter()
                    .filter(|(_, tracker)| {
                        !tracker.proxy.has_started() && tracker.proxy.age() > watchdog_timeout
                    })
                    .map(|(&id, _)| id)
                    .collect();
                for id in stale {
                    let Some(mut tracker) = guard.remove(&id) else {
                        continue;
                    };
                    WorkerNeverStarted {
                        work: &tracker.work,
                        key: tracker.key.as_str(),
                        waited_secs: tracker.proxy.age().as_secs_f64(),
                    }
                    .log();
                    tracker.proxy.kill();
                    if lost_tx.send(tracker.slot).is_err() {
                        return;
                    }
                }
            }
        })
    };

    let slot_count = slots.len();
    let mut run = HybridRun {
        queues,
        slots,
        completions_tx,
        completions,
        events,
        events_tx,
        trackers,
        lost,
        next_tracker: 0,
        worker_command,
        max_workers,
        default_queue_capacity,
        t_start,
        completed: 0,
        failed,
        lost_count: 0,
        draining_final: false,
        admitting: true,
    };

    let mut interrupt_logged = false;
    loop {
        run.drain_reports();

        if interrupted.load(Ordering::SeqCst) && run.admitting {
            run.admitting = false;
            interrupt_logged = true;
            ExecutionInterrupted {
                strategy: STRATEGY,
                in_flight: run.total_in_flight(),
            }
            .log();
        }

        // Memory pressure: stop launching and drain only the final queue.
        if let Some(limit) = memory_limit_mb {
            let resident = util::memory_usage_mb();
            if !run.draining_final && resident > limit {
                MemoryPressure {
                    resident_mb: resident,
                    limit_mb: limit,
                }
                .log();
                run.draining_final = true;
            } else if run.draining_final && slot_count > 0 {
                let last = &run.slots[slot_count - 1];
                if run.queues[last.input].is_empty() && last.in_flight == 0 {
                    FinalQueueDrained {
                        queue: run.queues[last.input].name(),
                    }
                    .log();
                    run.draining_final = false;
                }
            }
        }

        if slot_count > 0 {
            run.dispatch_round();
        }

        if run.admitting {
            if run.quiescent() {
                break;
            }
        } else {
            // Interrupted: wait for in-flight workers; the final queue keeps
            // draining when thread-backed (handled by dispatch_round).
            let final_io_pending = run
                .slots
                .last()
                .map(|slot| slot.kind == WorkKind::Io && !run.queues[slot.input].is_empty())
                .unwrap_or(false);
            if run.total_in_flight() == 0 && !final_io_pending {
                break;
            }
        }

        std::thread::sleep(tick);
    }

    watchdog_stop.store(true, Ordering::SeqCst);
    let _ = watchdog.join();
    run.drain_reports();

    // Anything still tracked was neither answered nor watchdog-killed;
    // terminate it now rather than leak processes.
    {
        let mut guard = run.trackers.lock().unwrap();
        for (_, mut tracker) in guard.drain() {
            tracker.proxy.kill();
        }
    }

    let exit = if interrupt_logged {
        ExitReason::Interrupted
    } else {
        ExitReason::Completed
    };

    ExecutionCompleted {
        strategy: STRATEGY,
        completed: run.completed,
        failed: run.failed,
        duration: t_start.elapsed(),
    }
    .log();

    Ok(ExecutionReport::from_queues(
        run.queues,
        run.completed,
        run.failed,
        run.lost_count,
        exit,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::Work;

    fn fast(worker_command: Vec<String>) -> HybridExecutor {
        HybridExecutor::new(4, 8, worker_command)
            .with_tick(Duration::from_millis(1))
            .with_watchdog_timeout(Duration::from_millis(200))
    }

    fn parse_and_double(item: WorkItem) -> Result<WorkItem, WorkError> {
        let value: i64 = String::from_utf8_lossy(&item.payload)
            .parse()
            .map_err(|_| WorkError::failed("not a number"))?;
        Ok(WorkItem::new((value * 2).to_string()))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn io_works_run_on_threads_to_completion() {
        let mut topology = Topology::new();
        topology.add_queue(ItemQueue::new("source"));
        topology.add_queue(ItemQueue::new("doubled"));
        topology.add_work(Work::io(
            "double",
            "source",
            Some("doubled".to_string()),
            parse_and_double,
        ));
        for key in ["1", "2", "3"] {
            topology
                .queue_mut("source")
                .unwrap()
                .insert(key, WorkItem::new(key.as_bytes().to_vec()));
        }

        let report = fast(vec!["false".to_string()])
            .execute(topology)
            .await
            .unwrap();
        assert_eq!(report.exit, ExitReason::Completed);
        assert_eq!(report.completed, 3);
        assert_eq!(report.payload("doubled", "2"), Some(b"4".as_slice()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn chained_io_and_global_pipeline() {
        let mut topology = Topology::new();
        topology.add_queue(ItemQueue::new("frames"));
        topology.add_queue(ItemQueue::new("couples"));
        topology.add_queue(ItemQueue::new("stored"));
        topology.add_work(Work::global(
            "pair_frames",
            "frames",
            "couples",
            None,
            |input: &mut ItemQueue, output: &mut ItemQueue, _: Option<&mut ItemQueue>| {
                if input.len() < 2 {
                    return false;
                }
                let (a_key, a) = input.pop_first().unwrap();
                let (b_key, b) = input.pop_first().unwrap();
                let mut payload = a.item().unwrap().payload.clone();
                payload.extend_from_slice(b"|");
                payload.extend_from_slice(&b.item().unwrap().payload);
                output.insert(format!("{}&{}", a_key, b_key), WorkItem::new(payload));
                true
            },
        ));
        topology.add_work(Work::io(
            "store_couples",
            "couples",
            Some("stored".to_string()),
            |item: WorkItem| Ok(item),
        ));
        for key in ["1", "2", "3", "4", "5"] {
            topology
                .queue_mut("frames")
                .unwrap()
                .insert(key, WorkItem::new(key.as_bytes().to_vec()));
        }

        let report = fast(vec!["false".to_string()])
            .execute(topology)
            .await
            .unwrap();
        assert_eq!(report.queue("stored").len(), 2);
        assert_eq!(report.payload("stored", "1&2"), Some(b"1|2".as_slice()));
        assert_eq!(report.payload("stored", "3&4"), Some(b"3|4".as_slice()));
        // Odd frame stays unpaired; the run still terminated.
        assert_eq!(report.queue("frames").len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn io_error_tags_item_and_continues() {
        let mut topology = Topology::new();
        topology.add_queue(ItemQueue::new("source"));
        topology.add_queue(ItemQueue::new("doubled"));
        topology.add_work(Work::io(
            "double",
            "source",
            Some("doubled".to_string()),
            parse_and_double,
        ));
        for (key, payload) in [("1", "1"), ("2", "oops"), ("3", "3")] {
            topology
                .queue_mut("source")
                .unwrap()
                .insert(key, WorkItem::new(payload.as_bytes().to_vec()));
        }

        let report = fast(vec!["false".to_string()])
            .execute(topology)
            .await
            .unwrap();
        assert_eq!(report.completed, 2);
        assert_eq!(report.failed, 1);
        assert!(report.entry("doubled", "2").unwrap().is_failed());
        assert_eq!(report.payload("doubled", "3"), Some(b"6".as_slice()));
    }

    /// A worker that speaks no protocol never reports `Started`: the
    /// watchdog must kill it, count the item lost, and the control loop
    /// must keep processing the io work's items.
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn watchdog_kills_silent_worker_and_loop_continues() {
        let mut topology = Topology::new();
        topology.add_queue(ItemQueue::new("cpu_in"));
        topology.add_queue(ItemQueue::new("cpu_out"));
        topology.add_queue(ItemQueue::new("io_in"));
        topology.add_queue(ItemQueue::new("io_out"));
        topology.add_work(Work::cpu(
            "remote_stage",
            "cpu_in",
            Some("cpu_out".to_string()),
            parse_and_double,
        ));
        topology.add_work(Work::io(
            "local_stage",
            "io_in",
            Some("io_out".to_string()),
            parse_and_double,
        ));
        topology
            .queue_mut("cpu_in")
            .unwrap()
            .insert("stuck", WorkItem::new(b"7".to_vec()));
        for key in ["1", "2", "3"] {
            topology
                .queue_mut("io_in")
                .unwrap()
                .insert(key, WorkItem::new(key.as_bytes().to_vec()));
        }

        // `sleep` ignores its stdin and never writes a `Started` envelope,
        // so only the watchdog can reclaim the worker slot.
        let report = fast(vec!["sleep".to_string(), "1000".to_string()])
            .execute(topology)
            .await
            .unwrap();

        assert_eq!(report.lost, 1);
        assert_eq!(report.queue("cpu_out").len(), 0);
        assert_eq!(report.completed, 3);
        assert_eq!(report.payload("io_out", "3"), Some(b"6".as_slice()));
        assert_eq!(report.exit, ExitReason::Completed);
    }
}
