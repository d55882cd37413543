// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Sequential executor: a single deterministic control loop.
//!
//! One-shot works run once up front, then the loop iterates works in
//! declaration order, processing at most one item per work per pass. There
//! is no concurrency anywhere, which makes this the reference
//! implementation: the concurrent executors are tested against its results.
//!
//! Termination is quiescence-based: the loop exits after a full pass in
//! which no work made progress — every item work found its input empty and
//! every global work reported "not ready". This also terminates pipelines
//! where a global work can never pair its remaining input, instead of
//! spinning on it forever.

use async_trait::async_trait;
use std::cell::RefCell;
use std::collections::HashMap;
use std::time::Instant;

use crate::errors::ExecutionError;
use crate::observability::messages::engine::{
    ExecutionCompleted, ExecutionStarted, WorkCompleted, WorkFailed, WorkLaunched,
};
use crate::observability::messages::StructuredLog;
use crate::topology::{ItemQueue, QueueEntry, Topology, WorkRunner};
use crate::traits::{ExecutionReport, ExitReason, PipelineExecutor};
use crate::util;

const STRATEGY: &str = "sequential";

/// Fully deterministic executor: no concurrency, FIFO order, at most one
/// item per work per pass.
pub struct SequentialExecutor {
    /// Backpressure hint for queues without their own bound.
    default_queue_capacity: usize,
}

impl SequentialExecutor {
    pub fn new(default_queue_capacity: usize) -> Self {
        Self {
            default_queue_capacity: default_queue_capacity.max(1),
        }
    }

    fn run(&self, topology: Topology) -> Result<ExecutionReport, ExecutionError> {
        let t_start = Instant::now();
        let (queues, works) = topology.into_parts();

        ExecutionStarted {
            strategy: STRATEGY,
            work_count: works.len(),
            queue_count: queues.len(),
            max_workers: 1,
        }
        .log();

        let index: HashMap<String, usize> = queues
            .iter()
            .enumerate()
            .map(|(i, q)| (q.name().to_string(), i))
            .collect();
        let queues: Vec<RefCell<ItemQueue>> = queues.into_iter().map(RefCell::new).collect();

        let mut completed = 0usize;
        let mut failed = 0usize;

        // One-shot works are topology ancestors and run exactly once, before
        // the steady-state loop.
        for work in &works {
            if let WorkRunner::OneShot(f) = work.runner() {
                let out = index[work.output().primary().expect("validated one-shot output")];
                if let Err(error) = f.run(&mut queues[out].borrow_mut()) {
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

        loop {
            let mut progress = false;

            for work in &works {
                match work.runner() {
                    WorkRunner::OneShot(_) => {}
                    WorkRunner::Global(f) => {
                        let in_idx = index[work.input_queue().expect("validated global input")];
                        let primary_idx =
                            index[work.output().primary().expect("validated global output")];
                        if queues[primary_idx]
                            .borrow()
                            .is_saturated(self.default_queue_capacity)
                        {
                            // Backpressure: skip this round.
                            continue;
                        }
                        let mut input = queues[in_idx].borrow_mut();
                        let mut primary = queues[primary_idx].borrow_mut();
                        let mut secondary = work
                            .output()
                            .secondary()
                            .map(|name| queues[index[name]].borrow_mut());
                        let t_work = Instant::now();
                        let ready =
                            f.poll(&mut input, &mut primary, secondary.as_deref_mut());
                        if ready {
                            WorkCompleted {
                                work: work.name(),
                                key: "batch",
                                duration_secs: util::elapsed_secs(t_work),
                            }
                            .log();
                            progress = true;
                        }
                    }
                    WorkRunner::Io(f) | WorkRunner::Cpu(f) | WorkRunner::Plain(f) => {
                        let in_idx = index[work.input_queue().expect("validated item input")];
                        let popped = queues[in_idx].borrow_mut().pop_first();
                        let Some((key, entry)) = popped else {
                            continue;
                        };
                        progress = true;

                        let output = work.output().primary().map(|name| &queues[index[name]]);

                        let item = match entry {
                            QueueEntry::Item(item) => item,
                            QueueEntry::Failed(_) => {
                                // An upstream failure: forward it, never
                                // re-execute.
                                if let Some(queue) = output {
                                    queue.borrow_mut().insert_entry(key, entry);
                                }
                                continue;
                            }
                        };

                        WorkLaunched {
                            elapsed_secs: util::elapsed_secs(t_start),
                            work: work.name(),
                            key: key.as_str(),
                            mem_mb: util::memory_usage_mb(),
                        }
                        .log();

                        let t_work = Instant::now();
                        match f.call(item) {
                            Ok(result) => {
                                WorkCompleted {
                                    work: work.name(),
                                    key: key.as_str(),
                                    duration_secs: util::elapsed_secs(t_work),
                                }
                                .log();
                                completed += 1;
                                if let Some(queue) = output {
                                    queue.borrow_mut().insert(key, result);
                                }
                            }
                            Err(error) => {
                                WorkFailed {
                                    work: work.name(),
                                    key: key.as_str(),
                                    error: &error,
                                }
                                .log();
                                failed += 1;
                                if let Some(queue) = output {
                                    queue
                                        .borrow_mut()
                                        .insert_entry(key, QueueEntry::Failed(error));
                                }
                            }
                        }
                    }
                }
            }

            if !progress {
                break;
            }
        }

        ExecutionCompleted {
            strategy: STRATEGY,
            completed,
            failed,
            duration: t_start.elapsed(),
        }
        .log();

        Ok(ExecutionReport::from_queues(
            queues.into_iter().map(RefCell::into_inner).collect(),
            completed,
            failed,
            0,
            ExitReason::Completed,
        ))
    }
}

impl Default for SequentialExecutor {
    fn default() -> Self {
        Self::new(8)
    }
}

#[async_trait]
impl PipelineExecutor for SequentialExecutor {
    async fn execute(&self, topology: Topology) -> Result<ExecutionReport, ExecutionError> {
        self.run(topology)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::WorkError;
    use crate::topology::{Work, WorkItem};

    fn double(item: WorkItem) -> Result<WorkItem, WorkError> {
        let value: i64 = String::from_utf8_lossy(&item.payload)
            .parse()
            .map_err(|e| WorkError::failed(format!("not a number: {}", e)))?;
        Ok(WorkItem::new((value * 2).to_string()))
    }

    fn seeded_topology(keys: &[(&str, &str)]) -> Topology {
        let mut topology = Topology::new();
        topology.add_queue(ItemQueue::new("source"));
        topology.add_queue(ItemQueue::new("doubled"));
        topology.add_work(Work::cpu("double", "source", Some("doubled".to_string()), double));
        for (key, payload) in keys {
            topology
                .queue_mut("source")
                .unwrap()
                .insert(*key, WorkItem::new(payload.as_bytes().to_vec()));
        }
        topology
    }

    #[tokio::test]
    async fn doubles_every_seeded_item() {
        let topology = seeded_topology(&[("1", "1"), ("2", "2"), ("3", "3")]);
        let report = SequentialExecutor::default().execute(topology).await.unwrap();

        assert_eq!(report.completed, 3);
        assert_eq!(report.failed, 0);
        assert_eq!(report.queue("source").len(), 0);
        assert_eq!(report.payload("doubled", "1"), Some(b"2".as_slice()));
        assert_eq!(report.payload("doubled", "2"), Some(b"4".as_slice()));
        assert_eq!(report.payload("doubled", "3"), Some(b"6".as_slice()));
    }

    #[tokio::test]
    async fn rerun_is_idempotent_for_pure_callables() {
        let first = SequentialExecutor::default()
            .execute(seeded_topology(&[("a", "10"), ("b", "11")]))
            .await
            .unwrap();
        let second = SequentialExecutor::default()
            .execute(seeded_topology(&[("a", "10"), ("b", "11")]))
            .await
            .unwrap();

        assert_eq!(first.queue("doubled"), second.queue("doubled"));
    }

    #[tokio::test]
    async fn failed_item_is_tagged_and_others_proceed() {
        let topology = seeded_topology(&[("1", "1"), ("2", "oops"), ("3", "3")]);
        let report = SequentialExecutor::default().execute(topology).await.unwrap();

        assert_eq!(report.completed, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.payload("doubled", "1"), Some(b"2".as_slice()));
        assert_eq!(report.payload("doubled", "3"), Some(b"6".as_slice()));
        assert!(report.entry("doubled", "2").unwrap().is_failed());
    }

    #[tokio::test]
    async fn one_shot_seeds_before_steady_state() {
        let mut topology = Topology::new();
        topology.add_queue(ItemQueue::new("source"));
        topology.add_queue(ItemQueue::new("doubled"));
        topology.add_work(Work::one_shot("seed_series", "source", |queue: &mut ItemQueue| {
            for i in 0..4 {
                queue.insert(format!("im_{}", i), WorkItem::new(i.to_string()));
            }
            Ok(())
        }));
        topology.add_work(Work::cpu("double", "source", Some("doubled".to_string()), double));

        let report = SequentialExecutor::default().execute(topology).await.unwrap();
        assert_eq!(report.completed, 4);
        assert_eq!(report.payload("doubled", "im_3"), Some(b"6".as_slice()));
    }

    #[tokio::test]
    async fn unpaired_global_input_does_not_hang() {
        // A pairing work that needs two items per output; fed an odd count,
        // it must report "not ready" and the engine must still terminate.
        let mut topology = Topology::new();
        topology.add_queue(ItemQueue::new("frames"));
        topology.add_queue(ItemQueue::new("couples"));
        topology.add_work(Work::global(
            "pair_frames",
            "frames",
            "couples",
            None,
            |input: &mut ItemQueue, output: &mut ItemQueue, _: Option<&mut ItemQueue>| {
                if input.len() < 2 {
                    return false;
                }
                let (first_key, first) = input.pop_first().unwrap();
                let (second_key, second) = input.pop_first().unwrap();
                let mut payload = first.item().unwrap().payload.clone();
                payload.extend_from_slice(b"+");
                payload.extend_from_slice(&second.item().unwrap().payload);
                output.insert(
                    format!("{}&{}", first_key, second_key),
                    WorkItem::new(payload),
                );
                true
            },
        ));
        for key in ["1", "2", "3"] {
            topology
                .queue_mut("frames")
                .unwrap()
                .insert(key, WorkItem::new(key.as_bytes().to_vec()));
        }

        let report = SequentialExecutor::default().execute(topology).await.unwrap();
        assert_eq!(report.queue("couples").len(), 1);
        assert_eq!(report.payload("couples", "1&2"), Some(b"1+2".as_slice()));
        // Item 3 stays unconsumed; the run still terminated.
        assert_eq!(report.queue("frames").len(), 1);
    }

    #[tokio::test]
    async fn no_key_is_processed_twice() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;
        use std::sync::Mutex;

        let seen = Arc::new(Mutex::new(std::collections::HashSet::new()));
        let dupes = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();
        let dupes_clone = dupes.clone();

        let mut topology = Topology::new();
        topology.add_queue(ItemQueue::new("source"));
        topology.add_work(Work::io("observe", "source", None, move |item: WorkItem| {
            let key = String::from_utf8_lossy(&item.payload).into_owned();
            if !seen_clone.lock().unwrap().insert(key) {
                dupes_clone.fetch_add(1, Ordering::SeqCst);
            }
            Ok(item)
        }));
        for i in 0..16 {
            topology
                .queue_mut("source")
                .unwrap()
                .insert(format!("k{}", i), WorkItem::new(format!("k{}", i)));
        }

        let report = SequentialExecutor::default().execute(topology).await.unwrap();
        assert_eq!(report.completed, 16);
        assert_eq!(dupes.load(Ordering::SeqCst), 0);
        assert_eq!(seen.lock().unwrap().len(), 16);
    }
}
