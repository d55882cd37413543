// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Cross-executor integration tests: the concurrent executors must agree
//! with the sequential reference implementation on the same topologies.

use std::time::Duration;

use crate::demo::demo_topology;
use crate::engine::{CooperativeExecutor, HybridExecutor, SequentialExecutor, SeriesRange};
use crate::errors::WorkError;
use crate::topology::{ItemQueue, Topology, Work, WorkItem};
use crate::traits::{ExitReason, PipelineExecutor};

fn double(item: WorkItem) -> Result<WorkItem, WorkError> {
    let value: i64 = String::from_utf8_lossy(&item.payload)
        .parse()
        .map_err(|_| WorkError::failed("not a number"))?;
    Ok(WorkItem::new((value * 2).to_string()))
}

/// Scenario: one source queue seeded with keys 1..=3, one doubling work,
/// one output queue.
fn doubling_topology(io_kind: bool) -> Topology {
    let mut topology = Topology::new();
    topology.add_queue(ItemQueue::new("source"));
    topology.add_queue(ItemQueue::new("doubled"));
    let work = if io_kind {
        Work::io("double", "source", Some("doubled".to_string()), double)
    } else {
        Work::cpu("double", "source", Some("doubled".to_string()), double)
    };
    topology.add_work(work);
    for key in ["1", "2", "3"] {
        topology
            .queue_mut("source")
            .unwrap()
            .insert(key, WorkItem::new(key.as_bytes().to_vec()));
    }
    topology
}

fn assert_doubled(report: &crate::traits::ExecutionReport) {
    assert_eq!(report.exit, ExitReason::Completed);
    assert_eq!(report.payload("doubled", "1"), Some(b"2".as_slice()));
    assert_eq!(report.payload("doubled", "2"), Some(b"4".as_slice()));
    assert_eq!(report.payload("doubled", "3"), Some(b"6".as_slice()));
    assert!(report.queue("source").is_empty());
}

#[tokio::test]
async fn sequential_and_cooperative_agree_on_doubling() {
    let sequential = SequentialExecutor::default()
        .execute(doubling_topology(false))
        .await
        .unwrap();
    assert_doubled(&sequential);

    let cooperative = CooperativeExecutor::new(4, 8)
        .with_poll_interval(Duration::from_millis(1))
        .execute(doubling_topology(false))
        .await
        .unwrap();
    assert_doubled(&cooperative);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn hybrid_agrees_on_doubling_with_thread_workers() {
    let report = HybridExecutor::new(4, 8, vec!["false".to_string()])
        .with_tick(Duration::from_millis(1))
        .execute(doubling_topology(true))
        .await
        .unwrap();
    assert_doubled(&report);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn demo_pipeline_totals_match_across_executors() {
    let series = SeriesRange::new(0, 8, 1);

    // Pair order can differ between executors, so compare the invariant
    // counters rather than couple keys.
    let observe =
        |report: crate::traits::ExecutionReport| -> (usize, usize) { (report.completed, report.failed) };

    let sequential = observe(
        SequentialExecutor::default()
            .execute(demo_topology(series, None))
            .await
            .unwrap(),
    );
    let cooperative = observe(
        CooperativeExecutor::new(4, 8)
            .with_poll_interval(Duration::from_millis(1))
            .execute(demo_topology(series, None))
            .await
            .unwrap(),
    );

    // 8 reads + 8 scales + 4 couple writes, no failures.
    assert_eq!(sequential, (20, 0));
    assert_eq!(cooperative, (20, 0));
}

#[tokio::test]
async fn failed_entries_propagate_to_the_terminal_queue() {
    // Three stages; the first fails on one key. The error tag must ride the
    // pipeline to the last queue without being re-executed or dropped.
    let build = || {
        let mut topology = Topology::new();
        topology.add_queue(ItemQueue::new("a"));
        topology.add_queue(ItemQueue::new("b"));
        topology.add_queue(ItemQueue::new("c"));
        topology.add_work(Work::cpu("parse", "a", Some("b".to_string()), double));
        topology.add_work(Work::cpu("scale", "b", Some("c".to_string()), double));
        for (key, payload) in [("1", "1"), ("2", "broken"), ("3", "3")] {
            topology
                .queue_mut("a")
                .unwrap()
                .insert(key, WorkItem::new(payload.as_bytes().to_vec()));
        }
        topology
    };

    for executor in [
        Box::new(SequentialExecutor::default()) as Box<dyn PipelineExecutor>,
        Box::new(CooperativeExecutor::new(2, 8).with_poll_interval(Duration::from_millis(1))),
    ] {
        let report = executor.execute(build()).await.unwrap();
        assert_eq!(report.exit, ExitReason::Completed);
        assert_eq!(report.failed, 1);
        assert!(report.entry("c", "2").unwrap().is_failed());
        assert_eq!(report.payload("c", "1"), Some(b"4".as_slice()));
        assert_eq!(report.payload("c", "3"), Some(b"12".as_slice()));
    }
}

#[tokio::test]
async fn global_fan_out_to_two_queues() {
    // A global work splitting even and odd values across two outputs.
    let mut topology = Topology::new();
    topology.add_queue(ItemQueue::new("values"));
    topology.add_queue(ItemQueue::new("evens"));
    topology.add_queue(ItemQueue::new("odds"));
    topology.add_work(Work::global(
        "split_parity",
        "values",
        "evens",
        Some("odds".to_string()),
        |input: &mut ItemQueue, evens: &mut ItemQueue, odds: Option<&mut ItemQueue>| {
            let odds = odds.expect("secondary output wired");
            let mut moved = false;
            while let Some((key, entry)) = input.pop_first() {
                moved = true;
                let even = entry
                    .item()
                    .map(|item| {
                        String::from_utf8_lossy(&item.payload)
                            .parse::<i64>()
                            .map(|v| v % 2 == 0)
                            .unwrap_or(false)
                    })
                    .unwrap_or(false);
                if even {
                    evens.insert_entry(key, entry);
                } else {
                    odds.insert_entry(key, entry);
                }
            }
            moved
        },
    ));
    for i in 0..6 {
        topology
            .queue_mut("values")
            .unwrap()
            .insert(format!("k{}", i), WorkItem::new(i.to_string()));
    }

    let report = SequentialExecutor::default().execute(topology).await.unwrap();
    assert_eq!(report.queue("evens").len(), 3);
    assert_eq!(report.queue("odds").len(), 3);
    assert!(report.entry("evens", "k4").is_some());
    assert!(report.entry("odds", "k5").is_some());
}

#[tokio::test]
async fn sequential_runs_are_deterministic() {
    let run = || async {
        SequentialExecutor::default()
            .execute(demo_topology(SeriesRange::new(0, 6, 1), None))
            .await
            .unwrap()
    };
    let first = run().await;
    let second = run().await;
    assert_eq!(first.completed, second.completed);
    assert_eq!(first.failed, second.failed);
    for (name, entries) in &first.queues {
        assert_eq!(Some(entries), second.queues.get(name), "queue {}", name);
    }
}
