// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! A small numeric pipeline exercising every work kind, used by the demo
//! binary, the `--serve` worker registry, and the fan-out factory.
//!
//! Stages: seed a frame series (one-shot), parse each frame (io), scale the
//! value (cpu), pair consecutive frames into couples (global), and persist
//! couples (io, terminal). Payloads are decimal integers as bytes, so a
//! non-numeric frame exercises the error-forwarding path end to end.

use std::path::PathBuf;
use std::sync::Arc;

use crate::engine::SeriesRange;
use crate::errors::WorkError;
use crate::server::PipelineFactory;
use crate::topology::{ItemQueue, QueueEntry, Topology, Work, WorkItem, WorkRegistry};

fn parse_value(item: &WorkItem) -> Result<i64, WorkError> {
    String::from_utf8_lossy(&item.payload)
        .parse()
        .map_err(|e| WorkError::failed(format!("frame is not numeric: {}", e)))
}

fn read_frame(item: WorkItem) -> Result<WorkItem, WorkError> {
    let value = parse_value(&item)?;
    Ok(WorkItem::new(value.to_string()))
}

fn scale_values(item: WorkItem) -> Result<WorkItem, WorkError> {
    let value = parse_value(&item)?;
    Ok(WorkItem::new((value * 2).to_string()))
}

fn pair_frames(
    input: &mut ItemQueue,
    output: &mut ItemQueue,
    _secondary: Option<&mut ItemQueue>,
) -> bool {
    if input.len() < 2 {
        return false;
    }
    let (first_key, first) = input.pop_first().expect("two items checked");
    let (second_key, second) = input.pop_first().expect("two items checked");

    // A failed frame poisons its couple.
    let key = format!("{}&{}", first_key, second_key);
    match (first.item(), second.item()) {
        (Some(a), Some(b)) => match (parse_value(a), parse_value(b)) {
            (Ok(left), Ok(right)) => {
                output.insert(key, WorkItem::new((left + right).to_string()));
            }
            (Err(error), _) | (_, Err(error)) => {
                output.insert_entry(key, QueueEntry::Failed(error));
            }
        },
        _ => {
            let error = first
                .error()
                .or_else(|| second.error())
                .cloned()
                .unwrap_or_else(|| WorkError::failed("upstream frame failed"));
            output.insert_entry(key, QueueEntry::Failed(error));
        }
    }
    true
}

/// Build the demo topology over `series`. When `result_dir` is given, the
/// terminal stage writes one `<key>.txt` per couple there; otherwise it
/// validates and drops them.
pub fn demo_topology(series: SeriesRange, result_dir: Option<PathBuf>) -> Topology {
    let mut topology = Topology::new();
    topology.add_queue(ItemQueue::new("frames"));
    topology.add_queue(ItemQueue::new("values"));
    topology.add_queue(ItemQueue::new("scaled"));
    topology.add_queue(ItemQueue::new("couples"));

    topology.add_work(Work::one_shot("seed_series", "frames", move |queue: &mut ItemQueue| {
        for i in series.indices() {
            queue.insert(format!("frame_{}", i), WorkItem::new(i.to_string()));
        }
        Ok(())
    }));
    topology.add_work(Work::io(
        "read_frame",
        "frames",
        Some("values".to_string()),
        read_frame,
    ));
    topology.add_work(Work::cpu(
        "scale_values",
        "values",
        Some("scaled".to_string()),
        scale_values,
    ));
    topology.add_work(Work::global("pair_frames", "scaled", "couples", None, pair_frames));
    topology.add_work(Work::io(
        "write_couples",
        "couples",
        None,
        move |item: WorkItem| {
            if let Some(dir) = &result_dir {
                // Key is not available to item callables; persist by content.
                let value = parse_value(&item)?;
                let path = dir.join(format!("couple_{}.txt", value));
                std::fs::write(&path, &item.payload)
                    .map_err(|e| WorkError::failed(format!("cannot write {:?}: {}", path, e)))?;
            }
            Ok(item)
        },
    ));
    topology
}

/// The registry a `--serve` worker resolves submit messages against.
pub fn demo_registry() -> WorkRegistry {
    demo_topology(SeriesRange::new(0, 0, 1), None).work_registry()
}

/// Factory for fan-out mode: each server builds the demo pipeline over its
/// own sub-range.
pub fn demo_factory() -> PipelineFactory {
    Arc::new(|range| demo_topology(range, None))
}
