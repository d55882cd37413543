// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! The topology: an immutable-after-construction graph of queues and works.
//!
//! Construction is incremental (`add_queue` / `add_work` in wiring order);
//! once `compute` hands the topology to an executor nothing may be added.
//! All wiring mistakes are caught by [`Topology::validate`] before any work
//! runs — a dangling queue reference is a configuration error, not a
//! run-time panic mid-pipeline.

use std::collections::HashMap;

use crate::errors::{ExecutionError, TopologyError};
use crate::traits::{ExecutionReport, PipelineExecutor};

use super::queue::ItemQueue;
use super::work::{Work, WorkKind, WorkRegistry};

/// The static graph of queues and works describing a pipeline.
#[derive(Debug, Default)]
pub struct Topology {
    queues: Vec<ItemQueue>,
    works: Vec<Work>,
    // Registration order across both collections; used to enforce that
    // one-shot works only touch queues added before them.
    queue_seq: HashMap<String, usize>,
    work_seq: Vec<usize>,
    next_seq: usize,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a queue. Duplicate names are reported by [`validate`](Self::validate).
    pub fn add_queue(&mut self, queue: ItemQueue) -> &mut Self {
        self.queue_seq
            .entry(queue.name().to_string())
            .or_insert(self.next_seq);
        self.next_seq += 1;
        self.queues.push(queue);
        self
    }

    /// Append a work. Wiring is checked by [`validate`](Self::validate).
    pub fn add_work(&mut self, work: Work) -> &mut Self {
        self.work_seq.push(self.next_seq);
        self.next_seq += 1;
        self.works.push(work);
        self
    }

    pub fn queues(&self) -> &[ItemQueue] {
        &self.queues
    }

    pub fn works(&self) -> &[Work] {
        &self.works
    }

    pub fn queue(&self, name: &str) -> Option<&ItemQueue> {
        self.queues.iter().find(|q| q.name() == name)
    }

    pub fn queue_mut(&mut self, name: &str) -> Option<&mut ItemQueue> {
        self.queues.iter_mut().find(|q| q.name() == name)
    }

    /// Item callables by work name, for worker processes resolving submit
    /// messages. One-shot and global works are whole-queue operations and are
    /// never dispatched remotely, so they are not part of the registry.
    pub fn work_registry(&self) -> WorkRegistry {
        let mut registry = WorkRegistry::new();
        for work in &self.works {
            if let Some(f) = work.runner().item_fn() {
                registry.insert(work.name(), f.clone());
            }
        }
        registry
    }

    /// Check the queue/work wiring. Called by [`compute`](Self::compute)
    /// before the executor starts; callable directly for fail-fast
    /// configuration checks.
    pub fn validate(&self) -> Result<(), TopologyError> {
        let mut seen_queues = HashMap::new();
        for queue in &self.queues {
            if seen_queues.insert(queue.name(), ()).is_some() {
                return Err(TopologyError::DuplicateQueue {
                    queue: queue.name().to_string(),
                });
            }
        }

        let mut seen_works = HashMap::new();
        for (work, &work_seq) in self.works.iter().zip(&self.work_seq) {
            if seen_works.insert(work.name(), ()).is_some() {
                return Err(TopologyError::DuplicateWork {
                    work: work.name().to_string(),
                });
            }

            for queue in work.input_queue().into_iter().chain(work.output().iter()) {
                if !self.queue_seq.contains_key(queue) {
                    return Err(TopologyError::UnknownQueue {
                        work: work.name().to_string(),
                        queue: queue.to_string(),
                    });
                }
            }

            if let (Some(input), true) = (work.input_queue(), !work.output().is_none()) {
                if work.output().iter().any(|output| output == input) {
                    return Err(TopologyError::InputIsOutput {
                        work: work.name().to_string(),
                        queue: input.to_string(),
                    });
                }
            }

            match work.kind() {
                WorkKind::OneShot => {
                    // Must be a topology ancestor: its queues predate it.
                    for queue in work.output().iter() {
                        if self.queue_seq[queue] > work_seq {
                            return Err(TopologyError::OneShotNotAncestor {
                                work: work.name().to_string(),
                                queue: queue.to_string(),
                            });
                        }
                    }
                }
                WorkKind::Global => {
                    if work.input_queue().is_none() {
                        return Err(TopologyError::MissingInputQueue {
                            work: work.name().to_string(),
                        });
                    }
                    if work.output().primary().is_none() {
                        return Err(TopologyError::MissingOutputQueue {
                            work: work.name().to_string(),
                        });
                    }
                    if let (Some(primary), Some(secondary)) =
                        (work.output().primary(), work.output().secondary())
                    {
                        if primary == secondary {
                            return Err(TopologyError::DuplicateOutput {
                                work: work.name().to_string(),
                                queue: primary.to_string(),
                            });
                        }
                    }
                }
                WorkKind::Io | WorkKind::Cpu | WorkKind::Plain => {
                    if work.input_queue().is_none() {
                        return Err(TopologyError::MissingInputQueue {
                            work: work.name().to_string(),
                        });
                    }
                    if work.output().secondary().is_some() {
                        return Err(TopologyError::PairOutputOnItemWork {
                            work: work.name().to_string(),
                        });
                    }
                }
            }
        }

        Ok(())
    }

    /// Drive the topology to completion with the chosen executor. The
    /// topology performs no scheduling itself.
    pub async fn compute(
        self,
        executor: &dyn PipelineExecutor,
    ) -> Result<ExecutionReport, ExecutionError> {
        self.validate()?;
        executor.execute(self).await
    }

    /// Decompose into queues and works for an executor taking ownership.
    pub fn into_parts(self) -> (Vec<ItemQueue>, Vec<Work>) {
        (self.queues, self.works)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::WorkError;
    use crate::topology::queue::WorkItem;

    fn passthrough(item: WorkItem) -> Result<WorkItem, WorkError> {
        Ok(item)
    }

    #[test]
    fn unknown_queue_is_a_configuration_error() {
        let mut topology = Topology::new();
        topology.add_queue(ItemQueue::new("frames"));
        topology.add_work(Work::io(
            "read_frame",
            "frames",
            Some("missing".to_string()),
            passthrough,
        ));

        match topology.validate() {
            Err(TopologyError::UnknownQueue { work, queue }) => {
                assert_eq!(work, "read_frame");
                assert_eq!(queue, "missing");
            }
            other => panic!("expected UnknownQueue, got {:?}", other),
        }
    }

    #[test]
    fn duplicate_names_rejected() {
        let mut topology = Topology::new();
        topology.add_queue(ItemQueue::new("frames"));
        topology.add_queue(ItemQueue::new("frames"));
        assert!(matches!(
            topology.validate(),
            Err(TopologyError::DuplicateQueue { .. })
        ));
    }

    #[test]
    fn one_shot_must_precede_its_queue_consumers() {
        let mut topology = Topology::new();
        topology.add_work(Work::one_shot("seed", "frames", |_: &mut ItemQueue| Ok(())));
        topology.add_queue(ItemQueue::new("frames"));
        assert!(matches!(
            topology.validate(),
            Err(TopologyError::OneShotNotAncestor { .. })
        ));

        let mut ordered = Topology::new();
        ordered.add_queue(ItemQueue::new("frames"));
        ordered.add_work(Work::one_shot("seed", "frames", |_: &mut ItemQueue| Ok(())));
        assert!(ordered.validate().is_ok());
    }

    #[test]
    fn input_as_output_rejected() {
        let mut topology = Topology::new();
        topology.add_queue(ItemQueue::new("frames"));
        topology.add_work(Work::io(
            "echo",
            "frames",
            Some("frames".to_string()),
            passthrough,
        ));
        assert!(matches!(
            topology.validate(),
            Err(TopologyError::InputIsOutput { .. })
        ));
    }

    #[test]
    fn registry_exposes_item_works_only() {
        let mut topology = Topology::new();
        topology.add_queue(ItemQueue::new("frames"));
        topology.add_queue(ItemQueue::new("results"));
        topology.add_work(Work::one_shot("seed", "frames", |_: &mut ItemQueue| Ok(())));
        topology.add_work(Work::cpu(
            "correlate",
            "frames",
            Some("results".to_string()),
            passthrough,
        ));

        let registry = topology.work_registry();
        assert!(registry.contains_key("correlate"));
        assert!(!registry.contains_key("seed"));
    }
}
