// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

mod graph;
pub(crate) mod queue;
mod work;

pub use graph::Topology;
pub use queue::{ItemKey, ItemQueue, QueueEntry, WorkItem};
pub use work::{
    GlobalFn, OneShotFn, OutputQueues, Work, WorkFn, WorkKind, WorkRegistry, WorkRunner,
};
