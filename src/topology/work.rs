// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Works: named pipeline stages binding a callable to queue wiring.
//!
//! The engine treats domain logic as opaque callables behind three small
//! traits:
//!
//! * [`WorkFn`] — `item -> result`, used by io / cpu / plain works;
//! * [`GlobalFn`] — polled with whole queue handles, returns `false` while it
//!   needs more input before it can produce output (it is re-polled, not
//!   failed);
//! * [`OneShotFn`] — seeds a queue exactly once before the steady-state loop.
//!
//! Each work carries its callable in a [`WorkRunner`] variant rather than a
//! string kind tag, so executors dispatch on the enum instead of re-deriving
//! behavior from string membership tests.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::errors::WorkError;

use super::queue::{ItemQueue, WorkItem};

/// Callable contract for ordinary (io / cpu / plain) works.
pub trait WorkFn: Send + Sync {
    fn call(&self, item: WorkItem) -> Result<WorkItem, WorkError>;
}

impl<F> WorkFn for F
where
    F: Fn(WorkItem) -> Result<WorkItem, WorkError> + Send + Sync,
{
    fn call(&self, item: WorkItem) -> Result<WorkItem, WorkError> {
        self(item)
    }
}

/// Callable contract for global works. A global work is re-invoked with the
/// *whole* input and output queues; returning `false` means "not ready yet,
/// poll me again". A global work may fan out to a secondary output queue.
pub trait GlobalFn: Send + Sync {
    fn poll(
        &self,
        input: &mut ItemQueue,
        primary: &mut ItemQueue,
        secondary: Option<&mut ItemQueue>,
    ) -> bool;
}

impl<F> GlobalFn for F
where
    F: Fn(&mut ItemQueue, &mut ItemQueue, Option<&mut ItemQueue>) -> bool + Send + Sync,
{
    fn poll(
        &self,
        input: &mut ItemQueue,
        primary: &mut ItemQueue,
        secondary: Option<&mut ItemQueue>,
    ) -> bool {
        self(input, primary, secondary)
    }
}

/// Callable contract for one-shot works: executed exactly once, before the
/// steady-state loop, typically to seed the source queue from a series index.
pub trait OneShotFn: Send + Sync {
    fn run(&self, output: &mut ItemQueue) -> Result<(), WorkError>;
}

impl<F> OneShotFn for F
where
    F: Fn(&mut ItemQueue) -> Result<(), WorkError> + Send + Sync,
{
    fn run(&self, output: &mut ItemQueue) -> Result<(), WorkError> {
        self(output)
    }
}

/// The kind tag derived from a work's runner. Executors use it to pick the
/// admission counter (io vs cpu) and the dispatch vehicle (thread vs
/// process).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkKind {
    OneShot,
    Global,
    Io,
    Cpu,
    Plain,
}

impl fmt::Display for WorkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            WorkKind::OneShot => "one-shot",
            WorkKind::Global => "global",
            WorkKind::Io => "io",
            WorkKind::Cpu => "cpu",
            WorkKind::Plain => "plain",
        };
        f.write_str(label)
    }
}

/// Tagged union over the five work behaviors.
#[derive(Clone)]
pub enum WorkRunner {
    OneShot(Arc<dyn OneShotFn>),
    Global(Arc<dyn GlobalFn>),
    Io(Arc<dyn WorkFn>),
    Cpu(Arc<dyn WorkFn>),
    Plain(Arc<dyn WorkFn>),
}

impl WorkRunner {
    pub fn kind(&self) -> WorkKind {
        match self {
            WorkRunner::OneShot(_) => WorkKind::OneShot,
            WorkRunner::Global(_) => WorkKind::Global,
            WorkRunner::Io(_) => WorkKind::Io,
            WorkRunner::Cpu(_) => WorkKind::Cpu,
            WorkRunner::Plain(_) => WorkKind::Plain,
        }
    }

    /// The item callable, for the three per-item kinds.
    pub fn item_fn(&self) -> Option<&Arc<dyn WorkFn>> {
        match self {
            WorkRunner::Io(f) | WorkRunner::Cpu(f) | WorkRunner::Plain(f) => Some(f),
            _ => None,
        }
    }
}

impl fmt::Debug for WorkRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WorkRunner::{:?}", self.kind())
    }
}

/// Output wiring of a work: none (terminal stage), one queue, or — for
/// global works only — a pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputQueues {
    None,
    Single(String),
    Pair(String, String),
}

impl OutputQueues {
    pub fn primary(&self) -> Option<&str> {
        match self {
            OutputQueues::None => None,
            OutputQueues::Single(name) | OutputQueues::Pair(name, _) => Some(name),
        }
    }

    pub fn secondary(&self) -> Option<&str> {
        match self {
            OutputQueues::Pair(_, name) => Some(name),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.primary().into_iter().chain(self.secondary())
    }

    pub fn is_none(&self) -> bool {
        matches!(self, OutputQueues::None)
    }
}

/// A named pipeline stage: a callable bound to an input queue reference and
/// zero, one, or two output queue references.
#[derive(Clone)]
pub struct Work {
    name: String,
    runner: WorkRunner,
    input_queue: Option<String>,
    output: OutputQueues,
}

impl Work {
    /// A one-shot work seeding `output` before the steady-state loop starts.
    pub fn one_shot(
        name: impl Into<String>,
        output: impl Into<String>,
        f: impl OneShotFn + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            runner: WorkRunner::OneShot(Arc::new(f)),
            input_queue: None,
            output: OutputQueues::Single(output.into()),
        }
    }

    /// A global work polled with the whole `input` and output queue handles.
    pub fn global(
        name: impl Into<String>,
        input: impl Into<String>,
        primary: impl Into<String>,
        secondary: Option<String>,
        f: impl GlobalFn + 'static,
    ) -> Self {
        let primary = primary.into();
        let output = match secondary {
            Some(second) => OutputQueues::Pair(primary, second),
            None => OutputQueues::Single(primary),
        };
        Self {
            name: name.into(),
            runner: WorkRunner::Global(Arc::new(f)),
            input_queue: Some(input.into()),
            output,
        }
    }

    /// An io-kind work (dispatched to threads by the hybrid executor).
    pub fn io(
        name: impl Into<String>,
        input: impl Into<String>,
        output: Option<String>,
        f: impl WorkFn + 'static,
    ) -> Self {
        Self::item_work(name, WorkRunner::Io(Arc::new(f)), input, output)
    }

    /// A cpu-kind work (dispatched to worker processes by the hybrid
    /// executor).
    pub fn cpu(
        name: impl Into<String>,
        input: impl Into<String>,
        output: Option<String>,
        f: impl WorkFn + 'static,
    ) -> Self {
        Self::item_work(name, WorkRunner::Cpu(Arc::new(f)), input, output)
    }

    /// A work with no declared kind; scheduled like a cpu work.
    pub fn plain(
        name: impl Into<String>,
        input: impl Into<String>,
        output: Option<String>,
        f: impl WorkFn + 'static,
    ) -> Self {
        Self::item_work(name, WorkRunner::Plain(Arc::new(f)), input, output)
    }

    fn item_work(
        name: impl Into<String>,
        runner: WorkRunner,
        input: impl Into<String>,
        output: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            runner,
            input_queue: Some(input.into()),
            output: match output {
                Some(queue) => OutputQueues::Single(queue),
                None => OutputQueues::None,
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> WorkKind {
        self.runner.kind()
    }

    pub fn runner(&self) -> &WorkRunner {
        &self.runner
    }

    pub fn input_queue(&self) -> Option<&str> {
        self.input_queue.as_deref()
    }

    pub fn output(&self) -> &OutputQueues {
        &self.output
    }
}

impl fmt::Debug for Work {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Work")
            .field("name", &self.name)
            .field("kind", &self.kind())
            .field("input_queue", &self.input_queue)
            .field("output", &self.output)
            .finish()
    }
}

/// Registry mapping work names to their item callables, used by worker
/// processes to resolve the stage named in a submit message.
#[derive(Clone, Default)]
pub struct WorkRegistry(HashMap<String, Arc<dyn WorkFn>>);

impl WorkRegistry {
    pub fn new() -> Self {
        Self(HashMap::new())
    }

    pub fn insert(&mut self, name: impl Into<String>, f: Arc<dyn WorkFn>) {
        self.0.insert(name.into(), f);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn WorkFn>> {
        self.0.get(name)
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }
}

impl fmt::Debug for WorkRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkRegistry")
            .field("work_count", &self.0.len())
            .field("work_names", &self.0.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runner_kind_matches_constructor() {
        let double = Work::cpu("double", "in", Some("out".to_string()), |item: WorkItem| {
            Ok(item)
        });
        assert_eq!(double.kind(), WorkKind::Cpu);
        assert_eq!(double.input_queue(), Some("in"));
        assert_eq!(double.output().primary(), Some("out"));

        let seed = Work::one_shot("seed", "in", |_queue: &mut ItemQueue| Ok(()));
        assert_eq!(seed.kind(), WorkKind::OneShot);
        assert!(seed.input_queue().is_none());
    }

    #[test]
    fn global_pair_output_wiring() {
        let pair = Work::global(
            "pair_frames",
            "frames",
            "couples",
            Some("leftovers".to_string()),
            |_: &mut ItemQueue, _: &mut ItemQueue, _: Option<&mut ItemQueue>| true,
        );
        assert_eq!(pair.output().primary(), Some("couples"));
        assert_eq!(pair.output().secondary(), Some("leftovers"));
        assert_eq!(pair.output().iter().count(), 2);
    }
}
