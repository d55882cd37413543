// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Ordered, keyed buffers holding the items pending between two works.
//!
//! An [`ItemQueue`] behaves like an insertion-ordered map: entries are keyed
//! by an opaque [`ItemKey`], popped oldest-first, and consumed exactly once.
//! The optional capacity is a backpressure *hint* consulted by executors
//! before admitting more work; the queue itself never refuses an insert, so
//! the bound is soft (at most one extra item can land between an admission
//! check and the next poll).

use std::collections::{HashMap, VecDeque};
use std::fmt;

use crate::errors::WorkError;

/// Opaque identifier of a work item, typically derived from a filename or a
/// series index. Identity of an item is its key; the value is replaced, never
/// merged, as the item moves downstream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemKey(String);

impl ItemKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl From<String> for ItemKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

/// The opaque value flowing between stages.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WorkItem {
    pub payload: Vec<u8>,
}

impl WorkItem {
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
        }
    }
}

/// One slot of a queue: either a live item, or the error-tagged residue of an
/// upstream failure. Failed entries flow downstream without being handed to
/// callables, so a single bad item never stalls or crashes the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueEntry {
    Item(WorkItem),
    Failed(WorkError),
}

impl QueueEntry {
    pub fn item(&self) -> Option<&WorkItem> {
        match self {
            QueueEntry::Item(item) => Some(item),
            QueueEntry::Failed(_) => None,
        }
    }

    pub fn error(&self) -> Option<&WorkError> {
        match self {
            QueueEntry::Item(_) => None,
            QueueEntry::Failed(error) => Some(error),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, QueueEntry::Failed(_))
    }
}

/// An ordered, keyed buffer of pending entries with an optional capacity
/// hint.
///
/// Every mutation bumps a monotonic `revision` counter. Executors use
/// revisions for quiescence detection: a global work that returned "not
/// ready" can only become ready again after some queue changed, so an
/// unchanged revision sum proves no further progress is possible.
#[derive(Debug, Clone)]
pub struct ItemQueue {
    name: String,
    items: HashMap<ItemKey, QueueEntry>,
    order: VecDeque<ItemKey>,
    capacity: Option<usize>,
    revision: u64,
}

impl ItemQueue {
    /// Create an unbounded queue.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            items: HashMap::new(),
            order: VecDeque::new(),
            capacity: None,
            revision: 0,
        }
    }

    /// Create a queue carrying its own capacity hint, overriding the
    /// executor-wide default.
    pub fn bounded(name: impl Into<String>, capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
            ..Self::new(name)
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Whether the queue is at or over its capacity hint. Queues without
    /// their own bound fall back to the executor-wide `default_capacity`.
    pub fn is_saturated(&self, default_capacity: usize) -> bool {
        self.len() >= self.capacity.unwrap_or(default_capacity)
    }

    /// Insert a live item under `key`.
    pub fn insert(&mut self, key: impl Into<ItemKey>, item: WorkItem) {
        self.insert_entry(key, QueueEntry::Item(item));
    }

    /// Insert any entry (live or failed) under `key`. A key is consumed
    /// exactly once, so reinserting a key that is still pending is a logic
    /// error in the topology's works.
    pub fn insert_entry(&mut self, key: impl Into<ItemKey>, entry: QueueEntry) {
        let key = key.into();
        debug_assert!(
            !self.items.contains_key(&key),
            "queue '{}': key '{}' reinserted while still pending",
            self.name,
            key
        );
        if self.items.insert(key.clone(), entry).is_none() {
            self.order.push_back(key);
        }
        self.revision += 1;
    }

    /// Remove and return the oldest-inserted entry (FIFO).
    pub fn pop_first(&mut self) -> Option<(ItemKey, QueueEntry)> {
        let key = self.order.pop_front()?;
        let entry = self
            .items
            .remove(&key)
            .expect("queue order and item map out of sync");
        self.revision += 1;
        Some((key, entry))
    }

    /// Look at the oldest key without consuming it.
    pub fn peek_first(&self) -> Option<&ItemKey> {
        self.order.front()
    }

    pub fn contains_key(&self, key: &ItemKey) -> bool {
        self.items.contains_key(key)
    }

    pub fn get(&self, key: &ItemKey) -> Option<&QueueEntry> {
        self.items.get(key)
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &ItemKey> {
        self.order.iter()
    }

    /// Consume the queue, returning its entries in insertion order. Used by
    /// executors to assemble the final [`ExecutionReport`](crate::traits::ExecutionReport).
    pub fn drain_entries(&mut self) -> Vec<(ItemKey, QueueEntry)> {
        let mut out = Vec::with_capacity(self.order.len());
        while let Some(pair) = self.pop_first() {
            out.push(pair);
        }
        out
    }
}

/// Borrow a global work's input, primary output, and optional secondary
/// output mutably at once. The indices are distinct (topology validation
/// rejects a queue wired as both input and output of one work).
pub(crate) fn disjoint_queues_mut(
    queues: &mut [ItemQueue],
    input: usize,
    primary: usize,
    secondary: Option<usize>,
) -> (&mut ItemQueue, &mut ItemQueue, Option<&mut ItemQueue>) {
    let mut input_ref = None;
    let mut primary_ref = None;
    let mut secondary_ref = None;
    for (i, queue) in queues.iter_mut().enumerate() {
        if i == input {
            input_ref = Some(queue);
        } else if i == primary {
            primary_ref = Some(queue);
        } else if Some(i) == secondary {
            secondary_ref = Some(queue);
        }
    }
    (
        input_ref.expect("input queue index in range"),
        primary_ref.expect("primary queue index in range"),
        secondary_ref,
    )
}
