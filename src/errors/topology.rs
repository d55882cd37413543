// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::fmt;

/// Errors detected while validating a topology's queue/work wiring.
///
/// All of these are configuration errors: they are reported before any work
/// runs, never as a panic in the middle of a pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum TopologyError {
    /// A work references a queue that was never added to the topology
    UnknownQueue {
        /// The work with the dangling reference
        work: String,
        /// The queue name that could not be resolved
        queue: String,
    },
    /// Two queues were registered under the same name
    DuplicateQueue { queue: String },
    /// Two works were registered under the same name
    DuplicateWork { work: String },
    /// An item or global work was declared without an input queue
    MissingInputQueue { work: String },
    /// A global or one-shot work was declared without an output queue
    MissingOutputQueue { work: String },
    /// A work lists the same queue as both input and output
    InputIsOutput { work: String, queue: String },
    /// A global work lists the same queue as both of its outputs
    DuplicateOutput { work: String, queue: String },
    /// A one-shot work references a queue added after the work itself.
    /// One-shot works run once before the steady-state loop and must be
    /// topology ancestors.
    OneShotNotAncestor { work: String, queue: String },
    /// Only global works may fan out to two output queues
    PairOutputOnItemWork { work: String },
}

impl fmt::Display for TopologyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopologyError::UnknownQueue { work, queue } => {
                write!(
                    f,
                    "Work '{}' references queue '{}' which was never added to the topology",
                    work, queue
                )
            }
            TopologyError::DuplicateQueue { queue } => {
                write!(f, "Duplicate queue name: '{}'", queue)
            }
            TopologyError::DuplicateWork { work } => {
                write!(f, "Duplicate work name: '{}'", work)
            }
            TopologyError::MissingInputQueue { work } => {
                write!(f, "Work '{}' consumes items but declares no input queue", work)
            }
            TopologyError::MissingOutputQueue { work } => {
                write!(f, "Work '{}' must declare an output queue", work)
            }
            TopologyError::InputIsOutput { work, queue } => {
                write!(
                    f,
                    "Work '{}' uses queue '{}' as both input and output",
                    work, queue
                )
            }
            TopologyError::DuplicateOutput { work, queue } => {
                write!(
                    f,
                    "Work '{}' lists queue '{}' as both of its outputs",
                    work, queue
                )
            }
            TopologyError::OneShotNotAncestor { work, queue } => {
                write!(
                    f,
                    "One-shot work '{}' references queue '{}' added after the work; \
                     one-shot works must be topology ancestors",
                    work, queue
                )
            }
            TopologyError::PairOutputOnItemWork { work } => {
                write!(
                    f,
                    "Work '{}' declares two output queues; only global works may fan out",
                    work
                )
            }
        }
    }
}

impl std::error::Error for TopologyError {}
