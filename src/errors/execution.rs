// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Errors surfaced while a topology is being driven by an executor.

use thiserror::Error;

use super::topology::TopologyError;

/// Failure of a single work invocation on a single item.
///
/// A `WorkError` never aborts the pipeline: executors log it and forward an
/// error-tagged entry downstream so sibling items keep flowing.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WorkError {
    /// The domain callable returned an error
    #[error("{message}")]
    Failed { message: String },

    /// The domain callable panicked; the panic was caught at the dispatch
    /// boundary and converted into an error result
    #[error("work panicked: {message}")]
    Panicked { message: String },

    /// The item was handed to a worker that was force-terminated before it
    /// reported a result (watchdog kill, lost server partition)
    #[error("worker lost before completion")]
    WorkerLost,
}

impl WorkError {
    /// Shorthand for the common case of a message-only failure.
    pub fn failed(message: impl Into<String>) -> Self {
        WorkError::Failed {
            message: message.into(),
        }
    }
}

/// Errors that abort an executor run.
///
/// Per-item failures are *not* represented here (see [`WorkError`]); this
/// enum covers configuration problems and engine-level faults.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The topology failed wiring validation before execution began
    #[error("invalid topology: {0}")]
    Topology(#[from] TopologyError),

    /// Spawning or talking to an out-of-process worker failed
    #[error("worker i/o for '{context}': {source}")]
    WorkerIo {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// A wire message could not be encoded or decoded
    #[error("worker protocol: {0}")]
    Protocol(String),

    /// Internal consistency error; indicates an engine bug, not a user error
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl ExecutionError {
    pub fn worker_io(context: impl Into<String>, source: std::io::Error) -> Self {
        ExecutionError::WorkerIo {
            context: context.into(),
            source,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ExecutionError::Internal {
            message: message.into(),
        }
    }
}
