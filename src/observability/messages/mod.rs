// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Centralized message types for structured logging.
//!
//! Messages are organized by subsystem:
//!
//! * `engine` - executor lifecycle and per-item work events
//! * `worker` - worker process liveness, memory pressure, and server pool
//!   events

use tracing::Span;

pub mod engine;
pub mod worker;

/// Structured logging contract implemented by every message type: emit the
/// message with its structured fields, or open a span carrying them.
pub trait StructuredLog {
    fn log(&self);

    fn span(&self, name: &str) -> Span;
}
