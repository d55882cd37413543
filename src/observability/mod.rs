// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Observability module for structured logging and tracing.
//!
//! Message types follow a struct-based pattern with `Display` trait
//! implementations to eliminate magic strings scattered throughout the
//! codebase and keep log output consistent.
//!
//! External observers (dashboards, log shippers) parse the per-item
//! `"<elapsed> s. Launch work <name> (<key>). mem usage"` and
//! `"work <name> (<key>) done in <duration> s"` lines, so their exact shape
//! is owned here; the engine itself never reads them back.

pub mod messages;
