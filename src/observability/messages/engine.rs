// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Message types for executor lifecycle and per-item work events.

use crate::observability::messages::StructuredLog;
use std::fmt::{Display, Formatter};
use tracing::Span;

/// Execution started with the selected strategy.
///
/// # Log Level
/// `info!` - Important operational event
pub struct ExecutionStarted<'a> {
    pub strategy: &'a str,
    pub work_count: usize,
    pub queue_count: usize,
    pub max_workers: usize,
}

impl Display for ExecutionStarted<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Starting pipeline execution with {} strategy: {} works, {} queues, max_workers={}",
            self.strategy, self.work_count, self.queue_count, self.max_workers
        )
    }
}

impl StructuredLog for ExecutionStarted<'_> {
    fn log(&self) {
        tracing::info!(
            strategy = self.strategy,
            work_count = self.work_count,
            queue_count = self.queue_count,
            max_workers = self.max_workers,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!(
            "execution",
            span_name = name,
            strategy = self.strategy,
            work_count = self.work_count,
            max_workers = self.max_workers,
        )
    }
}

/// Execution reached quiescence and finished normally.
///
/// # Log Level
/// `info!` - Important operational event
pub struct ExecutionCompleted<'a> {
    pub strategy: &'a str,
    pub completed: usize,
    pub failed: usize,
    pub duration: std::time::Duration,
}

impl Display for ExecutionCompleted<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Pipeline execution completed with {} strategy: {} items done, {} failed in {:?}",
            self.strategy, self.completed, self.failed, self.duration
        )
    }
}

impl StructuredLog for ExecutionCompleted<'_> {
    fn log(&self) {
        tracing::info!(
            strategy = self.strategy,
            completed = self.completed,
            failed = self.failed,
            duration_ms = self.duration.as_millis() as u64,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!(
            "execution_completed",
            span_name = name,
            strategy = self.strategy,
            completed = self.completed,
            duration = ?self.duration,
        )
    }
}

/// Execution was cut short by an interrupt or preemption signal.
///
/// # Log Level
/// `warn!` - Orderly but abnormal termination
pub struct ExecutionInterrupted<'a> {
    pub strategy: &'a str,
    pub in_flight: usize,
}

impl Display for ExecutionInterrupted<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Pipeline execution interrupted ({} strategy): stop admitting new items, {} in flight",
            self.strategy, self.in_flight
        )
    }
}

impl StructuredLog for ExecutionInterrupted<'_> {
    fn log(&self) {
        tracing::warn!(
            strategy = self.strategy,
            in_flight = self.in_flight,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::warn_span!(
            "execution_interrupted",
            span_name = name,
            strategy = self.strategy,
            in_flight = self.in_flight,
        )
    }
}

/// One item handed to a work's callable. The rendered line is the
/// dashboard-parsed progress format.
///
/// # Log Level
/// `info!` - Per-item progress event
pub struct WorkLaunched<'a> {
    pub elapsed_secs: f64,
    pub work: &'a str,
    pub key: &'a str,
    pub mem_mb: f64,
}

impl Display for WorkLaunched<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "{:.2} s. Launch work {} ({}). mem usage: {:.1} Mb",
            self.elapsed_secs, self.work, self.key, self.mem_mb
        )
    }
}

impl StructuredLog for WorkLaunched<'_> {
    fn log(&self) {
        tracing::info!(
            work = self.work,
            key = self.key,
            elapsed_secs = self.elapsed_secs,
            mem_mb = self.mem_mb,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!(
            "work_launched",
            span_name = name,
            work = self.work,
            key = self.key,
        )
    }
}

/// One item finished in a work's callable.
///
/// # Log Level
/// `info!` - Per-item progress event
pub struct WorkCompleted<'a> {
    pub work: &'a str,
    pub key: &'a str,
    pub duration_secs: f64,
}

impl Display for WorkCompleted<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "work {} ({}) done in {:.3} s",
            self.work, self.key, self.duration_secs
        )
    }
}

impl StructuredLog for WorkCompleted<'_> {
    fn log(&self) {
        tracing::info!(
            work = self.work,
            key = self.key,
            duration_secs = self.duration_secs,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!(
            "work_completed",
            span_name = name,
            work = self.work,
            key = self.key,
        )
    }
}

/// A callable failed on one item. The error-tagged entry is forwarded
/// downstream; the pipeline keeps running.
///
/// # Log Level
/// `error!` - Failure requiring attention
pub struct WorkFailed<'a> {
    pub work: &'a str,
    pub key: &'a str,
    pub error: &'a dyn std::error::Error,
}

impl Display for WorkFailed<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "error during work {} ({}): {}",
            self.work, self.key, self.error
        )
    }
}

impl StructuredLog for WorkFailed<'_> {
    fn log(&self) {
        tracing::error!(
            work = self.work,
            key = self.key,
            error = %self.error,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::error_span!(
            "work_failed",
            span_name = name,
            work = self.work,
            key = self.key,
            error = %self.error,
        )
    }
}
