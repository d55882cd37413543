// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

pub mod executor;

pub use executor::{ExecutionReport, ExitReason, PipelineExecutor, SIGNAL_EXIT_CODE};
