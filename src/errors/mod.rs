// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

mod execution;
mod topology;

pub use execution::{ExecutionError, WorkError};
pub use topology::TopologyError;
