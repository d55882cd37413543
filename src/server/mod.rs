// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Out-of-process worker support: the typed wire protocol, the client-side
//! worker proxy, and the worker-process serve loop.

pub mod protocol;
pub mod proxy;
pub mod serve;

pub use protocol::{read_envelope, write_envelope, ClientEnvelope, ServerEnvelope};
pub use proxy::{ProxyEvent, WorkerProxy};
pub use serve::{serve, serve_stdio, PipelineFactory};
