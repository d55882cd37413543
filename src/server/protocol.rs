// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Wire protocol between the engine and out-of-process workers.
//!
//! Messages are typed envelopes encoded as length-prefixed JSON over the
//! worker's stdin/stdout: a 4-byte little-endian length followed by the
//! serialized envelope. The channel is ordered and there is no redelivery —
//! a dead worker loses whatever it was carrying.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

use crate::errors::ExecutionError;

/// Reject messages larger than this; a longer prefix means a corrupt or
/// foreign stream, not a real payload.
const MAX_MESSAGE_BYTES: usize = 100 * 1024 * 1024;

/// Envelopes sent from the engine to a worker process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEnvelope {
    /// Initializes the worker's elapsed-time baseline so its progress lines
    /// line up with the client's.
    Start { t_start_ms: u64 },
    /// Submit one item for the named work.
    Submit {
        work: String,
        key: String,
        payload: Vec<u8>,
    },
    /// Run a full pipeline over a contiguous sub-range of the series
    /// (fan-out mode). Requires the worker to have a pipeline factory.
    RunPipeline { start: i64, stop: i64, step: i64 },
    /// Liveness probe.
    Ping,
    /// Orderly shutdown request.
    Shutdown,
}

/// Envelopes sent from a worker process back to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEnvelope {
    /// Emitted once as soon as the worker's scheduler is up; the hybrid
    /// executor's watchdog waits for this.
    Started { pid: u32 },
    /// Outcome of one submitted item. Callable errors arrive here as
    /// `Err(message)` rather than crashing the worker.
    Result {
        work: String,
        key: String,
        outcome: Result<Vec<u8>, String>,
    },
    /// Outcome of a fan-out `RunPipeline` request.
    PipelineDone { completed: usize, failed: usize },
    /// Reply to `Ping`.
    Pong,
    /// Acknowledgement of `Shutdown`; the worker exits after sending it.
    ShuttingDown,
}

/// Write one envelope with the length prefix.
pub fn write_envelope<W: Write, T: Serialize>(
    writer: &mut W,
    envelope: &T,
) -> Result<(), ExecutionError> {
    let bytes = serde_json::to_vec(envelope)
        .map_err(|e| ExecutionError::Protocol(format!("failed to encode envelope: {}", e)))?;
    let len = bytes.len() as u32;
    writer
        .write_all(&len.to_le_bytes())
        .and_then(|_| writer.write_all(&bytes))
        .and_then(|_| writer.flush())
        .map_err(|e| ExecutionError::worker_io("write envelope", e))
}

/// Read one envelope. `Ok(None)` means the peer closed the stream cleanly
/// at a message boundary.
pub fn read_envelope<R: Read, T: DeserializeOwned>(
    reader: &mut R,
) -> Result<Option<T>, ExecutionError> {
    let mut len_bytes = [0u8; 4];
    match reader.read_exact(&mut len_bytes) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(ExecutionError::worker_io("read envelope length", e)),
    }
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_MESSAGE_BYTES {
        return Err(ExecutionError::Protocol(format!(
            "envelope too large: {} bytes",
            len
        )));
    }

    let mut bytes = vec![0u8; len];
    reader
        .read_exact(&mut bytes)
        .map_err(|e| ExecutionError::worker_io("read envelope body", e))?;
    let envelope = serde_json::from_slice(&bytes)
        .map_err(|e| ExecutionError::Protocol(format!("failed to decode envelope: {}", e)))?;
    Ok(Some(envelope))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn submit_roundtrip() {
        let envelope = ClientEnvelope::Submit {
            work: "compute_displacement".to_string(),
            key: "im_3".to_string(),
            payload: vec![1, 2, 3],
        };

        let mut buf = Vec::new();
        write_envelope(&mut buf, &envelope).unwrap();
        let decoded: ClientEnvelope = read_envelope(&mut Cursor::new(buf)).unwrap().unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn error_result_roundtrip() {
        let envelope = ServerEnvelope::Result {
            work: "compute_displacement".to_string(),
            key: "im_3".to_string(),
            outcome: Err("bad frame".to_string()),
        };

        let mut buf = Vec::new();
        write_envelope(&mut buf, &envelope).unwrap();
        let decoded: ServerEnvelope = read_envelope(&mut Cursor::new(buf)).unwrap().unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn clean_eof_reads_as_none() {
        let empty: Vec<u8> = Vec::new();
        let read: Option<ServerEnvelope> = read_envelope(&mut Cursor::new(empty)).unwrap();
        assert!(read.is_none());
    }

    #[test]
    fn truncated_body_is_an_error() {
        let envelope = ClientEnvelope::Ping;
        let mut buf = Vec::new();
        write_envelope(&mut buf, &envelope).unwrap();
        buf.truncate(buf.len() - 1);
        let result: Result<Option<ClientEnvelope>, _> = read_envelope(&mut Cursor::new(buf));
        assert!(result.is_err());
    }

    #[test]
    fn oversized_prefix_is_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(u32::MAX).to_le_bytes());
        let result: Result<Option<ClientEnvelope>, _> = read_envelope(&mut Cursor::new(buf));
        assert!(matches!(result, Err(ExecutionError::Protocol(_))));
    }

    #[test]
    fn foreign_bytes_are_a_protocol_error() {
        // A peer that does not speak the protocol (e.g. `cat` echoing our
        // own client envelopes) must surface as an error, not a panic.
        let mut buf = Vec::new();
        write_envelope(&mut buf, &ClientEnvelope::Ping).unwrap();
        let result: Result<Option<ServerEnvelope>, _> = read_envelope(&mut Cursor::new(buf));
        assert!(matches!(result, Err(ExecutionError::Protocol(_))));
    }

    #[test]
    fn multiple_envelopes_in_sequence() {
        let mut buf = Vec::new();
        write_envelope(&mut buf, &ClientEnvelope::Start { t_start_ms: 42 }).unwrap();
        write_envelope(
            &mut buf,
            &ClientEnvelope::Submit {
                work: "scale".to_string(),
                key: "a".to_string(),
                payload: b"1".to_vec(),
            },
        )
        .unwrap();
        write_envelope(&mut buf, &ClientEnvelope::Shutdown).unwrap();

        let mut cursor = Cursor::new(buf);
        let first: ClientEnvelope = read_envelope(&mut cursor).unwrap().unwrap();
        let second: ClientEnvelope = read_envelope(&mut cursor).unwrap().unwrap();
        let third: ClientEnvelope = read_envelope(&mut cursor).unwrap().unwrap();
        assert_eq!(first, ClientEnvelope::Start { t_start_ms: 42 });
        assert!(matches!(second, ClientEnvelope::Submit { .. }));
        assert_eq!(third, ClientEnvelope::Shutdown);
        let done: Option<ClientEnvelope> = read_envelope(&mut cursor).unwrap();
        assert!(done.is_none());
    }
}
