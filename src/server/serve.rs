// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! The worker-process side of the protocol.
//!
//! A worker runs its own small cooperative scheduler with three concurrent
//! parts: *receive* pulls inbound envelopes into a pending list, *dispatch*
//! pops the oldest pending item and runs the named work's callable off the
//! control task, and *send* flushes completed results back over the
//! channel. A callable error (or panic) is caught at the dispatch boundary
//! and forwarded as an error-tagged result — one bad item never takes the
//! worker down.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::engine::distributed::SeriesRange;
use crate::engine::CooperativeExecutor;
use crate::errors::ExecutionError;
use crate::observability::messages::engine::{WorkCompleted, WorkFailed, WorkLaunched};
use crate::observability::messages::StructuredLog;
use crate::topology::{Topology, WorkRegistry};
use crate::util;

use super::protocol::{read_envelope, write_envelope, ClientEnvelope, ServerEnvelope};

/// Builds the full pipeline for one contiguous series sub-range; required
/// only for fan-out (`RunPipeline`) mode.
pub type PipelineFactory = Arc<dyn Fn(SeriesRange) -> Topology + Send + Sync>;

/// Serve the protocol on the given duplex pair until the client shuts the
/// channel down or closes it. This is what a worker process's `main` calls
/// (via [`serve_stdio`]); tests drive it with in-memory streams.
pub async fn serve<R, W>(
    registry: WorkRegistry,
    factory: Option<PipelineFactory>,
    reader: R,
    writer: W,
) -> Result<(), ExecutionError>
where
    R: Read + Send + 'static,
    W: Write + Send + 'static,
{
    let (outbound, outbox) = mpsc::channel::<ServerEnvelope>();

    // Send: a dedicated thread owns the write half and flushes everything
    // the scheduler produces.
    let send_thread = std::thread::spawn(move || {
        let mut writer = writer;
        while let Ok(envelope) = outbox.recv() {
            if let Err(error) = write_envelope(&mut writer, &envelope) {
                tracing::error!(error = %error, "worker cannot write to client; stopping send task");
                return;
            }
        }
    });

    outbound
        .send(ServerEnvelope::Started {
            pid: std::process::id(),
        })
        .map_err(|_| ExecutionError::internal("send task gone before start"))?;

    // Receive: a thread owns the read half and pumps envelopes into the
    // async scheduler.
    let (inbound_tx, mut inbound) = tokio::sync::mpsc::unbounded_channel::<ClientEnvelope>();
    std::thread::spawn(move || {
        let mut reader = reader;
        loop {
            match read_envelope::<_, ClientEnvelope>(&mut reader) {
                Ok(Some(envelope)) => {
                    if inbound_tx.send(envelope).is_err() {
                        return;
                    }
                }
                Ok(None) => return,
                Err(error) => {
                    tracing::error!(error = %error, "worker cannot read from client");
                    return;
                }
            }
        }
    });

    let pending = Arc::new(Mutex::new(VecDeque::<(String, String, Vec<u8>)>::new()));
    let t_start = Arc::new(Mutex::new(Instant::now()));
    let stopping = CancellationToken::new();

    // Dispatch: pop the oldest pending item, run its callable off the
    // control task, and wrap any failure as an error result.
    let dispatch = {
        let pending = pending.clone();
        let registry = registry.clone();
        let outbound = outbound.clone();
        let t_start = t_start.clone();
        let stopping = stopping.clone();
        tokio::spawn(async move {
            loop {
                let next = pending.lock().await.pop_front();
                let Some((work, key, payload)) = next else {
                    if stopping.is_cancelled() {
                        return;
                    }
                    tokio::time::sleep(Duration::from_millis(1)).await;
                    continue;
                };

                let outcome = match registry.get(&work) {
                    None => Err(format!("unknown work '{}'", work)),
                    Some(f) => {
                        WorkLaunched {
                            elapsed_secs: util::elapsed_secs(*t_start.lock().await),
                            work: &work,
                            key: &key,
                            mem_mb: util::memory_usage_mb(),
                        }
                        .log();
                        let f = f.clone();
                        let t_work = Instant::now();
                        let result = tokio::task::spawn_blocking(move || {
                            f.call(crate::topology::WorkItem::new(payload))
                        })
                        .await;
                        match result {
                            Ok(Ok(item)) => {
                                WorkCompleted {
                                    work: &work,
                                    key: &key,
                                    duration_secs: util::elapsed_secs(t_work),
                                }
                                .log();
                                Ok(item.payload)
                            }
                            Ok(Err(error)) => {
                                WorkFailed {
                                    work: &work,
                                    key: &key,
                                    error: &error,
                                }
                                .log();
                                Err(error.to_string())
                            }
                            Err(join_error) => {
                                tracing::error!(
                                    work = %work,
                                    key = %key,
                                    "work panicked: {}",
                                    join_error
                                );
                                Err(format!("work panicked: {}", join_error))
                            }
                        }
                    }
                };

                if outbound
                    .send(ServerEnvelope::Result { work, key, outcome })
                    .is_err()
                {
                    return;
                }
            }
        })
    };

    // Receive loop doubles as the control task for non-submit envelopes.
    while let Some(envelope) = inbound.recv().await {
        match envelope {
            ClientEnvelope::Start { t_start_ms } => {
                let now_ms = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_millis() as u64)
                    .unwrap_or(t_start_ms);
                let offset = Duration::from_millis(now_ms.saturating_sub(t_start_ms));
                // An implausible baseline (clock skew) falls back to "now".
                let baseline = Instant::now().checked_sub(offset).unwrap_or_else(Instant::now);
                *t_start.lock().await = baseline;
            }
            ClientEnvelope::Submit { work, key, payload } => {
                pending.lock().await.push_back((work, key, payload));
            }
            ClientEnvelope::RunPipeline { start, stop, step } => {
                let range = SeriesRange { start, stop, step };
                let reply = match &factory {
                    Some(factory) => {
                        let topology = factory(range);
                        let executor = CooperativeExecutor::default();
                        match topology.compute(&executor).await {
                            Ok(report) => ServerEnvelope::PipelineDone {
                                completed: report.completed,
                                failed: report.failed,
                            },
                            Err(error) => {
                                tracing::error!(error = %error, "fan-out pipeline failed");
                                ServerEnvelope::PipelineDone {
                                    completed: 0,
                                    failed: 0,
                                }
                            }
                        }
                    }
                    None => {
                        tracing::error!("RunPipeline received but no pipeline factory configured");
                        ServerEnvelope::PipelineDone {
                            completed: 0,
                            failed: 0,
                        }
                    }
                };
                if outbound.send(reply).is_err() {
                    break;
                }
            }
            ClientEnvelope::Ping => {
                if outbound.send(ServerEnvelope::Pong).is_err() {
                    break;
                }
            }
            ClientEnvelope::Shutdown => {
                let _ = outbound.send(ServerEnvelope::ShuttingDown);
                break;
            }
        }
    }

    // Orderly shutdown: dispatch drains what is already pending, then the
    // send thread flushes and exits once every sender is gone.
    stopping.cancel();
    let _ = dispatch.await;
    drop(outbound);
    let _ = send_thread.join();
    Ok(())
}

/// Serve on stdin/stdout; the entry point for `--serve` worker processes.
pub async fn serve_stdio(
    registry: WorkRegistry,
    factory: Option<PipelineFactory>,
) -> Result<(), ExecutionError> {
    serve(registry, factory, std::io::stdin(), std::io::stdout()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::WorkError;
    use crate::topology::{WorkFn, WorkItem};
    use std::io::Cursor;
    use std::sync::Mutex as StdMutex;

    /// Write half that the test can inspect after `serve` returns.
    #[derive(Clone, Default)]
    struct SharedBuf(Arc<StdMutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn scale(item: WorkItem) -> Result<WorkItem, WorkError> {
        let value: i64 = String::from_utf8_lossy(&item.payload)
            .parse()
            .map_err(|_| WorkError::failed("not a number"))?;
        Ok(WorkItem::new((value * 2).to_string()))
    }

    fn registry() -> WorkRegistry {
        let mut registry = WorkRegistry::new();
        registry.insert("scale", Arc::new(scale) as Arc<dyn WorkFn>);
        registry
    }

    fn script(envelopes: &[ClientEnvelope]) -> Cursor<Vec<u8>> {
        let mut buf = Vec::new();
        for envelope in envelopes {
            write_envelope(&mut buf, envelope).unwrap();
        }
        Cursor::new(buf)
    }

    fn replies(buf: &SharedBuf) -> Vec<ServerEnvelope> {
        let bytes = buf.0.lock().unwrap().clone();
        let mut cursor = Cursor::new(bytes);
        let mut out = Vec::new();
        while let Some(envelope) = read_envelope::<_, ServerEnvelope>(&mut cursor).unwrap() {
            out.push(envelope);
        }
        out
    }

    #[tokio::test]
    async fn serves_submits_and_answers_in_order() {
        let input = script(&[
            ClientEnvelope::Start { t_start_ms: 0 },
            ClientEnvelope::Submit {
                work: "scale".to_string(),
                key: "a".to_string(),
                payload: b"3".to_vec(),
            },
            ClientEnvelope::Submit {
                work: "scale".to_string(),
                key: "b".to_string(),
                payload: b"5".to_vec(),
            },
            ClientEnvelope::Shutdown,
        ]);
        let output = SharedBuf::default();

        serve(registry(), None, input, output.clone()).await.unwrap();

        let replies = replies(&output);
        assert!(matches!(replies[0], ServerEnvelope::Started { .. }));
        let results: Vec<_> = replies
            .iter()
            .filter_map(|envelope| match envelope {
                ServerEnvelope::Result { key, outcome, .. } => Some((key.clone(), outcome.clone())),
                _ => None,
            })
            .collect();
        assert_eq!(
            results,
            vec![
                ("a".to_string(), Ok(b"6".to_vec())),
                ("b".to_string(), Ok(b"10".to_vec())),
            ]
        );
        assert!(replies.contains(&ServerEnvelope::ShuttingDown));
    }

    #[tokio::test]
    async fn callable_error_becomes_error_result_not_a_crash() {
        let input = script(&[
            ClientEnvelope::Submit {
                work: "scale".to_string(),
                key: "bad".to_string(),
                payload: b"oops".to_vec(),
            },
            ClientEnvelope::Submit {
                work: "scale".to_string(),
                key: "good".to_string(),
                payload: b"4".to_vec(),
            },
            ClientEnvelope::Shutdown,
        ]);
        let output = SharedBuf::default();

        serve(registry(), None, input, output.clone()).await.unwrap();

        let replies = replies(&output);
        let outcomes: std::collections::HashMap<String, Result<Vec<u8>, String>> = replies
            .iter()
            .filter_map(|envelope| match envelope {
                ServerEnvelope::Result { key, outcome, .. } => Some((key.clone(), outcome.clone())),
                _ => None,
            })
            .collect();
        assert!(outcomes["bad"].is_err());
        assert_eq!(outcomes["good"], Ok(b"8".to_vec()));
    }

    #[tokio::test]
    async fn unknown_work_is_reported_per_item() {
        let input = script(&[
            ClientEnvelope::Submit {
                work: "no_such_stage".to_string(),
                key: "a".to_string(),
                payload: Vec::new(),
            },
            ClientEnvelope::Shutdown,
        ]);
        let output = SharedBuf::default();

        serve(registry(), None, input, output.clone()).await.unwrap();

        let has_error = replies(&output).iter().any(|envelope| {
            matches!(
                envelope,
                ServerEnvelope::Result { outcome: Err(message), .. }
                    if message.contains("no_such_stage")
            )
        });
        assert!(has_error);
    }

    #[tokio::test]
    async fn ping_gets_pong() {
        let input = script(&[ClientEnvelope::Ping, ClientEnvelope::Shutdown]);
        let output = SharedBuf::default();

        serve(registry(), None, input, output.clone()).await.unwrap();

        assert!(replies(&output).contains(&ServerEnvelope::Pong));
    }

    #[tokio::test]
    async fn client_eof_shuts_the_worker_down() {
        // No explicit Shutdown: closing the stream must end serve().
        let input = script(&[ClientEnvelope::Submit {
            work: "scale".to_string(),
            key: "a".to_string(),
            payload: b"1".to_vec(),
        }]);
        let output = SharedBuf::default();

        serve(registry(), None, input, output.clone()).await.unwrap();

        let results: Vec<_> = replies(&output)
            .into_iter()
            .filter(|envelope| matches!(envelope, ServerEnvelope::Result { .. }))
            .collect();
        assert_eq!(results.len(), 1);
    }
}
