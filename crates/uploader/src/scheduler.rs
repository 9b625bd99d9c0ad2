//! Bounded-concurrency chunk transfer with per-chunk retry.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use filedrop_protocol::ChunkAck;
use filedrop_transfer::{ByteSource, ChunkPlan, ChunkStatus};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::config::{RetryPolicy, UploadConfig};
use crate::error::UploadError;
use crate::session::UploadSession;

/// Uploads the pending chunks of a [`ChunkPlan`].
///
/// At most `concurrency_limit` chunk puts are in flight at once. A failed
/// chunk waits out its backoff in a delay queue without holding a slot,
/// so other chunks keep the pipe busy meanwhile.
#[derive(Debug, Clone)]
pub struct TransferScheduler {
    concurrency_limit: usize,
    max_attempts: u8,
    retry: RetryPolicy,
    call_timeout: Duration,
}

impl TransferScheduler {
    /// Builds a scheduler from the upload configuration.
    pub fn new(config: &UploadConfig) -> Self {
        Self {
            concurrency_limit: config.concurrency_limit.max(1),
            max_attempts: config.max_chunk_retries.saturating_add(1),
            retry: config.retry.clone(),
            call_timeout: config.call_timeout,
        }
    }

    /// Total attempts allowed per chunk.
    pub fn max_attempts(&self) -> u8 {
        self.max_attempts
    }

    /// Uploads every chunk of `plan` not yet acknowledged.
    ///
    /// `on_ack(acked, total)` runs after each acknowledgment. Returns once
    /// every chunk is acknowledged, or on the first chunk that exhausts its
    /// attempts. Either way nothing is left in flight on return.
    pub async fn run<F>(
        &self,
        plan: &mut ChunkPlan,
        session: Arc<dyn UploadSession>,
        source: Arc<dyn ByteSource>,
        upload_id: &str,
        cancel: &CancellationToken,
        mut on_ack: F,
    ) -> Result<(), UploadError>
    where
        F: FnMut(u32, u32),
    {
        let total = plan.total_chunks();
        let upload_id: Arc<str> = Arc::from(upload_id);
        let mut queue: VecDeque<u32> = plan.pending_indices().into();
        let mut delayed: Vec<(Instant, u32)> = Vec::new();
        let mut in_flight: JoinSet<(u32, Result<ChunkAck, UploadError>)> = JoinSet::new();

        debug!(
            upload_id = %upload_id,
            pending = queue.len(),
            total,
            limit = self.concurrency_limit,
            "starting chunk transfer"
        );

        loop {
            let now = Instant::now();
            delayed.retain(|&(due, index)| {
                if due <= now {
                    queue.push_back(index);
                    false
                } else {
                    true
                }
            });

            while in_flight.len() < self.concurrency_limit {
                if cancel.is_cancelled() {
                    in_flight.shutdown().await;
                    return Err(UploadError::Cancelled);
                }
                let Some(index) = queue.pop_front() else {
                    break;
                };
                let Some(chunk) = plan.get(index) else {
                    continue;
                };
                let (offset, length) = (chunk.offset, chunk.length);
                plan.set_status(index, ChunkStatus::InFlight);
                let attempt = plan.record_attempt(index);
                debug!(index, attempt, offset, length, "dispatching chunk");

                in_flight.spawn(send_chunk(
                    Arc::clone(&session),
                    Arc::clone(&source),
                    Arc::clone(&upload_id),
                    index,
                    offset,
                    length,
                    self.call_timeout,
                ));
            }

            if in_flight.is_empty() && queue.is_empty() && delayed.is_empty() {
                break;
            }

            let next_due = delayed.iter().map(|&(due, _)| due).min();

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(upload_id = %upload_id, in_flight = in_flight.len(), "transfer cancelled");
                    in_flight.shutdown().await;
                    return Err(UploadError::Cancelled);
                }
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    let (index, result) = match joined {
                        Ok(outcome) => outcome,
                        Err(e) => {
                            in_flight.shutdown().await;
                            return Err(UploadError::Protocol(format!("chunk task failed: {e}")));
                        }
                    };

                    match result {
                        Ok(_) => {
                            plan.set_status(index, ChunkStatus::Acked);
                            let acked = plan.acked_count();
                            debug!(index, acked, total, "chunk acknowledged");
                            on_ack(acked, total);
                        }
                        Err(e) => {
                            let attempts = plan.get(index).map_or(0, |c| c.attempts);
                            if e.is_retryable() && attempts < self.max_attempts {
                                let delay = self.retry.delay_for_attempt(u32::from(attempts));
                                warn!(index, attempts, ?delay, error = %e, "chunk failed; retrying");
                                plan.set_status(index, ChunkStatus::Pending);
                                delayed.push((Instant::now() + delay, index));
                            } else {
                                error!(index, attempts, error = %e, "chunk failed; giving up");
                                plan.set_status(index, ChunkStatus::Failed);
                                in_flight.shutdown().await;
                                return Err(UploadError::ChunkTransfer {
                                    index,
                                    attempts,
                                    message: e.to_string(),
                                });
                            }
                        }
                    }
                }
                _ = tokio::time::sleep_until(next_due.unwrap_or(now)), if next_due.is_some() => {}
            }
        }

        debug!(upload_id = %upload_id, total, "all chunks acknowledged");
        Ok(())
    }
}

/// Reads one chunk and puts it, under the per-call deadline.
pub(crate) async fn send_chunk(
    session: Arc<dyn UploadSession>,
    source: Arc<dyn ByteSource>,
    upload_id: Arc<str>,
    index: u32,
    offset: u64,
    length: u64,
    call_timeout: Duration,
) -> (u32, Result<ChunkAck, UploadError>) {
    let result: Result<ChunkAck, UploadError> = async {
        let data: Bytes = source
            .read_range(offset, length)
            .await
            .map_err(|e| UploadError::Source(e.to_string()))?;
        let ack = tokio::time::timeout(call_timeout, session.put_chunk(&upload_id, index, data))
            .await
            .unwrap_or(Err(UploadError::Timeout))?;
        if ack.acked {
            Ok(ack)
        } else {
            Err(UploadError::NotAcknowledged(index))
        }
    }
    .await;
    (index, result)
}
