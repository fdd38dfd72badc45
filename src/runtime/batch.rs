// Dynamic batching for inference requests

use super::engine::{InferenceEngine, InferenceRequest, InferenceResponse};
use crate::config::BatchingConfig;
use crate::error::{Result, ServioError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// A queued request waiting for a batch slot.
struct BatchedRequest {
    request: InferenceRequest,
    response_tx: oneshot::Sender<Result<InferenceResponse>>,
    queued_at: std::time::Instant,
}

/// Handle for submitting requests to the batcher.
#[derive(Clone)]
pub struct BatchQueue {
    tx: mpsc::Sender<BatchedRequest>,
    stats: Arc<BatchStats>,
}

impl BatchQueue {
    /// Submit a request and wait for its response.
    pub async fn submit(&self, request: InferenceRequest) -> Result<InferenceResponse> {
        let (response_tx, response_rx) = oneshot::channel();
        let queued = BatchedRequest {
            request,
            response_tx,
            queued_at: std::time::Instant::now(),
        };

        self.tx
            .send(queued)
            .await
            .map_err(|_| ServioError::Unavailable("Batcher is not running".to_string()))?;

        response_rx
            .await
            .map_err(|_| ServioError::Internal("Batcher dropped the request".to_string()))?
    }

    /// Gets a statistics snapshot.
    pub fn stats(&self) -> BatchStatsSnapshot {
        self.stats.snapshot()
    }
}

/// Batch statistics.
#[derive(Default)]
struct BatchStats {
    batches_processed: AtomicU64,
    requests_batched: AtomicU64,
    max_queue_wait_us: AtomicU64,
}

impl BatchStats {
    fn snapshot(&self) -> BatchStatsSnapshot {
        let batches = self.batches_processed.load(Ordering::Relaxed);
        let requests = self.requests_batched.load(Ordering::Relaxed);
        BatchStatsSnapshot {
            batches_processed: batches,
            requests_batched: requests,
            avg_batch_size: if batches > 0 {
                requests as f64 / batches as f64
            } else {
                0.0
            },
            max_queue_wait_us: self.max_queue_wait_us.load(Ordering::Relaxed),
        }
    }
}

/// Batch statistics snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchStatsSnapshot {
    pub batches_processed: u64,
    pub requests_batched: u64,
    pub avg_batch_size: f64,
    pub max_queue_wait_us: u64,
}

/// Dynamic batcher: drains the queue when the batch fills or the oldest
/// request has waited `max_queue_delay`, then executes every drained request
/// against the engine.
pub struct Batcher {
    queue: BatchQueue,
    handle: tokio::task::JoinHandle<()>,
}

impl Batcher {
    /// Spawns the batch worker.
    pub fn spawn(engine: Arc<InferenceEngine>, config: BatchingConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.max_batch_size.max(1) * 4);
        let stats = Arc::new(BatchStats::default());

        let queue = BatchQueue {
            tx,
            stats: Arc::clone(&stats),
        };

        let handle = tokio::spawn(Self::worker(engine, config, rx, stats));

        Self { queue, handle }
    }

    /// Gets the submission handle.
    pub fn queue(&self) -> BatchQueue {
        self.queue.clone()
    }

    /// Stops the worker. Requests still queued are dropped and their
    /// submitters see an error.
    pub async fn shutdown(self) {
        drop(self.queue);
        self.handle.abort();
        let _ = self.handle.await;
    }

    async fn worker(
        engine: Arc<InferenceEngine>,
        config: BatchingConfig,
        mut rx: mpsc::Receiver<BatchedRequest>,
        stats: Arc<BatchStats>,
    ) {
        loop {
            // Block until the first request arrives
            let first = match rx.recv().await {
                Some(r) => r,
                None => break,
            };

            let deadline = tokio::time::Instant::now() + config.max_queue_delay;
            let mut batch = vec![first];

            // Fill the batch until it is full or the delay elapses
            while batch.len() < config.max_batch_size {
                match tokio::time::timeout_at(deadline, rx.recv()).await {
                    Ok(Some(req)) => batch.push(req),
                    Ok(None) => break,
                    Err(_) => break,
                }
            }

            stats.batches_processed.fetch_add(1, Ordering::Relaxed);
            stats
                .requests_batched
                .fetch_add(batch.len() as u64, Ordering::Relaxed);

            // Group by target graph so one group executes together
            let mut by_target: HashMap<String, Vec<BatchedRequest>> = HashMap::new();
            for req in batch {
                let key = format!(
                    "{}:v{}:{}",
                    req.request.model, req.request.version, req.request.method
                );
                by_target.entry(key).or_default().push(req);
            }

            for (target, requests) in by_target {
                debug!(target = %target, size = requests.len(), "Executing batch");

                let mut waits = Vec::with_capacity(requests.len());
                let futures: Vec<_> = requests
                    .into_iter()
                    .map(|queued| {
                        waits.push(queued.queued_at.elapsed().as_micros() as u64);
                        let engine = Arc::clone(&engine);
                        async move {
                            let result = engine.infer(queued.request).await;
                            let _ = queued.response_tx.send(result);
                        }
                    })
                    .collect();

                if let Some(max_wait) = waits.into_iter().max() {
                    stats.max_queue_wait_us.fetch_max(max_wait, Ordering::Relaxed);
                }

                futures::future::join_all(futures).await;
            }
        }
    }
}
