//! Write Pipeline (spec §4.D): a bounded FIFO of `WriteBatch`es drained by a
//! small worker pool, with per-batch atomicity, exponential-backoff retry
//! and back-pressure into the producer.
//!
//! Grounded on the teacher's producer/consumer shape (`ProcessorClient` as
//! producer, `tcp::start_tcp_listener` as consumer) collapsed onto a direct
//! Postgres writer modelled on `pinnacle::db::PinnacleDbService`'s upsert
//! pattern, since this crate is single-process and doesn't need the TCP hop
//! between odds-engine and odds-processor.

use crate::model::{HistoryPoint, WriteBatch};
use sqlx::PgPool;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

const MAX_ATTEMPTS: u32 = 3;
const BASE_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(8);

#[derive(Debug, Clone, Default)]
pub struct BatchCounts {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged_confirmed: usize,
    pub became_unavailable: usize,
    pub became_available: usize,
}

enum WorkItem {
    Batch { batch: WriteBatch, attempt: u32 },
    Confirmations(Vec<HistoryPoint>),
}

#[derive(Clone)]
pub struct WritePipelineHandle {
    tx: mpsc::Sender<WorkItem>,
}

impl WritePipelineHandle {
    /// Non-blocking until the FIFO is full; blocks the caller (back-pressure)
    /// once it is.
    pub async fn enqueue(&self, batch: WriteBatch) {
        if batch.is_empty() {
            return;
        }
        let _ = self.tx.send(WorkItem::Batch { batch, attempt: 0 }).await;
    }

    pub async fn enqueue_confirmations(&self, points: Vec<HistoryPoint>) {
        if points.is_empty() {
            return;
        }
        let _ = self.tx.send(WorkItem::Confirmations(points)).await;
    }
}

pub struct WritePipeline {
    pool: PgPool,
    rx: mpsc::Receiver<WorkItem>,
    retry_tx: mpsc::Sender<WorkItem>,
}

impl WritePipeline {
    /// `capacity` bounds the FIFO; once full, `enqueue` suspends the caller.
    pub fn new(pool: PgPool, capacity: usize) -> (Self, WritePipelineHandle) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                pool,
                rx,
                retry_tx: tx.clone(),
            },
            WritePipelineHandle { tx },
        )
    }

    /// Spawn `workers` tasks draining the shared FIFO until the handle is dropped.
    pub fn spawn_workers(self, workers: usize) {
        let WritePipeline { pool, rx, retry_tx } = self;
        let rx = std::sync::Arc::new(tokio::sync::Mutex::new(rx));

        for worker_id in 0..workers {
            let pool = pool.clone();
            let rx = rx.clone();
            let retry_tx = retry_tx.clone();
            tokio::spawn(async move {
                loop {
                    let item = {
                        let mut guard = rx.lock().await;
                        guard.recv().await
                    };
                    let Some(item) = item else { break };
                    process_item(&pool, item, &retry_tx, worker_id).await;
                }
            });
        }
    }
}

async fn process_item(pool: &PgPool, item: WorkItem, retry_tx: &mpsc::Sender<WorkItem>, worker_id: usize) {
    match item {
        WorkItem::Batch { batch, attempt } => match crate::db::apply_batch(pool, &batch).await {
            Ok(counts) => {
                info!(
                    worker_id,
                    inserted = counts.inserted,
                    updated = counts.updated,
                    became_unavailable = counts.became_unavailable,
                    became_available = counts.became_available,
                    "write batch committed"
                );
            }
            Err(e) => {
                if attempt + 1 >= MAX_ATTEMPTS {
                    error!(worker_id, error = %e, "write batch dropped after max attempts; upstream remains source of truth");
                } else {
                    let delay = backoff_for(attempt);
                    warn!(worker_id, error = %e, attempt, delay_ms = delay.as_millis() as u64, "write batch failed, retrying");
                    let retry_tx = retry_tx.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = retry_tx
                            .send(WorkItem::Batch {
                                batch,
                                attempt: attempt + 1,
                            })
                            .await;
                    });
                }
            }
        },
        WorkItem::Confirmations(points) => {
            if let Err(e) = crate::db::append_confirmations(pool, &points).await {
                error!(worker_id, error = %e, "failed to append confirmation history points");
            }
        }
    }
}

fn backoff_for(attempt: u32) -> Duration {
    let scaled = BASE_BACKOFF * 2u32.pow(attempt);
    scaled.min(MAX_BACKOFF)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_exponential_and_capped() {
        assert_eq!(backoff_for(0), Duration::from_millis(500));
        assert_eq!(backoff_for(1), Duration::from_millis(1000));
        assert_eq!(backoff_for(2), Duration::from_millis(2000));
        assert_eq!(backoff_for(10), MAX_BACKOFF);
    }
}
