//! Bounded per-job log queues and the map that tracks them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use delve_core::types::JobId;
use tokio::sync::mpsc;

use crate::messages::LiveMessage;
use crate::registry::KeyedRegistry;

/// Counters for one job's queue.
#[derive(Debug, Default)]
pub struct QueueStats {
    enqueued: AtomicU64,
    dropped: AtomicU64,
}

impl QueueStats {
    pub fn enqueued(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Producer half of a job's queue.
///
/// Safe to call from a blocking thread. Offers never wait: a full queue
/// drops the line and counts it.
pub struct LogProducer {
    job_id: JobId,
    tx: mpsc::Sender<LiveMessage>,
    stats: Arc<QueueStats>,
}

impl LogProducer {
    /// Enqueue `line` as a log message. Returns `false` if it was dropped.
    pub fn offer(&self, line: &str) -> bool {
        match self.tx.try_send(LiveMessage::log(self.job_id, line)) {
            Ok(()) => {
                self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(_) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }
}

/// Create a queue for `job_id` that is not tracked by any registry.
pub fn channel(job_id: JobId, capacity: usize) -> (LogProducer, mpsc::Receiver<LiveMessage>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let producer = LogProducer {
        job_id,
        tx,
        stats: Arc::new(QueueStats::default()),
    };
    (producer, rx)
}

/// Process-wide map of open job queues, keyed by job id.
#[derive(Default)]
pub struct QueueRegistry {
    queues: KeyedRegistry<Arc<QueueStats>>,
}

impl QueueRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fresh queue for `job_id` and track its stats.
    ///
    /// A leftover entry from an earlier execution is replaced.
    pub async fn open(
        &self,
        job_id: JobId,
        capacity: usize,
    ) -> (LogProducer, mpsc::Receiver<LiveMessage>) {
        let (producer, rx) = channel(job_id, capacity);
        if self
            .queues
            .insert(job_id, Arc::clone(&producer.stats))
            .await
            .is_some()
        {
            tracing::warn!(job_id = %job_id, "Replaced stale log queue entry");
        }
        (producer, rx)
    }

    /// Stop tracking `job_id`'s queue, returning its final stats.
    pub async fn close(&self, job_id: JobId) -> Option<Arc<QueueStats>> {
        self.queues.remove(job_id).await
    }

    pub async fn stats(&self, job_id: JobId) -> Option<Arc<QueueStats>> {
        self.queues.get(job_id).await
    }

    pub async fn open_count(&self) -> usize {
        self.queues.len().await
    }
}
