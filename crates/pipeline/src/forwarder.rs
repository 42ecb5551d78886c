//! Moves a job's queued log messages to its live observer.

use std::sync::Arc;
use std::time::Duration;

use delve_core::types::JobId;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::messages::LiveMessage;
use crate::registry::LiveRegistry;

/// Spawn the forwarder for `job_id`.
///
/// The task ends when every producer is gone and the queue is empty, or
/// when `cancel` fires, in which case whatever is still queued is pushed
/// in order first. Resolves to the number of messages forwarded.
pub fn spawn(
    job_id: JobId,
    queue: mpsc::Receiver<LiveMessage>,
    live: Arc<LiveRegistry>,
    poll_interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<u64> {
    tokio::spawn(run(job_id, queue, live, poll_interval, cancel))
}

async fn run(
    job_id: JobId,
    mut queue: mpsc::Receiver<LiveMessage>,
    live: Arc<LiveRegistry>,
    poll_interval: Duration,
    cancel: CancellationToken,
) -> u64 {
    let mut forwarded = 0;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            polled = tokio::time::timeout(poll_interval, queue.recv()) => match polled {
                Ok(Some(message)) => {
                    live.push(job_id, message).await;
                    forwarded += 1;
                }
                Ok(None) => {
                    tracing::debug!(job_id = %job_id, forwarded, "Log queue closed");
                    return forwarded;
                }
                Err(_) => continue,
            },
        }
    }

    while let Ok(message) = queue.try_recv() {
        live.push(job_id, message).await;
        forwarded += 1;
    }
    tracing::debug!(job_id = %job_id, forwarded, "Forwarder cancelled after drain");
    forwarded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue;
    use crate::registry::Outbound;

    fn collect_logs(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<String> {
        let mut lines = Vec::new();
        while let Ok(Outbound::Message(LiveMessage::Log { message, .. })) = rx.try_recv() {
            lines.push(message);
        }
        lines
    }

    #[tokio::test]
    async fn forwards_in_order_and_exits_when_producer_drops() {
        let live = Arc::new(LiveRegistry::new());
        let job_id = JobId::new_v4();
        let (_conn, mut rx) = live.register(job_id).await;
        let (producer, queue) = queue::channel(job_id, 16);

        let handle = spawn(
            job_id,
            queue,
            Arc::clone(&live),
            Duration::from_millis(10),
            CancellationToken::new(),
        );
        for i in 0..5 {
            producer.offer(&format!("line {i}"));
        }
        drop(producer);

        assert_eq!(handle.await.unwrap(), 5);
        assert_eq!(
            collect_logs(&mut rx),
            vec!["line 0", "line 1", "line 2", "line 3", "line 4"]
        );
    }

    #[tokio::test]
    async fn cancellation_drains_remaining_messages() {
        let live = Arc::new(LiveRegistry::new());
        let job_id = JobId::new_v4();
        let (_conn, mut rx) = live.register(job_id).await;
        let (producer, queue) = queue::channel(job_id, 16);
        for i in 0..3 {
            producer.offer(&format!("queued {i}"));
        }

        let cancel = CancellationToken::new();
        cancel.cancel();
        // The producer is still alive, so only cancellation can end the task.
        let forwarded = spawn(job_id, queue, Arc::clone(&live), Duration::from_millis(10), cancel)
            .await
            .unwrap();

        assert_eq!(forwarded, 3);
        assert_eq!(
            collect_logs(&mut rx),
            vec!["queued 0", "queued 1", "queued 2"]
        );
        drop(producer);
    }

    #[tokio::test]
    async fn runs_without_an_observer() {
        let live = Arc::new(LiveRegistry::new());
        let job_id = JobId::new_v4();
        let (producer, queue) = queue::channel(job_id, 4);
        producer.offer("nobody listening");
        drop(producer);

        let forwarded = spawn(job_id, queue, live, Duration::from_millis(10), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(forwarded, 1);
    }
}
