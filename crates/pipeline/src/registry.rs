//! Process-wide keyed maps shared between request handlers and jobs.

use std::collections::HashMap;

use delve_core::types::{JobId, Timestamp};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::messages::LiveMessage;

/// Concurrency-safe map keyed by job id.
///
/// Each call takes the lock once, so every operation is atomic per key.
pub struct KeyedRegistry<V> {
    entries: RwLock<HashMap<JobId, V>>,
}

impl<V: Clone> KeyedRegistry<V> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Insert `value`, returning whatever it replaced.
    pub async fn insert(&self, key: JobId, value: V) -> Option<V> {
        self.entries.write().await.insert(key, value)
    }

    pub async fn get(&self, key: JobId) -> Option<V> {
        self.entries.read().await.get(&key).cloned()
    }

    pub async fn remove(&self, key: JobId) -> Option<V> {
        self.entries.write().await.remove(&key)
    }

    /// Remove the entry only if `predicate` accepts the current value.
    pub async fn remove_if(&self, key: JobId, predicate: impl FnOnce(&V) -> bool) -> Option<V> {
        let mut entries = self.entries.write().await;
        if entries.get(&key).is_some_and(predicate) {
            entries.remove(&key)
        } else {
            None
        }
    }

    pub async fn contains(&self, key: JobId) -> bool {
        self.entries.read().await.contains_key(&key)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Remove and return every entry.
    pub async fn drain(&self) -> Vec<(JobId, V)> {
        self.entries.write().await.drain().collect()
    }

    pub async fn values(&self) -> Vec<V> {
        self.entries.read().await.values().cloned().collect()
    }
}

impl<V: Clone> Default for KeyedRegistry<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Frames queued for one live connection's socket writer.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Message(LiveMessage),
    /// Keep-alive ping from the heartbeat task.
    Ping,
    /// Close the socket; the connection was replaced or the server is
    /// shutting down.
    Close,
}

pub type LiveSender = mpsc::UnboundedSender<Outbound>;

/// The single observer attached to a job.
#[derive(Debug, Clone)]
pub struct LiveConnection {
    pub conn_id: Uuid,
    pub sender: LiveSender,
    pub connected_at: Timestamp,
}

fn attached_ms(conn: &LiveConnection) -> i64 {
    (chrono::Utc::now() - conn.connected_at).num_milliseconds()
}

/// Maps job ids to their (at most one) live observer.
///
/// Designed to be wrapped in `Arc` and shared by the websocket handlers
/// and the job orchestrator.
#[derive(Default)]
pub struct LiveRegistry {
    connections: KeyedRegistry<LiveConnection>,
}

impl LiveRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new observer to `job_id`, replacing any previous one.
    ///
    /// The replaced connection is told to close. Returns the new
    /// connection's id and the receiver its socket writer drains.
    pub async fn register(&self, job_id: JobId) -> (Uuid, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = LiveConnection {
            conn_id: Uuid::new_v4(),
            sender: tx,
            connected_at: chrono::Utc::now(),
        };
        let conn_id = conn.conn_id;

        if let Some(previous) = self.connections.insert(job_id, conn).await {
            tracing::debug!(
                job_id = %job_id,
                replaced = %previous.conn_id,
                attached_ms = attached_ms(&previous),
                "Live connection replaced",
            );
            let _ = previous.sender.send(Outbound::Close);
        }
        (conn_id, rx)
    }

    /// Detach `conn_id` from `job_id`.
    ///
    /// A no-op when the job's current observer is a different connection,
    /// so a replaced socket closing never evicts its successor.
    pub async fn remove(&self, job_id: JobId, conn_id: Uuid) -> bool {
        match self
            .connections
            .remove_if(job_id, |conn| conn.conn_id == conn_id)
            .await
        {
            Some(conn) => {
                tracing::debug!(
                    job_id = %job_id,
                    conn_id = %conn_id,
                    attached_ms = attached_ms(&conn),
                    "Live connection removed",
                );
                true
            }
            None => false,
        }
    }

    /// Best-effort delivery to the job's observer.
    ///
    /// Returns `false` when nobody is attached or the send failed; a failed
    /// send detaches the dead connection.
    pub async fn push(&self, job_id: JobId, message: LiveMessage) -> bool {
        let Some(conn) = self.connections.get(job_id).await else {
            return false;
        };
        if conn.sender.send(Outbound::Message(message)).is_ok() {
            return true;
        }
        tracing::debug!(job_id = %job_id, conn_id = %conn.conn_id, "Dropping closed live connection");
        self.remove(job_id, conn.conn_id).await;
        false
    }

    pub async fn is_attached(&self, job_id: JobId) -> bool {
        self.connections.contains(job_id).await
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.len().await
    }

    /// Send a ping frame to every observer.
    pub async fn ping_all(&self) {
        for conn in self.connections.values().await {
            let _ = conn.sender.send(Outbound::Ping);
        }
    }

    /// Tell every observer to close, then clear the map.
    pub async fn shutdown_all(&self) {
        let drained = self.connections.drain().await;
        let count = drained.len();
        for (_, conn) in drained {
            let _ = conn.sender.send(Outbound::Close);
        }
        tracing::info!(count, "Closed all live connections");
    }
}
