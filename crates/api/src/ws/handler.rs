use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use delve_core::types::JobId;
use delve_pipeline::registry::Outbound;
use delve_pipeline::LiveMessage;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::error::AppResult;
use crate::handlers::jobs::{find_job, parse_job_id};
use crate::state::AppState;

/// GET /ws/{job_id}
///
/// Upgrades to a WebSocket that streams the job's progress, captured log
/// lines and terminal outcome. Unknown jobs are rejected before upgrade.
pub async fn live_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let job_id = parse_job_id(&job_id)?;
    find_job(&state, job_id).await?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, job_id)))
}

/// Serve one observer.
///
///   1. Registers with the live registry, replacing any earlier observer.
///   2. Sends one replay message built from the stored job.
///   3. Spawns a sender task draining the registry channel into the socket.
///   4. Answers client text frames with `pong` until either side closes.
///
/// The socket is closed after a terminal message is sent.
async fn handle_socket(socket: WebSocket, state: AppState, job_id: JobId) {
    let (conn_id, mut rx) = state.live.register(job_id).await;
    tracing::info!(job_id = %job_id, conn_id = %conn_id, "Live channel connected");

    // Read after registering so no push falls between the read and the
    // registration.
    let replay = match state.store.find(job_id).await {
        Ok(job) => job.as_ref().map(LiveMessage::replay),
        Err(e) => {
            tracing::warn!(job_id = %job_id, error = %e, "Failed to load job for replay");
            None
        }
    };

    let (mut sink, mut stream) = socket.split();
    let (pong_tx, mut pong_rx) = mpsc::unbounded_channel::<LiveMessage>();

    let mut send_task = tokio::spawn(async move {
        if let Some(message) = replay {
            if !send_message(&mut sink, &message).await || message.is_terminal() {
                let _ = sink.send(Message::Close(None)).await;
                return;
            }
        }

        loop {
            let outbound = tokio::select! {
                Some(pong) = pong_rx.recv() => Outbound::Message(pong),
                next = rx.recv() => match next {
                    Some(outbound) => outbound,
                    None => break,
                },
            };
            match outbound {
                Outbound::Message(message) => {
                    if !send_message(&mut sink, &message).await {
                        break;
                    }
                    if message.is_terminal() {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                }
                Outbound::Ping => {
                    if sink.send(Message::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                }
                Outbound::Close => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    loop {
        tokio::select! {
            _ = &mut send_task => break,
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let _ = pong_tx.send(LiveMessage::Pong {
                        data: text.as_str().to_string(),
                    });
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(Message::Pong(_))) => {
                    tracing::trace!(conn_id = %conn_id, "Pong received");
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(conn_id = %conn_id, error = %e, "Live channel receive error");
                    break;
                }
            },
        }
    }

    state.live.remove(job_id, conn_id).await;
    send_task.abort();
    tracing::info!(job_id = %job_id, conn_id = %conn_id, "Live channel disconnected");
}

async fn send_message(sink: &mut SplitSink<WebSocket, Message>, message: &LiveMessage) -> bool {
    sink.send(Message::Text(message.to_json().into()))
        .await
        .is_ok()
}
