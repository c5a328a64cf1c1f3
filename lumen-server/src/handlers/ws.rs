//! WebSocket progress subscriptions. Consumers get the current snapshot on
//! connect, every coalesced snapshot afterwards, and a heartbeat frame so
//! an idle pipeline is distinguishable from a dead connection.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use lumen_core::pipeline::progress::HEARTBEAT_SECS;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use crate::AppState;

pub async fn progress_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let mut snapshots = state.supervisor.subscribe();
    let mut heartbeat = tokio::time::interval(Duration::from_secs(HEARTBEAT_SECS));

    // Current state first, so a late subscriber renders immediately.
    let initial = state.supervisor.snapshot();
    if send_json(&mut sink, &initial).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            snapshot = snapshots.recv() => {
                match snapshot {
                    Ok(stats) => {
                        if send_json(&mut sink, &stats).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(target: "ws", skipped, "consumer lagged, skipping snapshots");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            _ = heartbeat.tick() => {
                if send_json(&mut sink, &json!({ "heartbeat": true })).await.is_err() {
                    break;
                }
            }
            message = stream.next() => {
                match message {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    // Inbound frames are ignored; this is a one-way feed.
                    Some(Ok(_)) => {}
                }
            }
        }
    }
    debug!(target: "ws", "progress consumer disconnected");
}

async fn send_json<S, T>(sink: &mut S, value: &T) -> Result<(), ()>
where
    S: SinkExt<Message> + Unpin,
    T: serde::Serialize,
{
    let text = serde_json::to_string(value).map_err(|_| ())?;
    sink.send(Message::Text(text.into())).await.map_err(|_| ())
}
