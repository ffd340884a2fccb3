use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::SinkExt;
use futures::stream::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

use crate::auth::CurrentTenant;
use crate::error::HubError;
use crate::state::AppState;
use crate::subprocess::supervisor::WorkerSupervisor;

/// Log entries in the initial snapshot.
const SNAPSHOT_LOGS: usize = 50;

/// WebSocket upgrade handler. Binds the connection to the caller's tenant;
/// a caller without a live session is refused.
pub async fn ws_handler(
    CurrentTenant(tenant): CurrentTenant,
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, HubError> {
    let sup = state.supervisor_for(&tenant).map_err(|_| HubError::Unauthorized)?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, sup)))
}

#[derive(Debug, Deserialize)]
struct WsClientMsg {
    #[serde(rename = "type")]
    msg_type: String,
}

fn frame<T: Serialize>(kind: &str, data: &T) -> Option<String> {
    serde_json::to_string(&json!({ "type": kind, "data": data })).ok()
}

async fn handle_socket(socket: WebSocket, sup: Arc<WorkerSupervisor>) {
    // Subscribe before taking the snapshot so no event falls in between.
    let mut events = sup.subscribe();
    let initial = [frame("status", &sup.status()), frame("logs", &sup.logs(SNAPSHOT_LOGS))];
    let tenant = sup.tenant().clone();
    // The subscription closes once the supervisor is reclaimed.
    drop(sup);

    let (mut sender, mut receiver) = socket.split();
    let (tx_to_client, mut rx_to_client) = tokio::sync::mpsc::channel::<String>(64);

    let forward_task = tokio::spawn(async move {
        while let Some(msg) = rx_to_client.recv().await {
            if sender.send(Message::Text(msg.into())).await.is_err() {
                break;
            }
        }
    });

    for msg in initial.into_iter().flatten() {
        let _ = tx_to_client.send(msg).await;
    }
    tracing::debug!("observer connected for tenant {tenant}");

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Ok(parsed) = serde_json::from_str::<WsClientMsg>(&text) {
                            if parsed.msg_type == "ping" {
                                let _ = tx_to_client.send(r#"{"type":"pong"}"#.to_string()).await;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => {}
                }
            }
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        let Ok(json) = serde_json::to_string(&event) else { continue };
                        if tx_to_client.send(json).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("observer for tenant {tenant} lagged, skipped {skipped} events");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    forward_task.abort();
    tracing::debug!("observer disconnected for tenant {tenant}");
}
