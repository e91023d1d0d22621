use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::ws::manager::WsManager;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub owner_id: String,
}

/// GET /api/v1/ws?owner_id=...
///
/// Upgrades to a WebSocket that receives every job event for `owner_id`.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> AppResult<impl IntoResponse> {
    let owner_id = params.owner_id.trim().to_string();
    if owner_id.is_empty() {
        return Err(AppError::BadRequest("owner_id must not be empty".into()));
    }
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, owner_id, state.ws_manager)))
}

/// Manage a single WebSocket connection after upgrade.
///
/// Registers with the manager, forwards queued messages to the sink on a
/// spawned task and drains the inbound stream until the client goes away.
async fn handle_socket(socket: WebSocket, owner_id: String, ws_manager: Arc<WsManager>) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    tracing::info!(conn_id = %conn_id, owner_id = %owner_id, "WebSocket connected");

    let mut rx = ws_manager.add(conn_id.clone(), owner_id).await;

    let (mut sink, mut stream) = socket.split();

    let sender_conn_id = conn_id.clone();
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if sink.send(msg).await.is_err() {
                tracing::debug!(conn_id = %sender_conn_id, "WebSocket sink closed");
                break;
            }
            if closing {
                break;
            }
        }
    });

    // The channel is push-only; inbound frames other than Close are ignored.
    while let Some(result) = stream.next().await {
        match result {
            Ok(Message::Close(_)) => break,
            Ok(Message::Pong(_)) => {
                tracing::trace!(conn_id = %conn_id, "Pong received");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(conn_id = %conn_id, error = %e, "WebSocket receive error");
                break;
            }
        }
    }

    ws_manager.remove(&conn_id).await;
    send_task.abort();
    tracing::info!(conn_id = %conn_id, "WebSocket disconnected");
}
