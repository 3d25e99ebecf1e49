use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};

use crate::feed::{FeedEvent, MarketFeed};
use crate::state::AppState;
use crate::ws::emitter::encode;
use crate::ws::manager::WsManager;

/// HTTP handler that upgrades the connection to WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.ws_manager, state.feed))
}

/// Manage a single WebSocket connection after upgrade.
///
/// Registers the connection, pushes the current chain if one is available,
/// forwards manager messages to the sink on a spawned task and drains the
/// inbound stream until the client goes away.
async fn handle_socket(socket: WebSocket, ws_manager: Arc<WsManager>, feed: Arc<MarketFeed>) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    tracing::info!(conn_id = %conn_id, "WebSocket connected");

    let mut rx = ws_manager.add(conn_id.clone()).await;

    if feed.is_live().await {
        let snapshot = feed.snapshot();
        if snapshot.is_populated() {
            if let Some(message) = encode(&FeedEvent::OptionsUpdate(snapshot)) {
                ws_manager.send_to(&conn_id, message).await;
            }
        }
    }

    let (mut sink, mut stream) = socket.split();

    let sender_conn_id = conn_id.clone();
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sink.send(msg).await.is_err() {
                tracing::debug!(conn_id = %sender_conn_id, "WebSocket sink closed");
                break;
            }
        }
    });

    while let Some(result) = stream.next().await {
        match result {
            Ok(Message::Close(_)) => break,
            Ok(Message::Pong(_)) => {
                tracing::trace!(conn_id = %conn_id, "Pong received");
            }
            Ok(_) => {
                // The channel is push-only.
            }
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
