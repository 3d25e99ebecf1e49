use std::sync::Arc;

use axum::extract::ws::Message;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::feed::FeedEvent;
use crate::ws::manager::WsManager;

/// Serialise a feed event into a text frame.
pub(crate) fn encode(event: &FeedEvent) -> Option<Message> {
    match serde_json::to_string(event) {
        Ok(text) => Some(Message::Text(text.into())),
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialise push event");
            None
        }
    }
}

/// Forwards every [`FeedEvent`] to all WebSocket clients.
pub struct PushEmitter {
    ws_manager: Arc<WsManager>,
}

impl PushEmitter {
    pub fn new(ws_manager: Arc<WsManager>) -> Self {
        Self { ws_manager }
    }

    /// Run until the feed's event channel closes.
    pub async fn run(self, mut receiver: broadcast::Receiver<FeedEvent>) {
        tracing::info!("Push emitter started");
        loop {
            match receiver.recv().await {
                Ok(event) => self.emit(&event).await,
                Err(RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Push emitter lagged, skipped events");
                }
                Err(RecvError::Closed) => {
                    tracing::info!("Feed event channel closed, push emitter stopping");
                    break;
                }
            }
        }
    }

    async fn emit(&self, event: &FeedEvent) {
        if let FeedEvent::OptionsUpdate(snapshot) = event {
            tracing::trace!(
                spy_price = snapshot.spy_price,
                options = snapshot.options.len(),
                "Emitting options_update",
            );
        }
        if let Some(message) = encode(event) {
            self.ws_manager.broadcast(message).await;
        }
    }
}
