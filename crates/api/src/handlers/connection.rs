//! Broker session control and status.

use axum::extract::State;
use axum::Json;

use crate::error::{AppError, AppResult};
use crate::response::{MessageResponse, StatusResponse};
use crate::state::AppState;

/// POST /api/connect
///
/// Connect the broker and start the feed. Succeeds when already connected.
pub async fn connect(State(state): State<AppState>) -> AppResult<Json<MessageResponse>> {
    tracing::info!("Connect requested");
    state.feed.connect().await.map_err(|e| {
        tracing::error!(error = %e, "Failed to connect to TWS");
        AppError::ServiceUnavailable(format!("Failed to connect to TWS: {e}"))
    })?;
    Ok(Json(MessageResponse::ok("Connection process initiated/successful.")))
}

/// POST /api/disconnect
pub async fn disconnect(State(state): State<AppState>) -> Json<MessageResponse> {
    tracing::info!("Disconnect requested");
    state.feed.disconnect().await;
    Json(MessageResponse::ok("Disconnected from TWS."))
}

/// GET /api/status
pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let connected = state.feed.is_live().await;
    let price = state.feed.spy_price();
    let spy_price = if connected && price > 0.0 { price } else { 0.0 };
    Json(StatusResponse {
        ibkr_connected: connected,
        spy_price,
    })
}
