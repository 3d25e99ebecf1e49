use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::state::AppState;

/// Response body for the health check endpoint.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub broker_connected: bool,
}

/// GET /health
///
/// The server is healthy whenever it answers; `broker_connected` reports
/// the trading session separately.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        broker_connected: state.broker.is_connected(),
    })
}

/// Health route, mounted at the root level.
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
