use axum::routing::{get, post};
use axum::Router;

use crate::handlers::{connection, market};
use crate::state::AppState;

/// Session control and market-data routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/connect", post(connection::connect))
        .route("/disconnect", post(connection::disconnect))
        .route("/status", get(connection::status))
        .route("/options", get(market::get_options))
}
