use axum::extract::State;
use axum::Json;
use chaindesk_core::quote::OptionsSnapshot;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// GET /api/options
///
/// Current chain snapshot. 503 while the broker or the feed is down.
pub async fn get_options(State(state): State<AppState>) -> AppResult<Json<OptionsSnapshot>> {
    if !state.feed.is_live().await {
        tracing::warn!("Options requested while not connected");
        return Err(AppError::ServiceUnavailable(
            "Not connected to TWS or data fetcher not running".to_string(),
        ));
    }

    let snapshot = state.feed.snapshot();
    tracing::debug!(
        spy_price = snapshot.spy_price,
        options = snapshot.options.len(),
        "Returning options snapshot",
    );
    Ok(Json(snapshot))
}
