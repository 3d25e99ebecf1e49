pub mod health;
pub mod market;
pub mod orders;

use axum::Router;

use crate::state::AppState;

/// Build the `/api` route tree.
///
/// ```text
/// /connect                        connect broker, start feed (POST)
/// /disconnect                     stop feed, disconnect broker (POST)
/// /status                         connection flag and underlying price
/// /options                        current option-chain snapshot
///
/// /place_single_order             single option order (POST)
/// /place_multi_leg_order          combo or bracket order (POST)
/// /cancel_order/{order_id}        cancel (POST)
/// /order_status/{order_id}        latest status
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .merge(market::router())
        .merge(orders::router())
}
