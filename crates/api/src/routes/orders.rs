use axum::routing::{get, post};
use axum::Router;

use crate::handlers::orders;
use crate::state::AppState;

/// Order routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/place_single_order", post(orders::place_single_order))
        .route("/place_multi_leg_order", post(orders::place_multi_leg_order))
        .route("/cancel_order/{order_id}", post(orders::cancel_order))
        .route("/order_status/{order_id}", get(orders::get_order_status))
}
