//! Order placement, cancellation and status.
//!
//! Bodies are taken as raw JSON so missing fields can be reported by name
//! before deserialisation.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::Json;
use chaindesk_core::error::CoreError;
use chaindesk_core::order::OrderRequest;
use chaindesk_core::types::OrderId;
use serde_json::Value;

use crate::error::{AppError, AppResult};
use crate::response::{MessageResponse, OrderPlacedResponse, OrderStatusResponse};
use crate::state::AppState;

fn json_body(payload: Result<Json<Value>, JsonRejection>) -> AppResult<Value> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| AppError::BadRequest(rejection.body_text()))
}

/// POST /api/place_single_order
pub async fn place_single_order(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> AppResult<Json<OrderPlacedResponse>> {
    let body = json_body(payload)?;
    tracing::info!(order = %body, "Received single order");

    let request = OrderRequest::from_json(body, None)?;
    let placed = state.orders.place_single_order(&request).await?;

    Ok(Json(OrderPlacedResponse {
        success: true,
        order_id: placed.order_id,
        child_ids: placed.child_ids,
    }))
}

/// POST /api/place_multi_leg_order
pub async fn place_multi_leg_order(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> AppResult<Json<OrderPlacedResponse>> {
    let body = json_body(payload)?;
    tracing::info!(order = %body, "Received multi-leg order");

    let legs = match body.get("legs") {
        Some(Value::Array(legs)) if !legs.is_empty() => legs,
        _ => {
            return Err(CoreError::Validation("Missing or invalid 'legs' field".to_string()).into());
        }
    };
    let requests = legs
        .iter()
        .enumerate()
        .map(|(i, leg)| OrderRequest::from_json(leg.clone(), Some(i)))
        .collect::<Result<Vec<_>, _>>()?;

    let placed = state.orders.place_multi_leg_order(&requests).await?;

    Ok(Json(OrderPlacedResponse {
        success: true,
        order_id: placed.order_id,
        child_ids: placed.child_ids,
    }))
}

/// POST /api/cancel_order/{order_id}
pub async fn cancel_order(
    State(state): State<AppState>,
    Path(order_id): Path<OrderId>,
) -> AppResult<Json<MessageResponse>> {
    tracing::info!(order_id, "Cancelling order");
    state.orders.cancel_order(order_id).await?;
    Ok(Json(MessageResponse::ok(format!(
        "Order {order_id} cancellation request sent"
    ))))
}

/// GET /api/order_status/{order_id}
pub async fn get_order_status(
    State(state): State<AppState>,
    Path(order_id): Path<OrderId>,
) -> AppResult<Json<OrderStatusResponse>> {
    let view = state.orders.get_order_status(order_id).await?;
    let report = view.report;
    Ok(Json(OrderStatusResponse {
        success: true,
        status: view.status,
        filled: report.as_ref().map(|r| r.filled),
        remaining: report.as_ref().map(|r| r.remaining),
        avg_fill_price: report.as_ref().map(|r| r.avg_fill_price),
    }))
}
