//! Success bodies shared by handlers.
//!
//! Every success body carries `"success": true` so the dashboard can treat
//! success and error responses uniformly.

use chaindesk_core::types::OrderId;
use serde::Serialize;

/// `{success, message}` acknowledgement.
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

impl MessageResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }
}

/// Returned by both order placement endpoints.
#[derive(Debug, Serialize)]
pub struct OrderPlacedResponse {
    pub success: bool,
    pub order_id: OrderId,
    /// Present only for bracket-style multi-leg orders.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub child_ids: Option<Vec<OrderId>>,
}

/// Latest known state of one order.
#[derive(Debug, Serialize)]
pub struct OrderStatusResponse {
    pub success: bool,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filled: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_fill_price: Option<f64>,
}

/// `GET /api/status` body.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub ibkr_connected: bool,
    pub spy_price: f64,
}
