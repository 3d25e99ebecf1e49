//! Session events broadcast by the TWS client.

use chaindesk_core::broker::OrderStatusReport;
use chaindesk_core::types::OrderId;
use serde::Serialize;

/// A state change on the TWS session that the rest of the app cares about.
#[derive(Debug, Clone, Serialize)]
pub enum TwsEvent {
    /// The API handshake completed and TWS handed out an order id.
    Connected {
        server_version: i32,
        next_order_id: OrderId,
    },

    /// The socket closed, or TWS reported loss of connectivity.
    Disconnected,

    /// TWS reported a new status for an order.
    OrderStatus {
        order_id: OrderId,
        report: OrderStatusReport,
    },

    /// A non-informational error message. `req_id` is `-1` for
    /// session-wide errors.
    Error {
        req_id: i32,
        code: i32,
        message: String,
    },
}
