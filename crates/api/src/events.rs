//! Relay of TWS session events into the rest of the server.
//!
//! Connection changes are re-announced to WebSocket clients through the
//! feed, and order-status pushes update the order book.

use std::sync::Arc;

use chaindesk_tws::TwsEvent;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::feed::MarketFeed;
use crate::orders::OrderManager;

pub struct BrokerEventRelay {
    feed: Arc<MarketFeed>,
    orders: Arc<OrderManager>,
}

impl BrokerEventRelay {
    pub fn new(feed: Arc<MarketFeed>, orders: Arc<OrderManager>) -> Self {
        Self { feed, orders }
    }

    /// Run until the event channel closes.
    pub async fn run(self, mut receiver: broadcast::Receiver<TwsEvent>) {
        tracing::info!("Broker event relay started");
        loop {
            match receiver.recv().await {
                Ok(event) => self.handle(event),
                Err(RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Broker event relay lagged, skipped events");
                }
                Err(RecvError::Closed) => {
                    tracing::info!("Broker event channel closed, relay stopping");
                    break;
                }
            }
        }
    }

    fn handle(&self, event: TwsEvent) {
        match event {
            TwsEvent::Connected {
                server_version,
                next_order_id,
            } => {
                tracing::info!(server_version, next_order_id, "TWS session up");
                self.feed.publish_connection_status(true);
            }
            TwsEvent::Disconnected => {
                tracing::warn!("TWS session down");
                self.feed.publish_connection_status(false);
            }
            TwsEvent::OrderStatus { order_id, report } => {
                if !self.orders.apply_status(order_id, &report.status) {
                    tracing::debug!(order_id, status = %report.status, "Status for order placed elsewhere");
                }
            }
            TwsEvent::Error { req_id, code, message } => {
                tracing::debug!(req_id, code, message = %message, "TWS error relayed");
            }
        }
    }
}
