use std::sync::Arc;

use chaindesk_core::broker::Broker;

use crate::config::ServerConfig;
use crate::feed::MarketFeed;
use crate::orders::OrderManager;
use crate::ws::WsManager;

/// Shared application state available to all Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// The trading session (TWS or simulated).
    pub broker: Arc<dyn Broker>,
    /// Market-data feed and latest option-chain snapshot.
    pub feed: Arc<MarketFeed>,
    /// Order routing and the in-memory order book.
    pub orders: Arc<OrderManager>,
    /// WebSocket connection manager.
    pub ws_manager: Arc<WsManager>,
}

impl AppState {
    /// Wire the feed and order manager to `broker`.
    pub fn new(config: ServerConfig, broker: Arc<dyn Broker>) -> Self {
        let feed = Arc::new(MarketFeed::new(Arc::clone(&broker), config.feed.clone()));
        let orders = Arc::new(OrderManager::new(Arc::clone(&broker)));
        Self {
            config: Arc::new(config),
            broker,
            feed,
            orders,
            ws_manager: Arc::new(WsManager::new()),
        }
    }
}
