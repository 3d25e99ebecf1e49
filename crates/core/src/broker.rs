//! Broker abstraction.
//!
//! [`Broker`] is the seam between the HTTP layer and a trading session.
//! `chaindesk-tws` implements it over the TWS socket API; the
//! [`SimulatedBroker`](crate::simulated::SimulatedBroker) implements it
//! in memory for tests and offline demos.

use async_trait::async_trait;
use serde::Serialize;

use crate::contract::Contract;
use crate::order::Order;
use crate::quote::Quote;
use crate::types::{ConId, OrderId};

/// Option-chain parameters for one exchange/trading class of an underlying.
#[derive(Debug, Clone, PartialEq)]
pub struct OptionChainParams {
    pub exchange: String,
    pub underlying_con_id: ConId,
    pub trading_class: String,
    pub multiplier: String,
    /// Expiry codes, `YYYYMMDD`.
    pub expirations: Vec<String>,
    pub strikes: Vec<f64>,
}

/// Latest status reported by the broker for a placed order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderStatusReport {
    pub status: String,
    pub filled: f64,
    pub remaining: f64,
    pub avg_fill_price: f64,
}

/// Errors surfaced by a broker session.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BrokerError {
    #[error("Not connected to TWS")]
    NotConnected,

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Failed to qualify contract: {0}")]
    Unqualified(String),

    #[error("TWS error {code}: {message}")]
    Rejected { code: i32, message: String },

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// A live (or simulated) trading session.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Open the session. Calling this while already connected is a no-op.
    async fn connect(&self) -> Result<(), BrokerError>;

    /// Close the session. Always succeeds.
    async fn disconnect(&self);

    fn is_connected(&self) -> bool;

    /// Resolve a contract to its unique broker definition.
    ///
    /// Returns [`BrokerError::Unqualified`] when nothing matches.
    async fn qualify(&self, contract: &Contract) -> Result<Contract, BrokerError>;

    /// Option-chain parameters for a qualified underlying.
    async fn option_params(&self, underlying: &Contract) -> Result<Vec<OptionChainParams>, BrokerError>;

    /// One-shot market-data snapshot for a qualified contract.
    async fn snapshot(&self, contract: &Contract) -> Result<Quote, BrokerError>;

    /// Submit an order and return the id assigned to it.
    ///
    /// `order.order_id` is ignored; the broker assigns the id.
    async fn place_order(&self, contract: &Contract, order: &Order) -> Result<OrderId, BrokerError>;

    async fn cancel_order(&self, order_id: OrderId) -> Result<(), BrokerError>;

    /// Most recent status report for an order, if the broker has sent one.
    async fn order_status(&self, order_id: OrderId) -> Option<OrderStatusReport>;
}
