//! Client for the Interactive Brokers TWS socket API.
//!
//! Provides the wire codec, typed message parsing and request builders,
//! a connection with a background reader task, reconnection logic, and
//! [`TwsBroker`](broker::TwsBroker), the [`Broker`](chaindesk_core::broker::Broker)
//! implementation used by the API server.

pub mod broker;
pub mod client;
pub mod codec;
pub mod error;
pub mod events;
pub mod messages;
mod processor;
pub mod reconnect;

pub use broker::TwsBroker;
pub use client::{TwsClient, TwsConfig, TwsConnection};
pub use error::TwsError;
pub use events::TwsEvent;
