//! Chaindesk domain logic.
//!
//! Contracts, quotes, option-chain selection, order requests and the
//! [`Broker`](broker::Broker) seam. No network or file I/O lives here; the
//! TWS client and the HTTP server build on these types.

pub mod broker;
pub mod chain;
pub mod contract;
pub mod error;
pub mod order;
pub mod order_book;
pub mod quote;
pub mod simulated;
pub mod types;
