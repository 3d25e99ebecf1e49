pub mod config;
pub mod error;
pub mod events;
pub mod feed;
pub mod handlers;
pub mod orders;
pub mod response;
pub mod router;
pub mod routes;
pub mod state;
pub mod ws;
