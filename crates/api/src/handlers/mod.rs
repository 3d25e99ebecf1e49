pub mod connection;
pub mod market;
pub mod orders;
