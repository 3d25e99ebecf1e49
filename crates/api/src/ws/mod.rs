//! WebSocket push channel.
//!
//! Connection management, heartbeat, the upgrade handler, and the emitter
//! that forwards feed events to every connected client.

mod emitter;
mod handler;
mod heartbeat;
pub mod manager;

pub use emitter::PushEmitter;
pub use handler::ws_handler;
pub use heartbeat::start_heartbeat;
pub use manager::WsManager;
