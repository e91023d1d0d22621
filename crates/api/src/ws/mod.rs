//! WebSocket notification transport.
//!
//! Connection management keyed by owner, heartbeat pings, and the HTTP
//! upgrade handler. [`WsManager`] is the primary notification channel for
//! job events.

mod handler;
mod heartbeat;
pub mod manager;

pub use handler::ws_handler;
pub use heartbeat::start_heartbeat;
pub use manager::WsManager;
