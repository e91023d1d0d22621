//! Job event bus and notification plumbing.
//!
//! - [`EventBus`]: in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`JobEvent`]: the closed set of lifecycle events the engine emits.
//! - [`NotificationChannel`]: fire-and-forget push to an owning client.
//! - [`NotificationDispatcher`]: forwards bus events to channels.
//! - [`JobObserver`]: collaborator callbacks fed from the bus.
//! - [`delivery`]: outbound channels (HTTP webhook).

pub mod bus;
pub mod channel;
pub mod delivery;
pub mod dispatcher;
pub mod observer;

pub use bus::{EventBus, JobEvent};
pub use channel::NotificationChannel;
pub use delivery::webhook::WebhookChannel;
pub use dispatcher::NotificationDispatcher;
pub use observer::{JobObserver, ObserverFanout};
