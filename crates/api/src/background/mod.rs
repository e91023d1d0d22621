//! Event services started alongside the HTTP server.
//!
//! Both loops subscribe to the engine's [`EventBus`] and exit when it is
//! dropped: the [`NotificationDispatcher`] pushes events to owners over
//! every configured channel, the [`ObserverFanout`] feeds collaborator
//! callbacks.

pub mod job_log;

use std::sync::Arc;

use synth_events::{
    EventBus, JobObserver, NotificationChannel, NotificationDispatcher, ObserverFanout,
    WebhookChannel,
};
use tokio::task::JoinHandle;

use crate::ws::WsManager;

/// Notification channels for this deployment: WebSocket always, plus the
/// outbound HTTP channel when `notify_webhook_url` is set.
pub fn notification_channels(
    ws_manager: Arc<WsManager>,
    notify_webhook_url: Option<&str>,
) -> Vec<Arc<dyn NotificationChannel>> {
    let mut channels: Vec<Arc<dyn NotificationChannel>> = vec![ws_manager];

    if let Some(url) = notify_webhook_url {
        match WebhookChannel::new(url) {
            Ok(channel) => {
                tracing::info!(url, "Outbound notification webhook enabled");
                channels.push(Arc::new(channel));
            }
            Err(e) => tracing::error!(url, error = %e, "Outbound notification webhook disabled"),
        }
    }
    channels
}

/// Handles for the spawned event loops.
pub struct EventServices {
    pub dispatcher: JoinHandle<()>,
    pub observers: JoinHandle<()>,
}

impl EventServices {
    /// Subscribe both loops to `bus` and spawn them.
    pub fn spawn(
        bus: &EventBus,
        channels: Vec<Arc<dyn NotificationChannel>>,
        observers: Vec<Arc<dyn JobObserver>>,
    ) -> Self {
        let dispatcher = NotificationDispatcher::new(channels);
        let fanout = ObserverFanout::new(observers);
        Self {
            dispatcher: tokio::spawn(dispatcher.run(bus.subscribe())),
            observers: tokio::spawn(fanout.run(bus.subscribe_lifecycle())),
        }
    }
}
