//! Bus-to-channel notification forwarding.
//!
//! [`NotificationDispatcher`] subscribes to the [`EventBus`](crate::EventBus)
//! and pushes every [`JobEvent`](crate::JobEvent) to the owning client on
//! each registered [`NotificationChannel`]. Delivery runs on spawned tasks
//! so a slow channel never holds up the bus.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::bus::Envelope;
use crate::channel::NotificationChannel;

pub struct NotificationDispatcher {
    channels: Vec<Arc<dyn NotificationChannel>>,
}

impl NotificationDispatcher {
    pub fn new(channels: Vec<Arc<dyn NotificationChannel>>) -> Self {
        Self { channels }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Run the forwarding loop.
    ///
    /// Exits when the channel is closed (i.e. the bus is dropped).
    pub async fn run(self, mut receiver: broadcast::Receiver<Envelope>) {
        loop {
            match receiver.recv().await {
                Ok(envelope) => self.forward(envelope),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Notification dispatcher lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!("Event bus closed, notification dispatcher shutting down");
                    break;
                }
            }
        }
    }

    fn forward(&self, envelope: Envelope) {
        let event = envelope.event;
        let owner_id = event.owner_id().to_string();
        let event_name = event.event_name();
        let payload = Arc::new(event.payload());

        for channel in &self.channels {
            let channel = Arc::clone(channel);
            let owner_id = owner_id.clone();
            let payload = Arc::clone(&payload);
            tokio::spawn(async move {
                channel.send(&owner_id, event_name, &payload).await;
            });
        }
    }
}
