//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is the hub the engine publishes [`JobEvent`]s to. It is
//! shared via `Arc<EventBus>`; the notification dispatcher and the
//! collaborator fan-out each hold their own subscription.
//!
//! Broadcast receivers that fall behind skip events. Consumers that must see
//! every outcome use [`EventBus::subscribe_lifecycle`] instead, an unbounded
//! feed of everything except progress updates.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde_json::json;
use synth_core::job_events::{
    EVENT_JOB_COMPLETED, EVENT_JOB_FAILED, EVENT_JOB_PARKED, EVENT_JOB_PROGRESS,
    EVENT_JOB_SUBMITTED,
};
use synth_core::task::{Artifact, Task, TaskKind};
use synth_core::types::{OwnerId, TaskId};
use tokio::sync::{broadcast, mpsc};

// ---------------------------------------------------------------------------
// JobEvent
// ---------------------------------------------------------------------------

/// A lifecycle event for one task.
///
/// For any task at most one of `Completed` / `Failed` is ever published.
/// `Parked` is informational and may precede a terminal event.
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    Submitted {
        task: Box<Task>,
    },
    Progress {
        task_id: TaskId,
        owner_id: OwnerId,
        progress: u8,
    },
    Completed {
        task_id: TaskId,
        owner_id: OwnerId,
        kind: TaskKind,
        result: Vec<Artifact>,
    },
    Failed {
        task_id: TaskId,
        owner_id: OwnerId,
        kind: TaskKind,
        reason: String,
    },
    Parked {
        task_id: TaskId,
        owner_id: OwnerId,
        kind: TaskKind,
        reason: String,
    },
}

impl JobEvent {
    /// Dot-separated event name pushed to clients.
    pub fn event_name(&self) -> &'static str {
        match self {
            JobEvent::Submitted { .. } => EVENT_JOB_SUBMITTED,
            JobEvent::Progress { .. } => EVENT_JOB_PROGRESS,
            JobEvent::Completed { .. } => EVENT_JOB_COMPLETED,
            JobEvent::Failed { .. } => EVENT_JOB_FAILED,
            JobEvent::Parked { .. } => EVENT_JOB_PARKED,
        }
    }

    pub fn task_id(&self) -> &str {
        match self {
            JobEvent::Submitted { task } => &task.task_id,
            JobEvent::Progress { task_id, .. }
            | JobEvent::Completed { task_id, .. }
            | JobEvent::Failed { task_id, .. }
            | JobEvent::Parked { task_id, .. } => task_id,
        }
    }

    pub fn owner_id(&self) -> &str {
        match self {
            JobEvent::Submitted { task } => &task.owner_id,
            JobEvent::Progress { owner_id, .. }
            | JobEvent::Completed { owner_id, .. }
            | JobEvent::Failed { owner_id, .. }
            | JobEvent::Parked { owner_id, .. } => owner_id,
        }
    }

    /// Whether this is a `Completed` or `Failed` event.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobEvent::Completed { .. } | JobEvent::Failed { .. })
    }

    /// JSON payload sent alongside [`event_name`](Self::event_name).
    pub fn payload(&self) -> serde_json::Value {
        match self {
            JobEvent::Submitted { task } => json!({
                "taskId": task.task_id,
                "kind": task.kind(),
                "status": task.status,
                "parentEntityId": task.parent_entity_id,
            }),
            JobEvent::Progress {
                task_id, progress, ..
            } => json!({ "taskId": task_id, "progress": progress }),
            JobEvent::Completed {
                task_id,
                kind,
                result,
                ..
            } => json!({ "taskId": task_id, "kind": kind, "result": result }),
            JobEvent::Failed {
                task_id,
                kind,
                reason,
                ..
            } => json!({ "taskId": task_id, "kind": kind, "error": reason }),
            JobEvent::Parked {
                task_id,
                kind,
                reason,
                ..
            } => json!({ "taskId": task_id, "kind": kind, "reason": reason }),
        }
    }
}

/// A published event together with its publish time.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub event: JobEvent,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// # Usage
///
/// ```rust
/// use synth_events::bus::{EventBus, JobEvent};
///
/// let bus = EventBus::default();
/// let mut rx = bus.subscribe();
///
/// bus.publish(JobEvent::Progress {
///     task_id: "job-1".into(),
///     owner_id: "user-1".into(),
///     progress: 40,
/// });
/// ```
pub struct EventBus {
    sender: broadcast::Sender<Envelope>,
    lifecycle: Mutex<Vec<mpsc::UnboundedSender<Envelope>>>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full, the oldest un-consumed messages are dropped
    /// and slow receivers will observe a `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            lifecycle: Mutex::new(Vec::new()),
        }
    }

    /// Publish an event to all current subscribers.
    ///
    /// If there are no active subscribers the event is silently dropped.
    pub fn publish(&self, event: JobEvent) {
        tracing::debug!(
            task_id = %event.task_id(),
            event = event.event_name(),
            "Publishing job event",
        );
        let envelope = Envelope {
            event,
            timestamp: Utc::now(),
        };

        if !matches!(envelope.event, JobEvent::Progress { .. }) {
            let mut lifecycle = self
                .lifecycle
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            lifecycle.retain(|tx| tx.send(envelope.clone()).is_ok());
        }

        // A SendError only means there are zero receivers.
        let _ = self.sender.send(envelope);
    }

    /// Subscribe to all events published on this bus.
    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.sender.subscribe()
    }

    /// Subscribe to submitted, parked and terminal events without loss.
    ///
    /// The feed is unbounded and closes when the bus is dropped.
    pub fn subscribe_lifecycle(&self) -> mpsc::UnboundedReceiver<Envelope> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lifecycle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(tx);
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(task_id: &str) -> JobEvent {
        JobEvent::Failed {
            task_id: task_id.into(),
            owner_id: "user-1".into(),
            kind: TaskKind::Image,
            reason: "invalid prompt".into(),
        }
    }

    #[tokio::test]
    async fn publish_and_receive_single_subscriber() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.publish(failed("job-1"));

        let received = rx.recv().await.expect("should receive the event");
        assert_eq!(received.event.event_name(), EVENT_JOB_FAILED);
        assert_eq!(received.event.task_id(), "job-1");
        assert_eq!(received.event.owner_id(), "user-1");
        assert_eq!(received.event.payload()["error"], "invalid prompt");
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_same_event() {
        let bus = EventBus::default();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(failed("job-2"));

        let e1 = rx1.recv().await.expect("subscriber 1 should receive");
        let e2 = rx2.recv().await.expect("subscriber 2 should receive");
        assert_eq!(e1.event, e2.event);
    }

    #[test]
    fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::default();
        bus.publish(failed("orphan"));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn lifecycle_feed_skips_progress() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe_lifecycle();

        bus.publish(JobEvent::Progress {
            task_id: "job-4".into(),
            owner_id: "user-1".into(),
            progress: 10,
        });
        bus.publish(failed("job-4"));

        let received = rx.recv().await.expect("lifecycle event");
        assert_eq!(received.event.event_name(), EVENT_JOB_FAILED);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn lifecycle_feed_keeps_terminal_events_a_lagging_receiver_loses() {
        let bus = EventBus::new(8);
        let mut broadcast_rx = bus.subscribe();
        let mut lifecycle_rx = bus.subscribe_lifecycle();

        bus.publish(failed("job-5"));
        for progress in 0..8 {
            bus.publish(JobEvent::Progress {
                task_id: "job-6".into(),
                owner_id: "user-1".into(),
                progress,
            });
        }

        assert!(matches!(
            broadcast_rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(1))
        ));
        let received = lifecycle_rx.recv().await.expect("terminal event kept");
        assert_eq!(received.event.task_id(), "job-5");
    }

    #[tokio::test]
    async fn lifecycle_feed_closes_when_bus_dropped() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe_lifecycle();
        drop(bus);
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn completed_payload_carries_result() {
        let event = JobEvent::Completed {
            task_id: "job-3".into(),
            owner_id: "user-1".into(),
            kind: TaskKind::Video,
            result: vec![],
        };
        assert!(event.is_terminal());
        let payload = event.payload();
        assert_eq!(payload["kind"], "video");
        assert!(payload["result"].as_array().unwrap().is_empty());
    }

    #[test]
    fn parked_is_not_terminal() {
        let event = JobEvent::Parked {
            task_id: "job-4".into(),
            owner_id: "user-1".into(),
            kind: TaskKind::Image,
            reason: "stalled".into(),
        };
        assert!(!event.is_terminal());
        assert_eq!(event.event_name(), EVENT_JOB_PARKED);
    }
}
