//! Collaborator callbacks.
//!
//! The domain layer (chat, billing, character systems) implements
//! [`JobObserver`] and is fed from the bus by [`ObserverFanout`] over the
//! lossless lifecycle feed, so a burst of progress updates never costs an
//! observer a terminal callback. Every method has a no-op default.

use std::sync::Arc;

use async_trait::async_trait;
use synth_core::task::{Artifact, Task, TaskKind};
use tokio::sync::mpsc;

use crate::bus::{Envelope, JobEvent};

#[async_trait]
pub trait JobObserver: Send + Sync {
    async fn on_job_submitted(&self, _task: &Task) {}

    async fn on_job_completed(&self, _task_id: &str, _kind: TaskKind, _result: &[Artifact]) {}

    async fn on_job_failed(&self, _task_id: &str, _reason: &str) {}

    async fn on_job_parked(&self, _task_id: &str) {}
}

/// Feeds bus events to registered observers, in publish order.
pub struct ObserverFanout {
    observers: Vec<Arc<dyn JobObserver>>,
}

impl ObserverFanout {
    pub fn new(observers: Vec<Arc<dyn JobObserver>>) -> Self {
        Self { observers }
    }

    /// Run the fan-out loop until the bus is dropped.
    ///
    /// `receiver` comes from [`EventBus::subscribe_lifecycle`](crate::EventBus::subscribe_lifecycle).
    pub async fn run(self, mut receiver: mpsc::UnboundedReceiver<Envelope>) {
        while let Some(envelope) = receiver.recv().await {
            self.notify(&envelope.event).await;
        }
        tracing::info!("Event bus closed, observer fan-out shutting down");
    }

    /// Invoke the matching callback on every observer.
    pub async fn notify(&self, event: &JobEvent) {
        for observer in &self.observers {
            match event {
                JobEvent::Submitted { task } => observer.on_job_submitted(task).await,
                JobEvent::Completed {
                    task_id,
                    kind,
                    result,
                    ..
                } => observer.on_job_completed(task_id, *kind, result).await,
                JobEvent::Failed { task_id, reason, .. } => {
                    observer.on_job_failed(task_id, reason).await
                }
                JobEvent::Parked { task_id, .. } => observer.on_job_parked(task_id).await,
                JobEvent::Progress { .. } => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Log(Mutex<Vec<String>>);

    #[async_trait]
    impl JobObserver for Log {
        async fn on_job_completed(&self, task_id: &str, kind: TaskKind, result: &[Artifact]) {
            self.0
                .lock()
                .unwrap()
                .push(format!("completed:{task_id}:{kind}:{}", result.len()));
        }

        async fn on_job_parked(&self, task_id: &str) {
            self.0.lock().unwrap().push(format!("parked:{task_id}"));
        }
    }

    #[tokio::test]
    async fn routes_events_to_callbacks() {
        let log = Arc::new(Log::default());
        let fanout = ObserverFanout::new(vec![log.clone() as Arc<dyn JobObserver>]);

        fanout
            .notify(&JobEvent::Parked {
                task_id: "t1".into(),
                owner_id: "o".into(),
                kind: TaskKind::Video,
                reason: "stalled".into(),
            })
            .await;
        fanout
            .notify(&JobEvent::Progress {
                task_id: "t1".into(),
                owner_id: "o".into(),
                progress: 50,
            })
            .await;
        fanout
            .notify(&JobEvent::Completed {
                task_id: "t1".into(),
                owner_id: "o".into(),
                kind: TaskKind::Video,
                result: vec![],
            })
            .await;

        assert_eq!(
            log.0.lock().unwrap().as_slice(),
            &["parked:t1".to_string(), "completed:t1:video:0".to_string()]
        );
    }

    #[tokio::test]
    async fn run_delivers_completion_after_progress_burst() {
        let bus = crate::EventBus::new(8);
        let log = Arc::new(Log::default());
        let fanout = ObserverFanout::new(vec![log.clone() as Arc<dyn JobObserver>]);
        let rx = bus.subscribe_lifecycle();

        bus.publish(JobEvent::Completed {
            task_id: "t2".into(),
            owner_id: "o".into(),
            kind: TaskKind::Image,
            result: vec![],
        });
        for progress in 0..8 {
            bus.publish(JobEvent::Progress {
                task_id: "t3".into(),
                owner_id: "o".into(),
                progress,
            });
        }
        drop(bus);

        fanout.run(rx).await;
        assert_eq!(
            log.0.lock().unwrap().as_slice(),
            &["completed:t2:image:0".to_string()]
        );
    }

    #[tokio::test]
    async fn default_callbacks_are_no_ops() {
        struct Silent;
        impl JobObserver for Silent {}

        let fanout = ObserverFanout::new(vec![Arc::new(Silent) as Arc<dyn JobObserver>]);
        fanout
            .notify(&JobEvent::Failed {
                task_id: "t".into(),
                owner_id: "o".into(),
                kind: TaskKind::Image,
                reason: "x".into(),
            })
            .await;
    }
}
