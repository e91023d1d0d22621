//! Push-based completion ingress.
//!
//! [`WebhookReceiver::ingest`] returns immediately so the HTTP handler can
//! acknowledge the vendor at once; resolution runs on a spawned task. A
//! webhook may arrive before the submitting request has persisted the
//! task, so an unknown task id gets one delayed re-check before the event
//! is dropped. The poller will discover the same terminal state anyway.

use std::sync::Arc;
use std::time::Duration;

use synth_core::vendor_status::TerminalSignal;
use synth_db::TaskStore;
use synth_vendor::webhook::{parse_webhook, verify_signature, WebhookEvent};

use crate::resolver::{CompletionResolver, Resolution};
use crate::scheduler::PollingScheduler;

/// How an inbound webhook was handled. Every variant is acknowledged with
/// `200 OK`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookAck {
    /// A terminal event was queued for resolution.
    Accepted { job_id: String },
    /// Parsed but carries nothing to act on.
    Ignored,
    /// Unparseable or failed signature verification.
    Rejected,
}

#[derive(Clone)]
pub struct WebhookReceiver {
    store: Arc<dyn TaskStore>,
    resolver: Arc<CompletionResolver>,
    scheduler: PollingScheduler,
    retry_delay: Duration,
    secret: Option<Arc<str>>,
}

impl WebhookReceiver {
    pub fn new(
        store: Arc<dyn TaskStore>,
        resolver: Arc<CompletionResolver>,
        scheduler: PollingScheduler,
        retry_delay: Duration,
        secret: Option<String>,
    ) -> Self {
        Self {
            store,
            resolver,
            scheduler,
            retry_delay,
            secret: secret.map(Arc::from),
        }
    }

    /// Validate, parse and queue an inbound webhook body. Never blocks on
    /// resolution.
    pub fn ingest(&self, body: &[u8], signature: Option<&str>) -> WebhookAck {
        if let Some(secret) = &self.secret {
            let valid = signature.is_some_and(|sig| verify_signature(secret, body, sig));
            if !valid {
                tracing::warn!(has_signature = signature.is_some(), "Webhook signature rejected");
                return WebhookAck::Rejected;
            }
        }

        let event = match parse_webhook(body) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(error = %e, "Unparseable vendor webhook");
                return WebhookAck::Rejected;
            }
        };

        self.accept(event)
    }

    /// Queue an already-parsed event.
    pub fn accept(&self, event: WebhookEvent) -> WebhookAck {
        if !event.is_job_result() {
            tracing::debug!(event_type = %event.event_type, job_id = %event.job_id, "Ignoring webhook event");
            return WebhookAck::Ignored;
        }
        let Some(signal) = event.report.terminal() else {
            tracing::debug!(job_id = %event.job_id, state = ?event.report.state, "Non-terminal webhook ignored");
            return WebhookAck::Ignored;
        };

        let receiver = self.clone();
        let job_id = event.job_id.clone();
        tokio::spawn(async move {
            receiver.process(&job_id, signal).await;
        });

        WebhookAck::Accepted {
            job_id: event.job_id,
        }
    }

    /// Resolve one terminal signal, re-checking once for a task whose
    /// submission write may still be in flight.
    pub async fn process(&self, job_id: &str, signal: TerminalSignal) -> Resolution {
        if !self.task_exists(job_id).await {
            tracing::debug!(job_id, delay_ms = self.retry_delay.as_millis() as u64, "Webhook for unknown task, retrying once");
            tokio::time::sleep(self.retry_delay).await;
            if !self.task_exists(job_id).await {
                tracing::info!(job_id, "Dropping webhook for unknown task");
                return Resolution::NotFound;
            }
        }

        match self.resolver.resolve(job_id, signal).await {
            Ok(resolution) => {
                if resolution != Resolution::NotFound {
                    self.scheduler.stop(job_id);
                }
                tracing::debug!(job_id, ?resolution, "Webhook resolved");
                resolution
            }
            Err(e) => {
                tracing::error!(job_id, error = %e, "Webhook resolution failed, poller will retry");
                Resolution::NotFound
            }
        }
    }

    async fn task_exists(&self, job_id: &str) -> bool {
        match self.store.get(job_id).await {
            Ok(found) => found.is_some(),
            Err(e) => {
                tracing::warn!(job_id, error = %e, "Task lookup failed");
                false
            }
        }
    }
}
