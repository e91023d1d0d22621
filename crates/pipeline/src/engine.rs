//! The orchestration engine facade.
//!
//! [`Engine`] owns one instance of every component and is the only thing
//! the HTTP layer talks to. Components are constructed here and shared by
//! handle; there is no process-global state, so tests can run several
//! engines side by side.

use std::sync::Arc;

use serde_json::{Map, Value};
use synth_core::clock::Clock;
use synth_core::task::{PostProcessFlags, Task, TaskPayload};
use synth_core::types::OwnerId;
use synth_db::{StoreError, TaskStore};
use synth_events::{EventBus, JobEvent};
use synth_vendor::{JobRequest, VendorClient, VendorError};
use tokio_util::sync::CancellationToken;

use crate::blob::BlobStore;
use crate::config::EngineConfig;
use crate::merge::MergeCoordinator;
use crate::recovery::{RecoveryManager, RecoveryReport};
use crate::resolver::CompletionResolver;
use crate::scheduler::PollingScheduler;
use crate::sweep::ParkedSweep;
use crate::webhook::{WebhookAck, WebhookReceiver};

/// Submission failures. These propagate to the caller; nothing was
/// persisted unless the variant says so.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Invalid submission: {0}")]
    Validation(String),

    #[error("Vendor rejected submission: {0}")]
    Vendor(#[from] VendorError),

    /// The vendor accepted the job but it could not be recorded.
    #[error("Failed to record task: {0}")]
    Store(#[from] StoreError),
}

/// A new generation job.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub owner_id: OwnerId,
    pub parent_entity_id: Option<String>,
    pub payload: TaskPayload,
    pub post_process: PostProcessFlags,
}

/// External collaborators the engine is built from.
pub struct EngineDeps {
    pub store: Arc<dyn TaskStore>,
    pub vendor: Arc<dyn VendorClient>,
    pub blobs: Arc<dyn BlobStore>,
    pub bus: Arc<EventBus>,
    pub clock: Arc<dyn Clock>,
}

pub struct Engine {
    config: EngineConfig,
    store: Arc<dyn TaskStore>,
    vendor: Arc<dyn VendorClient>,
    bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    merger: Arc<MergeCoordinator>,
    resolver: Arc<CompletionResolver>,
    scheduler: PollingScheduler,
    webhooks: WebhookReceiver,
}

impl Engine {
    pub fn new(deps: EngineDeps, config: EngineConfig) -> Self {
        let EngineDeps {
            store,
            vendor,
            blobs,
            bus,
            clock,
        } = deps;

        let merger = Arc::new(MergeCoordinator::new(
            Arc::clone(&vendor),
            config.merge_max_payload_bytes,
        ));
        let resolver = Arc::new(CompletionResolver::new(
            Arc::clone(&store),
            Arc::clone(&vendor),
            blobs,
            Arc::clone(&merger),
            Arc::clone(&bus),
        ));
        let scheduler = PollingScheduler::new(
            Arc::clone(&store),
            Arc::clone(&vendor),
            Arc::clone(&resolver),
            Arc::clone(&bus),
            Arc::clone(&clock),
            config.poll,
        );
        let webhooks = WebhookReceiver::new(
            Arc::clone(&store),
            Arc::clone(&resolver),
            scheduler.clone(),
            config.webhook_retry_delay,
            config.webhook_secret.clone(),
        );

        Self {
            config,
            store,
            vendor,
            bus,
            clock,
            merger,
            resolver,
            scheduler,
            webhooks,
        }
    }

    /// Dispatch a job to the vendor, record it and start polling.
    ///
    /// The vendor assigns the task id, so dispatch comes first. A webhook
    /// racing ahead of the store write is handled by the receiver's retry.
    pub async fn submit(&self, request: SubmitRequest) -> Result<Task, EngineError> {
        if request.owner_id.trim().is_empty() {
            return Err(EngineError::Validation("owner_id must not be empty".into()));
        }

        let kind = request.payload.kind();
        let job = JobRequest {
            kind,
            parameters: vendor_parameters(&request.payload),
            webhook_url: self.config.public_webhook_url.clone(),
        };
        let task_id = self.vendor.submit(&job).await?;

        let task = Task::new(
            task_id,
            request.owner_id,
            request.parent_entity_id,
            request.payload,
            request.post_process,
            self.clock.now(),
        );
        self.store.create(&task).await?;

        tracing::info!(
            task_id = %task.task_id,
            owner_id = %task.owner_id,
            kind = %kind,
            auto_merge = task.post_process.should_auto_merge,
            "Task submitted",
        );
        self.bus.publish(JobEvent::Submitted {
            task: Box::new(task.clone()),
        });
        self.scheduler.attach(&task);

        Ok(task)
    }

    pub async fn get_task(&self, task_id: &str) -> Result<Option<Task>, StoreError> {
        self.store.get(task_id).await
    }

    /// Hand an inbound webhook body to the receiver.
    pub fn ingest_webhook(&self, body: &[u8], signature: Option<&str>) -> WebhookAck {
        self.webhooks.ingest(body, signature)
    }

    /// Startup recovery pass.
    pub async fn recover(&self) -> Result<RecoveryReport, StoreError> {
        RecoveryManager::new(
            Arc::clone(&self.store),
            Arc::clone(&self.vendor),
            Arc::clone(&self.resolver),
            self.scheduler.clone(),
            Arc::clone(&self.clock),
            self.config.recovery_max_age,
        )
        .run()
        .await
    }

    pub fn parked_sweep(&self) -> ParkedSweep {
        ParkedSweep::new(
            Arc::clone(&self.store),
            self.scheduler.clone(),
            self.config.sweep_batch_size,
        )
    }

    /// Spawn the parked-task sweep loop.
    pub fn spawn_background(&self, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        let sweep = self.parked_sweep();
        let interval = self.config.background_sweep_interval;
        tokio::spawn(sweep.run(interval, cancel))
    }

    /// Stop all pollers. In-flight resolutions run to completion.
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn scheduler(&self) -> &PollingScheduler {
        &self.scheduler
    }

    pub fn resolver(&self) -> &Arc<CompletionResolver> {
        &self.resolver
    }

    pub fn merger(&self) -> &Arc<MergeCoordinator> {
        &self.merger
    }

    pub fn webhooks(&self) -> &WebhookReceiver {
        &self.webhooks
    }
}

/// The vendor's `parameters` object: the caller's parameters plus the
/// input image URLs the kind carries.
fn vendor_parameters(payload: &TaskPayload) -> Value {
    let mut params = match payload.parameters() {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("input".into(), other.clone());
            map
        }
    };

    match payload {
        TaskPayload::Image(_) => {}
        TaskPayload::Video(t) => {
            if let Some(url) = &t.source_image_url {
                params.insert("sourceImageUrl".into(), Value::String(url.clone()));
            }
        }
        TaskPayload::Merge(t) => {
            params.insert("faceImageUrl".into(), Value::String(t.face_image_url.clone()));
            params.insert("baseImageUrl".into(), Value::String(t.base_image_url.clone()));
        }
    }
    Value::Object(params)
}
