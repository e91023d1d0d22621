//! Shared fixtures for pipeline integration tests.
//!
//! [`FakeVendor`] plays back scripted status reports per task and counts
//! every call so tests can assert how much vendor traffic a scenario cost.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use synth_core::clock::{Clock, ManualClock};
use synth_core::polling::PollPolicy;
use synth_core::task::{ImageTask, PostProcessFlags, Task, TaskPayload, TaskStatus};
use synth_core::vendor_status::{StatusReport, VendorArtifact};
use synth_db::{InMemoryTaskStore, TaskStore};
use synth_events::{EventBus, JobEvent};
use synth_pipeline::blob::{object_key, BlobError, BlobStore};
use synth_pipeline::{Engine, EngineConfig, EngineDeps, SubmitRequest};
use synth_vendor::{JobRequest, MergedImage, VendorClient, VendorError};
use tokio::sync::broadcast;

pub const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// PNG-looking bytes unique to `seed`.
pub fn png_bytes(seed: &str) -> Bytes {
    let mut out = PNG_MAGIC.to_vec();
    out.extend_from_slice(seed.as_bytes());
    Bytes::from(out)
}

// ---------------------------------------------------------------------------
// FakeVendor
// ---------------------------------------------------------------------------

type Scripted = Result<StatusReport, VendorError>;

#[derive(Default)]
pub struct FakeVendor {
    /// Reports played back in order; the last one repeats.
    scripts: Mutex<HashMap<String, VecDeque<Scripted>>>,
    submit_error: Mutex<Option<VendorError>>,
    merge_error: Mutex<Option<VendorError>>,
    merge_delay: Mutex<Duration>,
    pub submits: AtomicUsize,
    pub status_calls: AtomicUsize,
    pub merge_calls: AtomicUsize,
    pub downloads: AtomicUsize,
}

impl FakeVendor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Replace the script for `task_id`.
    pub fn script(&self, task_id: &str, reports: Vec<Scripted>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(task_id.to_string(), reports.into_iter().collect());
    }

    pub fn always(&self, task_id: &str, report: StatusReport) {
        self.script(task_id, vec![Ok(report)]);
    }

    pub fn fail_submit(&self, error: VendorError) {
        *self.submit_error.lock().unwrap() = Some(error);
    }

    pub fn fail_merges(&self, error: Option<VendorError>) {
        *self.merge_error.lock().unwrap() = error;
    }

    pub fn delay_merges(&self, delay: Duration) {
        *self.merge_delay.lock().unwrap() = delay;
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VendorClient for FakeVendor {
    async fn submit(&self, _request: &JobRequest) -> Result<String, VendorError> {
        let n = self.submits.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(e) = self.submit_error.lock().unwrap().clone() {
            return Err(e);
        }
        Ok(format!("job-{n}"))
    }

    async fn fetch_status(&self, job_id: &str) -> Result<StatusReport, VendorError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let mut scripts = self.scripts.lock().unwrap();
        match scripts.get_mut(job_id) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) => queue.front().cloned().unwrap_or_else(|| Ok(StatusReport::queued())),
            None => Ok(StatusReport::queued()),
        }
    }

    async fn merge_faces(&self, _face: Bytes, _base: Bytes) -> Result<MergedImage, VendorError> {
        let n = self.merge_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = *self.merge_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(e) = self.merge_error.lock().unwrap().clone() {
            return Err(e);
        }
        Ok(MergedImage {
            url: format!("https://vendor.test/merged/{n}.png"),
        })
    }

    async fn download(&self, url: &str) -> Result<Bytes, VendorError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        Ok(png_bytes(url))
    }
}

// ---------------------------------------------------------------------------
// RecordingBlobStore
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingBlobStore {
    pub puts: AtomicUsize,
}

#[async_trait]
impl BlobStore for RecordingBlobStore {
    async fn put(
        &self,
        _bytes: Bytes,
        content_hash: &str,
        content_type: &str,
    ) -> Result<String, BlobError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(format!("https://blobs.test/{}", object_key(content_hash, content_type)))
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub engine: Engine,
    pub store: Arc<InMemoryTaskStore>,
    pub vendor: Arc<FakeVendor>,
    pub blobs: Arc<RecordingBlobStore>,
    pub clock: Arc<ManualClock>,
    pub bus: Arc<EventBus>,
    pub events: broadcast::Receiver<synth_events::bus::Envelope>,
}

pub fn test_config() -> EngineConfig {
    EngineConfig {
        poll: PollPolicy {
            tick_interval: Duration::from_secs(1),
            stall_threshold: 3,
            timeout: Duration::from_secs(600),
        },
        webhook_retry_delay: Duration::from_millis(500),
        ..EngineConfig::default()
    }
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let store = Arc::new(InMemoryTaskStore::new());
        let vendor = FakeVendor::new();
        let blobs = Arc::new(RecordingBlobStore::default());
        let clock = Arc::new(ManualClock::default());
        let bus = Arc::new(EventBus::default());
        let events = bus.subscribe();

        let engine = Engine::new(
            EngineDeps {
                store: Arc::clone(&store) as Arc<dyn TaskStore>,
                vendor: Arc::clone(&vendor) as Arc<dyn VendorClient>,
                blobs: Arc::clone(&blobs) as Arc<dyn BlobStore>,
                bus: Arc::clone(&bus),
                clock: Arc::clone(&clock) as Arc<dyn Clock>,
            },
            config,
        );

        Self {
            engine,
            store,
            vendor,
            blobs,
            clock,
            bus,
            events,
        }
    }

    /// Seed a task directly into the store, bypassing submission.
    pub fn seed(&self, task_id: &str, status: TaskStatus) -> Task {
        let mut task = image_task(task_id, None, false, self.clock.now());
        task.status = status;
        self.store.seed(task.clone());
        task
    }

    pub async fn task(&self, task_id: &str) -> Task {
        self.store
            .get(task_id)
            .await
            .unwrap()
            .unwrap_or_else(|| panic!("task {task_id} missing"))
    }

    /// Let spawned work run until `task_id` reaches `status`, then give
    /// post-transition work a moment to finish.
    pub async fn wait_for(&self, task_id: &str, status: TaskStatus) -> Task {
        for _ in 0..200 {
            if self.task(task_id).await.status == status {
                tokio::time::sleep(Duration::from_millis(100)).await;
                return self.task(task_id).await;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        panic!("task {task_id} never reached {status}");
    }

    /// Let spawned work run for `d` of (paused) time.
    pub async fn settle(&self, d: Duration) {
        tokio::time::sleep(d).await;
    }

    /// Every event published so far.
    pub fn drain_events(&mut self) -> Vec<JobEvent> {
        let mut out = Vec::new();
        while let Ok(envelope) = self.events.try_recv() {
            out.push(envelope.event);
        }
        out
    }
}

pub fn image_task(
    task_id: &str,
    face_image_url: Option<&str>,
    auto_merge: bool,
    now: synth_core::types::Timestamp,
) -> Task {
    Task::new(
        task_id,
        "owner-1",
        Some("character-9".into()),
        TaskPayload::Image(ImageTask {
            face_image_url: face_image_url.map(str::to_string),
            parameters: serde_json::json!({"prompt": "portrait"}),
        }),
        PostProcessFlags {
            should_auto_merge: auto_merge,
        },
        now,
    )
}

pub fn image_request(face_image_url: Option<&str>, auto_merge: bool) -> SubmitRequest {
    SubmitRequest {
        owner_id: "owner-1".into(),
        parent_entity_id: Some("character-9".into()),
        payload: TaskPayload::Image(ImageTask {
            face_image_url: face_image_url.map(str::to_string),
            parameters: serde_json::json!({"prompt": "portrait"}),
        }),
        post_process: PostProcessFlags {
            should_auto_merge: auto_merge,
        },
    }
}

pub fn artifact(url: &str) -> VendorArtifact {
    VendorArtifact {
        url: url.to_string(),
        seed: Some(42),
    }
}

pub fn count_named(events: &[JobEvent], name: &str) -> usize {
    events.iter().filter(|e| e.event_name() == name).count()
}
