#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use bytes::Bytes;
use http_body_util::BodyExt;
use tower::ServiceExt;

use synth_api::background::job_log::JobLog;
use synth_api::background::EventServices;
use synth_api::config::ServerConfig;
use synth_api::router::build_app_router;
use synth_api::state::AppState;
use synth_api::ws::WsManager;
use synth_core::clock::SystemClock;
use synth_core::polling::PollPolicy;
use synth_core::vendor_status::StatusReport;
use synth_db::{InMemoryTaskStore, TaskStore};
use synth_events::{EventBus, JobObserver};
use synth_pipeline::blob::{object_key, BlobError, BlobStore};
use synth_pipeline::{Engine, EngineConfig, EngineDeps};
use synth_vendor::{JobRequest, MergedImage, VendorClient, VendorError};

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 5,
        database_url: None,
        notify_webhook_url: None,
    }
}

/// Vendor stand-in: numbered job ids, jobs that stay queued until a webhook
/// arrives, PNG bytes for every download.
#[derive(Default)]
pub struct StubVendor {
    submit_error: Mutex<Option<VendorError>>,
    pub submits: AtomicUsize,
}

impl StubVendor {
    pub fn fail_submit(&self, error: VendorError) {
        *self.submit_error.lock().unwrap() = Some(error);
    }

    pub fn submits(&self) -> usize {
        self.submits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VendorClient for StubVendor {
    async fn submit(&self, _request: &JobRequest) -> Result<String, VendorError> {
        let n = self.submits.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(e) = self.submit_error.lock().unwrap().clone() {
            return Err(e);
        }
        Ok(format!("job-{n}"))
    }

    async fn fetch_status(&self, _job_id: &str) -> Result<StatusReport, VendorError> {
        Ok(StatusReport::queued())
    }

    async fn merge_faces(&self, _face: Bytes, _base: Bytes) -> Result<MergedImage, VendorError> {
        Ok(MergedImage {
            url: "https://vendor.test/merged/1.png".to_string(),
        })
    }

    async fn download(&self, url: &str) -> Result<Bytes, VendorError> {
        let mut out = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
        out.extend_from_slice(url.as_bytes());
        Ok(Bytes::from(out))
    }
}

struct TestBlobStore;

#[async_trait]
impl BlobStore for TestBlobStore {
    async fn put(
        &self,
        _bytes: Bytes,
        content_hash: &str,
        content_type: &str,
    ) -> Result<String, BlobError> {
        Ok(format!("https://blobs.test/{}", object_key(content_hash, content_type)))
    }
}

/// Everything a test may want to poke at besides the router.
pub struct TestApp {
    pub router: Router,
    pub engine: Arc<Engine>,
    pub vendor: Arc<StubVendor>,
    pub job_log: Arc<JobLog>,
    pub events: EventServices,
}

/// Build the full application router over an in-memory store and a stub
/// vendor, with the event services running.
pub fn build_test_app() -> TestApp {
    let config = test_config();
    let vendor = Arc::new(StubVendor::default());
    let bus = Arc::new(EventBus::default());
    let ws_manager = Arc::new(WsManager::new());
    let job_log = Arc::new(JobLog::new());

    let engine = Arc::new(Engine::new(
        EngineDeps {
            store: Arc::new(InMemoryTaskStore::new()) as Arc<dyn TaskStore>,
            vendor: Arc::clone(&vendor) as Arc<dyn VendorClient>,
            blobs: Arc::new(TestBlobStore) as Arc<dyn BlobStore>,
            bus: Arc::clone(&bus),
            clock: Arc::new(SystemClock),
        },
        EngineConfig {
            poll: PollPolicy {
                tick_interval: Duration::from_secs(5),
                stall_threshold: 1_000,
                timeout: Duration::from_secs(3600),
            },
            webhook_retry_delay: Duration::from_millis(200),
            ..EngineConfig::default()
        },
    ));

    let events = EventServices::spawn(
        &bus,
        vec![Arc::clone(&ws_manager) as Arc<dyn synth_events::NotificationChannel>],
        vec![Arc::clone(&job_log) as Arc<dyn JobObserver>],
    );

    let state = AppState {
        engine: Arc::clone(&engine),
        config: Arc::new(config.clone()),
        ws_manager,
        job_log: Arc::clone(&job_log),
    };

    TestApp {
        router: build_app_router(state, &config),
        engine,
        vendor,
        job_log,
        events,
    }
}

pub async fn get(app: &Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.clone().oneshot(request).await.unwrap()
}

pub async fn post_json(app: &Router, uri: &str, body: serde_json::Value) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap();
    app.clone().oneshot(request).await.unwrap()
}

pub async fn post_raw(app: &Router, uri: &str, body: &'static [u8]) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap();
    app.clone().oneshot(request).await.unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// A minimal valid image submission.
pub fn image_submission(owner_id: &str) -> serde_json::Value {
    serde_json::json!({
        "owner_id": owner_id,
        "kind": "image",
        "parameters": { "prompt": "a lighthouse at dusk" },
    })
}
