use std::sync::Arc;

use synth_pipeline::Engine;

use crate::background::job_log::JobLog;
use crate::config::ServerConfig;
use crate::ws::WsManager;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable; everything inside is behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// Orchestration engine (submission, lookup, webhook ingress).
    pub engine: Arc<Engine>,
    pub config: Arc<ServerConfig>,
    /// WebSocket connections keyed by owner.
    pub ws_manager: Arc<WsManager>,
    /// Job outcome counters, fed from the event bus.
    pub job_log: Arc<JobLog>,
}
