pub mod health;
pub mod tasks;
pub mod webhooks;

use axum::routing::get;
use axum::Router;

use crate::state::AppState;
use crate::ws;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /ws?owner_id=...                 WebSocket job events
///
/// /tasks                           submit (POST)
/// /tasks/{task_id}                 get (GET)
///
/// /webhooks/vendor                 vendor push ingress (POST, always 200)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .nest("/tasks", tasks::router())
        .nest("/webhooks", webhooks::router())
}
