//! Vendor webhook ingress.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde_json::{json, Value};

use crate::state::AppState;

/// Header carrying the hex HMAC-SHA256 of the raw body.
pub const SIGNATURE_HEADER: &str = "x-vendor-signature";

/// POST /api/v1/webhooks/vendor
///
/// Always answers `200 {"received": true}`, whatever the body contains, so
/// the vendor never retries. Resolution runs after the response is sent.
pub async fn vendor_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Json<Value> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    let ack = state.engine.ingest_webhook(&body, signature);
    tracing::debug!(?ack, bytes = body.len(), "Vendor webhook acknowledged");

    Json(json!({ "received": true }))
}
