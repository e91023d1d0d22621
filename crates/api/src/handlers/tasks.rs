//! Handlers for the `/tasks` resource.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use synth_core::error::CoreError;
use synth_core::task::{PostProcessFlags, TaskPayload};
use synth_pipeline::SubmitRequest;
use url::Url;
use validator::{Validate, ValidationError};

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// Request body for `POST /api/v1/tasks`.
///
/// The kind-specific fields sit at the top level next to `kind`:
///
/// ```json
/// { "owner_id": "u1", "kind": "image", "face_image_url": "https://...",
///   "parameters": { "prompt": "..." }, "should_auto_merge": true }
/// ```
#[derive(Debug, Deserialize, Validate)]
pub struct SubmitTaskRequest {
    #[validate(length(min = 1, max = 128))]
    pub owner_id: String,

    #[validate(length(min = 1, max = 128))]
    pub parent_entity_id: Option<String>,

    #[serde(flatten)]
    #[validate(custom(function = "validate_payload"))]
    pub payload: TaskPayload,

    #[serde(default)]
    pub should_auto_merge: bool,
}

fn validate_payload(payload: &TaskPayload) -> Result<(), ValidationError> {
    if !matches!(payload.parameters(), serde_json::Value::Object(_) | serde_json::Value::Null) {
        return Err(ValidationError::new("parameters")
            .with_message("parameters must be a JSON object".into()));
    }

    let urls: Vec<&str> = match payload {
        TaskPayload::Image(t) => t.face_image_url.iter().map(String::as_str).collect(),
        TaskPayload::Video(t) => t.source_image_url.iter().map(String::as_str).collect(),
        TaskPayload::Merge(t) => vec![t.face_image_url.as_str(), t.base_image_url.as_str()],
    };
    if urls.iter().any(|url| !is_http_url(url)) {
        return Err(ValidationError::new("image_url")
            .with_message("image URLs must be absolute http(s) URLs".into()));
    }
    Ok(())
}

fn is_http_url(raw: &str) -> bool {
    match Url::parse(raw.trim()) {
        Ok(url) => {
            matches!(url.scheme(), "http" | "https")
                && url.host_str().is_some_and(|host| !host.is_empty())
        }
        Err(_) => false,
    }
}

/// POST /api/v1/tasks
///
/// Dispatch a generation job to the vendor and start tracking it. Returns
/// 201 with the task in `pending` status.
pub async fn submit_task(
    State(state): State<AppState>,
    Json(input): Json<SubmitTaskRequest>,
) -> AppResult<impl IntoResponse> {
    input
        .validate()
        .map_err(|e| AppError::Core(CoreError::Validation(e.to_string())))?;

    let kind = input.payload.kind();
    let task = state
        .engine
        .submit(SubmitRequest {
            owner_id: input.owner_id,
            parent_entity_id: input.parent_entity_id,
            payload: input.payload,
            post_process: PostProcessFlags {
                should_auto_merge: input.should_auto_merge,
            },
        })
        .await?;

    tracing::info!(task_id = %task.task_id, kind = %kind, "Task accepted");

    Ok((StatusCode::CREATED, Json(DataResponse { data: task })))
}

/// GET /api/v1/tasks/{task_id}
pub async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let task = state
        .engine
        .get_task(&task_id)
        .await?
        .ok_or(AppError::Core(CoreError::NotFound {
            entity: "Task",
            id: task_id,
        }))?;

    Ok(Json(DataResponse { data: task }))
}
