//! Completion resolution.
//!
//! Both the poller and the webhook receiver hand terminal signals to
//! [`CompletionResolver::resolve`]. The conditional status flip in the
//! store decides which caller wins; the loser returns
//! [`Resolution::AlreadyFinal`] without side effects. Everything after the
//! flip (artifact copy, auto-merge, result write, notification) runs
//! exactly once, for the winner, and never reverts the committed status.

use std::sync::Arc;

use bytes::Bytes;
use serde_json::json;
use synth_core::hashing::sha256_hex;
use synth_core::merge_input::{content_type, sniff_format};
use synth_core::task::{Artifact, Task, TaskKind, TaskPatch, TaskStatus};
use synth_core::vendor_status::{TerminalSignal, VendorArtifact};
use synth_db::{StoreError, TaskStore};
use synth_events::{EventBus, JobEvent};
use synth_vendor::{VendorClient, VendorError};
use url::Url;

use crate::blob::{BlobError, BlobStore};
use crate::merge::{MergeCoordinator, MergeError};

/// Outcome of one [`CompletionResolver::resolve`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// This call committed the terminal status.
    Finalized(TaskStatus),
    /// Another caller already finalized the task.
    AlreadyFinal,
    /// No such task in the store.
    NotFound,
}

#[derive(Debug, thiserror::Error)]
enum PersistError {
    #[error("download failed: {0}")]
    Download(#[from] VendorError),

    #[error("blob write failed: {0}")]
    Blob(#[from] BlobError),
}

/// A vendor artifact copied into blob storage, with its bytes kept for
/// post-processing.
struct Persisted {
    artifact: Artifact,
    bytes: Option<Bytes>,
}

pub struct CompletionResolver {
    store: Arc<dyn TaskStore>,
    vendor: Arc<dyn VendorClient>,
    blobs: Arc<dyn BlobStore>,
    merger: Arc<MergeCoordinator>,
    bus: Arc<EventBus>,
}

impl CompletionResolver {
    pub fn new(
        store: Arc<dyn TaskStore>,
        vendor: Arc<dyn VendorClient>,
        blobs: Arc<dyn BlobStore>,
        merger: Arc<MergeCoordinator>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            store,
            vendor,
            blobs,
            merger,
            bus,
        }
    }

    /// Finalize `task_id` with a terminal signal.
    ///
    /// Safe to call any number of times from any path.
    pub async fn resolve(
        &self,
        task_id: &str,
        signal: TerminalSignal,
    ) -> Result<Resolution, StoreError> {
        let Some(task) = self.store.get(task_id).await? else {
            tracing::debug!(task_id, "Terminal signal for unknown task");
            return Ok(Resolution::NotFound);
        };
        if task.status.is_terminal() {
            tracing::debug!(task_id, status = %task.status, "Task already final");
            return Ok(Resolution::AlreadyFinal);
        }

        let (new_status, patch) = match &signal {
            TerminalSignal::Succeeded { artifacts } => (
                TaskStatus::Completed,
                TaskPatch::new()
                    .with_result(artifacts.iter().map(Artifact::from_vendor).collect())
                    .with_progress(Some(100)),
            ),
            TerminalSignal::Failed { reason } => {
                (TaskStatus::Failed, TaskPatch::new().with_error(reason.clone()))
            }
        };

        let won = self
            .store
            .compare_and_transition(task_id, &TaskStatus::NON_TERMINAL, new_status, patch)
            .await?;
        if !won {
            tracing::debug!(task_id, "Lost finalization race, nothing to do");
            return Ok(Resolution::AlreadyFinal);
        }

        match signal {
            TerminalSignal::Failed { reason } => {
                tracing::info!(task_id, kind = %task.kind(), reason = %reason, "Task failed");
                self.bus.publish(JobEvent::Failed {
                    task_id: task.task_id.clone(),
                    owner_id: task.owner_id.clone(),
                    kind: task.kind(),
                    reason,
                });
            }
            TerminalSignal::Succeeded { artifacts } => {
                let result = self.finish_success(&task, &artifacts).await;
                tracing::info!(
                    task_id,
                    kind = %task.kind(),
                    artifacts = result.len(),
                    "Task completed",
                );
                self.bus.publish(JobEvent::Completed {
                    task_id: task.task_id.clone(),
                    owner_id: task.owner_id.clone(),
                    kind: task.kind(),
                    result,
                });
            }
        }

        Ok(Resolution::Finalized(new_status))
    }

    /// Copy artifacts, run auto-merge, and write the final result.
    /// Failures here are logged; the task stays completed.
    async fn finish_success(&self, task: &Task, artifacts: &[VendorArtifact]) -> Vec<Artifact> {
        let mut persisted = Vec::with_capacity(artifacts.len());
        for vendor_artifact in artifacts {
            persisted.push(self.persist_artifact(&task.task_id, vendor_artifact).await);
        }

        let result: Vec<Artifact> = match task.payload.face_reference() {
            Some(face_url)
                if task.post_process.should_auto_merge && task.kind() == TaskKind::Image =>
            {
                self.auto_merge(&task.task_id, face_url, persisted).await
            }
            _ => persisted.into_iter().map(|p| p.artifact).collect(),
        };

        match self.store.replace_result(&task.task_id, &result).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(task_id = %task.task_id, "Result not written, task is no longer completed")
            }
            Err(e) => {
                tracing::error!(task_id = %task.task_id, error = %e, "Failed to write task result")
            }
        }
        result
    }

    /// Copy one vendor artifact into blob storage. On failure the vendor
    /// artifact is kept as-is so a later reconciliation can retry the copy.
    async fn persist_artifact(&self, task_id: &str, vendor_artifact: &VendorArtifact) -> Persisted {
        match self.copy_to_blob(&vendor_artifact.url).await {
            Ok((url, hash, content_type, bytes)) => Persisted {
                artifact: Artifact {
                    artifact_url: url,
                    seed: vendor_artifact.seed,
                    metadata: json!({
                        "vendorUrl": vendor_artifact.url,
                        "contentType": content_type,
                        "sizeBytes": bytes.len(),
                    }),
                    content_hash: Some(hash),
                    is_merged: false,
                    original_artifact_url: None,
                    merge_error: None,
                },
                bytes: Some(bytes),
            },
            Err(e) => {
                tracing::error!(
                    task_id,
                    vendor_url = %vendor_artifact.url,
                    error = %e,
                    "Artifact persistence failed, keeping vendor URL",
                );
                Persisted {
                    artifact: Artifact::from_vendor(vendor_artifact),
                    bytes: None,
                }
            }
        }
    }

    async fn copy_to_blob(
        &self,
        url: &str,
    ) -> Result<(String, String, &'static str, Bytes), PersistError> {
        let bytes = self.vendor.download(url).await?;
        let hash = sha256_hex(&bytes);
        let content_type = artifact_content_type(&bytes, url);
        let stored = self.blobs.put(bytes.clone(), &hash, content_type).await?;
        Ok((stored, hash, content_type, bytes))
    }

    /// Merge the face reference onto each persisted artifact. A merge
    /// failure leaves that artifact unmerged with the reason recorded.
    /// After a permanent vendor rejection the remaining artifacts are not
    /// sent; they carry the same reason.
    async fn auto_merge(
        &self,
        task_id: &str,
        face_url: &str,
        persisted: Vec<Persisted>,
    ) -> Vec<Artifact> {
        let face = match self.vendor.download(face_url).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(task_id, error = %e, "Face reference unavailable, skipping merge");
                let reason = format!("face reference unavailable: {}", e.reason());
                return persisted
                    .into_iter()
                    .map(|p| with_merge_error(p.artifact, &reason))
                    .collect();
            }
        };

        let mut out = Vec::with_capacity(persisted.len());
        let mut rejected: Option<String> = None;
        for p in persisted {
            if let Some(reason) = &rejected {
                out.push(with_merge_error(p.artifact, reason));
                continue;
            }
            let Some(base) = p.bytes else {
                out.push(with_merge_error(p.artifact, "artifact bytes unavailable"));
                continue;
            };
            match self.merger.merge(face.clone(), base).await {
                Ok(merged) => match self.copy_to_blob(&merged.url).await {
                    Ok((url, hash, content_type, bytes)) => out.push(Artifact {
                        artifact_url: url,
                        seed: p.artifact.seed,
                        metadata: json!({
                            "vendorUrl": merged.url,
                            "contentType": content_type,
                            "sizeBytes": bytes.len(),
                        }),
                        content_hash: Some(hash),
                        is_merged: true,
                        original_artifact_url: Some(p.artifact.artifact_url),
                        merge_error: None,
                    }),
                    Err(e) => {
                        tracing::warn!(task_id, error = %e, "Merged artifact persistence failed");
                        out.push(with_merge_error(p.artifact, &e.to_string()));
                    }
                },
                Err(e) => {
                    let reason = e.to_string();
                    if matches!(e, MergeError::Vendor(_)) && e.is_permanent() {
                        tracing::warn!(task_id, error = %e, "Vendor rejected merge, skipping remaining artifacts");
                        rejected = Some(reason.clone());
                    }
                    out.push(with_merge_error(p.artifact, &reason));
                }
            }
        }
        out
    }
}

fn with_merge_error(mut artifact: Artifact, reason: &str) -> Artifact {
    artifact.is_merged = false;
    artifact.merge_error = Some(reason.to_string());
    artifact
}

/// MIME type from magic bytes, falling back to the URL extension.
fn artifact_content_type(bytes: &[u8], url: &str) -> &'static str {
    if let Some(format) = sniff_format(bytes) {
        return content_type(format);
    }
    let extension = Url::parse(url).ok().and_then(|url| {
        let file = url.path_segments()?.next_back()?.to_string();
        let (_, ext) = file.rsplit_once('.')?;
        Some(ext.to_ascii_lowercase())
    });
    match extension.as_deref() {
        Some("mp4") => "video/mp4",
        Some("webm") => "video/webm",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_prefers_magic_bytes() {
        let png = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0];
        assert_eq!(artifact_content_type(&png, "https://v/out.bin"), "image/png");
    }

    #[test]
    fn content_type_falls_back_to_extension() {
        assert_eq!(artifact_content_type(b"....", "https://v/clip.MP4?sig=abc"), "video/mp4");
        assert_eq!(artifact_content_type(b"....", "https://v/blob"), "application/octet-stream");
        assert_eq!(
            artifact_content_type(b"....", "https://cdn.v.test/out/frame.webp#t=1"),
            "image/webp"
        );
    }

    #[test]
    fn extension_comes_from_path_not_host() {
        assert_eq!(
            artifact_content_type(b"....", "https://media.png.test/render?format=mp4"),
            "application/octet-stream"
        );
        assert_eq!(artifact_content_type(b"....", "not a url.png"), "application/octet-stream");
    }

    #[test]
    fn merge_error_marks_artifact_unmerged() {
        let artifact = Artifact::from_vendor(&VendorArtifact {
            url: "https://v/a.png".into(),
            seed: Some(3),
        });
        let marked = with_merge_error(artifact, "vendor down");
        assert!(!marked.is_merged);
        assert_eq!(marked.merge_error.as_deref(), Some("vendor down"));
        assert_eq!(marked.seed, Some(3));
    }
}
