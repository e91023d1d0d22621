//! Integration tests for the Postgres-backed task store.

use assert_matches::assert_matches;
use chrono::Utc;
use sqlx::PgPool;
use synth_core::task::{
    Artifact, ImageTask, MergeTask, PostProcessFlags, Task, TaskPatch, TaskPayload, TaskStatus,
};
use synth_db::{PgTaskStore, StoreError, TaskStore};

fn image_task(id: &str) -> Task {
    Task::new(
        id,
        "owner-1",
        Some("chat-1".into()),
        TaskPayload::Image(ImageTask {
            face_image_url: Some("https://cdn.example/face.png".into()),
            parameters: serde_json::json!({"prompt": "portrait"}),
        }),
        PostProcessFlags {
            should_auto_merge: true,
        },
        Utc::now(),
    )
}

// ---------------------------------------------------------------------------
// Test: create + get round trip keeps the tagged payload
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "./migrations")]
async fn create_and_get_preserves_payload(pool: PgPool) {
    let store = PgTaskStore::new(pool);
    let task = image_task("job-1");

    let id = store.create(&task).await.unwrap();
    assert_eq!(id, "job-1");

    let stored = store.get("job-1").await.unwrap().expect("task should exist");
    assert_eq!(stored.status, TaskStatus::Pending);
    assert_eq!(stored.payload, task.payload);
    assert!(stored.post_process.should_auto_merge);
    assert_eq!(stored.parent_entity_id.as_deref(), Some("chat-1"));
}

#[sqlx::test(migrations = "./migrations")]
async fn create_duplicate_is_rejected(pool: PgPool) {
    let store = PgTaskStore::new(pool);
    store.create(&image_task("dup")).await.unwrap();

    assert_matches!(
        store.create(&image_task("dup")).await,
        Err(StoreError::Duplicate(id)) if id == "dup"
    );
}

// ---------------------------------------------------------------------------
// Test: compare-and-transition semantics
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "./migrations")]
async fn transition_applies_patch_once(pool: PgPool) {
    let store = PgTaskStore::new(pool);
    store.create(&image_task("job-2")).await.unwrap();

    let first = store
        .compare_and_transition(
            "job-2",
            &TaskStatus::NON_TERMINAL,
            TaskStatus::Failed,
            TaskPatch::new().with_error("invalid prompt"),
        )
        .await
        .unwrap();
    assert!(first);

    let second = store
        .compare_and_transition(
            "job-2",
            &TaskStatus::NON_TERMINAL,
            TaskStatus::Completed,
            TaskPatch::new().with_error("should not land"),
        )
        .await
        .unwrap();
    assert!(!second);

    let stored = store.get("job-2").await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Failed);
    assert_eq!(stored.error.as_deref(), Some("invalid prompt"));
}

#[sqlx::test(migrations = "./migrations")]
async fn transition_without_an_edge_is_refused(pool: PgPool) {
    let store = PgTaskStore::new(pool);
    store.create(&image_task("job-5")).await.unwrap();

    let parked = store
        .compare_and_transition("job-5", &[TaskStatus::Pending], TaskStatus::Background, TaskPatch::new())
        .await
        .unwrap();
    assert!(!parked);

    store
        .compare_and_transition("job-5", &[TaskStatus::Pending], TaskStatus::Processing, TaskPatch::new())
        .await
        .unwrap();
    let rewound = store
        .compare_and_transition("job-5", &TaskStatus::NON_TERMINAL, TaskStatus::Pending, TaskPatch::new())
        .await
        .unwrap();
    assert!(!rewound);
    assert_eq!(store.get("job-5").await.unwrap().unwrap().status, TaskStatus::Processing);
}

#[sqlx::test(migrations = "./migrations")]
async fn counters_and_progress_persist(pool: PgPool) {
    let store = PgTaskStore::new(pool);
    store.create(&image_task("job-3")).await.unwrap();

    store
        .compare_and_transition("job-3", &[TaskStatus::Pending], TaskStatus::Processing, TaskPatch::new())
        .await
        .unwrap();
    store
        .compare_and_transition(
            "job-3",
            &[TaskStatus::Processing],
            TaskStatus::Processing,
            TaskPatch::new().with_counters(5, 2).with_progress(Some(40)),
        )
        .await
        .unwrap();

    let stored = store.get("job-3").await.unwrap().unwrap();
    assert_eq!(stored.poll_attempts, 5);
    assert_eq!(stored.stall_count, 2);
    assert_eq!(stored.progress, Some(40));
}

#[sqlx::test(migrations = "./migrations")]
async fn replace_result_requires_completed(pool: PgPool) {
    let store = PgTaskStore::new(pool);
    store.create(&image_task("job-4")).await.unwrap();

    let artifacts = vec![Artifact {
        artifact_url: "https://blob.example/abc.png".into(),
        seed: Some(7),
        metadata: serde_json::Value::Null,
        content_hash: Some("abc".into()),
        is_merged: false,
        original_artifact_url: None,
        merge_error: None,
    }];

    assert!(!store.replace_result("job-4", &artifacts).await.unwrap());

    store
        .compare_and_transition("job-4", &TaskStatus::NON_TERMINAL, TaskStatus::Completed, TaskPatch::new())
        .await
        .unwrap();
    assert!(store.replace_result("job-4", &artifacts).await.unwrap());

    let stored = store.get("job-4").await.unwrap().unwrap();
    assert_eq!(stored.result, Some(artifacts));
}

// ---------------------------------------------------------------------------
// Test: recovery scan
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "./migrations")]
async fn list_incomplete_skips_terminal_and_expired(pool: PgPool) {
    let store = PgTaskStore::new(pool);
    let cutoff = Utc::now() - chrono::Duration::hours(24);

    let mut expired = image_task("expired");
    expired.submitted_at = cutoff - chrono::Duration::hours(2);
    expired.updated_at = expired.submitted_at;
    store.create(&expired).await.unwrap();

    store.create(&image_task("live")).await.unwrap();

    let merge = Task::new(
        "merge-1",
        "owner-2",
        None,
        TaskPayload::Merge(MergeTask {
            face_image_url: "https://cdn.example/f.png".into(),
            base_image_url: "https://cdn.example/b.png".into(),
            parameters: serde_json::Value::Null,
        }),
        PostProcessFlags::default(),
        Utc::now(),
    );
    store.create(&merge).await.unwrap();
    store
        .compare_and_transition("merge-1", &TaskStatus::NON_TERMINAL, TaskStatus::Completed, TaskPatch::new())
        .await
        .unwrap();

    let ids: Vec<String> = store
        .list_incomplete(cutoff)
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.task_id)
        .collect();
    assert_eq!(ids, vec!["live".to_string()]);
}
