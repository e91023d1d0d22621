//! Completion resolver idempotency and the poller/webhook race.

mod common;

use std::time::Duration;

use common::{artifact, count_named, image_request, test_config, FakeVendor, Harness};
use synth_core::job_events::{EVENT_JOB_COMPLETED, EVENT_JOB_FAILED, EVENT_JOB_SUBMITTED};
use synth_core::task::TaskStatus;
use synth_core::vendor_status::{StatusReport, TerminalSignal};
use synth_pipeline::{Resolution, TickOutcome, WebhookAck};
use synth_vendor::webhook::sign;

fn success() -> TerminalSignal {
    TerminalSignal::Succeeded {
        artifacts: vec![artifact("https://vendor.test/out/1.png")],
    }
}

fn failure(reason: &str) -> TerminalSignal {
    TerminalSignal::Failed {
        reason: reason.to_string(),
    }
}

fn result_webhook(job_id: &str) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "eventType": "JOB_RESULT",
        "jobId": job_id,
        "status": "SUCCEEDED",
        "artifacts": [{"url": "https://vendor.test/out/1.png", "seed": 42}],
    }))
    .unwrap()
}

#[tokio::test(start_paused = true)]
async fn resolving_twice_finalizes_once() {
    let mut h = Harness::new();
    h.seed("job-7", TaskStatus::Processing);
    let resolver = h.engine.resolver();

    assert_eq!(
        resolver.resolve("job-7", success()).await.unwrap(),
        Resolution::Finalized(TaskStatus::Completed)
    );
    assert_eq!(
        resolver.resolve("job-7", success()).await.unwrap(),
        Resolution::AlreadyFinal
    );
    assert_eq!(
        resolver.resolve("job-7", failure("late failure")).await.unwrap(),
        Resolution::AlreadyFinal
    );

    let task = h.task("job-7").await;
    assert_eq!(task.status, TaskStatus::Completed);
    assert!(task.error.is_none());
    assert_eq!(FakeVendor::count(&h.vendor.downloads), 1);
    assert_eq!(FakeVendor::count(&h.blobs.puts), 1);

    let events = h.drain_events();
    assert_eq!(count_named(&events, EVENT_JOB_COMPLETED), 1);
    assert_eq!(count_named(&events, EVENT_JOB_FAILED), 0);
}

#[tokio::test(start_paused = true)]
async fn concurrent_resolutions_have_one_winner() {
    let mut h = Harness::new();
    h.seed("job-7", TaskStatus::Processing);
    let resolver = h.engine.resolver();

    let (a, b) = tokio::join!(
        resolver.resolve("job-7", success()),
        resolver.resolve("job-7", failure("vendor said no")),
    );
    let outcomes = [a.unwrap(), b.unwrap()];
    let winners = outcomes
        .iter()
        .filter(|r| matches!(r, Resolution::Finalized(_)))
        .count();
    assert_eq!(winners, 1);
    assert!(outcomes.contains(&Resolution::AlreadyFinal));

    let events = h.drain_events();
    assert_eq!(
        count_named(&events, EVENT_JOB_COMPLETED) + count_named(&events, EVENT_JOB_FAILED),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn unknown_task_is_not_found() {
    let h = Harness::new();
    assert_eq!(
        h.engine.resolver().resolve("nope", success()).await.unwrap(),
        Resolution::NotFound
    );
}

#[tokio::test(start_paused = true)]
async fn webhook_first_completion_stops_poller() {
    let mut h = Harness::new();
    h.vendor.always("job-1", StatusReport::running(Some(5)));
    h.engine.submit(image_request(None, false)).await.unwrap();

    let ack = h.engine.ingest_webhook(&result_webhook("job-1"), None);
    assert_eq!(ack, WebhookAck::Accepted { job_id: "job-1".into() });

    let done = h.wait_for("job-1", TaskStatus::Completed).await;
    assert!(done.result.is_some());
    assert!(!h.engine.scheduler().is_attached("job-1"));

    h.settle(Duration::from_secs(10)).await;
    assert_eq!(FakeVendor::count(&h.vendor.status_calls), 0);

    let events = h.drain_events();
    let names: Vec<&str> = events.iter().map(|e| e.event_name()).collect();
    assert_eq!(names, vec![EVENT_JOB_SUBMITTED, EVENT_JOB_COMPLETED]);
}

#[tokio::test(start_paused = true)]
async fn poller_and_webhook_race_notifies_once() {
    let mut h = Harness::new();
    h.seed("job-1", TaskStatus::Processing);
    h.vendor.always(
        "job-1",
        StatusReport::succeeded(vec![artifact("https://vendor.test/out/1.png")]),
    );

    let scheduler = h.engine.scheduler();
    let mut tracker = scheduler.new_tracker();
    let (tick, from_webhook) = tokio::join!(
        scheduler.poll_once("job-1", &mut tracker),
        h.engine.webhooks().process("job-1", success()),
    );
    assert_eq!(tick, TickOutcome::Resolved);
    assert_ne!(from_webhook, Resolution::NotFound);

    let done = h.task("job-1").await;
    assert_eq!(done.status, TaskStatus::Completed);

    let events = h.drain_events();
    assert_eq!(count_named(&events, EVENT_JOB_COMPLETED), 1);
    assert_eq!(FakeVendor::count(&h.vendor.downloads), 1);
}

#[tokio::test(start_paused = true)]
async fn webhook_before_task_row_is_retried() {
    let h = Harness::new();

    let ack = h.engine.ingest_webhook(&result_webhook("job-99"), None);
    assert_eq!(ack, WebhookAck::Accepted { job_id: "job-99".into() });

    // The submitting request records the task shortly after the webhook.
    tokio::time::sleep(Duration::from_millis(100)).await;
    h.seed("job-99", TaskStatus::Pending);

    let done = h.wait_for("job-99", TaskStatus::Completed).await;
    assert!(done.result.is_some());
}

#[tokio::test(start_paused = true)]
async fn webhook_for_unknown_task_is_dropped() {
    let h = Harness::new();
    let resolution = h.engine.webhooks().process("ghost", success()).await;
    assert_eq!(resolution, Resolution::NotFound);
}

#[tokio::test(start_paused = true)]
async fn non_terminal_and_foreign_webhooks_are_ignored() {
    let h = Harness::new();
    h.seed("job-1", TaskStatus::Processing);

    let running = br#"{"jobId":"job-1","status":"RUNNING","progressPercent":40}"#;
    assert_eq!(h.engine.ingest_webhook(running, None), WebhookAck::Ignored);

    let other = br#"{"eventType":"CREDITS_LOW","jobId":"job-1","status":"SUCCEEDED"}"#;
    assert_eq!(h.engine.ingest_webhook(other, None), WebhookAck::Ignored);

    assert_eq!(h.engine.ingest_webhook(b"not json", None), WebhookAck::Rejected);

    h.settle(Duration::from_secs(1)).await;
    assert_eq!(h.task("job-1").await.status, TaskStatus::Processing);
}

#[tokio::test(start_paused = true)]
async fn signed_webhooks_require_valid_signature() {
    let mut config = test_config();
    config.webhook_secret = Some("s3cret".into());
    let h = Harness::with_config(config);
    h.seed("job-1", TaskStatus::Processing);
    let body = result_webhook("job-1");

    assert_eq!(h.engine.ingest_webhook(&body, None), WebhookAck::Rejected);
    assert_eq!(
        h.engine.ingest_webhook(&body, Some(&sign("other", &body))),
        WebhookAck::Rejected
    );
    h.settle(Duration::from_secs(1)).await;
    assert_eq!(h.task("job-1").await.status, TaskStatus::Processing);

    assert_eq!(
        h.engine.ingest_webhook(&body, Some(&sign("s3cret", &body))),
        WebhookAck::Accepted { job_id: "job-1".into() }
    );
    h.wait_for("job-1", TaskStatus::Completed).await;
}
