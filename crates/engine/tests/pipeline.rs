//! End-to-end job pipelines against a scripted remote service.
//!
//! All tests run on a paused clock, so poll intervals and retry backoffs
//! elapse instantly.

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use assert_matches::assert_matches;
use hubqueue_core::job::JobStatus;
use hubqueue_core::kind::JobKind;
use hubqueue_engine::events::JobEvent;
use hubqueue_engine::queue::JobRequest;

use common::{drain, pose_transfer, start, wait_until_settled, watermark, Script};

// ---------------------------------------------------------------------------
// Test: two-input job with multiple outputs succeeds on the first attempt
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn pose_transfer_succeeds_with_all_outputs() {
    let (queue, remote) = start(
        5,
        Script {
            running_polls: 3,
            outputs: 2,
            ..Default::default()
        },
    )
    .await;

    let id = queue.submit(pose_transfer()).await.unwrap();
    wait_until_settled(&queue).await;

    let job = queue.job(id).await.unwrap();
    assert_eq!(job.status, JobStatus::Succeeded);
    assert_eq!(job.progress, 100);
    assert_eq!(job.retry_count, 0);
    assert_eq!(job.remote_job_id.as_deref(), Some("remote-1"));
    assert!(job.elapsed_seconds.is_some());

    let names: Vec<_> = job.results.iter().map(|r| r.filename.as_str()).collect();
    assert_eq!(names, ["pose-transfer_1_1.png", "pose-transfer_1_2.png"]);
    assert_eq!(
        job.results[0].source_url,
        "https://cdn.test/remote-1/out_1.png"
    );
    assert_eq!(job.results[0].size_bytes, job.results[0].data.len());

    assert_eq!(remote.uploaded(), ["character.png", "pose.png"]);
    let submission = &remote.submissions()[0];
    assert_eq!(submission.app_id, "app-pose");
    let bound: Vec<_> = submission
        .parameters
        .iter()
        .map(|p| (p.node_id.as_str(), p.field_value.as_str()))
        .collect();
    assert_eq!(bound, [("245", "api/character.png"), ("244", "api/pose.png")]);
}

// ---------------------------------------------------------------------------
// Test: submit timeouts are absorbed by the remote client's own retry
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn submit_timeouts_absorbed_below_job_retry() {
    let (queue, remote) = start(
        5,
        Script {
            submit_errors: vec!["connection timeout".into(), "connection timeout".into()],
            ..Default::default()
        },
    )
    .await;
    let mut events = queue.subscribe();

    let id = queue
        .submit(JobRequest::new(JobKind::Enhance).with_input("image", "in.png", vec![0u8; 4]))
        .await
        .unwrap();
    wait_until_settled(&queue).await;

    let job = queue.job(id).await.unwrap();
    assert_eq!(job.status, JobStatus::Succeeded);
    assert_eq!(job.retry_count, 0);
    assert_eq!(remote.submit_calls.load(Ordering::SeqCst), 3);

    let events = drain(&mut events);
    assert!(!events
        .iter()
        .any(|e| matches!(e, JobEvent::RetryScheduled { .. } | JobEvent::Failed { .. })));
    let queued = events
        .iter()
        .filter(|e| matches!(e, JobEvent::Queued { .. }))
        .count();
    assert_eq!(queued, 1);
}

// ---------------------------------------------------------------------------
// Test: a FAILED remote status fails the job without retrying
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn remote_failure_is_permanent() {
    let (queue, remote) = start(
        5,
        Script {
            remote_fails: true,
            ..Default::default()
        },
    )
    .await;

    let id = queue.submit(watermark("w.png")).await.unwrap();
    wait_until_settled(&queue).await;

    let job = queue.job(id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.retry_count, 0);
    assert!(job.results.is_empty());
    let message = job.error_message.unwrap();
    assert!(message.contains("remote processing failed"), "{message}");
    assert_eq!(remote.submit_calls.load(Ordering::SeqCst), 1);
    assert_eq!(remote.downloads.load(Ordering::SeqCst), 0);
}

// ---------------------------------------------------------------------------
// Test: persistent timeouts re-queue exactly max_retries times
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn timeout_retries_are_bounded() {
    let (queue, remote) = start(
        5,
        Script {
            download_error: Some("read timed out".into()),
            ..Default::default()
        },
    )
    .await;
    let mut events = queue.subscribe();

    let id = queue.submit(watermark("w.png")).await.unwrap();
    wait_until_settled(&queue).await;

    let job = queue.job(id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.retry_count, 3);
    assert_eq!(job.timeout_count, 4);
    assert!(job.error_message.unwrap().contains("read timed out"));
    assert_eq!(remote.downloads.load(Ordering::SeqCst), 4);

    let events = drain(&mut events);
    let retries: Vec<u32> = events
        .iter()
        .filter_map(|e| match e {
            JobEvent::RetryScheduled { retry_count, .. } => Some(*retry_count),
            _ => None,
        })
        .collect();
    assert_eq!(retries, [1, 2, 3]);
    let started = events
        .iter()
        .filter(|e| matches!(e, JobEvent::Started { .. }))
        .count();
    assert_eq!(started, 4);
    assert_matches!(events.last(), Some(JobEvent::Failed { job_id, .. }) if *job_id == id);
}

// ---------------------------------------------------------------------------
// Test: progress rises monotonically and stays capped until success
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn progress_is_monotonic_and_capped() {
    let (queue, _remote) = start(
        5,
        Script {
            running_polls: 5,
            outputs: 2,
            ..Default::default()
        },
    )
    .await;
    let mut events = queue.subscribe();

    let id = queue.submit(pose_transfer()).await.unwrap();
    wait_until_settled(&queue).await;

    let progress: Vec<u8> = drain(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            JobEvent::Progress { job_id, progress } if job_id == id => Some(progress),
            _ => None,
        })
        .collect();

    assert_eq!(&progress[..3], [10, 20, 35]);
    assert!(progress.windows(2).all(|w| w[0] < w[1]), "{progress:?}");
    assert!(progress.iter().all(|p| *p <= 90), "{progress:?}");
    assert_eq!(progress.last(), Some(&90));

    assert_eq!(queue.job(id).await.unwrap().progress, 100);
}

// ---------------------------------------------------------------------------
// Test: a streak of inconclusive status checks triggers an extra pause
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn inconclusive_status_streak_backs_off() {
    let (queue, _remote) = start(
        5,
        Script {
            status_errors: 3,
            ..Default::default()
        },
    )
    .await;

    let started = tokio::time::Instant::now();
    let id = queue.submit(watermark("w.png")).await.unwrap();
    wait_until_settled(&queue).await;
    let elapsed = started.elapsed();

    assert_eq!(queue.job(id).await.unwrap().status, JobStatus::Succeeded);
    // Four polls at 4s plus one extra pause of two intervals.
    assert!(elapsed >= Duration::from_secs(24), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(30), "{elapsed:?}");
}

// ---------------------------------------------------------------------------
// Test: a selected style appends its entries, the default style none
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn style_entries_are_appended() {
    let (queue, remote) = start(1, Script::default()).await;

    let enhance = || JobRequest::new(JobKind::Enhance).with_input("image", "in.png", vec![0u8; 4]);
    queue.submit(enhance().with_style("anime")).await.unwrap();
    queue.submit(enhance().with_style("default")).await.unwrap();
    wait_until_settled(&queue).await;

    let submissions = remote.submissions();
    let nodes = |i: usize| -> Vec<String> {
        submissions[i]
            .parameters
            .iter()
            .map(|p| p.node_id.clone())
            .collect()
    };
    assert_eq!(nodes(0), ["38", "60", "4"]);
    assert_eq!(nodes(1), ["38"]);
}

// ---------------------------------------------------------------------------
// Test: a kind's instance type is forwarded with the submission
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn instance_type_is_forwarded() {
    let (queue, remote) = start(1, Script::default()).await;

    queue
        .submit(JobRequest::new(JobKind::Relight).with_input("image", "r.png", vec![0u8; 4]))
        .await
        .unwrap();
    queue.submit(watermark("w.png")).await.unwrap();
    wait_until_settled(&queue).await;

    let submissions = remote.submissions();
    assert_eq!(submissions[0].app_id, "app-relight");
    assert_eq!(submissions[0].instance_type.as_deref(), Some("plus"));
    assert_eq!(submissions[1].instance_type, None);
}
