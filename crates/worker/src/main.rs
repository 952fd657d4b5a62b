mod args;

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use hubqueue_core::job::JobStatus;
use hubqueue_engine::config::{load_registry, EngineConfig};
use hubqueue_engine::events::JobEvent;
use hubqueue_engine::queue::{JobQueue, JobRequest};
use hubqueue_engine::snapshot::JobSnapshot;
use hubqueue_remote::api::HttpRemoteApi;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::args::{Args, JobSpec};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "hubqueue_worker=info,hubqueue_engine=info,hubqueue_remote=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = EngineConfig::from_env().context("Invalid engine configuration")?;
    let registry = load_registry(&args.kinds)?;
    let api = Arc::new(HttpRemoteApi::new(config.remote_base_url.clone()));
    tracing::info!(
        kinds = ?registry.kinds().collect::<Vec<_>>(),
        base_url = %api.base_url(),
        "Configuration loaded",
    );

    let queue = JobQueue::start(config, registry, api).await;
    tracing::info!(max_concurrent = queue.max_concurrent(), "Worker pool ready");
    let mut events = queue.subscribe();

    for spec in &args.jobs {
        let request = build_request(spec).await?;
        let id = queue
            .submit(request)
            .await
            .with_context(|| format!("Rejected {} job", spec.kind))?;
        tracing::info!(job_id = id, kind = %spec.kind, "Job accepted");
    }

    tokio::select! {
        _ = wait_until_settled(&queue, &mut events) => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted, stopping");
        }
    }
    queue.shutdown().await;

    let snapshot = queue.snapshot().await;
    for job in &snapshot.jobs {
        if job.status == JobStatus::Succeeded {
            save_results(&args.out, job).await?;
        }
    }

    let stats = snapshot.stats;
    tracing::info!(
        succeeded = stats.succeeded,
        failed = stats.failed,
        total = stats.total,
        "All jobs finished",
    );
    if stats.failed > 0 {
        anyhow::bail!("{} of {} jobs failed", stats.failed, stats.total);
    }
    Ok(())
}

async fn build_request(spec: &JobSpec) -> anyhow::Result<JobRequest> {
    let mut request = JobRequest::new(spec.kind);
    for (slot, path) in &spec.inputs {
        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read input {}", path.display()))?;
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{slot}.png"));
        request = request.with_input(slot.clone(), filename, data);
    }
    if let Some(style) = &spec.style {
        request = request.with_style(style.clone());
    }
    Ok(request)
}

/// Log events until no job is queued or processing.
async fn wait_until_settled(queue: &JobQueue, events: &mut broadcast::Receiver<JobEvent>) {
    while !queue.stats().await.is_settled() {
        match events.recv().await {
            Ok(event) => log_event(&event),
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event stream lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

fn log_event(event: &JobEvent) {
    match event {
        JobEvent::Progress { job_id, progress } => {
            tracing::debug!(job_id, progress, "Progress");
        }
        JobEvent::RetryScheduled {
            job_id,
            retry_count,
            delay_ms,
            ..
        } => {
            tracing::info!(job_id, retry_count, delay_ms, "Retry scheduled");
        }
        JobEvent::Failed { job_id, error } => {
            tracing::warn!(job_id, error = %error, "Job failed");
        }
        other => {
            tracing::debug!(event = other.event_type(), job_id = ?other.job_id(), "Job event");
        }
    }
}

async fn save_results(dir: &Path, job: &JobSnapshot) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    for result in &job.results {
        let path = dir.join(&result.filename);
        tokio::fs::write(&path, &result.data)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        tracing::info!(job_id = job.id, path = %path.display(), "Result saved");
    }
    Ok(())
}
