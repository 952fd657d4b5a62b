//! Drives one job attempt through the remote pipeline.
//!
//! An attempt uploads every input slot of the job's kind, binds the
//! uploaded names into the kind's template, submits, polls until the remote
//! job finishes, then fetches and downloads the outputs. Any error along
//! the way ends up in one place, [`JobExecutor::handle_failure`], which asks
//! the [`RetryPolicy`] whether the job goes back to the queue.
//!
//! The executor only touches progress, the remote job id and the retry
//! counters of the job it runs. Status transitions are applied by the
//! queue from the returned [`RunOutcome`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use hubqueue_core::job::{InputFile, Job, JobResult};
use hubqueue_core::kind::{JobKind, KindConfig, KindRegistry};
use hubqueue_core::naming::result_filename;
use hubqueue_core::progress::{
    poll_progress, upload_progress, PROGRESS_CAP_BEFORE_COMPLETION, PROGRESS_SUBMITTED,
};
use hubqueue_core::retry::{RetryDecision, RetryPolicy};
use hubqueue_core::types::JobId;
use hubqueue_remote::client::{RemoteJobClient, RemoteStatus};
use hubqueue_remote::service::RemoteApi;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::config::{EngineConfig, PollSettings};
use crate::error::PipelineError;
use crate::events::{JobEvent, JobEventBus};

/// A job shared between the queue table and the executor running it.
pub type SharedJob = Arc<RwLock<Job>>;

/// What the queue should do with a job once its attempt is over.
#[derive(Debug)]
pub enum RunOutcome {
    Succeeded(Vec<JobResult>),
    /// The backoff has already been waited out.
    Requeue,
    Failed(String),
}

/// The job fields an attempt needs, copied once at the start.
struct Attempt {
    id: JobId,
    kind: JobKind,
    inputs: Vec<(String, InputFile)>,
    style: Option<String>,
    retry_count: u32,
    timeout_count: u32,
}

impl Attempt {
    fn of(job: &Job) -> Self {
        Self {
            id: job.id,
            kind: job.kind,
            inputs: job.inputs.clone(),
            style: job.style.clone(),
            retry_count: job.retry_count,
            timeout_count: job.timeout_count,
        }
    }

    fn input(&self, slot: &str) -> Option<&InputFile> {
        self.inputs
            .iter()
            .find(|(name, _)| name == slot)
            .map(|(_, file)| file)
    }
}

pub struct JobExecutor {
    client: RemoteJobClient,
    registry: Arc<KindRegistry>,
    policy: RetryPolicy,
    poll: PollSettings,
    events: JobEventBus,
}

impl JobExecutor {
    pub fn new(
        config: &EngineConfig,
        registry: Arc<KindRegistry>,
        api: Arc<dyn RemoteApi>,
        events: JobEventBus,
    ) -> Self {
        let client = RemoteJobClient::new(
            api,
            config.timeouts.clone(),
            config.call_retry.clone(),
            config.classifier.clone(),
        );
        Self {
            client,
            registry,
            policy: config.retry.clone(),
            poll: config.poll.clone(),
            events,
        }
    }

    /// Run one attempt of `job`. Never fails; every error becomes an outcome.
    pub async fn run(&self, job: SharedJob, cancel: CancellationToken) -> RunOutcome {
        let attempt = Attempt::of(&*job.read().await);

        tracing::info!(
            job_id = attempt.id,
            kind = %attempt.kind,
            attempt = attempt.retry_count + 1,
            "Job attempt started",
        );

        if cancel.is_cancelled() {
            return RunOutcome::Failed(PipelineError::Cancelled.to_string());
        }

        match self.run_pipeline(&job, &attempt, &cancel).await {
            Ok(results) => {
                tracing::info!(
                    job_id = attempt.id,
                    results = results.len(),
                    "Job attempt succeeded",
                );
                RunOutcome::Succeeded(results)
            }
            Err(PipelineError::Cancelled) => {
                tracing::info!(job_id = attempt.id, "Job cancelled");
                RunOutcome::Failed(PipelineError::Cancelled.to_string())
            }
            Err(e) => self.handle_failure(&job, &attempt, e, &cancel).await,
        }
    }

    // ---- pipeline ----

    async fn run_pipeline(
        &self,
        job: &SharedJob,
        attempt: &Attempt,
        cancel: &CancellationToken,
    ) -> Result<Vec<JobResult>, PipelineError> {
        let config = self
            .registry
            .get(attempt.kind)
            .map_err(|e| PipelineError::Binding(e.to_string()))?;

        let uploaded = self.upload_inputs(job, attempt, config, cancel).await?;

        let parameters = config
            .bind(attempt.kind, &uploaded, attempt.style.as_deref())
            .map_err(|e| PipelineError::Binding(e.to_string()))?;

        let remote_job_id = guarded(
            cancel,
            self.client.submit(
                &config.credential,
                &config.app_id,
                &parameters,
                config.instance_type.as_deref(),
            ),
        )
        .await?;

        job.write().await.remote_job_id = Some(remote_job_id.clone());
        self.report_progress(job, PROGRESS_SUBMITTED).await;
        tracing::info!(
            job_id = attempt.id,
            remote_job_id = %remote_job_id,
            parameters = parameters.len(),
            "Remote job submitted",
        );

        self.poll_until_done(job, attempt.id, config, &remote_job_id, cancel)
            .await?;

        let urls = guarded(
            cancel,
            self.client
                .fetch_outputs(&config.credential, &remote_job_id, config.output),
        )
        .await?;
        self.report_progress(job, PROGRESS_CAP_BEFORE_COMPLETION).await;

        let mut results = Vec::with_capacity(urls.len());
        for (index, url) in urls.iter().enumerate() {
            let data = guarded(cancel, self.client.download(url)).await?;
            let filename = result_filename(attempt.kind, attempt.id, index + 1, url);
            tracing::debug!(
                job_id = attempt.id,
                filename = %filename,
                bytes = data.len(),
                "Result downloaded",
            );
            results.push(JobResult::new(filename, url.clone(), data));
        }

        Ok(results)
    }

    /// Upload inputs in slot order. Returns `(slot, remote filename)` pairs.
    async fn upload_inputs(
        &self,
        job: &SharedJob,
        attempt: &Attempt,
        config: &KindConfig,
        cancel: &CancellationToken,
    ) -> Result<Vec<(String, String)>, PipelineError> {
        let slots = config.required_slots();
        let mut uploaded = Vec::with_capacity(slots.len());

        for slot in slots {
            let input = attempt.input(slot).ok_or_else(|| {
                PipelineError::Binding(format!("missing input for slot '{slot}'"))
            })?;
            let remote_name = guarded(
                cancel,
                self.client
                    .upload(&config.credential, &input.filename, Arc::clone(&input.data)),
            )
            .await?;

            tracing::debug!(
                job_id = attempt.id,
                slot,
                remote_name = %remote_name,
                "Input uploaded",
            );
            uploaded.push((slot.to_string(), remote_name));
            self.report_progress(job, upload_progress(uploaded.len())).await;
        }

        Ok(uploaded)
    }

    async fn poll_until_done(
        &self,
        job: &SharedJob,
        job_id: JobId,
        config: &KindConfig,
        remote_job_id: &str,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        let mut inconclusive_streak = 0u32;

        for poll in 1..=self.poll.max_polls {
            pause(cancel, self.poll.interval).await?;

            let status = guarded(cancel, async {
                Ok::<_, PipelineError>(
                    self.client
                        .poll_status(&config.credential, remote_job_id)
                        .await,
                )
            })
            .await?;
            self.report_progress(job, poll_progress(poll, self.poll.max_polls))
                .await;

            tracing::debug!(job_id, remote_job_id, poll, status = %status, "Polled remote job");

            match status {
                RemoteStatus::Success => return Ok(()),
                RemoteStatus::Failed => {
                    return Err(PipelineError::RemoteFailed {
                        remote_job_id: remote_job_id.to_string(),
                    })
                }
                s if s.is_inconclusive() => {
                    inconclusive_streak += 1;
                    if inconclusive_streak >= self.poll.inconclusive_threshold {
                        let extra = self
                            .poll
                            .interval
                            .saturating_mul(self.poll.inconclusive_backoff);
                        tracing::warn!(
                            job_id,
                            remote_job_id,
                            streak = inconclusive_streak,
                            delay_ms = extra.as_millis() as u64,
                            "Status checks inconclusive, backing off",
                        );
                        pause(cancel, extra).await?;
                        inconclusive_streak = 0;
                    }
                }
                _ => inconclusive_streak = 0,
            }
        }

        Err(PipelineError::PollLimitExceeded {
            polls: self.poll.max_polls,
        })
    }

    // ---- failure handling ----

    async fn handle_failure(
        &self,
        job: &SharedJob,
        attempt: &Attempt,
        error: PipelineError,
        cancel: &CancellationToken,
    ) -> RunOutcome {
        let message = error.to_string();
        let class = error.classify(self.client.classifier());
        let operation = match &error {
            PipelineError::Remote(e) => e.operation(),
            _ => None,
        };
        let decision = self.policy.decide(
            class,
            attempt.retry_count,
            attempt.timeout_count,
            &mut rand::rng(),
        );

        match decision {
            RetryDecision::Retry {
                delay,
                retry_count,
                timeout_count,
            } => {
                {
                    let mut job = job.write().await;
                    job.retry_count = retry_count;
                    job.timeout_count = timeout_count;
                }

                tracing::warn!(
                    job_id = attempt.id,
                    class = class.as_str(),
                    operation = ?operation,
                    retry_count,
                    timeout_count,
                    delay_ms = delay.as_millis() as u64,
                    error = %message,
                    "Transient failure, job will be re-queued",
                );
                self.events.publish(JobEvent::RetryScheduled {
                    job_id: attempt.id,
                    retry_count,
                    class,
                    delay_ms: delay.as_millis() as u64,
                    error: message,
                });

                match pause(cancel, delay).await {
                    Ok(()) => RunOutcome::Requeue,
                    Err(e) => RunOutcome::Failed(e.to_string()),
                }
            }
            RetryDecision::GiveUp { timeout_count } => {
                job.write().await.timeout_count = timeout_count;
                tracing::error!(
                    job_id = attempt.id,
                    class = class.as_str(),
                    operation = ?operation,
                    retry_count = attempt.retry_count,
                    timeout_count,
                    error = %message,
                    "Job failed",
                );
                RunOutcome::Failed(message)
            }
        }
    }

    // ---- private helpers ----

    async fn report_progress(&self, job: &SharedJob, percent: u8) {
        let mut job = job.write().await;
        if job.advance_progress(percent) {
            self.events.publish(JobEvent::Progress {
                job_id: job.id,
                progress: job.progress,
            });
        }
    }
}

/// Await `call` unless `cancel` fires first.
async fn guarded<T, E, F>(cancel: &CancellationToken, call: F) -> Result<T, PipelineError>
where
    F: Future<Output = Result<T, E>>,
    PipelineError: From<E>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PipelineError::Cancelled),
        result = call => result.map_err(PipelineError::from),
    }
}

/// Sleep for `duration` unless `cancel` fires first.
async fn pause(cancel: &CancellationToken, duration: Duration) -> Result<(), PipelineError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(PipelineError::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}
