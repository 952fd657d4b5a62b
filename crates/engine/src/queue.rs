//! Admission, dispatch and the worker pool.
//!
//! [`JobQueue`] owns every job of the process. Submitted jobs go to the
//! tail of a FIFO pending list; a fixed pool of `max_concurrent` workers
//! claims from the head, so the concurrency ceiling holds structurally.
//! Workers are woken through a [`Notify`] whenever pending work appears or
//! a slot frees up.
//!
//! Locking: the queue state lock is always taken before a job's own lock,
//! and every status transition happens with both held. Executors only take
//! job locks.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use hubqueue_core::error::CoreError;
use hubqueue_core::job::{InputFile, Job, JobStatus};
use hubqueue_core::kind::{JobKind, KindRegistry};
use hubqueue_core::types::JobId;
use hubqueue_remote::service::RemoteApi;
use tokio::sync::{broadcast, Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::events::{JobEvent, JobEventBus};
use crate::executor::{JobExecutor, RunOutcome, SharedJob};
use crate::snapshot::{JobSnapshot, QueueSnapshot, QueueStats};

/// How long shutdown waits for each worker to exit.
const WORKER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Error message stored on cancelled jobs.
pub const CANCELLED_MESSAGE: &str = "cancelled";

// ---------------------------------------------------------------------------
// JobRequest
// ---------------------------------------------------------------------------

/// A job submission: a kind, one file per input slot, optionally a style.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub kind: JobKind,
    pub inputs: Vec<(String, InputFile)>,
    pub style: Option<String>,
}

impl JobRequest {
    pub fn new(kind: JobKind) -> Self {
        Self {
            kind,
            inputs: Vec::new(),
            style: None,
        }
    }

    pub fn with_input(
        mut self,
        slot: impl Into<String>,
        filename: impl Into<String>,
        data: impl Into<Arc<[u8]>>,
    ) -> Self {
        self.inputs.push((slot.into(), InputFile::new(filename, data)));
        self
    }

    pub fn with_style(mut self, style: impl Into<String>) -> Self {
        self.style = Some(style.into());
        self
    }
}

// ---------------------------------------------------------------------------
// JobQueue
// ---------------------------------------------------------------------------

#[derive(Default)]
struct QueueState {
    last_id: JobId,
    /// Every known job, in submission order.
    jobs: BTreeMap<JobId, SharedJob>,
    pending: VecDeque<JobId>,
    /// Jobs currently owned by a worker, with their cancellation tokens.
    running: HashMap<JobId, CancellationToken>,
}

struct Claim {
    id: JobId,
    job: SharedJob,
    cancel: CancellationToken,
}

/// The job engine.
///
/// Created once via [`JobQueue::start`]. The returned `Arc` can be cloned
/// into any number of submitters and readers.
pub struct JobQueue {
    state: Mutex<QueueState>,
    registry: Arc<KindRegistry>,
    executor: Arc<JobExecutor>,
    events: JobEventBus,
    wake: Notify,
    max_concurrent: usize,
    workers: Mutex<Vec<JoinHandle<()>>>,
    /// Master cancellation token, cancelled during shutdown.
    cancel: CancellationToken,
}

impl JobQueue {
    /// Build the queue and spawn its worker pool on the current runtime.
    pub async fn start(
        config: EngineConfig,
        registry: KindRegistry,
        api: Arc<dyn RemoteApi>,
    ) -> Arc<Self> {
        let registry = Arc::new(registry);
        let events = JobEventBus::default();
        let executor = Arc::new(JobExecutor::new(
            &config,
            Arc::clone(&registry),
            api,
            events.clone(),
        ));
        let max_concurrent = config.max_concurrent.max(1);

        let queue = Arc::new(Self {
            state: Mutex::new(QueueState::default()),
            registry,
            executor,
            events,
            wake: Notify::new(),
            max_concurrent,
            workers: Mutex::new(Vec::with_capacity(max_concurrent)),
            cancel: CancellationToken::new(),
        });

        let handles: Vec<_> = (0..max_concurrent)
            .map(|worker| tokio::spawn(Arc::clone(&queue).worker_loop(worker)))
            .collect();
        queue.workers.lock().await.extend(handles);

        tracing::info!(max_concurrent, "Job queue started");
        queue
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    /// Validate and enqueue a job. Returns its id.
    pub async fn submit(&self, request: JobRequest) -> Result<JobId, CoreError> {
        if self.cancel.is_cancelled() {
            return Err(CoreError::Internal("job queue is shut down".into()));
        }

        let JobRequest {
            kind,
            inputs,
            style,
        } = request;

        for (i, (slot, _)) in inputs.iter().enumerate() {
            if inputs[..i].iter().any(|(other, _)| other == slot) {
                return Err(CoreError::Validation(format!(
                    "Input slot '{slot}' given more than once"
                )));
            }
        }
        self.registry.validate_submission(
            kind,
            inputs.iter().map(|(slot, _)| slot.as_str()),
            style.as_deref(),
        )?;

        let id = {
            let mut state = self.state.lock().await;
            state.last_id += 1;
            let id = state.last_id;
            let job = Job::new(id, kind, inputs, style);
            state.jobs.insert(id, Arc::new(RwLock::new(job)));
            state.pending.push_back(id);
            id
        };

        tracing::info!(job_id = id, kind = %kind, "Job submitted");
        self.events.publish(JobEvent::Queued { job_id: id, kind });
        self.try_dispatch().await;
        Ok(id)
    }

    /// Wake as many idle workers as there is pending work for them.
    ///
    /// Returns the number of wake-ups issued.
    pub async fn try_dispatch(&self) -> usize {
        let wakeups = {
            let state = self.state.lock().await;
            let available = self.max_concurrent.saturating_sub(state.running.len());
            available.min(state.pending.len())
        };
        for _ in 0..wakeups {
            self.wake.notify_one();
        }
        wakeups
    }

    pub async fn snapshot(&self) -> QueueSnapshot {
        let state = self.state.lock().await;
        let now = Utc::now();
        let mut stats = QueueStats::default();
        let mut jobs = Vec::with_capacity(state.jobs.len());
        for job in state.jobs.values() {
            let job = job.read().await;
            stats.record(job.status);
            jobs.push(JobSnapshot::of(&job, now));
        }
        QueueSnapshot { jobs, stats }
    }

    pub async fn stats(&self) -> QueueStats {
        let state = self.state.lock().await;
        let mut stats = QueueStats::default();
        for job in state.jobs.values() {
            stats.record(job.read().await.status);
        }
        stats
    }

    pub async fn job(&self, id: JobId) -> Result<JobSnapshot, CoreError> {
        let job = {
            let state = self.state.lock().await;
            state.jobs.get(&id).cloned()
        }
        .ok_or(CoreError::NotFound { entity: "job", id })?;

        let job = job.read().await;
        Ok(JobSnapshot::of(&job, Utc::now()))
    }

    /// Put a failed job back at the tail of the queue with fresh counters.
    ///
    /// Returns `false` without changing anything if the job is not failed.
    pub async fn restart_failed(&self, id: JobId) -> Result<bool, CoreError> {
        let kind = {
            let mut state = self.state.lock().await;
            let job = state
                .jobs
                .get(&id)
                .cloned()
                .ok_or(CoreError::NotFound { entity: "job", id })?;
            let mut job = job.write().await;
            if !job.restart() {
                return Ok(false);
            }
            state.pending.push_back(id);
            job.kind
        };

        tracing::info!(job_id = id, "Failed job restarted");
        self.events.publish(JobEvent::Queued { job_id: id, kind });
        self.try_dispatch().await;
        Ok(true)
    }

    /// Restart every failed job, oldest first. Returns how many restarted.
    pub async fn restart_all_failed(&self) -> usize {
        let restarted: Vec<(JobId, JobKind)> = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            let mut restarted = Vec::new();
            for (id, job) in &state.jobs {
                let mut job = job.write().await;
                if job.restart() {
                    state.pending.push_back(*id);
                    restarted.push((*id, job.kind));
                }
            }
            restarted
        };

        if !restarted.is_empty() {
            tracing::info!(count = restarted.len(), "Failed jobs restarted");
        }
        for (job_id, kind) in &restarted {
            self.events.publish(JobEvent::Queued {
                job_id: *job_id,
                kind: *kind,
            });
        }
        self.try_dispatch().await;
        restarted.len()
    }

    /// Cancel a job.
    ///
    /// A queued job fails immediately. A running job is signalled and
    /// fails once its executor notices, at the next stage boundary or
    /// inside a wait. Returns `false` for jobs that already finished.
    pub async fn cancel(&self, id: JobId) -> Result<bool, CoreError> {
        let mut state = self.state.lock().await;
        let job = state
            .jobs
            .get(&id)
            .cloned()
            .ok_or(CoreError::NotFound { entity: "job", id })?;

        if let Some(token) = state.running.get(&id) {
            token.cancel();
            tracing::info!(job_id = id, "Cancellation requested for running job");
            return Ok(true);
        }

        let mut job = job.write().await;
        if job.status != JobStatus::Queued {
            return Ok(false);
        }
        state.pending.retain(|pending| *pending != id);
        job.fail(CANCELLED_MESSAGE)?;
        drop(job);
        drop(state);

        tracing::info!(job_id = id, "Queued job cancelled");
        self.events.publish(JobEvent::Failed {
            job_id: id,
            error: CANCELLED_MESSAGE.to_string(),
        });
        Ok(true)
    }

    /// Drop every job and pending entry.
    ///
    /// In-flight executors are signalled to stop. Whatever they still
    /// produce is discarded. Returns the number of jobs removed.
    pub async fn clear_all(&self) -> usize {
        let removed = {
            let mut state = self.state.lock().await;
            let removed = state.jobs.len();
            state.jobs.clear();
            state.pending.clear();
            for token in state.running.values() {
                token.cancel();
            }
            removed
        };

        tracing::info!(removed, "All jobs cleared");
        self.events.publish(JobEvent::Cleared { removed });
        removed
    }

    /// Stop the workers.
    ///
    /// Cancels the master token, which also cancels every running job,
    /// then waits up to 5 seconds per worker for a clean exit.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down job queue");
        self.cancel.cancel();

        let handles: Vec<_> = self.workers.lock().await.drain(..).collect();
        for (worker, handle) in handles.into_iter().enumerate() {
            if tokio::time::timeout(WORKER_SHUTDOWN_TIMEOUT, handle)
                .await
                .is_err()
            {
                tracing::warn!(worker, "Worker did not stop in time");
            }
        }

        tracing::info!("Job queue shut down complete");
    }

    // ---- private helpers ----

    async fn worker_loop(self: Arc<Self>, worker: usize) {
        tracing::debug!(worker, "Worker started");

        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            // Registered before the pending check. Dropping it ahead of the
            // run passes any wake-up it caught on to another waiter.
            let claim = {
                let notified = self.wake.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                match self.claim_next().await {
                    Some(claim) => claim,
                    None => {
                        tokio::select! {
                            _ = self.cancel.cancelled() => break,
                            _ = &mut notified => {}
                        }
                        continue;
                    }
                }
            };
            self.run_claimed(worker, claim).await;
        }

        tracing::debug!(worker, "Worker exited");
    }

    /// Pop the oldest pending job and mark it processing.
    async fn claim_next(&self) -> Option<Claim> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        while let Some(id) = state.pending.pop_front() {
            let Some(job) = state.jobs.get(&id).cloned() else {
                continue;
            };
            let kind = {
                let mut job = job.write().await;
                if let Err(e) = job.start() {
                    tracing::warn!(job_id = id, error = %e, "Skipping unclaimable pending job");
                    continue;
                }
                job.kind
            };

            let cancel = self.cancel.child_token();
            state.running.insert(id, cancel.clone());
            self.events.publish(JobEvent::Started { job_id: id, kind });
            return Some(Claim { id, job, cancel });
        }

        None
    }

    /// Run the executor in its own task so a panic cannot take the worker
    /// (and its slot) down with it.
    async fn run_claimed(&self, worker: usize, claim: Claim) {
        let Claim { id, job, cancel } = claim;
        tracing::info!(job_id = id, worker, "Job dispatched");

        let executor = Arc::clone(&self.executor);
        let task_job = Arc::clone(&job);
        let handle = tokio::spawn(async move { executor.run(task_job, cancel).await });

        let outcome = match handle.await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(job_id = id, worker, error = %e, "Job executor panicked");
                RunOutcome::Failed(format!("executor panicked: {e}"))
            }
        };

        self.finish(id, &job, outcome).await;
        self.try_dispatch().await;
    }

    /// Apply an attempt's outcome and release the job's slot.
    async fn finish(&self, id: JobId, job: &SharedJob, outcome: RunOutcome) {
        let event = {
            let mut state = self.state.lock().await;
            state.running.remove(&id);

            let tracked = state
                .jobs
                .get(&id)
                .is_some_and(|current| Arc::ptr_eq(current, job));
            if !tracked {
                tracing::debug!(job_id = id, "Job was cleared while running, outcome dropped");
                return;
            }

            let mut job = job.write().await;
            let applied = match outcome {
                RunOutcome::Succeeded(results) => {
                    let count = results.len();
                    job.succeed(results).map(|()| JobEvent::Succeeded {
                        job_id: id,
                        results: count,
                    })
                }
                RunOutcome::Requeue => job.requeue().map(|()| {
                    state.pending.push_back(id);
                    JobEvent::Queued {
                        job_id: id,
                        kind: job.kind,
                    }
                }),
                RunOutcome::Failed(message) => job.fail(&message).map(|()| JobEvent::Failed {
                    job_id: id,
                    error: job.error_message.clone().unwrap_or_default(),
                }),
            };

            match applied {
                Ok(event) => {
                    tracing::info!(
                        job_id = id,
                        status = %job.status,
                        retry_count = job.retry_count,
                        "Job attempt finished",
                    );
                    event
                }
                Err(e) => {
                    tracing::error!(job_id = id, error = %e, "Could not apply job outcome");
                    return;
                }
            }
        };

        self.events.publish(event);
    }
}
