//! Job lifecycle events.
//!
//! [`JobEventBus`] fans every [`JobEvent`] out to any number of
//! subscribers over a `tokio::sync::broadcast` channel. Snapshots stay the
//! source of truth; events are for consumers that want to be pushed to.

use hubqueue_core::classify::ErrorClass;
use hubqueue_core::kind::JobKind;
use hubqueue_core::types::JobId;
use serde::Serialize;
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// JobEvent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    /// Accepted, restarted or re-queued after a retryable failure.
    Queued { job_id: JobId, kind: JobKind },

    /// A worker claimed the job.
    Started { job_id: JobId, kind: JobKind },

    /// Progress rose during the current attempt.
    Progress { job_id: JobId, progress: u8 },

    /// The attempt failed transiently; the job waits `delay_ms` and goes
    /// back to the tail of the queue.
    RetryScheduled {
        job_id: JobId,
        retry_count: u32,
        class: ErrorClass,
        delay_ms: u64,
        error: String,
    },

    Succeeded { job_id: JobId, results: usize },

    Failed { job_id: JobId, error: String },

    /// Every job was dropped.
    Cleared { removed: usize },
}

impl JobEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            JobEvent::Queued { .. } => "queued",
            JobEvent::Started { .. } => "started",
            JobEvent::Progress { .. } => "progress",
            JobEvent::RetryScheduled { .. } => "retry_scheduled",
            JobEvent::Succeeded { .. } => "succeeded",
            JobEvent::Failed { .. } => "failed",
            JobEvent::Cleared { .. } => "cleared",
        }
    }

    pub fn job_id(&self) -> Option<JobId> {
        match self {
            JobEvent::Queued { job_id, .. }
            | JobEvent::Started { job_id, .. }
            | JobEvent::Progress { job_id, .. }
            | JobEvent::RetryScheduled { job_id, .. }
            | JobEvent::Succeeded { job_id, .. }
            | JobEvent::Failed { job_id, .. } => Some(*job_id),
            JobEvent::Cleared { .. } => None,
        }
    }
}

// ---------------------------------------------------------------------------
// JobEventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

#[derive(Clone)]
pub struct JobEventBus {
    sender: broadcast::Sender<JobEvent>,
}

impl JobEventBus {
    /// When the buffer is full the oldest events are dropped and slow
    /// receivers observe `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, event: JobEvent) {
        // Ignore the SendError, it only means there are zero receivers.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }
}

impl Default for JobEventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
