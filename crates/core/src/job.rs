//! The job entity and its state machine.
//!
//! ```text
//! Queued -> Processing -> Succeeded
//!                      -> Queued      (transient failure, retry budget left)
//!                      -> Failed      (permanent failure or budget exhausted)
//! Failed -> Queued                    (manual restart only)
//! ```
//!
//! Transitions are methods on [`Job`]; the engine owns when they happen.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::kind::JobKind;
use crate::progress::PROGRESS_CAP_BEFORE_COMPLETION;
use crate::types::{JobId, Timestamp};

/// Longest error message kept on a failed job, in characters.
pub const MAX_ERROR_MESSAGE_LEN: usize = 150;

// ---------------------------------------------------------------------------
// JobStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// A named binary input. Payloads are shared, never copied per attempt.
#[derive(Clone)]
pub struct InputFile {
    pub filename: String,
    pub data: Arc<[u8]>,
}

impl InputFile {
    pub fn new(filename: impl Into<String>, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            filename: filename.into(),
            data: data.into(),
        }
    }
}

impl fmt::Debug for InputFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputFile")
            .field("filename", &self.filename)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// One downloaded output of a succeeded job.
#[derive(Clone, Serialize)]
pub struct JobResult {
    pub filename: String,
    pub source_url: String,
    pub size_bytes: usize,
    #[serde(skip)]
    pub data: Arc<[u8]>,
}

impl JobResult {
    pub fn new(filename: String, source_url: String, data: Arc<[u8]>) -> Self {
        Self {
            filename,
            source_url,
            size_bytes: data.len(),
            data,
        }
    }
}

impl fmt::Debug for JobResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobResult")
            .field("filename", &self.filename)
            .field("source_url", &self.source_url)
            .field("size_bytes", &self.size_bytes)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    /// Slot name -> payload, in submission order.
    pub inputs: Vec<(String, InputFile)>,
    pub style: Option<String>,

    pub status: JobStatus,
    pub progress: u8,
    pub results: Vec<JobResult>,
    pub error_message: Option<String>,
    pub retry_count: u32,
    pub timeout_count: u32,
    pub remote_job_id: Option<String>,

    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub finished_at: Option<Timestamp>,
    pub elapsed_seconds: Option<f64>,
}

impl Job {
    pub fn new(
        id: JobId,
        kind: JobKind,
        inputs: Vec<(String, InputFile)>,
        style: Option<String>,
    ) -> Self {
        Self {
            id,
            kind,
            inputs,
            style,
            status: JobStatus::Queued,
            progress: 0,
            results: Vec::new(),
            error_message: None,
            retry_count: 0,
            timeout_count: 0,
            remote_job_id: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            elapsed_seconds: None,
        }
    }

    /// `Queued -> Processing`. Called by the dispatcher when a worker claims the job.
    pub fn start(&mut self) -> Result<(), CoreError> {
        self.expect_status(JobStatus::Queued, JobStatus::Processing)?;
        self.status = JobStatus::Processing;
        self.progress = 0;
        self.remote_job_id = None;
        self.started_at = Some(Utc::now());
        self.finished_at = None;
        self.elapsed_seconds = None;
        Ok(())
    }

    /// Raise progress during an attempt. Never lowers it, never passes the
    /// pre-completion cap. Returns whether the value changed.
    pub fn advance_progress(&mut self, percent: u8) -> bool {
        if self.status != JobStatus::Processing {
            return false;
        }
        let capped = percent.min(PROGRESS_CAP_BEFORE_COMPLETION);
        if capped > self.progress {
            self.progress = capped;
            true
        } else {
            false
        }
    }

    /// `Processing -> Succeeded`.
    pub fn succeed(&mut self, results: Vec<JobResult>) -> Result<(), CoreError> {
        self.expect_status(JobStatus::Processing, JobStatus::Succeeded)?;
        self.status = JobStatus::Succeeded;
        self.progress = 100;
        self.results = results;
        self.error_message = None;
        self.finish_clock();
        Ok(())
    }

    /// `Processing -> Queued` after a retryable failure. Counters are kept.
    pub fn requeue(&mut self) -> Result<(), CoreError> {
        self.expect_status(JobStatus::Processing, JobStatus::Queued)?;
        self.status = JobStatus::Queued;
        self.progress = 0;
        self.remote_job_id = None;
        Ok(())
    }

    /// Terminal failure. Allowed from `Processing`, and from `Queued` for
    /// jobs cancelled before a worker picked them up.
    pub fn fail(&mut self, message: &str) -> Result<(), CoreError> {
        if self.status.is_terminal() {
            return Err(CoreError::InvalidTransition {
                id: self.id,
                from: self.status,
                to: JobStatus::Failed,
            });
        }
        self.status = JobStatus::Failed;
        self.error_message = Some(truncate_message(message, MAX_ERROR_MESSAGE_LEN));
        self.finish_clock();
        Ok(())
    }

    /// User-triggered `Failed -> Queued`. Resets counters and error state.
    /// Returns `false` (and changes nothing) for any other status.
    pub fn restart(&mut self) -> bool {
        if self.status != JobStatus::Failed {
            return false;
        }
        self.status = JobStatus::Queued;
        self.progress = 0;
        self.retry_count = 0;
        self.timeout_count = 0;
        self.error_message = None;
        self.results.clear();
        self.remote_job_id = None;
        self.started_at = None;
        self.finished_at = None;
        self.elapsed_seconds = None;
        true
    }

    /// Seconds since the current attempt started, or the final duration
    /// once the job has finished.
    pub fn elapsed_at(&self, now: Timestamp) -> Option<f64> {
        if let Some(done) = self.elapsed_seconds {
            return Some(done);
        }
        self.started_at
            .map(|started| (now - started).num_milliseconds().max(0) as f64 / 1000.0)
    }

    fn finish_clock(&mut self) {
        let now = Utc::now();
        self.finished_at = Some(now);
        self.elapsed_seconds = self
            .started_at
            .map(|started| (now - started).num_milliseconds().max(0) as f64 / 1000.0);
    }

    fn expect_status(&self, expected: JobStatus, to: JobStatus) -> Result<(), CoreError> {
        if self.status == expected {
            Ok(())
        } else {
            Err(CoreError::InvalidTransition {
                id: self.id,
                from: self.status,
                to,
            })
        }
    }
}

/// Cut a message to at most `max` characters, marking the cut with `...`.
pub fn truncate_message(message: &str, max: usize) -> String {
    if message.chars().count() <= max {
        return message.to_string();
    }
    let kept: String = message.chars().take(max.saturating_sub(3)).collect();
    format!("{kept}...")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
