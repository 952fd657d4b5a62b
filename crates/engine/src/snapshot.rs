//! Read-only views of queue state.
//!
//! Snapshots are copies taken under the queue lock, so callers can hold
//! them as long as they like while workers keep writing.

use hubqueue_core::job::{Job, JobResult, JobStatus};
use hubqueue_core::kind::JobKind;
use hubqueue_core::types::{JobId, Timestamp};
use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub queued: usize,
    pub processing: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub total: usize,
}

impl QueueStats {
    pub fn record(&mut self, status: JobStatus) {
        match status {
            JobStatus::Queued => self.queued += 1,
            JobStatus::Processing => self.processing += 1,
            JobStatus::Succeeded => self.succeeded += 1,
            JobStatus::Failed => self.failed += 1,
        }
        self.total += 1;
    }

    /// No job is queued or processing.
    pub fn is_settled(&self) -> bool {
        self.queued == 0 && self.processing == 0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub kind: JobKind,
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
    /// Running time so far, or final duration for finished jobs.
    pub elapsed_seconds: Option<f64>,
}

impl JobSnapshot {
    pub fn of(job: &Job, now: Timestamp) -> Self {
        Self {
            id: job.id,
            kind: job.kind,
            style: job.style.clone(),
            status: job.status,
            progress: job.progress,
            results: job.results.clone(),
            error_message: job.error_message.clone(),
            retry_count: job.retry_count,
            timeout_count: job.timeout_count,
            remote_job_id: job.remote_job_id.clone(),
            created_at: job.created_at,
            started_at: job.started_at,
            finished_at: job.finished_at,
            elapsed_seconds: job.elapsed_at(now),
        }
    }
}

/// Every job in submission order, plus counts.
#[derive(Debug, Clone, Serialize)]
pub struct QueueSnapshot {
    pub jobs: Vec<JobSnapshot>,
    pub stats: QueueStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_count_every_status() {
        let mut stats = QueueStats::default();
        for status in [
            JobStatus::Queued,
            JobStatus::Processing,
            JobStatus::Processing,
            JobStatus::Succeeded,
            JobStatus::Failed,
        ] {
            stats.record(status);
        }
        assert_eq!(
            stats,
            QueueStats {
                queued: 1,
                processing: 2,
                succeeded: 1,
                failed: 1,
                total: 5,
            }
        );
        assert!(!stats.is_settled());
    }

    #[test]
    fn snapshot_copies_job_fields() {
        let mut job = Job::new(4, JobKind::Watermark, Vec::new(), None);
        job.start().unwrap();
        job.advance_progress(30);
        let snap = JobSnapshot::of(&job, chrono::Utc::now());
        assert_eq!(snap.id, 4);
        assert_eq!(snap.status, JobStatus::Processing);
        assert_eq!(snap.progress, 30);
        assert!(snap.elapsed_seconds.is_some());
    }
}
