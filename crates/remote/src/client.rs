//! Timing policy over a [`RemoteApi`].
//!
//! [`RemoteJobClient`] gives every call its own deadline, retries uploads
//! and submissions when they time out, and folds status-check failures
//! into non-fatal [`RemoteStatus`] values so a poll loop never has to deal
//! with errors from a flaky status endpoint.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use hubqueue_core::classify::ErrorClassifier;
use hubqueue_core::kind::{NodeBinding, OutputCardinality};
use serde::{Deserialize, Serialize};

use crate::error::RemoteError;
use crate::retry::{retry_on_timeout, CallRetry};
use crate::service::{Operation, RemoteApi};

/// Per-call deadlines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteTimeouts {
    pub upload: Duration,
    pub submit: Duration,
    pub status: Duration,
    pub outputs: Duration,
    pub download: Duration,
}

impl Default for RemoteTimeouts {
    fn default() -> Self {
        Self {
            upload: Duration::from_secs(120),
            submit: Duration::from_secs(60),
            status: Duration::from_secs(25),
            outputs: Duration::from_secs(90),
            download: Duration::from_secs(120),
        }
    }
}

/// Normalised status of a remote job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteStatus {
    Queued,
    Running,
    Success,
    Failed,
    /// The status check itself timed out.
    Inconclusive,
    /// The status check failed some other way, or returned something
    /// unrecognised.
    Unknown,
}

impl RemoteStatus {
    /// Map the service's raw status text.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "SUCCESS" => RemoteStatus::Success,
            "FAILED" => RemoteStatus::Failed,
            "RUNNING" => RemoteStatus::Running,
            "QUEUED" => RemoteStatus::Queued,
            _ => RemoteStatus::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RemoteStatus::Queued => "QUEUED",
            RemoteStatus::Running => "RUNNING",
            RemoteStatus::Success => "SUCCESS",
            RemoteStatus::Failed => "FAILED",
            RemoteStatus::Inconclusive => "CHECKING",
            RemoteStatus::Unknown => "UNKNOWN",
        }
    }

    /// Whether the status carries no information about the remote job.
    pub fn is_inconclusive(&self) -> bool {
        matches!(self, RemoteStatus::Inconclusive | RemoteStatus::Unknown)
    }
}

impl fmt::Display for RemoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Remote client used by the job executor.
#[derive(Clone)]
pub struct RemoteJobClient {
    api: Arc<dyn RemoteApi>,
    timeouts: RemoteTimeouts,
    retry: CallRetry,
    classifier: ErrorClassifier,
}

impl RemoteJobClient {
    pub fn new(
        api: Arc<dyn RemoteApi>,
        timeouts: RemoteTimeouts,
        retry: CallRetry,
        classifier: ErrorClassifier,
    ) -> Self {
        Self {
            api,
            timeouts,
            retry,
            classifier,
        }
    }

    pub fn classifier(&self) -> &ErrorClassifier {
        &self.classifier
    }

    /// Upload one input. Retried on timeout with a linear backoff.
    pub async fn upload(
        &self,
        credential: &str,
        filename: &str,
        data: Arc<[u8]>,
    ) -> Result<String, RemoteError> {
        let operation = Operation::Upload;
        retry_on_timeout(
            operation,
            self.retry.attempts,
            self.retry.upload_backoff,
            &self.classifier,
            || {
                with_deadline(
                    operation,
                    self.timeouts.upload,
                    self.api.upload_asset(credential, filename, Arc::clone(&data)),
                )
            },
        )
        .await
    }

    /// Start the remote job. Retried on timeout with a linear backoff.
    pub async fn submit(
        &self,
        credential: &str,
        app_id: &str,
        parameters: &[NodeBinding],
        instance_type: Option<&str>,
    ) -> Result<String, RemoteError> {
        let operation = Operation::Submit;
        retry_on_timeout(
            operation,
            self.retry.attempts,
            self.retry.submit_backoff,
            &self.classifier,
            || {
                with_deadline(
                    operation,
                    self.timeouts.submit,
                    self.api
                        .submit_job(credential, app_id, parameters, instance_type),
                )
            },
        )
        .await
    }

    /// Single status check. Never fails.
    pub async fn poll_status(&self, credential: &str, remote_job_id: &str) -> RemoteStatus {
        let result = with_deadline(
            Operation::Status,
            self.timeouts.status,
            self.api.job_status(credential, remote_job_id),
        )
        .await;

        match result {
            Ok(raw) => RemoteStatus::parse(&raw),
            Err(e) if e.is_timeout() || self.classifier.is_timeout(&e.to_string()) => {
                tracing::debug!(remote_job_id, error = %e, "Status check timed out");
                RemoteStatus::Inconclusive
            }
            Err(e) => {
                tracing::debug!(remote_job_id, error = %e, "Status check failed");
                RemoteStatus::Unknown
            }
        }
    }

    /// Output URLs of a finished remote job.
    ///
    /// An empty list is an error. With [`OutputCardinality::One`] only the
    /// first URL is kept.
    pub async fn fetch_outputs(
        &self,
        credential: &str,
        remote_job_id: &str,
        cardinality: OutputCardinality,
    ) -> Result<Vec<String>, RemoteError> {
        let mut urls = with_deadline(
            Operation::Outputs,
            self.timeouts.outputs,
            self.api.job_outputs(credential, remote_job_id),
        )
        .await?;

        if urls.is_empty() {
            return Err(RemoteError::EmptyOutputs {
                remote_job_id: remote_job_id.to_string(),
            });
        }
        if cardinality == OutputCardinality::One {
            urls.truncate(1);
        }
        Ok(urls)
    }

    /// Single download attempt.
    pub async fn download(&self, url: &str) -> Result<Arc<[u8]>, RemoteError> {
        let bytes = with_deadline(
            Operation::Download,
            self.timeouts.download,
            self.api.download(url),
        )
        .await?;
        Ok(Arc::from(bytes))
    }
}

impl fmt::Debug for RemoteJobClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteJobClient")
            .field("timeouts", &self.timeouts)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

/// Run `call` under a deadline, mapping expiry to [`RemoteError::Timeout`].
pub async fn with_deadline<T, F>(
    operation: Operation,
    after: Duration,
    call: F,
) -> Result<T, RemoteError>
where
    F: Future<Output = Result<T, RemoteError>>,
{
    match tokio::time::timeout(after, call).await {
        Ok(result) => result,
        Err(_) => Err(RemoteError::Timeout { operation, after }),
    }
}
