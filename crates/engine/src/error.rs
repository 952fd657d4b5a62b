use hubqueue_core::classify::{ErrorClass, ErrorClassifier};
use hubqueue_remote::error::RemoteError;

/// Failure of one pipeline attempt.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// The remote service reported the job as failed.
    #[error("remote processing failed (remote job {remote_job_id})")]
    RemoteFailed { remote_job_id: String },

    #[error("processing timeout: no result after {polls} status checks")]
    PollLimitExceeded { polls: u32 },

    #[error("cancelled")]
    Cancelled,

    #[error("Parameter binding failed: {0}")]
    Binding(String),
}

impl PipelineError {
    /// Only remote errors can be transient; their text decides.
    pub fn classify(&self, classifier: &ErrorClassifier) -> ErrorClass {
        match self {
            PipelineError::Remote(e) => classifier.classify(&e.to_string()),
            _ => ErrorClass::Permanent,
        }
    }
}

/// Errors from loading engine configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} must be {expected}, got {value:?}")]
    InvalidValue {
        name: &'static str,
        expected: &'static str,
        value: String,
    },

    #[error("Failed to read kind table {path}: {source}")]
    KindsIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid kind table {path}: {source}")]
    KindsInvalid {
        path: String,
        #[source]
        source: hubqueue_core::error::CoreError,
    },
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use hubqueue_remote::service::Operation;

    use super::*;

    #[test]
    fn remote_timeouts_are_transient() {
        let err = PipelineError::from(RemoteError::Timeout {
            operation: Operation::Download,
            after: Duration::from_secs(120),
        });
        assert_eq!(err.classify(&ErrorClassifier::default()), ErrorClass::Timeout);
    }

    #[test]
    fn poll_limit_is_permanent_despite_wording() {
        let err = PipelineError::PollLimitExceeded { polls: 240 };
        assert!(err.to_string().contains("timeout"));
        assert_eq!(err.classify(&ErrorClassifier::default()), ErrorClass::Permanent);
    }

    #[test]
    fn remote_failure_is_permanent() {
        let err = PipelineError::RemoteFailed {
            remote_job_id: "t1".into(),
        };
        assert!(err.to_string().contains("remote processing failed"));
        assert_eq!(err.classify(&ErrorClassifier::default()), ErrorClass::Permanent);
    }
}
