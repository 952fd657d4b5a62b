use std::time::Duration;

use crate::service::Operation;

/// Errors from the remote service layer.
///
/// The rendered message is what failure classification sees, so every
/// timeout renders with the words "timed out".
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// The call did not finish within its budget.
    #[error("{operation} timed out after {}s", after.as_secs())]
    Timeout {
        operation: Operation,
        after: Duration,
    },

    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("{operation} request failed: {message}")]
    Request {
        operation: Operation,
        message: String,
    },

    /// The service returned a non-2xx status code.
    #[error("Remote API error ({status}) during {operation}: {body}")]
    Http {
        operation: Operation,
        status: u16,
        body: String,
    },

    /// The service answered but refused the request.
    #[error("{operation} rejected by remote service (code {code}): {message}")]
    Api {
        operation: Operation,
        code: i64,
        message: String,
    },

    /// The response could not be understood.
    #[error("Malformed {operation} response: {detail}")]
    Malformed {
        operation: Operation,
        detail: String,
    },

    /// A finished remote job reported no output files.
    #[error("Remote job {remote_job_id} produced no outputs")]
    EmptyOutputs { remote_job_id: String },
}

impl RemoteError {
    pub fn operation(&self) -> Option<Operation> {
        match self {
            RemoteError::Timeout { operation, .. }
            | RemoteError::Request { operation, .. }
            | RemoteError::Http { operation, .. }
            | RemoteError::Api { operation, .. }
            | RemoteError::Malformed { operation, .. } => Some(*operation),
            RemoteError::EmptyOutputs { .. } => Some(Operation::Outputs),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, RemoteError::Timeout { .. })
    }
}
