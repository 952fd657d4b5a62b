//! The raw remote capability.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use hubqueue_core::kind::NodeBinding;

use crate::error::RemoteError;

/// The remote calls, for logging and error context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Upload,
    Submit,
    Status,
    Outputs,
    Download,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Upload => "upload",
            Operation::Submit => "submit",
            Operation::Status => "status check",
            Operation::Outputs => "output fetch",
            Operation::Download => "download",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One round trip per method, no retries, no deadlines.
///
/// Implementations report failures as [`RemoteError`]s whose text is
/// meaningful to a human; [`RemoteJobClient`](crate::client::RemoteJobClient)
/// adds the timing policy on top.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Store a file on the remote side. Returns the remote filename.
    async fn upload_asset(
        &self,
        credential: &str,
        filename: &str,
        data: Arc<[u8]>,
    ) -> Result<String, RemoteError>;

    /// Start an application run. Returns the remote job id.
    async fn submit_job(
        &self,
        credential: &str,
        app_id: &str,
        parameters: &[NodeBinding],
        instance_type: Option<&str>,
    ) -> Result<String, RemoteError>;

    /// Raw status text of a remote job, e.g. `"RUNNING"`.
    async fn job_status(&self, credential: &str, remote_job_id: &str)
        -> Result<String, RemoteError>;

    /// URLs of the files a finished remote job produced, in output order.
    async fn job_outputs(
        &self,
        credential: &str,
        remote_job_id: &str,
    ) -> Result<Vec<String>, RemoteError>;

    /// Fetch a file by URL.
    async fn download(&self, url: &str) -> Result<Vec<u8>, RemoteError>;
}
