//! REST client for the hosted image-processing service.
//!
//! Every endpoint answers with the same envelope, `{code, msg, data}`,
//! where `code == 0` means success:
//!
//! | Endpoint                        | Sends                                   | `data`                |
//! |---------------------------------|-----------------------------------------|-----------------------|
//! | `POST /task/openapi/upload`     | multipart `apiKey`, `fileType`, `file`  | `{fileName}`          |
//! | `POST /task/openapi/ai-app/run` | `apiKey`, `webappId`, `nodeInfoList`    | `{taskId}`            |
//! | `POST /task/openapi/status`     | `apiKey`, `taskId`                      | status string         |
//! | `POST /task/openapi/outputs`    | `apiKey`, `taskId`                      | `[{fileUrl}]`         |

use std::sync::Arc;

use async_trait::async_trait;
use hubqueue_core::kind::NodeBinding;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::RemoteError;
use crate::service::{Operation, RemoteApi};

/// HTTP client for one deployment of the remote service.
pub struct HttpRemoteApi {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: i64,
    #[serde(default)]
    msg: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadData {
    file_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunData {
    task_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OutputItem {
    file_url: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RunRequest<'a> {
    api_key: &'a str,
    webapp_id: &'a str,
    node_info_list: Vec<NodeInfo<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    instance_type: Option<&'a str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NodeInfo<'a> {
    node_id: &'a str,
    field_name: &'a str,
    field_value: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TaskRequest<'a> {
    api_key: &'a str,
    task_id: &'a str,
}

impl HttpRemoteApi {
    /// * `base_url` - Scheme and host, e.g. `https://www.runninghub.cn`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    /// Reuse an existing [`reqwest::Client`] and its connection pool.
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    // ---- private helpers ----

    fn request_error(operation: Operation, e: reqwest::Error) -> RemoteError {
        // The classifier only sees text, so keep the timeout wording.
        let message = if e.is_timeout() {
            format!("timed out: {e}")
        } else {
            e.to_string()
        };
        RemoteError::Request { operation, message }
    }

    async fn ensure_success(
        operation: Operation,
        response: reqwest::Response,
    ) -> Result<reqwest::Response, RemoteError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(RemoteError::Http {
                operation,
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Check the HTTP status, decode the envelope and unwrap `data`.
    async fn parse_envelope<T: DeserializeOwned>(
        operation: Operation,
        response: reqwest::Response,
    ) -> Result<T, RemoteError> {
        let response = Self::ensure_success(operation, response).await?;
        let text = response
            .text()
            .await
            .map_err(|e| Self::request_error(operation, e))?;
        decode_envelope(operation, &text)
    }

    async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        operation: Operation,
        path: &str,
        body: &B,
    ) -> Result<T, RemoteError> {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| Self::request_error(operation, e))?;

        Self::parse_envelope(operation, response).await
    }
}

/// Decode an envelope body, mapping non-zero codes to [`RemoteError::Api`].
fn decode_envelope<T: DeserializeOwned>(
    operation: Operation,
    text: &str,
) -> Result<T, RemoteError> {
    let envelope: Envelope<T> =
        serde_json::from_str(text).map_err(|e| RemoteError::Malformed {
            operation,
            detail: e.to_string(),
        })?;

    if envelope.code != 0 {
        return Err(RemoteError::Api {
            operation,
            code: envelope.code,
            message: envelope.msg.unwrap_or_default(),
        });
    }

    envelope.data.ok_or_else(|| RemoteError::Malformed {
        operation,
        detail: "missing data".to_string(),
    })
}

#[async_trait]
impl RemoteApi for HttpRemoteApi {
    async fn upload_asset(
        &self,
        credential: &str,
        filename: &str,
        data: Arc<[u8]>,
    ) -> Result<String, RemoteError> {
        let operation = Operation::Upload;
        let part = reqwest::multipart::Part::bytes(data.to_vec()).file_name(filename.to_string());
        let form = reqwest::multipart::Form::new()
            .text("apiKey", credential.to_string())
            .text("fileType", "image")
            .part("file", part);

        let response = self
            .client
            .post(self.url("/task/openapi/upload"))
            .multipart(form)
            .send()
            .await
            .map_err(|e| Self::request_error(operation, e))?;

        let data: UploadData = Self::parse_envelope(operation, response).await?;
        Ok(data.file_name)
    }

    async fn submit_job(
        &self,
        credential: &str,
        app_id: &str,
        parameters: &[NodeBinding],
        instance_type: Option<&str>,
    ) -> Result<String, RemoteError> {
        let body = RunRequest {
            api_key: credential,
            webapp_id: app_id,
            node_info_list: parameters
                .iter()
                .map(|p| NodeInfo {
                    node_id: &p.node_id,
                    field_name: &p.field_name,
                    field_value: &p.field_value,
                })
                .collect(),
            instance_type,
        };

        let data: RunData = self
            .post_json(Operation::Submit, "/task/openapi/ai-app/run", &body)
            .await?;
        Ok(data.task_id)
    }

    async fn job_status(
        &self,
        credential: &str,
        remote_job_id: &str,
    ) -> Result<String, RemoteError> {
        let body = TaskRequest {
            api_key: credential,
            task_id: remote_job_id,
        };
        self.post_json(Operation::Status, "/task/openapi/status", &body)
            .await
    }

    async fn job_outputs(
        &self,
        credential: &str,
        remote_job_id: &str,
    ) -> Result<Vec<String>, RemoteError> {
        let body = TaskRequest {
            api_key: credential,
            task_id: remote_job_id,
        };
        let items: Vec<OutputItem> = self
            .post_json(Operation::Outputs, "/task/openapi/outputs", &body)
            .await?;
        Ok(items.into_iter().map(|item| item.file_url).collect())
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, RemoteError> {
        let operation = Operation::Download;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Self::request_error(operation, e))?;
        let response = Self::ensure_success(operation, response).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| Self::request_error(operation, e))?;
        Ok(bytes.to_vec())
    }
}
