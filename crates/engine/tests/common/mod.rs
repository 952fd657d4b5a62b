#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use hubqueue_core::kind::{JobKind, KindRegistry, NodeBinding};
use hubqueue_engine::config::EngineConfig;
use hubqueue_engine::events::JobEvent;
use hubqueue_engine::queue::{JobQueue, JobRequest};
use hubqueue_engine::snapshot::JobSnapshot;
use hubqueue_remote::error::RemoteError;
use hubqueue_remote::service::{Operation, RemoteApi};
use tokio::sync::broadcast;

/// Kind table used by every integration test.
pub const KINDS_JSON: &str = r#"{
    "pose-transfer": {
        "credential": "pose-key-0001",
        "app_id": "app-pose",
        "output": "many",
        "template": [
            {"node_id": "245", "field_name": "image", "slot": "character"},
            {"node_id": "244", "field_name": "image", "slot": "pose"}
        ]
    },
    "enhance": {
        "credential": "enhance-key-0001",
        "app_id": "app-enhance",
        "template": [
            {"node_id": "38", "field_name": "image", "slot": "image"}
        ],
        "styles": {
            "default": [],
            "anime": [
                {"node_id": "60", "field_name": "text", "field_value": "anime"},
                {"node_id": "4", "field_name": "text", "field_value": "photo"}
            ]
        },
        "default_style": "default"
    },
    "relight": {
        "credential": "relight-key-0001",
        "app_id": "app-relight",
        "instance_type": "plus",
        "template": [
            {"node_id": "437", "field_name": "image", "slot": "image"}
        ]
    },
    "watermark": {
        "credential": "watermark-key-0001",
        "app_id": "app-watermark",
        "template": [
            {"node_id": "205", "field_name": "image", "slot": "image"}
        ]
    }
}"#;

pub fn registry() -> KindRegistry {
    KindRegistry::from_json(KINDS_JSON).unwrap()
}

// ---------------------------------------------------------------------------
// FakeRemote
// ---------------------------------------------------------------------------

/// How the fake remote service behaves.
#[derive(Debug, Clone)]
pub struct Script {
    /// `RUNNING` answers before `SUCCESS`, per remote job.
    pub running_polls: u32,
    /// Failing status checks at the start of each remote job.
    pub status_errors: u32,
    /// Every status check answers `FAILED`.
    pub remote_fails: bool,
    /// Errors returned by the next submits, in order.
    pub submit_errors: Vec<String>,
    /// Every download fails with this message.
    pub download_error: Option<String>,
    /// Output URLs per remote job.
    pub outputs: usize,
    /// Uploading a file with this name panics.
    pub panic_on_upload: Option<String>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            running_polls: 0,
            status_errors: 0,
            remote_fails: false,
            submit_errors: Vec::new(),
            download_error: None,
            outputs: 1,
            panic_on_upload: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Submission {
    pub app_id: String,
    pub parameters: Vec<NodeBinding>,
    pub instance_type: Option<String>,
}

#[derive(Default)]
pub struct FakeRemote {
    script: Script,
    submit_errors: Mutex<Vec<String>>,
    next_remote_id: AtomicU64,
    polls: Mutex<HashMap<String, u32>>,
    pub uploaded: Mutex<Vec<String>>,
    pub submissions: Mutex<Vec<Submission>>,
    pub submit_calls: AtomicUsize,
    pub downloads: AtomicUsize,
    /// Remote jobs submitted and not yet reported finished.
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl FakeRemote {
    pub fn new(script: Script) -> Self {
        let mut submit_errors = script.submit_errors.clone();
        submit_errors.reverse();
        Self {
            script,
            submit_errors: Mutex::new(submit_errors),
            ..Default::default()
        }
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn uploaded(&self) -> Vec<String> {
        self.uploaded.lock().unwrap().clone()
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.submissions.lock().unwrap().clone()
    }

    fn finish_remote(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl RemoteApi for FakeRemote {
    async fn upload_asset(
        &self,
        _credential: &str,
        filename: &str,
        _data: Arc<[u8]>,
    ) -> Result<String, RemoteError> {
        if self.script.panic_on_upload.as_deref() == Some(filename) {
            panic!("simulated crash while uploading {filename}");
        }
        self.uploaded.lock().unwrap().push(filename.to_string());
        Ok(format!("api/{filename}"))
    }

    async fn submit_job(
        &self,
        _credential: &str,
        app_id: &str,
        parameters: &[NodeBinding],
        instance_type: Option<&str>,
    ) -> Result<String, RemoteError> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.submit_errors.lock().unwrap().pop() {
            return Err(RemoteError::Request {
                operation: Operation::Submit,
                message,
            });
        }

        self.submissions.lock().unwrap().push(Submission {
            app_id: app_id.to_string(),
            parameters: parameters.to_vec(),
            instance_type: instance_type.map(str::to_string),
        });

        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);

        let id = self.next_remote_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("remote-{id}"))
    }

    async fn job_status(
        &self,
        _credential: &str,
        remote_job_id: &str,
    ) -> Result<String, RemoteError> {
        let poll = {
            let mut polls = self.polls.lock().unwrap();
            let count = polls.entry(remote_job_id.to_string()).or_insert(0);
            *count += 1;
            *count
        };

        if poll <= self.script.status_errors {
            return Err(RemoteError::Request {
                operation: Operation::Status,
                message: "connection reset by peer".into(),
            });
        }
        if self.script.remote_fails {
            self.finish_remote();
            return Ok("FAILED".into());
        }
        if poll <= self.script.status_errors + self.script.running_polls {
            return Ok("RUNNING".into());
        }
        self.finish_remote();
        Ok("SUCCESS".into())
    }

    async fn job_outputs(
        &self,
        _credential: &str,
        remote_job_id: &str,
    ) -> Result<Vec<String>, RemoteError> {
        Ok((1..=self.script.outputs)
            .map(|i| format!("https://cdn.test/{remote_job_id}/out_{i}.png"))
            .collect())
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, RemoteError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        match &self.script.download_error {
            Some(message) => Err(RemoteError::Request {
                operation: Operation::Download,
                message: message.clone(),
            }),
            None => Ok(url.as_bytes().to_vec()),
        }
    }
}

// ---------------------------------------------------------------------------
// Queue helpers
// ---------------------------------------------------------------------------

pub fn config(max_concurrent: usize) -> EngineConfig {
    EngineConfig {
        max_concurrent,
        ..Default::default()
    }
}

pub async fn start(max_concurrent: usize, script: Script) -> (Arc<JobQueue>, Arc<FakeRemote>) {
    start_with(config(max_concurrent), script).await
}

pub async fn start_with(config: EngineConfig, script: Script) -> (Arc<JobQueue>, Arc<FakeRemote>) {
    let remote = Arc::new(FakeRemote::new(script));
    let queue = JobQueue::start(config, registry(), remote.clone()).await;
    (queue, remote)
}

pub fn watermark(filename: &str) -> JobRequest {
    JobRequest::new(JobKind::Watermark).with_input("image", filename, filename.as_bytes().to_vec())
}

pub fn pose_transfer() -> JobRequest {
    JobRequest::new(JobKind::PoseTransfer)
        .with_input("character", "character.png", vec![1u8; 16])
        .with_input("pose", "pose.png", vec![2u8; 16])
}

/// Wait (in paused time) until no job is queued or processing.
pub async fn wait_until_settled(queue: &JobQueue) {
    for _ in 0..100_000 {
        if queue.stats().await.is_settled() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    panic!("queue never settled: {:?}", queue.stats().await);
}

/// Wait (in paused time) until `predicate` holds for job `id`.
pub async fn wait_for_job<F>(queue: &JobQueue, id: u64, predicate: F) -> JobSnapshot
where
    F: Fn(&JobSnapshot) -> bool,
{
    for _ in 0..100_000 {
        let job = queue.job(id).await.unwrap();
        if predicate(&job) {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("job {id} never reached the expected state");
}

/// Everything received so far, without waiting.
pub fn drain(rx: &mut broadcast::Receiver<JobEvent>) -> Vec<JobEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
