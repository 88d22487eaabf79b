//! Device lab API client.
//!
//! The orchestrator talks to the lab exclusively through the [`LabApi`]
//! trait, so the run state machine can be driven by a scripted lab in
//! tests and by [`HttpLabClient`] in production.
//!
//! ```text
//!   upload_artifacts()  POST {upload_path}        multipart  -> {code, content:{id}}
//!   trigger_run()       POST {run_path}           JSON       -> {code, content:{testTaskId}}
//!   task_status()       GET  {status_path}{id}               -> {code, content: TestTask}
//!   fetch_artifact()    GET  <per-device blob URL>           -> bytes
//! ```
//!
//! # Error Handling
//!
//! All operations return [`LabResult<T>`]. Only [`LabError::Transport`]
//! means the request may not have reached the lab; every other variant is
//! a definite answer from the server.

pub mod endpoint;
pub mod http;

use std::path::PathBuf;

use async_trait::async_trait;

use crate::git::CommitInfo;
use crate::model::{RunRequest, TestTask};

pub use endpoint::Endpoint;
pub use http::HttpLabClient;

/// Application code for a successful call.
pub const CODE_OK: i64 = 200;

/// Application code the trigger endpoint uses for "all devices busy".
pub const CODE_BUSY: i64 = 500;

/// Result type for lab API operations.
pub type LabResult<T> = Result<T, LabError>;

/// Errors returned by the lab API.
#[derive(Debug, thiserror::Error)]
pub enum LabError {
    /// The request could not be sent or its body could not be read.
    #[error("{operation}: request failed: {source}")]
    Transport {
        operation: &'static str,
        #[source]
        source: reqwest::Error,
    },

    /// The lab answered with a non-2xx HTTP status.
    #[error("{operation}: HTTP {status}: {body}")]
    HttpStatus {
        operation: &'static str,
        status: u16,
        body: String,
    },

    /// The lab answered 2xx with no body.
    #[error("{operation}: empty response body")]
    EmptyBody { operation: &'static str },

    /// The body was not the JSON shape this client expects.
    #[error("{operation}: malformed response: {message}")]
    Malformed {
        operation: &'static str,
        message: String,
    },

    /// The envelope carried an application code other than 200.
    #[error("{operation}: server returned code {code}: {body}")]
    ServerCode {
        operation: &'static str,
        code: i64,
        body: String,
    },

    /// A local file could not be read for upload.
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl LabError {
    /// Returns `true` if the failure happened before the lab produced an answer.
    pub fn is_transport(&self) -> bool {
        matches!(self, LabError::Transport { .. })
    }
}

/// Build artifacts and commit metadata to upload as one artifact set.
#[derive(Debug, Clone)]
pub struct ArtifactUpload {
    pub app: PathBuf,
    pub test_app: PathBuf,
    pub build_flavor: String,
    pub commit: CommitInfo,
}

/// Answer of the trigger endpoint.
///
/// The application code is kept raw: code 500 ("busy") is an expected answer
/// that the caller retries, so it is not turned into an error here.
#[derive(Debug, Clone)]
pub struct TriggerResponse {
    pub code: i64,
    pub task_id: Option<String>,
    /// Full response envelope, kept for error reporting.
    pub body: serde_json::Value,
}

/// Operations the orchestrator needs from a device lab.
#[async_trait]
pub trait LabApi: Send + Sync {
    /// Uploads the application and test packages; returns the artifact-set id.
    async fn upload_artifacts(&self, upload: &ArtifactUpload) -> LabResult<String>;

    /// Asks the lab to run a suite against an uploaded artifact set.
    async fn trigger_run(&self, request: &RunRequest) -> LabResult<TriggerResponse>;

    /// Fetches a fresh snapshot of a task.
    async fn task_status(&self, task_id: &str) -> LabResult<TestTask>;

    /// Downloads a per-device report artifact.
    ///
    /// Returns `Ok(None)` when the artifact is absent: a non-2xx answer or an
    /// empty body.
    async fn fetch_artifact(&self, url: &str) -> LabResult<Option<Vec<u8>>>;
}
