//! Configuration schema definitions for labrun.
//!
//! # Schema Overview
//!
//! ```text
//! Config (root)
//! ├── LabConfig        - Endpoint, auth token, API paths, fixed trigger fields
//! ├── RunConfig        - Artifacts, suite, device selector, timeout, arg maps
//! ├── PollingConfig    - Busy-retry and status-poll tuning
//! └── ReportConfig     - Output directory, summary file, CI annotations
//! ```
//!
//! Every table is optional and every field has a default, so an empty file
//! parses. [`Config::validate`] enforces what a real run needs.
//!
//! # Example
//!
//! ```toml
//! [lab]
//! host = "devicelab.example.com"
//! auth_token = "..."
//! pkg_name = "com.example.app"
//! test_pkg_name = "com.example.app.test"
//!
//! [run]
//! app = "app/build/outputs/apk/debug"
//! test_app = "app/build/outputs/apk/androidTest/debug"
//! build_flavor = "debug"
//! suite = "com.example.SmokeSuite"
//! timeout_secs = 1800
//!
//! [run.instrumentation_args]
//! size = "small"
//!
//! [report]
//! output_dir = "test-results"
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration structure for labrun.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Device lab endpoint and API settings.
    #[serde(default)]
    pub lab: LabConfig,

    /// The test run to submit.
    #[serde(default)]
    pub run: RunConfig,

    /// Retry and polling schedule.
    #[serde(default)]
    pub polling: PollingConfig,

    /// Report output settings.
    #[serde(default)]
    pub report: ReportConfig,
}

impl Config {
    /// Returns every problem that would prevent a run from starting.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.lab.host.trim().is_empty() {
            problems.push("lab.host must be set".to_string());
        }
        if self.lab.scheme != "https" && self.lab.scheme != "http" {
            problems.push(format!(
                "lab.scheme must be \"http\" or \"https\", got \"{}\"",
                self.lab.scheme
            ));
        }
        if self.run.suite.trim().is_empty() {
            problems.push("run.suite must be set".to_string());
        }
        if self.run.timeout_secs == 0 {
            problems.push("run.timeout_secs must be greater than 0".to_string());
        }
        if self.polling.min_poll_interval_secs == 0 {
            problems.push("polling.min_poll_interval_secs must be greater than 0".to_string());
        }

        problems
    }

    /// Fails with all [`problems`](Self::problems) joined, if there are any.
    pub fn validate(&self) -> anyhow::Result<()> {
        let problems = self.problems();
        if problems.is_empty() {
            Ok(())
        } else {
            anyhow::bail!("invalid configuration:\n  - {}", problems.join("\n  - "))
        }
    }
}

/// Device lab endpoint configuration.
///
/// URLs are built as `{scheme}://{host}{context_path}{path}`.
///
/// # Defaults
///
/// | Field | Default |
/// |-------|---------|
/// | `scheme` | `https` |
/// | `upload_path` | `/api/package/add` |
/// | `run_path` | `/api/test/task/run/` |
/// | `status_path` | `/api/test/task/` |
/// | `group_test_type` | `SINGLE` |
/// | `framework_type` | `JUnit4` |
/// | `request_timeout_secs` | 60 |
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LabConfig {
    #[serde(default = "default_scheme")]
    pub scheme: String,

    #[serde(default)]
    pub host: String,

    /// Prefix inserted between host and API path (e.g. `/lab`).
    #[serde(default)]
    pub context_path: String,

    /// Bearer token sent with every API call. Never sent to artifact URLs.
    #[serde(default)]
    pub auth_token: String,

    #[serde(default = "default_upload_path")]
    pub upload_path: String,

    #[serde(default = "default_run_path")]
    pub run_path: String,

    /// Task id is appended to this path.
    #[serde(default = "default_status_path")]
    pub status_path: String,

    /// Portal page for a task; task id is appended.
    #[serde(default = "default_portal_task_path")]
    pub portal_task_path: String,

    /// Portal page for a device recording; device result id is appended.
    #[serde(default = "default_portal_video_path")]
    pub portal_video_path: String,

    #[serde(default)]
    pub pkg_name: String,

    #[serde(default)]
    pub test_pkg_name: String,

    #[serde(default = "default_group_test_type")]
    pub group_test_type: String,

    #[serde(default)]
    pub running_type: String,

    #[serde(default = "default_framework_type")]
    pub framework_type: String,

    /// Connect timeout, and the longest a single read may stall, for every
    /// HTTP call. Independent of the run timeout.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Link back to the CI build, passed through to the lab.
    ///
    /// When unset, it is derived from the Azure Pipelines environment.
    #[serde(default)]
    pub pipeline_link: Option<String>,
}

impl Default for LabConfig {
    fn default() -> Self {
        Self {
            scheme: default_scheme(),
            host: String::new(),
            context_path: String::new(),
            auth_token: String::new(),
            upload_path: default_upload_path(),
            run_path: default_run_path(),
            status_path: default_status_path(),
            portal_task_path: default_portal_task_path(),
            portal_video_path: default_portal_video_path(),
            pkg_name: String::new(),
            test_pkg_name: String::new(),
            group_test_type: default_group_test_type(),
            running_type: String::new(),
            framework_type: default_framework_type(),
            request_timeout_secs: default_request_timeout(),
            pipeline_link: None,
        }
    }
}

impl LabConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_scheme() -> String {
    "https".to_string()
}

fn default_upload_path() -> String {
    "/api/package/add".to_string()
}

fn default_run_path() -> String {
    "/api/test/task/run/".to_string()
}

fn default_status_path() -> String {
    "/api/test/task/".to_string()
}

fn default_portal_task_path() -> String {
    "/portal/index.html?redirectUrl=/info/task/".to_string()
}

fn default_portal_video_path() -> String {
    "/portal/index.html?redirectUrl=/info/videos/".to_string()
}

fn default_group_test_type() -> String {
    "SINGLE".to_string()
}

fn default_framework_type() -> String {
    "JUnit4".to_string()
}

fn default_request_timeout() -> u64 {
    60
}

/// The test run to submit.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunConfig {
    /// Application package, or a directory whose first file is used.
    #[serde(default)]
    pub app: Option<PathBuf>,

    /// Test package, or a directory whose first file is used.
    #[serde(default)]
    pub test_app: Option<PathBuf>,

    #[serde(default)]
    pub build_flavor: String,

    /// Test suite class to run.
    #[serde(default)]
    pub suite: String,

    /// Device, device group, or agent selector understood by the lab.
    #[serde(default)]
    pub device: Option<String>,

    /// Who receives the lab's report.
    #[serde(default)]
    pub audience: Option<String>,

    /// Polling budget in seconds, also sent to the lab as the task timeout.
    ///
    /// Default: 1800 (30 minutes)
    #[serde(default = "default_run_timeout")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub instrumentation_args: BTreeMap<String, String>,

    #[serde(default)]
    pub extra_args: BTreeMap<String, String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            app: None,
            test_app: None,
            build_flavor: String::new(),
            suite: String::new(),
            device: None,
            audience: None,
            timeout_secs: default_run_timeout(),
            instrumentation_args: BTreeMap::new(),
            extra_args: BTreeMap::new(),
        }
    }
}

fn default_run_timeout() -> u64 {
    1800
}

/// Retry and polling schedule.
///
/// The defaults reproduce the lab's documented client behaviour; change them
/// only when pointing at a lab with different queueing characteristics.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PollingConfig {
    /// Retries after the lab answers "all devices busy" (code 500).
    #[serde(default = "default_busy_retries")]
    pub busy_retries: u32,

    #[serde(default = "default_busy_retry_interval")]
    pub busy_retry_interval_secs: u64,

    /// Sleep between polls while the task is queued.
    #[serde(default = "default_waiting_interval")]
    pub waiting_interval_secs: u64,

    /// Floor of the shrinking poll delay while the task runs.
    #[serde(default = "default_min_poll_interval")]
    pub min_poll_interval_secs: u64,

    /// Retries of a status request that failed at the transport level.
    #[serde(default = "default_status_retries")]
    pub status_retries: u32,

    #[serde(default = "default_status_retry_interval")]
    pub status_retry_interval_secs: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            busy_retries: default_busy_retries(),
            busy_retry_interval_secs: default_busy_retry_interval(),
            waiting_interval_secs: default_waiting_interval(),
            min_poll_interval_secs: default_min_poll_interval(),
            status_retries: default_status_retries(),
            status_retry_interval_secs: default_status_retry_interval(),
        }
    }
}

fn default_busy_retries() -> u32 {
    20
}

fn default_busy_retry_interval() -> u64 {
    30
}

fn default_waiting_interval() -> u64 {
    30
}

fn default_min_poll_interval() -> u64 {
    15
}

fn default_status_retries() -> u32 {
    2
}

fn default_status_retry_interval() -> u64 {
    5
}

/// Report output settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReportConfig {
    /// Directory receiving downloaded artifacts and the summary.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    #[serde(default = "default_summary_file")]
    pub summary_file: String,

    /// Emit Azure Pipelines logging commands on stdout.
    #[serde(default = "default_true")]
    pub ci_annotations: bool,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            summary_file: default_summary_file(),
            ci_annotations: true,
        }
    }
}

impl ReportConfig {
    pub fn summary_path(&self) -> PathBuf {
        self.output_dir.join(&self.summary_file)
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("test-results")
}

fn default_summary_file() -> String {
    "TestLabSummary.md".to_string()
}

fn default_true() -> bool {
    true
}
