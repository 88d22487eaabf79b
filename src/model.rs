//! Data model shared by the lab client, the orchestrator and the reporters.
//!
//! [`TestTask`] and [`DeviceTestResult`] mirror the JSON the device lab
//! returns from its task-status endpoint. Every poll produces a fresh
//! [`TestTask`]; nothing in this crate patches a snapshot in place.
//!
//! # Wire Format
//!
//! ```json
//! {
//!   "id": "task-42",
//!   "status": "running",
//!   "retryTime": 0,
//!   "testDevicesCount": 2,
//!   "totalTestCount": 120,
//!   "totalFailCount": 0,
//!   "deviceTestResults": [
//!     {"id": "r1", "deviceSerialNumber": "SN1", "totalCount": 60, "failCount": 0}
//!   ]
//! }
//! ```
//!
//! Decoding is lenient: unknown fields are ignored, missing or `null` fields
//! take their default, and dates may be epoch milliseconds or RFC 3339
//! strings. A field this client does not understand never fails a poll.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::config::RunConfig;

/// Server-reported state of a test task.
///
/// `Waiting` and `Running` are non-terminal. `Finished`, `Canceled` and
/// `Error` are terminal: once observed, polling stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Queued on the lab, no device has picked it up yet.
    #[default]
    Waiting,
    /// Executing on at least one device.
    Running,
    /// Completed; per-device results are available.
    Finished,
    /// Canceled on the server side.
    Canceled,
    /// The lab failed to execute the task.
    Error,
    /// A status string this client does not know. Treated like `Running`.
    #[serde(other)]
    Unknown,
}

impl TaskStatus {
    /// Returns `true` once no further state change is expected.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Finished | TaskStatus::Canceled | TaskStatus::Error
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Waiting => "waiting",
            TaskStatus::Running => "running",
            TaskStatus::Finished => "finished",
            TaskStatus::Canceled => "canceled",
            TaskStatus::Error => "error",
            TaskStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a remote test task, as returned by one status poll.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TestTask {
    #[serde(deserialize_with = "null_as_default")]
    pub id: String,

    pub status: TaskStatus,

    /// Incremented by the server every time it restarts the task.
    #[serde(rename = "retryTime", deserialize_with = "null_as_default")]
    pub retry_count: u32,

    #[serde(rename = "testDevicesCount", deserialize_with = "null_as_default")]
    pub total_device_count: u32,

    #[serde(rename = "totalTestCount", deserialize_with = "null_as_default")]
    pub total_case_count: u32,

    #[serde(deserialize_with = "null_as_default")]
    pub total_fail_count: u32,

    /// Human-readable progress message (e.g. queue position).
    pub message: Option<String>,

    pub test_error_msg: Option<String>,

    pub report_image_path: Option<String>,

    #[serde(
        serialize_with = "chrono::serde::ts_milliseconds_option::serialize",
        deserialize_with = "lenient_date"
    )]
    pub start_date: Option<DateTime<Utc>>,

    #[serde(
        serialize_with = "chrono::serde::ts_milliseconds_option::serialize",
        deserialize_with = "lenient_date"
    )]
    pub end_date: Option<DateTime<Utc>>,

    /// Per-device results, in the order the server reports them.
    #[serde(rename = "deviceTestResults", deserialize_with = "null_as_default")]
    pub devices: Vec<DeviceTestResult>,
}

impl fmt::Display for TestTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TestTask{{id={}, status={}, retry={}, devices={}, cases={}, failed={}}}",
            self.id,
            self.status,
            self.retry_count,
            self.total_device_count,
            self.total_case_count,
            self.total_fail_count
        )
    }
}

/// Result of running the suite on one physical or virtual device.
///
/// Every artifact URL is independently optional. A device with no XML
/// report is skipped by the aggregator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeviceTestResult {
    #[serde(deserialize_with = "null_as_default")]
    pub id: String,

    #[serde(rename = "deviceSerialNumber", deserialize_with = "null_as_default")]
    pub serial: String,

    #[serde(rename = "deviceName")]
    pub name: Option<String>,

    #[serde(deserialize_with = "null_as_default")]
    pub total_count: u32,

    #[serde(deserialize_with = "null_as_default")]
    pub fail_count: u32,

    #[serde(deserialize_with = "null_as_default")]
    pub success: bool,

    pub crash_stack: Option<String>,

    #[serde(rename = "instrumentReportBlobUrl")]
    pub instrument_log_url: Option<String>,

    #[serde(rename = "testXmlReportBlobUrl")]
    pub xml_report_url: Option<String>,

    #[serde(rename = "logcatBlobUrl")]
    pub logcat_url: Option<String>,

    #[serde(rename = "testGifBlobUrl")]
    pub recording_url: Option<String>,
}

impl DeviceTestResult {
    /// Returns the remote URL for `kind`, treating blank strings as absent.
    pub fn artifact_url(&self, kind: ArtifactKind) -> Option<&str> {
        let url = match kind {
            ArtifactKind::InstrumentLog => self.instrument_log_url.as_deref(),
            ArtifactKind::XmlReport => self.xml_report_url.as_deref(),
            ArtifactKind::Logcat => self.logcat_url.as_deref(),
            ArtifactKind::Recording => self.recording_url.as_deref(),
        };
        url.filter(|u| !u.trim().is_empty())
    }

    pub fn has_xml_report(&self) -> bool {
        self.artifact_url(ArtifactKind::XmlReport).is_some()
    }

    /// A device fails the build if any case failed or no case ran at all.
    pub fn is_failing(&self) -> bool {
        self.fail_count > 0 || self.total_count == 0
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("unknown")
    }
}

/// Deserializes `null` as the field's default value.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Accepts epoch milliseconds or an RFC 3339 string; anything else is `None`.
fn lenient_date<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let date = match Value::deserialize(deserializer)? {
        Value::Number(millis) => millis.as_i64().and_then(DateTime::<Utc>::from_timestamp_millis),
        Value::String(text) => DateTime::parse_from_rfc3339(&text)
            .ok()
            .map(|date| date.with_timezone(&Utc)),
        _ => None,
    };
    Ok(date)
}

/// The kinds of per-device report artifacts the lab can publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    /// Raw instrumentation output (`adb shell am instrument`).
    InstrumentLog,
    /// JUnit-style XML report.
    XmlReport,
    /// Device log stream.
    Logcat,
    /// Screen recording.
    Recording,
}

impl ArtifactKind {
    /// Download order used by the aggregator.
    pub const ALL: [ArtifactKind; 4] = [
        ArtifactKind::InstrumentLog,
        ArtifactKind::XmlReport,
        ArtifactKind::Logcat,
        ArtifactKind::Recording,
    ];

    pub fn label(self) -> &'static str {
        match self {
            ArtifactKind::InstrumentLog => "instrumentation log",
            ArtifactKind::XmlReport => "xml report",
            ArtifactKind::Logcat => "logcat log",
            ArtifactKind::Recording => "recording",
        }
    }

    /// Local file name for this artifact.
    ///
    /// Logs and reports are named `{kind}-{suite}-{serial}.{ext}`,
    /// recordings `rec_{serial}.gif`.
    pub fn file_name(self, suite: &str, serial: &str) -> String {
        match self {
            ArtifactKind::InstrumentLog => format!("ADB-{}-{}.log", suite, serial),
            ArtifactKind::XmlReport => format!("TEST-{}-{}.xml", suite, serial),
            ArtifactKind::Logcat => format!("logcat-{}-{}.log", suite, serial),
            ArtifactKind::Recording => format!("rec_{}.gif", serial),
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Immutable description of the run to trigger on the lab.
///
/// Built once per invocation, after the artifact set has been uploaded.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRequest {
    pub artifact_set_id: String,
    pub suite: String,
    pub device: Option<String>,
    pub audience: Option<String>,
    pub timeout_secs: u64,
    pub instrumentation_args: BTreeMap<String, String>,
    /// Merged into the trigger body as top-level string fields.
    pub extra_args: BTreeMap<String, String>,
}

impl RunRequest {
    pub fn new(artifact_set_id: impl Into<String>, run: &RunConfig) -> Self {
        Self {
            artifact_set_id: artifact_set_id.into(),
            suite: run.suite.clone(),
            device: run.device.clone(),
            audience: run.audience.clone(),
            timeout_secs: run.timeout_secs,
            instrumentation_args: run.instrumentation_args.clone(),
            extra_args: run.extra_args.clone(),
        }
    }
}
