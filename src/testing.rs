//! In-memory lab and reporter for unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::json;

use crate::client::{
    ArtifactUpload, CODE_BUSY, CODE_OK, LabApi, LabError, LabResult, TriggerResponse,
};
use crate::config::RunConfig;
use crate::model::{DeviceTestResult, RunRequest, TaskStatus, TestTask};
use crate::orchestrator::BuildOutcome;
use crate::report::{DeviceReport, Reporter, RunReport};

/// A lab that replays scripted answers in order.
#[derive(Default)]
pub struct ScriptedLab {
    triggers: Mutex<VecDeque<TriggerResponse>>,
    statuses: Mutex<VecDeque<LabResult<TestTask>>>,
    artifacts: HashMap<String, Vec<u8>>,
    broken_urls: HashSet<String>,
    uploads: Mutex<Vec<ArtifactUpload>>,
    trigger_calls: Mutex<u32>,
    status_calls: Mutex<u32>,
    fetched: Mutex<Vec<String>>,
}

impl ScriptedLab {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_triggers(mut self, triggers: Vec<TriggerResponse>) -> Self {
        self.triggers = Mutex::new(triggers.into());
        self
    }

    pub fn with_statuses(mut self, statuses: Vec<LabResult<TestTask>>) -> Self {
        self.statuses = Mutex::new(statuses.into());
        self
    }

    pub fn with_artifact(mut self, url: &str, body: &[u8]) -> Self {
        self.artifacts.insert(url.to_string(), body.to_vec());
        self
    }

    /// Downloads of `url` fail at the transport level.
    pub fn with_broken_url(mut self, url: &str) -> Self {
        self.broken_urls.insert(url.to_string());
        self
    }

    pub fn upload_calls(&self) -> usize {
        self.uploads.lock().unwrap().len()
    }

    pub fn trigger_calls(&self) -> u32 {
        *self.trigger_calls.lock().unwrap()
    }

    pub fn status_calls(&self) -> u32 {
        *self.status_calls.lock().unwrap()
    }

    pub fn fetched_urls(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }
}

#[async_trait]
impl LabApi for ScriptedLab {
    async fn upload_artifacts(&self, upload: &ArtifactUpload) -> LabResult<String> {
        self.uploads.lock().unwrap().push(upload.clone());
        Ok("set-1".to_string())
    }

    async fn trigger_run(&self, _request: &RunRequest) -> LabResult<TriggerResponse> {
        *self.trigger_calls.lock().unwrap() += 1;
        self.triggers
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| LabError::Malformed {
                operation: "trigger run",
                message: "no scripted trigger response left".to_string(),
            })
    }

    async fn task_status(&self, _task_id: &str) -> LabResult<TestTask> {
        *self.status_calls.lock().unwrap() += 1;
        self.statuses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Err(LabError::Malformed {
                    operation: "get task status",
                    message: "no scripted status left".to_string(),
                })
            })
    }

    async fn fetch_artifact(&self, url: &str) -> LabResult<Option<Vec<u8>>> {
        self.fetched.lock().unwrap().push(url.to_string());
        if self.broken_urls.contains(url) {
            return Err(transport_error());
        }
        Ok(self.artifacts.get(url).cloned())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    RunStart,
    Uploaded(String),
    Triggered(String),
    LabBusy(u32),
    Polled(TaskStatus, u64),
    Restarted(u32),
    Finished(String),
    CasesFailed(u32),
    DeviceCollected(String, usize),
    RunComplete(bool),
    Outcome(BuildOutcome),
}

/// Records every reporter event.
#[derive(Default)]
pub struct RecordingReporter {
    events: Mutex<Vec<Event>>,
}

impl RecordingReporter {
    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn outcomes(&self) -> Vec<BuildOutcome> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Outcome(o) => Some(o),
                _ => None,
            })
            .collect()
    }

    pub fn restarts(&self) -> Vec<u32> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Restarted(r) => Some(r),
                _ => None,
            })
            .collect()
    }

    /// Serials of collected devices with their reported index.
    pub fn collected(&self) -> Vec<(String, usize)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::DeviceCollected(serial, index) => Some((serial, index)),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl Reporter for RecordingReporter {
    async fn on_run_start(&self, _run: &RunConfig) {
        self.push(Event::RunStart);
    }

    async fn on_uploaded(&self, artifact_set_id: &str) {
        self.push(Event::Uploaded(artifact_set_id.to_string()));
    }

    async fn on_triggered(&self, task_id: &str) {
        self.push(Event::Triggered(task_id.to_string()));
    }

    async fn on_lab_busy(&self, retry: u32, _max_retries: u32) {
        self.push(Event::LabBusy(retry));
    }

    async fn on_task_polled(&self, task: &TestTask, elapsed_secs: u64) {
        self.push(Event::Polled(task.status, elapsed_secs));
    }

    async fn on_task_restarted(&self, retry_count: u32) {
        self.push(Event::Restarted(retry_count));
    }

    async fn on_task_finished(&self, task: &TestTask) {
        self.push(Event::Finished(task.id.clone()));
    }

    async fn on_cases_failed(&self, failed: u32) {
        self.push(Event::CasesFailed(failed));
    }

    async fn on_device_collected(&self, device: &DeviceReport, index: usize) {
        self.push(Event::DeviceCollected(device.serial.clone(), index));
    }

    async fn on_run_complete(&self, report: &RunReport) {
        self.push(Event::RunComplete(report.success));
    }

    async fn on_build_outcome(&self, outcome: BuildOutcome) {
        self.push(Event::Outcome(outcome));
    }
}

pub fn run_request() -> RunRequest {
    RunRequest::new(
        "set-1",
        &RunConfig {
            suite: "Smoke".to_string(),
            ..Default::default()
        },
    )
}

pub fn trigger_ok(task_id: &str) -> TriggerResponse {
    TriggerResponse {
        code: CODE_OK,
        task_id: Some(task_id.to_string()),
        body: json!({"code": CODE_OK, "content": {"testTaskId": task_id}}),
    }
}

pub fn trigger_busy() -> TriggerResponse {
    trigger_code(CODE_BUSY)
}

pub fn trigger_code(code: i64) -> TriggerResponse {
    TriggerResponse {
        code,
        task_id: None,
        body: json!({"code": code, "message": "scripted"}),
    }
}

pub fn snapshot(status: TaskStatus, retry_count: u32) -> TestTask {
    TestTask {
        id: "task-1".to_string(),
        status,
        retry_count,
        total_device_count: 1,
        ..Default::default()
    }
}

pub fn finished_task(devices: Vec<DeviceTestResult>) -> TestTask {
    TestTask {
        id: "task-1".to_string(),
        status: TaskStatus::Finished,
        total_device_count: devices.len() as u32,
        total_case_count: devices.iter().map(|d| d.total_count).sum(),
        devices,
        ..Default::default()
    }
}

/// A real `reqwest` error, produced without touching the network.
pub fn transport_error() -> LabError {
    let source = reqwest::Client::new()
        .get("not a url")
        .build()
        .unwrap_err();
    LabError::Transport {
        operation: "scripted",
        source,
    }
}
