//! Azure Pipelines reporter.
//!
//! Emits [logging commands] on stdout so the build shows sections, uploads
//! downloaded artifacts, exposes report links as pipeline variables and is
//! tagged `FAIL` or `SUCCESS`.
//!
//! [logging commands]: https://learn.microsoft.com/azure/devops/pipelines/scripts/logging-commands

use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::config::RunConfig;
use crate::model::{TaskStatus, TestTask};
use crate::orchestrator::BuildOutcome;

use super::{DeviceReport, Reporter, RunReport};

const ARTIFACT_NAME: &str = "testResult";

/// Writes Azure Pipelines logging commands to `W`.
pub struct PipelineReporter<W: Write + Send> {
    out: Mutex<W>,
}

impl PipelineReporter<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> PipelineReporter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        match self.out.into_inner() {
            Ok(out) => out,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn emit(&self, line: impl AsRef<str>) {
        if let Ok(mut out) = self.out.lock() {
            let _ = writeln!(out, "{}", line.as_ref());
            let _ = out.flush();
        }
    }
}

fn absolute(path: &Path) -> String {
    std::path::absolute(path)
        .unwrap_or_else(|_| path.to_path_buf())
        .display()
        .to_string()
}

#[async_trait]
impl<W: Write + Send> Reporter for PipelineReporter<W> {
    async fn on_run_start(&self, run: &RunConfig) {
        self.emit(format!(
            "##[section]Running test suite {} with a timeout of {} seconds",
            run.suite, run.timeout_secs
        ));
    }

    async fn on_uploaded(&self, artifact_set_id: &str) {
        self.emit(format!(
            "##[section]Artifacts uploaded, artifact set id: {}",
            artifact_set_id
        ));
    }

    async fn on_triggered(&self, task_id: &str) {
        self.emit(format!("##[section]Test task triggered: {}", task_id));
    }

    async fn on_lab_busy(&self, retry: u32, max_retries: u32) {
        self.emit(format!(
            "##[warning]All devices are busy in the lab, retry {}/{}",
            retry, max_retries
        ));
    }

    async fn on_task_polled(&self, task: &TestTask, _elapsed_secs: u64) {
        match task.status {
            TaskStatus::Waiting => self.emit(format!(
                "##[command]{} Waiting for a device",
                task.message.as_deref().unwrap_or("Queued.")
            )),
            status => self.emit(format!(
                "##[command]Running test on {} device, status for now: {}",
                task.total_device_count, status
            )),
        }
    }

    async fn on_task_restarted(&self, retry_count: u32) {
        self.emit(format!(
            "##[command]The lab restarted the test task (retry {}), wait time reset",
            retry_count
        ));
    }

    async fn on_task_finished(&self, task: &TestTask) {
        self.emit("##vso[task.setprogress value=90;]Almost Done with testing");
        self.emit(format!(
            "##[section]Start going through device test results, Test overall info: {}",
            task
        ));
    }

    async fn on_cases_failed(&self, failed: u32) {
        self.emit(format!("##[warning] {} cases failed during the test", failed));
    }

    async fn on_device_collected(&self, device: &DeviceReport, index: usize) {
        if device.failing {
            match device.crash_stack.as_deref() {
                Some(stack) if !stack.is_empty() => self.emit(format!(
                    "##[error]Fatal error during test on device {}, stack:\n{}",
                    device.serial, stack
                )),
                _ => self.emit(format!(
                    "##[error]Fatal error during test on device {} with no stack found.",
                    device.serial
                )),
            }
        }

        for artifact in &device.collected {
            self.emit(format!(
                "##vso[artifact.upload artifactname={};]{}",
                ARTIFACT_NAME,
                absolute(&artifact.path)
            ));
        }

        self.emit(format!(
            "##[command]Device {} test video link: {}",
            device.serial, device.video_url
        ));
        self.emit(format!(
            "##vso[task.setvariable variable=TestVideoLink{};]{}",
            index + 1,
            device.video_url
        ));
    }

    async fn on_run_complete(&self, report: &RunReport) {
        self.emit(format!(
            "##[section]All done, overall failed cases count: {}, total count: {}, devices count: {}",
            report.failed_cases, report.total_cases, report.device_count
        ));
        self.emit("##[section]Test task report link:");
        self.emit(&report.report_url);
        self.emit(format!(
            "##vso[task.setvariable variable=TestTaskReportLink;]{}",
            report.report_url
        ));
        if let Some(path) = &report.summary_path {
            self.emit(format!("##vso[task.uploadsummary]{}", absolute(path)));
        }
    }

    async fn on_build_outcome(&self, outcome: BuildOutcome) {
        match outcome {
            BuildOutcome::Failed => self.emit("##vso[build.addbuildtag]FAIL"),
            BuildOutcome::Succeeded => self.emit("##vso[build.addbuildtag]SUCCESS"),
            BuildOutcome::Pending => {}
        }
    }
}

/// Link to the current Azure Pipelines build, if running inside one.
pub fn pipeline_link_from_env() -> Option<String> {
    pipeline_link(|name| std::env::var(name).ok())
}

fn pipeline_link(var: impl Fn(&str) -> Option<String>) -> Option<String> {
    let server = var("SYSTEM_TEAMFOUNDATIONSERVERURI")?;
    let project = var("SYSTEM_TEAMPROJECT")?;
    let build_id = var("BUILD_BUILDID")?;
    Some(format!(
        "{}{}/_build/results?buildId={}",
        server, project, build_id
    ))
}
