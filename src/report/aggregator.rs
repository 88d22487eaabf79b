//! Result Aggregator: turns a finished task into a local report.
//!
//! For every device that published an XML report, the collector downloads
//! whatever artifacts are available, applies the device failure rule and
//! adds one line to the summary. Downloads for different devices run
//! concurrently; results are merged back in server order, so the summary
//! and reporter events are deterministic.

use std::path::{Path, PathBuf};

use futures::future::join_all;
use tracing::{debug, error, info, warn};

use crate::client::{Endpoint, LabApi};
use crate::config::ReportConfig;
use crate::model::{ArtifactKind, DeviceTestResult, TestTask};
use crate::orchestrator::RunSession;

use super::summary::SummaryDocument;

/// A downloaded artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectedArtifact {
    pub kind: ArtifactKind,
    pub path: PathBuf,
}

/// What was collected for one device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceReport {
    /// Device result id on the lab.
    pub id: String,
    pub serial: String,
    pub name: String,
    pub total_count: u32,
    pub fail_count: u32,
    /// `fail_count > 0 || total_count == 0`.
    pub failing: bool,
    pub crash_stack: Option<String>,
    /// Portal page with the device recording. Built, never downloaded.
    pub video_url: String,
    pub collected: Vec<CollectedArtifact>,
    /// Kinds that had no URL, no content, or failed to download.
    pub missing: Vec<ArtifactKind>,
}

/// The locally built result of a run.
///
/// # Exit Codes
///
/// | Code | Meaning |
/// |------|---------|
/// | 0 | The build outcome is success |
/// | 1 | Cases failed or a device failed |
#[derive(Debug, Clone)]
pub struct RunReport {
    pub task_id: String,
    pub report_url: String,
    pub total_cases: u32,
    pub failed_cases: u32,
    pub device_count: u32,
    /// Summarised devices, in server order.
    pub devices: Vec<DeviceReport>,
    pub summary: String,
    /// Set when the summary file was written.
    pub summary_path: Option<PathBuf>,
    pub success: bool,
}

impl RunReport {
    /// Every downloaded file, device by device.
    pub fn files(&self) -> impl Iterator<Item = &Path> {
        self.devices
            .iter()
            .flat_map(|d| d.collected.iter().map(|a| a.path.as_path()))
    }

    pub fn exit_code(&self) -> i32 {
        if self.success { 0 } else { 1 }
    }
}

/// Downloads per-device artifacts of a finished task and builds the summary.
pub struct ArtifactCollector<'a, A: ?Sized> {
    api: &'a A,
    endpoint: &'a Endpoint,
    report: &'a ReportConfig,
    suite: &'a str,
}

impl<'a, A> ArtifactCollector<'a, A>
where
    A: LabApi + ?Sized,
{
    pub fn new(
        api: &'a A,
        endpoint: &'a Endpoint,
        report: &'a ReportConfig,
        suite: &'a str,
    ) -> Self {
        Self {
            api,
            endpoint,
            report,
            suite,
        }
    }

    /// Aggregates `task` into a [`RunReport`].
    ///
    /// Never fails: a missing artifact or an unwritable summary is logged and
    /// recorded, and the remaining devices are still processed. Failed cases
    /// and failing devices mark `session` failed.
    pub async fn aggregate(&self, task: &TestTask, session: &mut RunSession<'_>) -> RunReport {
        let reporter = session.reporter();
        let report_url = self.endpoint.task_report_url(&task.id);
        let output_dir = self.report.output_dir.as_path();

        if let Err(e) = tokio::fs::create_dir_all(output_dir).await {
            warn!(dir = %output_dir.display(), error = %e, "failed to create report directory");
        }

        if task.total_fail_count > 0 {
            warn!(failed = task.total_fail_count, "cases failed during the test");
            reporter.on_cases_failed(task.total_fail_count).await;
            session.mark_failed().await;
        }

        info!(
            task = %task,
            devices = task.devices.len(),
            "going through device test results"
        );

        let reportable: Vec<&DeviceTestResult> = task
            .devices
            .iter()
            .filter(|device| {
                let keep = device.has_xml_report();
                if !keep {
                    debug!(serial = %device.serial, "no xml report, skipping device");
                }
                keep
            })
            .collect();

        let devices = join_all(
            reportable
                .iter()
                .map(|device| self.collect_device(device, output_dir)),
        )
        .await;

        let mut summary = SummaryDocument::new(task, &report_url);
        for (index, device) in devices.iter().enumerate() {
            if device.failing {
                match device.crash_stack.as_deref() {
                    Some(stack) if !stack.is_empty() => error!(
                        serial = %device.serial,
                        "fatal error during test on device, stack:\n{}",
                        stack
                    ),
                    _ => error!(
                        serial = %device.serial,
                        "fatal error during test on device with no stack found"
                    ),
                }
                session.mark_failed().await;
            }
            summary.push_device(device);
            reporter.on_device_collected(device, index).await;
        }

        info!(
            failed = task.total_fail_count,
            total = task.total_case_count,
            devices = task.total_device_count,
            report_url = %report_url,
            "all done"
        );

        let summary_path = self.report.summary_path();
        let summary_path = match summary.write_to(&summary_path).await {
            Ok(()) => Some(summary_path),
            Err(e) => {
                error!(path = %summary_path.display(), error = %e, "failed to write summary");
                None
            }
        };

        RunReport {
            task_id: task.id.clone(),
            report_url,
            total_cases: task.total_case_count,
            failed_cases: task.total_fail_count,
            device_count: task.total_device_count,
            devices,
            summary: summary.into_string(),
            summary_path,
            success: !session.is_failed(),
        }
    }

    async fn collect_device(&self, device: &DeviceTestResult, output_dir: &Path) -> DeviceReport {
        debug!(
            serial = %device.serial,
            failed = device.fail_count,
            total = device.total_count,
            "collecting device artifacts"
        );

        let mut collected = Vec::new();
        let mut missing = Vec::new();

        for kind in ArtifactKind::ALL {
            let path = output_dir.join(kind.file_name(self.suite, &device.serial));
            if self.download(device, kind, &path).await {
                collected.push(CollectedArtifact { kind, path });
            } else {
                missing.push(kind);
            }
        }

        DeviceReport {
            id: device.id.clone(),
            serial: device.serial.clone(),
            name: device.display_name().to_string(),
            total_count: device.total_count,
            fail_count: device.fail_count,
            failing: device.is_failing(),
            crash_stack: device.crash_stack.clone(),
            video_url: self.endpoint.device_video_url(&device.id),
            collected,
            missing,
        }
    }

    /// Best-effort download of one artifact. Returns `false` if it is absent.
    async fn download(
        &self,
        device: &DeviceTestResult,
        kind: ArtifactKind,
        path: &Path,
    ) -> bool {
        let Some(url) = device.artifact_url(kind) else {
            debug!(serial = %device.serial, kind = %kind, "no url, skipping");
            return false;
        };

        let bytes = match self.api.fetch_artifact(url).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                info!(serial = %device.serial, kind = %kind, "artifact not available");
                return false;
            }
            Err(e) => {
                warn!(serial = %device.serial, kind = %kind, error = %e, "download failed");
                return false;
            }
        };

        match tokio::fs::write(path, &bytes).await {
            Ok(()) => {
                debug!(serial = %device.serial, kind = %kind, path = %path.display(), "downloaded");
                true
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to write artifact");
                false
            }
        }
    }
}
