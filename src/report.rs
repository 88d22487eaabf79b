//! Run reporting: progress events, artifact aggregation and summaries.
//!
//! The orchestrator notifies a [`Reporter`] at every step of a run. Reporters
//! only present information; they never influence the run.
//!
//! | Reporter | Output |
//! |----------|--------|
//! | [`ConsoleReporter`] | Styled progress lines and a spinner while the task runs |
//! | [`PipelineReporter`] | Azure Pipelines logging commands (`##vso[...]`) |
//! | [`MultiReporter`] | Fans events out to several reporters |
//! | [`NullReporter`] | Discards everything |

pub mod aggregator;
pub mod pipeline;
pub mod summary;

use std::sync::Mutex;

use async_trait::async_trait;

use crate::config::RunConfig;
use crate::model::{TaskStatus, TestTask};
use crate::orchestrator::BuildOutcome;

pub use aggregator::{ArtifactCollector, CollectedArtifact, DeviceReport, RunReport};
pub use pipeline::{PipelineReporter, pipeline_link_from_env};
pub use summary::SummaryDocument;

/// Receives events during a run.
#[async_trait]
pub trait Reporter: Send + Sync {
    /// Called before anything is sent to the lab.
    async fn on_run_start(&self, run: &RunConfig);

    /// Called once the artifact set is stored on the lab.
    async fn on_uploaded(&self, artifact_set_id: &str);

    /// Called when the lab has accepted the run.
    async fn on_triggered(&self, task_id: &str);

    /// Called before each retry of a trigger the lab rejected as busy.
    async fn on_lab_busy(&self, retry: u32, max_retries: u32);

    /// Called with every successfully parsed status snapshot.
    async fn on_task_polled(&self, task: &TestTask, elapsed_secs: u64);

    /// Called when the lab reports it restarted the task.
    async fn on_task_restarted(&self, retry_count: u32);

    /// Called when the task reached `finished`, before artifacts are collected.
    async fn on_task_finished(&self, task: &TestTask);

    /// Called when the finished task reports failed cases.
    async fn on_cases_failed(&self, failed: u32);

    /// Called per summarised device, in server order. `index` starts at 0.
    async fn on_device_collected(&self, device: &DeviceReport, index: usize);

    /// Called after the summary has been built.
    async fn on_run_complete(&self, report: &RunReport);

    /// Called at most once per outcome change; a failure is never followed by success.
    async fn on_build_outcome(&self, outcome: BuildOutcome);
}

/// A reporter that does nothing (for testing or when output is not needed).
pub struct NullReporter;

#[async_trait]
impl Reporter for NullReporter {
    async fn on_run_start(&self, _run: &RunConfig) {}
    async fn on_uploaded(&self, _artifact_set_id: &str) {}
    async fn on_triggered(&self, _task_id: &str) {}
    async fn on_lab_busy(&self, _retry: u32, _max_retries: u32) {}
    async fn on_task_polled(&self, _task: &TestTask, _elapsed_secs: u64) {}
    async fn on_task_restarted(&self, _retry_count: u32) {}
    async fn on_task_finished(&self, _task: &TestTask) {}
    async fn on_cases_failed(&self, _failed: u32) {}
    async fn on_device_collected(&self, _device: &DeviceReport, _index: usize) {}
    async fn on_run_complete(&self, _report: &RunReport) {}
    async fn on_build_outcome(&self, _outcome: BuildOutcome) {}
}

/// A reporter that combines multiple reporters.
pub struct MultiReporter {
    reporters: Vec<Box<dyn Reporter>>,
}

impl MultiReporter {
    /// Create a new multi-reporter.
    pub fn new() -> Self {
        Self {
            reporters: Vec::new(),
        }
    }

    /// Add a reporter to the multi-reporter.
    pub fn with_reporter<R: Reporter + 'static>(mut self, reporter: R) -> Self {
        self.reporters.push(Box::new(reporter));
        self
    }
}

impl Default for MultiReporter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Reporter for MultiReporter {
    async fn on_run_start(&self, run: &RunConfig) {
        for reporter in &self.reporters {
            reporter.on_run_start(run).await;
        }
    }

    async fn on_uploaded(&self, artifact_set_id: &str) {
        for reporter in &self.reporters {
            reporter.on_uploaded(artifact_set_id).await;
        }
    }

    async fn on_triggered(&self, task_id: &str) {
        for reporter in &self.reporters {
            reporter.on_triggered(task_id).await;
        }
    }

    async fn on_lab_busy(&self, retry: u32, max_retries: u32) {
        for reporter in &self.reporters {
            reporter.on_lab_busy(retry, max_retries).await;
        }
    }

    async fn on_task_polled(&self, task: &TestTask, elapsed_secs: u64) {
        for reporter in &self.reporters {
            reporter.on_task_polled(task, elapsed_secs).await;
        }
    }

    async fn on_task_restarted(&self, retry_count: u32) {
        for reporter in &self.reporters {
            reporter.on_task_restarted(retry_count).await;
        }
    }

    async fn on_task_finished(&self, task: &TestTask) {
        for reporter in &self.reporters {
            reporter.on_task_finished(task).await;
        }
    }

    async fn on_cases_failed(&self, failed: u32) {
        for reporter in &self.reporters {
            reporter.on_cases_failed(failed).await;
        }
    }

    async fn on_device_collected(&self, device: &DeviceReport, index: usize) {
        for reporter in &self.reporters {
            reporter.on_device_collected(device, index).await;
        }
    }

    async fn on_run_complete(&self, report: &RunReport) {
        for reporter in &self.reporters {
            reporter.on_run_complete(report).await;
        }
    }

    async fn on_build_outcome(&self, outcome: BuildOutcome) {
        for reporter in &self.reporters {
            reporter.on_build_outcome(outcome).await;
        }
    }
}

/// Console reporter that shows progress in the terminal.
pub struct ConsoleReporter {
    progress: Mutex<Option<indicatif::ProgressBar>>,
    verbose: bool,
}

impl ConsoleReporter {
    /// Create a new console reporter.
    pub fn new(verbose: bool) -> Self {
        Self {
            progress: Mutex::new(None),
            verbose,
        }
    }

    fn finish_progress(&self) {
        if let Ok(mut progress) = self.progress.lock()
            && let Some(pb) = progress.take()
        {
            pb.finish_and_clear();
        }
    }

    fn print(&self, line: String) {
        match self.progress.lock() {
            Ok(progress) if progress.is_some() => {
                if let Some(pb) = progress.as_ref() {
                    pb.println(line);
                }
            }
            _ => println!("{}", line),
        }
    }
}

#[async_trait]
impl Reporter for ConsoleReporter {
    async fn on_run_start(&self, run: &RunConfig) {
        println!(
            "Running {} (timeout {}s)",
            console::style(&run.suite).bold(),
            run.timeout_secs
        );
        if self.verbose {
            if let Some(device) = &run.device {
                println!("  Device:   {}", device);
            }
            if let Some(audience) = &run.audience {
                println!("  Audience: {}", audience);
            }
        }
    }

    async fn on_uploaded(&self, artifact_set_id: &str) {
        println!("Uploaded artifact set {}", console::style(artifact_set_id).cyan());
    }

    async fn on_triggered(&self, task_id: &str) {
        println!("Triggered task {}", console::style(task_id).cyan());

        let pb = indicatif::ProgressBar::new_spinner();
        if let Ok(style) =
            indicatif::ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")
        {
            pb.set_style(style);
        }
        pb.enable_steady_tick(std::time::Duration::from_millis(200));
        pb.set_message("waiting for the lab");

        if let Ok(mut progress) = self.progress.lock() {
            *progress = Some(pb);
        }
    }

    async fn on_lab_busy(&self, retry: u32, max_retries: u32) {
        println!(
            "{} all devices are busy, retry {}/{}",
            console::style("BUSY").yellow(),
            retry,
            max_retries
        );
    }

    async fn on_task_polled(&self, task: &TestTask, elapsed_secs: u64) {
        let message = match task.status {
            TaskStatus::Waiting => format!(
                "queued: {}",
                task.message.as_deref().unwrap_or("waiting for a device")
            ),
            status => format!(
                "{} on {} device(s), {}s of budget used",
                status, task.total_device_count, elapsed_secs
            ),
        };

        if let Ok(progress) = self.progress.lock()
            && let Some(pb) = progress.as_ref()
        {
            pb.set_message(message.clone());
        }

        if self.verbose {
            self.print(format!("  {}", console::style(message).dim()));
        }
    }

    async fn on_task_restarted(&self, retry_count: u32) {
        self.print(format!(
            "{} the lab restarted the task (retry {}), wait budget reset",
            console::style("RETRY").yellow(),
            retry_count
        ));
    }

    async fn on_task_finished(&self, task: &TestTask) {
        self.finish_progress();
        println!(
            "Task {} finished on {} device(s)",
            console::style(&task.id).cyan(),
            task.total_device_count
        );
    }

    async fn on_cases_failed(&self, failed: u32) {
        println!("{} {} case(s) failed", console::style("WARN").yellow(), failed);
    }

    async fn on_device_collected(&self, device: &DeviceReport, _index: usize) {
        let status = if device.failing {
            console::style("FAIL").red()
        } else {
            console::style("PASS").green()
        };
        println!(
            "{} {} ({}): {} case(s), {} failed",
            status,
            device.name,
            device.serial,
            device.total_count,
            device.fail_count
        );

        if self.verbose {
            for artifact in &device.collected {
                println!("    {} {}", artifact.kind, artifact.path.display());
            }
            for kind in &device.missing {
                println!("    {}", console::style(format!("no {}", kind)).dim());
            }
        }
    }

    async fn on_run_complete(&self, report: &RunReport) {
        println!();
        println!("Test Results:");
        println!("  Devices: {}", report.device_count);
        println!("  Total:   {}", report.total_cases);
        println!("  Failed:  {}", console::style(report.failed_cases).red());
        println!("  Report:  {}", report.report_url);

        if report.success {
            println!();
            println!("{}", console::style("All tests passed!").green().bold());
        } else {
            println!();
            println!("{}", console::style("Some tests failed.").red().bold());
        }
    }

    async fn on_build_outcome(&self, outcome: BuildOutcome) {
        if outcome == BuildOutcome::Failed {
            self.finish_progress();
        }
    }
}
