//! Run orchestration: submit, trigger, poll, aggregate.
//!
//! # Architecture
//!
//! ```text
//!   ArtifactUpload ──► upload_artifacts() ──► artifact set id
//!                                                   │
//!                                                   ▼
//!                                              RunRequest
//!                                                   │
//!                                   RunTrigger::trigger()   (busy retry)
//!                                                   │
//!                                                   ▼
//!                                                task id
//!                                                   │
//!                          StatusPoller::wait_for_completion()   (adaptive delay)
//!                                                   │
//!                                                   ▼
//!                                        TestTask (finished)
//!                                                   │
//!                             ArtifactCollector::aggregate()   (per-device fan-out)
//!                                                   │
//!                                                   ▼
//!                                               RunReport ──► Reporter
//! ```
//!
//! Every step runs strictly after the previous one. Any fatal condition is
//! returned as a single [`RunError`], and the build outcome of the
//! [`RunSession`] is marked failed exactly once.
//!
//! # Example
//!
//! ```no_run
//! use labrun::client::HttpLabClient;
//! use labrun::config::load_config;
//! use labrun::git::collect_commit_info;
//! use labrun::orchestrator::{Orchestrator, TokioSleeper};
//! use labrun::report::ConsoleReporter;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config(std::path::Path::new("labrun.toml"))?;
//!     let client = HttpLabClient::new(config.lab.clone())?;
//!     let commit = collect_commit_info(std::path::Path::new(".")).await?;
//!
//!     let orchestrator = Orchestrator::new(config, client, TokioSleeper, ConsoleReporter::new(false));
//!     let report = orchestrator.run(&commit).await?;
//!
//!     std::process::exit(report.exit_code());
//! }
//! ```

pub mod clock;
pub mod poller;
pub mod session;
pub mod trigger;

use tracing::{error, info};

use crate::artifact::{ArtifactError, resolve_artifact};
use crate::client::{ArtifactUpload, Endpoint, LabApi, LabError};
use crate::config::Config;
use crate::git::{CommitInfo, GitError};
use crate::model::{RunRequest, TestTask};
use crate::report::{ArtifactCollector, Reporter, RunReport};

pub use clock::{RecordingSleeper, Sleeper, TokioSleeper};
pub use poller::{AdaptiveDelay, PollSchedule, PollState, StatusPoller};
pub use session::{BuildOutcome, RunSession};
pub use trigger::{BusyRetryPolicy, RunTrigger};

/// Logs `error` and marks the build failed on `reporter`.
///
/// For failures raised before an [`Orchestrator`] exists, such as a bad
/// command-line override or an HTTP client that cannot be built.
pub async fn abort_run(reporter: &dyn Reporter, error: RunError) -> RunError {
    error!(kind = error.kind(), "{}", error);
    let mut session = RunSession::new(reporter);
    session.mark_failed().await;
    error
}

/// Why a run was aborted.
///
/// Variants carrying a task hold the last snapshot the lab returned.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// Bad local input, detected before anything is sent to the lab.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Lab(#[from] LabError),

    /// The lab stayed fully occupied through every trigger retry.
    #[error("all devices are busy in the lab after {attempts} attempts")]
    LabBusy { attempts: u32 },

    /// The trigger endpoint answered with an application code other than
    /// 200 or 500.
    #[error("the lab rejected the run with code {code}: {payload}")]
    Rejected { code: i64, payload: String },

    #[error("test task was canceled: {task}")]
    Canceled { task: Box<TestTask> },

    #[error("test task failed on the lab: {task}{}", error_suffix(.task))]
    TaskError { task: Box<TestTask> },

    /// Local deadline exceeded, distinct from a failure reported by the lab.
    #[error("test task did not finish within {timeout_secs}s: {task}")]
    TimedOut {
        timeout_secs: u64,
        task: Box<TestTask>,
    },
}

fn error_suffix(task: &TestTask) -> String {
    match task.test_error_msg.as_deref() {
        Some(msg) if !msg.is_empty() => format!(" ({})", msg),
        _ => String::new(),
    }
}

impl RunError {
    /// Stable classification, used in logs and by callers that branch on
    /// the failure class.
    pub fn kind(&self) -> &'static str {
        match self {
            RunError::InvalidInput(_) => "input",
            RunError::Lab(e) if e.is_transport() => "transport",
            RunError::Lab(_) => "lab",
            RunError::LabBusy { .. } => "lab_busy",
            RunError::Rejected { .. } => "rejected",
            RunError::Canceled { .. } => "canceled",
            RunError::TaskError { .. } => "task_error",
            RunError::TimedOut { .. } => "timed_out",
        }
    }

    /// The last task snapshot, if the error carries one.
    pub fn task(&self) -> Option<&TestTask> {
        match self {
            RunError::Canceled { task }
            | RunError::TaskError { task }
            | RunError::TimedOut { task, .. } => Some(task),
            _ => None,
        }
    }
}

impl From<ArtifactError> for RunError {
    fn from(e: ArtifactError) -> Self {
        RunError::InvalidInput(e.to_string())
    }
}

impl From<GitError> for RunError {
    fn from(e: GitError) -> Self {
        RunError::InvalidInput(format!("failed to collect commit info: {}", e))
    }
}

/// Drives one test run on the lab from upload to report.
///
/// # Type Parameters
///
/// - `A`: The lab API
/// - `S`: The sleeper used for every wait
/// - `R`: The reporter type
pub struct Orchestrator<A, S, R> {
    config: Config,
    api: A,
    sleeper: S,
    reporter: R,
    endpoint: Endpoint,
}

impl<A, S, R> Orchestrator<A, S, R>
where
    A: LabApi,
    S: Sleeper,
    R: Reporter,
{
    pub fn new(config: Config, api: A, sleeper: S, reporter: R) -> Self {
        let endpoint = Endpoint::from_config(&config.lab);
        Self {
            config,
            api,
            sleeper,
            reporter,
            endpoint,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn sleeper(&self) -> &S {
        &self.sleeper
    }

    pub fn reporter(&self) -> &R {
        &self.reporter
    }

    /// Runs the configured suite and returns the collected report.
    ///
    /// A returned report may still describe a failed build (failed cases or
    /// a failing device); check [`RunReport::success`].
    ///
    /// # Errors
    ///
    /// Returns a [`RunError`] for every fatal condition. The build outcome
    /// has already been marked failed when this returns `Err`.
    pub async fn run(&self, commit: &CommitInfo) -> Result<RunReport, RunError> {
        let mut session = RunSession::new(&self.reporter);

        match self.run_inner(commit, &mut session).await {
            Ok(report) => {
                if report.success {
                    session.mark_succeeded().await;
                }
                Ok(report)
            }
            Err(e) => {
                error!(kind = e.kind(), "{}", e);
                if let Some(task) = e.task() {
                    error!(task = %task, "last task snapshot");
                }
                session.mark_failed().await;
                Err(e)
            }
        }
    }

    /// Reports an error raised before [`run`](Self::run) could start, such
    /// as missing commit metadata, and marks the build failed.
    pub async fn abort(&self, error: RunError) -> RunError {
        abort_run(&self.reporter, error).await
    }

    async fn run_inner(
        &self,
        commit: &CommitInfo,
        session: &mut RunSession<'_>,
    ) -> Result<RunReport, RunError> {
        let run = &self.config.run;

        if run.suite.trim().is_empty() {
            return Err(RunError::InvalidInput(
                "a test suite name is required".to_string(),
            ));
        }
        if run.timeout_secs == 0 {
            return Err(RunError::InvalidInput(
                "timeout must be a positive number of seconds".to_string(),
            ));
        }

        let app = run
            .app
            .as_deref()
            .ok_or_else(|| RunError::InvalidInput("no app package configured".to_string()))?;
        let test_app = run
            .test_app
            .as_deref()
            .ok_or_else(|| RunError::InvalidInput("no test package configured".to_string()))?;
        let upload = ArtifactUpload {
            app: resolve_artifact("app package", app)?,
            test_app: resolve_artifact("test package", test_app)?,
            build_flavor: run.build_flavor.clone(),
            commit: commit.clone(),
        };

        self.reporter.on_run_start(run).await;

        let artifact_set_id = self.api.upload_artifacts(&upload).await?;
        info!(
            artifact_set_id = %artifact_set_id,
            app = %upload.app.display(),
            test_app = %upload.test_app.display(),
            "artifacts uploaded"
        );
        self.reporter.on_uploaded(&artifact_set_id).await;

        let request = RunRequest::new(artifact_set_id, run);
        let trigger = RunTrigger::new(
            &self.api,
            &self.sleeper,
            &self.reporter,
            BusyRetryPolicy::from_config(&self.config.polling),
        );
        let task_id = trigger.trigger(&request).await?;
        self.reporter.on_triggered(&task_id).await;

        let poller = StatusPoller::new(
            &self.api,
            &self.sleeper,
            &self.reporter,
            PollSchedule::new(run.timeout_secs, &self.config.polling),
        );
        let task = poller.wait_for_completion(&task_id).await?;
        self.reporter.on_task_finished(&task).await;

        let collector =
            ArtifactCollector::new(&self.api, &self.endpoint, &self.config.report, &run.suite);
        let report = collector.aggregate(&task, session).await;

        self.reporter.on_run_complete(&report).await;

        Ok(report)
    }
}
