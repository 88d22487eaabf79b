//! labrun: run a mobile test suite on a remote device lab from CI.
//!
//! This crate uploads an application and its test package to a device lab,
//! triggers a test run, waits for it to finish and collects per-device
//! artifacts into a local report.
//!
//! # Architecture
//!
//! The main components are:
//!
//! - **Client**: The [`LabApi`](client::LabApi) trait and its HTTP implementation
//! - **Orchestrator**: Upload, busy-retry trigger, adaptive status polling
//! - **Report**: Artifact aggregation, Markdown summary, console and CI output
//!
//! # Example
//!
//! ```no_run
//! use labrun::config::load_config;
//! use labrun::client::HttpLabClient;
//! use labrun::git::CommitInfo;
//! use labrun::orchestrator::{Orchestrator, TokioSleeper};
//! use labrun::report::NullReporter;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config(std::path::Path::new("labrun.toml"))?;
//!     let client = HttpLabClient::new(config.lab.clone())?;
//!     let orchestrator = Orchestrator::new(config, client, TokioSleeper, NullReporter);
//!     let report = orchestrator.run(&CommitInfo::default()).await?;
//!     println!("{} of {} cases failed", report.failed_cases, report.total_cases);
//!     Ok(())
//! }
//! ```

pub mod artifact;
pub mod client;
pub mod config;
pub mod git;
pub mod model;
pub mod orchestrator;
pub mod report;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{HttpLabClient, LabApi, LabError};
pub use config::{Config, load_config};
pub use model::{DeviceTestResult, RunRequest, TaskStatus, TestTask};
pub use orchestrator::{Orchestrator, RunError};
pub use report::{Reporter, RunReport};
