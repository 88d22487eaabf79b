//! Markdown summary of a finished run.
//!
//! The layout is consumed by the CI summary tab, so it is kept byte-stable:
//!
//! ```text
//! # Device Lab Test Result Details
//!
//!
//! ### [Link to full report](<report url>)
//!
//!
//! ### Statistic: total test case count: <total>, failed: <failed>
//!
//! - On device <name> (SN: <serial>), total case count: <t>, failed: <f> **[Video Link](<video url>)**
//! ```

use std::fmt::Write as _;
use std::path::Path;

use crate::model::TestTask;

use super::aggregator::DeviceReport;

/// Incrementally built summary document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryDocument {
    markdown: String,
}

impl SummaryDocument {
    /// Starts a document with the heading, report link and totals of `task`.
    pub fn new(task: &TestTask, report_url: &str) -> Self {
        let mut markdown = String::from("# Device Lab Test Result Details\n\n\n");
        let _ = write!(markdown, "### [Link to full report]({})\n\n\n", report_url);
        let _ = write!(
            markdown,
            "### Statistic: total test case count: {}, failed: {}\n\n",
            task.total_case_count, task.total_fail_count
        );
        Self { markdown }
    }

    /// Appends one line for `device`.
    pub fn push_device(&mut self, device: &DeviceReport) {
        let _ = writeln!(
            self.markdown,
            "- On device {} (SN: {}), total case count: {}, failed: {} **[Video Link]({})**",
            device.name, device.serial, device.total_count, device.fail_count, device.video_url
        );
    }

    pub fn as_str(&self) -> &str {
        &self.markdown
    }

    pub fn into_string(self) -> String {
        self.markdown
    }

    /// Writes the document to `path`, creating parent directories.
    pub async fn write_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, self.markdown.as_bytes()).await
    }
}
