//! Commit metadata attached to every uploaded artifact set.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::debug;

/// Commit the artifacts were built from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    /// Abbreviated commit hash.
    pub id: String,
    /// First-parent commit count from `id` to `HEAD`.
    pub count: String,
    /// Commit subject line.
    pub message: String,
}

/// Errors from running `git`.
#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("failed to run `git {command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`git {command}` exited with {status}: {stderr}")]
    Failed {
        command: String,
        status: std::process::ExitStatus,
        stderr: String,
    },
}

/// Reads hash, count and subject of the latest commit in `dir`.
pub async fn collect_commit_info(dir: &Path) -> Result<CommitInfo, GitError> {
    let id = git(dir, &["log", "-1", "--pretty=format:%h"]).await?;
    let range = format!("{}..HEAD", id);
    let count = git(
        dir,
        &["rev-list", "--first-parent", "--right-only", "--count", &range],
    )
    .await?;
    let message = git(dir, &["log", "--pretty=format:%s", &id, "-1"]).await?;

    debug!(commit = %id, count = %count, "collected commit info");

    Ok(CommitInfo { id, count, message })
}

async fn git(dir: &Path, args: &[&str]) -> Result<String, GitError> {
    let command = args.join(" ");
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .await
        .map_err(|source| GitError::Spawn {
            command: command.clone(),
            source,
        })?;

    if !output.status.success() {
        return Err(GitError::Failed {
            command,
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
