//! Resolution of build artifact paths before upload.
//!
//! A configured path may point at the package itself or at the build output
//! directory containing it; in the latter case the first file (by name) is
//! used. Resolution happens before any remote call.

use std::path::{Path, PathBuf};

/// Why an artifact path could not be resolved.
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("{label} not found: {}", .path.display())]
    NotFound { label: String, path: PathBuf },

    #[error("{label} directory contains no file: {}", .path.display())]
    EmptyDirectory { label: String, path: PathBuf },

    #[error("failed to read {label} directory {}: {source}", .path.display())]
    Io {
        label: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Resolves `path` (with `~` expanded) to a single existing file.
///
/// # Example
///
/// ```no_run
/// use labrun::artifact::resolve_artifact;
/// use std::path::Path;
///
/// let apk = resolve_artifact("apk", Path::new("app/build/outputs/apk/debug"))?;
/// # Ok::<(), labrun::artifact::ArtifactError>(())
/// ```
pub fn resolve_artifact(label: &str, path: &Path) -> Result<PathBuf, ArtifactError> {
    let expanded = PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).into_owned());

    if !expanded.exists() {
        return Err(ArtifactError::NotFound {
            label: label.to_string(),
            path: expanded,
        });
    }

    if !expanded.is_dir() {
        return Ok(expanded);
    }

    let entries = std::fs::read_dir(&expanded).map_err(|source| ArtifactError::Io {
        label: label.to_string(),
        path: expanded.clone(),
        source,
    })?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .collect();
    files.sort();

    files
        .into_iter()
        .next()
        .ok_or(ArtifactError::EmptyDirectory {
            label: label.to_string(),
            path: expanded,
        })
}
