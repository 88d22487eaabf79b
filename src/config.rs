//! Configuration loading and schema definitions for labrun.
//!
//! This module provides types and functions for loading labrun configuration
//! from TOML files or strings. The configuration schema defines the lab
//! endpoint, the run to trigger, polling tuning, and reporting.
//!
//! # The Configuration File Format is described in [`schema`].

pub mod schema;

pub use schema::*;

use std::path::Path;

use anyhow::{Context, Result};

/// Loads labrun configuration from a TOML file.
///
/// # Errors
///
/// Returns an error if:
/// - The file cannot be read (e.g., doesn't exist or permission denied)
/// - The file contains invalid TOML syntax
/// - The configuration doesn't match the expected schema
///
/// # Example
///
/// ```no_run
/// use labrun::config::load_config;
/// use std::path::Path;
///
/// let config = load_config(Path::new("labrun.toml"))?;
/// println!("Suite: {}", config.run.suite);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    Ok(config)
}

/// Loads labrun configuration from a TOML string.
///
/// # Example
///
/// ```
/// use labrun::config::load_config_str;
///
/// let config = load_config_str(r#"
///     [lab]
///     host = "lab.example.com"
///
///     [run]
///     suite = "com.example.SmokeSuite"
///     timeout_secs = 600
/// "#)?;
///
/// assert_eq!(config.run.timeout_secs, 600);
/// assert_eq!(config.polling.busy_retries, 20);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config_str(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("Failed to parse config")?;

    Ok(config)
}
