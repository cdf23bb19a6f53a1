/// `load_config` module: loads a static YAML config file into the core [`SynchroniseConfig`].
///
/// This module is the only place where untrusted YAML is parsed and mapped to the
/// strongly-typed structs of `testbridge-core`.
///
/// # Responsibilities
/// - Parse user-supplied YAML configuration files into type-safe Rust structs
/// - Apply environment overrides (`TESTBRIDGE_PROJECT_KEY`) on top of the file
/// - Reject configurations the pipeline cannot run with, with clear diagnostics
///
/// # Errors
/// All errors in this module use `anyhow::Error` for context-rich diagnostics, and are surfaced at the CLI boundary.
///
/// For the accepted YAML schema, see the README.
use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;
use testbridge_core::config::SynchroniseConfig;
use tracing::{error, info};

/// Overrides `run.project_key` from the config file.
pub const PROJECT_KEY_ENV: &str = "TESTBRIDGE_PROJECT_KEY";

/// Loads a static YAML config file and applies environment overrides.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<SynchroniseConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = fs::read_to_string(path_ref).map_err(|e| {
        error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
        anyhow::anyhow!("Failed to read config file {:?}: {}", path_ref, e)
    })?;

    let mut config: SynchroniseConfig = match serde_yaml::from_str(&config_content) {
        Ok(conf) => {
            info!(config_path = ?path_ref, "Parsed config YAML successfully");
            conf
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            return Err(anyhow::anyhow!("Failed to parse config YAML: {e}"));
        }
    };

    if let Ok(key) = std::env::var(PROJECT_KEY_ENV) {
        if !key.trim().is_empty() {
            info!(env = PROJECT_KEY_ENV, "Overriding project key from environment");
            config.run.project_key = key.trim().to_string();
        }
    }

    validate(&config).with_context(|| format!("Invalid config {}", path_ref.display()))?;
    Ok(config)
}

fn validate(config: &SynchroniseConfig) -> Result<()> {
    if config.run.project_key.trim().is_empty() {
        bail!("run.project_key must not be empty");
    }
    if config.run.name.trim().is_empty() {
        bail!("run.name must not be empty");
    }
    if config.ingest.data_path.trim().is_empty() {
        bail!("ingest.data_path must not be empty");
    }
    if config.submission.batch_size == Some(0) {
        bail!("submission.batch_size must be at least 1");
    }
    Ok(())
}
