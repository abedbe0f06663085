//! Configuration loader for YAML files and environment overrides

use crate::config::types::SandboxConfig;
use crate::errors::SandboxError;
use std::env;
use std::path::{Path, PathBuf};
use tokio::fs;

pub const DOCKER_PATH_VAR: &str = "SANDBOX_DOCKER_PATH";
pub const HOST_TEMP_FOLDER_VAR: &str = "SANDBOX_HOST_TEMP_FOLDER";
pub const CONTAINER_TEMP_FOLDER_VAR: &str = "SANDBOX_CONTAINER_TEMP_FOLDER";

/// Configuration loader with environment resolution
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a YAML file
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<SandboxConfig, SandboxError> {
        let path = path.as_ref();

        let content = fs::read_to_string(path).await.map_err(|e| {
            SandboxError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        log::debug!("Loaded sandbox configuration from {}", path.display());
        Self::from_str(&content)
    }

    /// Load configuration from a YAML string
    pub fn from_str(content: &str) -> Result<SandboxConfig, SandboxError> {
        let mut config: SandboxConfig = serde_yaml::from_str(content)
            .map_err(|e| SandboxError::Config(format!("Failed to parse YAML config: {}", e)))?;

        Self::resolve_environment(&mut config, |key| env::var(key).ok());

        config.validate()?;

        Ok(config)
    }

    /// Apply host overrides from the environment. Empty values are ignored.
    fn resolve_environment<F>(config: &mut SandboxConfig, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(docker_path) = lookup(DOCKER_PATH_VAR) {
            log::info!("Using docker path from {}: {}", DOCKER_PATH_VAR, docker_path);
            config.host.docker_path = docker_path;
        }

        if let Some(host_temp) = lookup(HOST_TEMP_FOLDER_VAR) {
            config.host.host_temp_folder_path = host_temp;
        }

        if let Some(container_temp) = lookup(CONTAINER_TEMP_FOLDER_VAR) {
            config.host.container_temp_folder_path = PathBuf::from(container_temp);
        }
    }
}
