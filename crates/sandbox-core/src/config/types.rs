//! Configuration type definitions for the sandbox host
//!
//! The host configuration describes where the container engine lives and how
//! the shared exchange storage is seen from both sides of the bind mount. Each
//! container configuration describes one supported sandbox image. Both are
//! loaded once at startup and shared read-only afterwards.

use crate::errors::SandboxError;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    pub host: HostConfig,
    #[serde(default)]
    pub policy: SandboxPolicy,
    #[serde(default)]
    pub containers: Vec<ContainerConfig>,
}

/// Where the container engine lives and where exchange folders are staged.
///
/// `host_temp_folder_path` and `container_temp_folder_path` name the same
/// physical folder. The first is the path the engine daemon resolves bind
/// mounts against; the second is the path this process reads and writes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HostConfig {
    pub docker_path: String,
    pub host_temp_folder_path: String,
    pub container_temp_folder_path: PathBuf,
}

impl HostConfig {
    pub fn new(
        docker_path: impl Into<String>,
        host_temp_folder_path: impl Into<String>,
        container_temp_folder_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            docker_path: docker_path.into(),
            host_temp_folder_path: host_temp_folder_path.into(),
            container_temp_folder_path: container_temp_folder_path.into(),
        }
    }
}

/// One supported sandbox image.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContainerConfig {
    /// Lookup key used by clients when asking for a host.
    pub id: String,
    pub image_name: String,
    /// Where the exchange folder is mounted inside the container.
    pub request_response_mount_point: String,
    /// File the container reads its request from.
    pub request_file_name: String,
    /// File the container writes its response to.
    pub response_file_name: String,
    /// Containers running longer than this are presumed hung and killed.
    #[serde(default = "default_max_lifetime_secs")]
    pub max_lifetime_secs: u64,
}

impl ContainerConfig {
    pub fn max_lifetime(&self) -> Duration {
        Duration::from_secs(self.max_lifetime_secs)
    }

    /// Container-side path of the request file.
    pub fn request_file_path(&self) -> String {
        format!(
            "{}/{}",
            self.request_response_mount_point, self.request_file_name
        )
    }

    /// Container-side path of the response file.
    pub fn response_file_path(&self) -> String {
        format!(
            "{}/{}",
            self.request_response_mount_point, self.response_file_name
        )
    }
}

/// Timing knobs for the racy parts of an invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SandboxPolicy {
    /// Pause after the engine process returns, before touching the container
    /// or the exchange folder again.
    #[serde(default = "default_exit_grace_ms")]
    pub exit_grace_ms: u64,
    #[serde(default = "default_read_response_attempts")]
    pub read_response_attempts: u32,
    #[serde(default = "default_kill_container_attempts")]
    pub kill_container_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for SandboxPolicy {
    fn default() -> Self {
        Self {
            exit_grace_ms: default_exit_grace_ms(),
            read_response_attempts: default_read_response_attempts(),
            kill_container_attempts: default_kill_container_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl SandboxPolicy {
    /// A policy with no waiting at all. Attempt counts keep their defaults.
    pub fn immediate() -> Self {
        Self {
            exit_grace_ms: 0,
            retry_delay_ms: 0,
            ..Self::default()
        }
    }

    pub fn exit_grace(&self) -> Duration {
        Duration::from_millis(self.exit_grace_ms)
    }

    pub fn read_response_retry(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.read_response_attempts,
            Duration::from_millis(self.retry_delay_ms),
        )
    }

    pub fn kill_container_retry(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.kill_container_attempts,
            Duration::from_millis(self.retry_delay_ms),
        )
    }
}

fn default_max_lifetime_secs() -> u64 { 60 }
fn default_exit_grace_ms() -> u64 { 100 }
fn default_read_response_attempts() -> u32 { 5 }
fn default_kill_container_attempts() -> u32 { 15 }
fn default_retry_delay_ms() -> u64 { 1000 }

impl SandboxConfig {
    pub fn validate(&self) -> Result<(), SandboxError> {
        if self.host.docker_path.trim().is_empty() {
            return Err(SandboxError::Config("host.docker_path cannot be empty".to_string()));
        }

        if self.host.host_temp_folder_path.trim().is_empty() {
            return Err(SandboxError::Config(
                "host.host_temp_folder_path cannot be empty".to_string(),
            ));
        }

        if self.host.container_temp_folder_path.as_os_str().is_empty() {
            return Err(SandboxError::Config(
                "host.container_temp_folder_path cannot be empty".to_string(),
            ));
        }

        if self.policy.read_response_attempts == 0 {
            return Err(SandboxError::Config(
                "policy.read_response_attempts must be greater than 0".to_string(),
            ));
        }

        if self.policy.kill_container_attempts == 0 {
            return Err(SandboxError::Config(
                "policy.kill_container_attempts must be greater than 0".to_string(),
            ));
        }

        if self.containers.is_empty() {
            return Err(SandboxError::Config(
                "At least one container must be configured".to_string(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for container in &self.containers {
            container.validate()?;
            if !seen.insert(container.id.as_str()) {
                return Err(SandboxError::DuplicateContainerConfig {
                    id: container.id.clone(),
                });
            }
        }

        Ok(())
    }
}

impl ContainerConfig {
    pub fn validate(&self) -> Result<(), SandboxError> {
        let required = [
            ("id", &self.id),
            ("image_name", &self.image_name),
            ("request_response_mount_point", &self.request_response_mount_point),
            ("request_file_name", &self.request_file_name),
            ("response_file_name", &self.response_file_name),
        ];

        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(SandboxError::Config(format!(
                    "Container '{}': {} cannot be empty",
                    self.id, field
                )));
            }
        }

        if self.max_lifetime_secs == 0 {
            return Err(SandboxError::Config(format!(
                "Container '{}': max_lifetime_secs must be greater than 0",
                self.id
            )));
        }

        Ok(())
    }
}
