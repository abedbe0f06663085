//! Error types for sandbox execution
//!
//! Only environment faults escape a sandbox invocation as errors. Timeouts,
//! failed forced removals and unreadable responses are folded into the
//! `ExecutionResult` instead, so callers branch on data rather than on error
//! variants.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("No container configuration with id '{id}'")]
    ContainerConfigNotFound { id: String },
    #[error("Container configuration id '{id}' is not unique")]
    DuplicateContainerConfig { id: String },
    #[error("Invalid environment variable '{name}': {reason}")]
    InvalidEnvironment { name: String, reason: String },
    #[error("Failed to launch process '{path}': {message}")]
    ProcessLaunch { path: String, message: String },
    #[error("Filesystem operation '{operation}' failed for {path}: {message}")]
    Filesystem {
        operation: String,
        path: String,
        message: String,
    },
    #[error("Failed to pull {} image(s): {}", failures.len(), format_pull_failures(failures))]
    ImagePull { failures: Vec<(String, String)> },
}

impl SandboxError {
    /// Whether this error means the host machine itself is unhealthy
    /// (storage or process spawning), as opposed to bad input or configuration.
    pub fn is_environment_fault(&self) -> bool {
        matches!(
            self,
            SandboxError::Filesystem { .. } | SandboxError::ProcessLaunch { .. }
        )
    }

    pub(crate) fn filesystem(
        operation: &str,
        path: &std::path::Path,
        err: std::io::Error,
    ) -> Self {
        SandboxError::Filesystem {
            operation: operation.to_string(),
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }
}

fn format_pull_failures(failures: &[(String, String)]) -> String {
    failures
        .iter()
        .map(|(image, reason)| format!("{} ({})", image, reason))
        .collect::<Vec<_>>()
        .join(", ")
}
