//! Sandbox host: runs one unit of untrusted work in a disposable container.
//!
//! Each invocation stages a fresh exchange folder, bind-mounts it into a new
//! container, lets the container read its request from and write its response
//! to that folder, and removes the folder again whatever happens. Containers
//! that outlive their configured lifetime are force-removed and their
//! response, if any, is discarded.

use crate::config::{ContainerConfig, HostConfig, SandboxPolicy};
use crate::errors::SandboxError;
use crate::retry::{retry_or_default, run_bounded};
use crate::system::{FileSystem, ProcessResult, ProcessRunner};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

mod exchange;
pub mod factory;

use exchange::ExchangeFolder;

pub use factory::SandboxHostFactory;

pub const REQUEST_FILE_PATH_VAR: &str = "REQUEST_FILE_PATH";
pub const RESPONSE_FILE_PATH_VAR: &str = "RESPONSE_FILE_PATH";

/// One eighth of the engine's default relative CPU weight (1024).
const CPU_SHARES: &str = "128";

/// Outcome of one invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Whether the container exited on its own within its lifetime.
    pub completed: bool,
    /// Combined stdout/stderr of the engine process. Diagnostic only.
    pub output: String,
    /// Contents of the response file. Always `None` when `completed` is false.
    pub response: Option<String>,
}

/// Input for one invocation in a batch.
#[derive(Debug, Clone, Default)]
pub struct InvocationRequest {
    pub request: Option<String>,
    pub environment: HashMap<String, String>,
}

impl InvocationRequest {
    pub fn new(request: Option<String>) -> Self {
        Self {
            request,
            environment: HashMap::new(),
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }
}

/// Produces invocation ids. Ids double as container names, so they must be
/// unique across concurrent invocations.
pub trait IdGenerator: Send + Sync {
    fn new_id(&self) -> String;
}

impl<F> IdGenerator for F
where
    F: Fn() -> String + Send + Sync,
{
    fn new_id(&self) -> String {
        self()
    }
}

#[derive(Debug, Clone, Default)]
pub struct UuidIdGenerator;

impl IdGenerator for UuidIdGenerator {
    fn new_id(&self) -> String {
        Uuid::new_v4().to_string()
    }
}

/// Runs containers of one configured image. Stateless between invocations;
/// clones share collaborators and configuration.
#[derive(Clone)]
pub struct SandboxHost {
    process_runner: Arc<dyn ProcessRunner>,
    file_system: Arc<dyn FileSystem>,
    host_config: Arc<HostConfig>,
    container_config: Arc<ContainerConfig>,
    policy: SandboxPolicy,
    id_generator: Arc<dyn IdGenerator>,
}

impl SandboxHost {
    pub fn new(
        process_runner: Arc<dyn ProcessRunner>,
        file_system: Arc<dyn FileSystem>,
        host_config: Arc<HostConfig>,
        container_config: Arc<ContainerConfig>,
        policy: SandboxPolicy,
        id_generator: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            process_runner,
            file_system,
            host_config,
            container_config,
            policy,
            id_generator,
        }
    }

    pub fn container_config(&self) -> &ContainerConfig {
        &self.container_config
    }

    /// Runs the image once in a new container.
    ///
    /// The request, if any, is written to the configured request file before
    /// the container starts. The container is expected to write its response
    /// file before exiting. Only filesystem and process-launch faults are
    /// returned as errors; a timeout is reported through `completed`.
    pub async fn run_once(
        &self,
        request: Option<&str>,
        environment: &HashMap<String, String>,
    ) -> Result<ExecutionResult, SandboxError> {
        validate_environment(environment)?;

        let invocation_id = self.id_generator.new_id();
        log::info!(
            "Starting invocation {} of image {}",
            invocation_id,
            self.container_config.image_name
        );

        let folder = ExchangeFolder::create(
            self.file_system.clone(),
            self.host_config
                .container_temp_folder_path
                .join(&invocation_id),
        )
        .await?;

        let outcome = self
            .run_in_folder(&invocation_id, &folder, request, environment)
            .await;
        let cleanup = folder.close().await;

        match outcome {
            Ok(result) => {
                cleanup?;
                Ok(result)
            }
            Err(e) => {
                if let Err(cleanup_err) = cleanup {
                    log::error!(
                        "Failed to remove exchange folder of invocation {}: {}",
                        invocation_id,
                        cleanup_err
                    );
                }
                Err(e)
            }
        }
    }

    /// Runs several independent invocations with at most `max_simultaneous`
    /// containers alive at once. Results are returned in request order.
    pub async fn run_many(
        &self,
        requests: Vec<InvocationRequest>,
        max_simultaneous: usize,
    ) -> Vec<Result<ExecutionResult, SandboxError>> {
        let mut results = run_bounded(
            requests.into_iter().enumerate(),
            move |(index, invocation): (usize, InvocationRequest)| async move {
                let result = self
                    .run_once(invocation.request.as_deref(), &invocation.environment)
                    .await;
                (index, result)
            },
            max_simultaneous,
        )
        .await;

        results.sort_by_key(|(index, _)| *index);
        results.into_iter().map(|(_, result)| result).collect()
    }

    async fn run_in_folder(
        &self,
        invocation_id: &str,
        folder: &ExchangeFolder,
        request: Option<&str>,
        environment: &HashMap<String, String>,
    ) -> Result<ExecutionResult, SandboxError> {
        if let Some(contents) = request {
            let request_path = folder.file(&self.container_config.request_file_name);
            self.file_system.write_file(&request_path, contents).await?;
        }

        let process_result = self.run_container(invocation_id, environment).await?;

        let response = if process_result.completed {
            self.read_response(folder).await
        } else {
            None
        };

        Ok(ExecutionResult {
            completed: process_result.completed,
            output: process_result.output,
            response,
        })
    }

    async fn run_container(
        &self,
        invocation_id: &str,
        environment: &HashMap<String, String>,
    ) -> Result<ProcessResult, SandboxError> {
        let args = self.docker_arguments(invocation_id, environment);

        let guard = ContainerGuard::new(self, invocation_id);
        let launched = self
            .process_runner
            .run_process(
                &self.host_config.docker_path,
                &args,
                Some(self.container_config.max_lifetime()),
            )
            .await;
        guard.disarm();
        let process_result = launched?;

        tokio::time::sleep(self.policy.exit_grace()).await;

        if !process_result.completed {
            log::warn!(
                "Container {} exceeded its lifetime of {}s, removing it",
                invocation_id,
                self.container_config.max_lifetime_secs
            );
            self.kill_container(invocation_id).await;
        }

        Ok(process_result)
    }

    /// Best effort. A container that resists removal is logged and left behind.
    async fn kill_container(&self, invocation_id: &str) {
        let runner = &self.process_runner;
        let docker_path = self.host_config.docker_path.as_str();
        let kill_args = [
            "rm".to_string(),
            "-f".to_string(),
            invocation_id.to_string(),
        ];
        let kill_args = &kill_args;

        let removed = retry_or_default(
            move || async move {
                runner
                    .run_process(docker_path, kill_args, None)
                    .await
                    .map(Some)
            },
            |_| true,
            self.policy.kill_container_retry(),
            None,
        )
        .await;

        if removed.is_none() {
            log::warn!("Could not force-remove container {}", invocation_id);
        }
    }

    async fn read_response(&self, folder: &ExchangeFolder) -> Option<String> {
        let file_system = &self.file_system;
        let response_path = folder.file(&self.container_config.response_file_name);
        let response_path = response_path.as_path();

        let contents = retry_or_default(
            move || async move { file_system.read_file(response_path).await.map(Some) },
            |_| true,
            self.policy.read_response_retry(),
            None,
        )
        .await;

        match contents {
            Some(text) if !text.trim().is_empty() => Some(text),
            _ => {
                log::info!("No response written to {}", folder.path().display());
                None
            }
        }
    }

    /// Engine arguments for one run: `run`, options, `--rm`, then the image.
    fn docker_arguments(
        &self,
        invocation_id: &str,
        environment: &HashMap<String, String>,
    ) -> Vec<String> {
        let container = &self.container_config;
        let host_folder = format!(
            "{}/{}",
            self.host_config.host_temp_folder_path.trim_end_matches('/'),
            invocation_id
        );

        let mut args = vec![
            "run".to_string(),
            "--name".to_string(),
            invocation_id.to_string(),
            "--cpu-shares".to_string(),
            CPU_SHARES.to_string(),
            "-v".to_string(),
            format!("{}:{}", host_folder, container.request_response_mount_point),
            "-e".to_string(),
            format!("{}={}", REQUEST_FILE_PATH_VAR, container.request_file_path()),
            "-e".to_string(),
            format!("{}={}", RESPONSE_FILE_PATH_VAR, container.response_file_path()),
        ];

        // Sorted so the command line is reproducible in logs.
        let mut variables: Vec<_> = environment.iter().collect();
        variables.sort();
        for (name, value) in variables {
            args.push("-e".to_string());
            args.push(format!("{}={}", name, value));
        }

        args.push("--rm".to_string());
        args.push(container.image_name.clone());
        args
    }
}

/// Force-removes the container when an invocation is dropped while the
/// engine process is still running. Dropping the launch future only kills
/// the engine client, not the container it started.
struct ContainerGuard {
    host: Option<SandboxHost>,
    invocation_id: String,
}

impl ContainerGuard {
    fn new(host: &SandboxHost, invocation_id: &str) -> Self {
        Self {
            host: Some(host.clone()),
            invocation_id: invocation_id.to_string(),
        }
    }

    fn disarm(mut self) {
        self.host = None;
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        let Some(host) = self.host.take() else {
            return;
        };
        let invocation_id = std::mem::take(&mut self.invocation_id);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                log::warn!(
                    "Invocation {} was cancelled while its container was running, removing it",
                    invocation_id
                );
                handle.spawn(async move {
                    host.kill_container(&invocation_id).await;
                });
            }
            Err(_) => log::error!(
                "No runtime to remove container {} of a cancelled invocation",
                invocation_id
            ),
        }
    }
}

fn validate_environment(environment: &HashMap<String, String>) -> Result<(), SandboxError> {
    for (name, value) in environment {
        let reason = if name.is_empty() {
            Some("name is empty")
        } else if name.contains('=') {
            Some("name contains '='")
        } else if name.contains('\0') {
            Some("name contains a NUL byte")
        } else if value.contains('\0') {
            Some("value contains a NUL byte")
        } else {
            None
        };

        if let Some(reason) = reason {
            return Err(SandboxError::InvalidEnvironment {
                name: name.clone(),
                reason: reason.to_string(),
            });
        }
    }
    Ok(())
}
