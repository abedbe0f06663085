//! Creates sandbox hosts for configured images and pre-pulls those images.

use super::{IdGenerator, SandboxHost, UuidIdGenerator};
use crate::config::{ContainerConfig, HostConfig, SandboxConfig, SandboxPolicy};
use crate::errors::SandboxError;
use crate::system::{FileSystem, LocalFileSystem, ProcessRunner, TokioProcessRunner};
use std::sync::Arc;

pub struct SandboxHostFactory {
    process_runner: Arc<dyn ProcessRunner>,
    file_system: Arc<dyn FileSystem>,
    host_config: Arc<HostConfig>,
    policy: SandboxPolicy,
    containers: Vec<Arc<ContainerConfig>>,
}

impl SandboxHostFactory {
    pub fn new(
        host_config: HostConfig,
        policy: SandboxPolicy,
        containers: Vec<ContainerConfig>,
        process_runner: Arc<dyn ProcessRunner>,
        file_system: Arc<dyn FileSystem>,
    ) -> Self {
        Self {
            process_runner,
            file_system,
            host_config: Arc::new(host_config),
            policy,
            containers: containers.into_iter().map(Arc::new).collect(),
        }
    }

    /// Factory backed by real processes and the local filesystem.
    pub fn from_config(config: SandboxConfig) -> Result<Self, SandboxError> {
        config.validate()?;
        Ok(Self::new(
            config.host,
            config.policy,
            config.containers,
            Arc::new(TokioProcessRunner::new()),
            Arc::new(LocalFileSystem::new()),
        ))
    }

    pub fn container_ids(&self) -> Vec<&str> {
        self.containers.iter().map(|c| c.id.as_str()).collect()
    }

    /// Pulls every configured image, one after another, so that the first
    /// invocation does not pay for the download. A failed pull does not stop
    /// the remaining ones; all failures are reported together.
    pub async fn warm_up(&self) -> Result<(), SandboxError> {
        let mut failures = Vec::new();

        for container in &self.containers {
            log::info!("Pulling image {} for {}", container.image_name, container.id);

            let args = ["pull".to_string(), container.image_name.clone()];
            match self
                .process_runner
                .run_process(&self.host_config.docker_path, &args, None)
                .await
            {
                Ok(result) if result.succeeded() => {}
                Ok(result) => {
                    log::warn!(
                        "Pull of image {} did not succeed: {}",
                        container.image_name,
                        result.output
                    );
                    let reason = match result.exit_code {
                        Some(code) => format!("exit code {}", code),
                        None => "did not complete".to_string(),
                    };
                    failures.push((container.image_name.clone(), reason));
                }
                Err(e) => {
                    log::warn!("Failed to pull image {}: {}", container.image_name, e);
                    failures.push((container.image_name.clone(), e.to_string()));
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(SandboxError::ImagePull { failures })
        }
    }

    /// Creates a host for the container configuration with the given id,
    /// naming containers with random UUIDs.
    pub fn create_host(&self, container_config_id: &str) -> Result<SandboxHost, SandboxError> {
        self.create_host_with_id_generator(container_config_id, Arc::new(UuidIdGenerator))
    }

    pub fn create_host_with_id_generator(
        &self,
        container_config_id: &str,
        id_generator: Arc<dyn IdGenerator>,
    ) -> Result<SandboxHost, SandboxError> {
        let container_config = self.find_container(container_config_id)?;

        Ok(SandboxHost::new(
            self.process_runner.clone(),
            self.file_system.clone(),
            self.host_config.clone(),
            container_config,
            self.policy.clone(),
            id_generator,
        ))
    }

    fn find_container(&self, id: &str) -> Result<Arc<ContainerConfig>, SandboxError> {
        let mut matches = self.containers.iter().filter(|c| c.id == id);

        match (matches.next(), matches.next()) {
            (Some(container), None) => Ok(container.clone()),
            (None, _) => Err(SandboxError::ContainerConfigNotFound { id: id.to_string() }),
            (Some(_), Some(_)) => Err(SandboxError::DuplicateContainerConfig { id: id.to_string() }),
        }
    }
}
