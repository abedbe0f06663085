//! Access to the storage that is bind-mounted into spawned containers.

use crate::errors::SandboxError;
use async_trait::async_trait;
use std::path::Path;

#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Creates the folder and any missing parents.
    async fn create_folder(&self, path: &Path) -> Result<(), SandboxError>;

    /// Deletes the folder and everything below it.
    async fn delete_folder(&self, path: &Path) -> Result<(), SandboxError>;

    async fn write_file(&self, path: &Path, contents: &str) -> Result<(), SandboxError>;

    /// Fails when the file does not exist.
    async fn read_file(&self, path: &Path) -> Result<String, SandboxError>;
}

#[derive(Debug, Clone, Default)]
pub struct LocalFileSystem;

impl LocalFileSystem {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FileSystem for LocalFileSystem {
    async fn create_folder(&self, path: &Path) -> Result<(), SandboxError> {
        tokio::fs::create_dir_all(path)
            .await
            .map_err(|e| SandboxError::filesystem("create_folder", path, e))
    }

    async fn delete_folder(&self, path: &Path) -> Result<(), SandboxError> {
        tokio::fs::remove_dir_all(path)
            .await
            .map_err(|e| SandboxError::filesystem("delete_folder", path, e))
    }

    async fn write_file(&self, path: &Path, contents: &str) -> Result<(), SandboxError> {
        tokio::fs::write(path, contents)
            .await
            .map_err(|e| SandboxError::filesystem("write_file", path, e))
    }

    async fn read_file(&self, path: &Path) -> Result<String, SandboxError> {
        tokio::fs::read_to_string(path)
            .await
            .map_err(|e| SandboxError::filesystem("read_file", path, e))
    }
}
