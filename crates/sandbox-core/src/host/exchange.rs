//! Per-invocation exchange folder that is removed on every exit path.

use crate::errors::SandboxError;
use crate::system::FileSystem;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Owns the folder bind-mounted into one container.
///
/// `close` deletes the folder and reports failures. Dropping the guard
/// without closing it (early return, panic, or a cancelled invocation)
/// schedules the deletion on the current runtime and logs any failure.
pub(crate) struct ExchangeFolder {
    file_system: Arc<dyn FileSystem>,
    path: PathBuf,
    open: bool,
}

impl ExchangeFolder {
    pub(crate) async fn create(
        file_system: Arc<dyn FileSystem>,
        path: PathBuf,
    ) -> Result<Self, SandboxError> {
        file_system.create_folder(&path).await?;
        log::debug!("Created exchange folder {}", path.display());

        Ok(Self {
            file_system,
            path,
            open: true,
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn file(&self, file_name: &str) -> PathBuf {
        self.path.join(file_name)
    }

    pub(crate) async fn close(mut self) -> Result<(), SandboxError> {
        self.open = false;
        self.file_system.delete_folder(&self.path).await
    }
}

impl Drop for ExchangeFolder {
    fn drop(&mut self) {
        if !self.open {
            return;
        }

        let path = std::mem::take(&mut self.path);
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                log::error!(
                    "No runtime to remove exchange folder {}, leaving it behind",
                    path.display()
                );
                return;
            }
        };

        let file_system = self.file_system.clone();
        handle.spawn(async move {
            if let Err(e) = file_system.delete_folder(&path).await {
                log::error!("Failed to remove exchange folder {}: {}", path.display(), e);
            }
        });
    }
}
