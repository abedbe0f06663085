//! Configuration module for the sandbox host
//!
//! Supports YAML configuration files with environment overrides for the
//! host-specific paths.

pub mod types;
pub mod loader;

pub use types::*;
pub use loader::*;

use crate::errors::SandboxError;
use std::path::Path;

/// Load a configuration from a YAML file
pub async fn load_config<P: AsRef<Path>>(path: P) -> Result<SandboxConfig, SandboxError> {
    ConfigLoader::from_file(path).await
}
