//! Disposable container sandboxes for untrusted work.
//!
//! A [`SandboxHost`] runs one configured image per invocation in a fresh
//! container. The request and response travel through files in a
//! per-invocation folder that is bind-mounted into the container and removed
//! afterwards. Containers that outlive their configured lifetime are
//! force-removed and their response is discarded.
//!
//! # Layout
//!
//! - **Configuration**: YAML host, policy and container settings with environment overrides
//! - **Hosts**: single and bounded-parallel invocations, plus a factory that pre-pulls images
//! - **System seams**: process and filesystem abstractions so hosts can be tested without an engine
//! - **Retry helpers**: bounded retries, timeouts and bounded parallelism

pub mod config;
pub mod errors;
pub mod host;
pub mod retry;
pub mod system;

pub use config::*;
pub use errors::SandboxError;
pub use host::{
    ExecutionResult, IdGenerator, InvocationRequest, SandboxHost, SandboxHostFactory,
    UuidIdGenerator,
};
pub use system::{FileSystem, LocalFileSystem, ProcessResult, ProcessRunner, TokioProcessRunner};

#[cfg(test)]
pub mod test_utils;
