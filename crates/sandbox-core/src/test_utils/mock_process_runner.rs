// src/test_utils/mock_process_runner.rs
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::errors::SandboxError;
use crate::system::{FileSystem, LocalFileSystem, ProcessResult, ProcessRunner};

/// One recorded call to the mock runner.
#[derive(Debug, Clone)]
pub struct ProcessLaunch {
    pub path: String,
    pub args: Vec<String>,
    pub timeout: Option<Duration>,
}

type SimulatedProcess =
    Box<dyn Fn(&ProcessLaunch) -> Result<ProcessResult, SandboxError> + Send + Sync>;

enum Step {
    Run(SimulatedProcess),
    /// Never returns, like a container that outlives its caller.
    Hang,
}

/// Plays back scripted processes in order. Once the script runs out, every
/// launch completes with output "Output".
pub struct MockProcessRunner {
    launches: Mutex<Vec<ProcessLaunch>>,
    steps: Mutex<VecDeque<Step>>,
}

impl MockProcessRunner {
    pub fn new() -> Self {
        Self {
            launches: Mutex::new(Vec::new()),
            steps: Mutex::new(VecDeque::new()),
        }
    }

    /// Queues a simulated process. The closure runs synchronously at launch
    /// time, so it can inspect or modify the exchange folder.
    pub fn then<F>(self, simulated: F) -> Self
    where
        F: Fn(&ProcessLaunch) -> Result<ProcessResult, SandboxError> + Send + Sync + 'static,
    {
        self.steps
            .lock()
            .unwrap()
            .push_back(Step::Run(Box::new(simulated)));
        self
    }

    pub fn then_result(self, result: ProcessResult) -> Self {
        self.then(move |_| Ok(result.clone()))
    }

    pub fn then_hang(self) -> Self {
        self.steps.lock().unwrap().push_back(Step::Hang);
        self
    }

    pub fn launches(&self) -> Vec<ProcessLaunch> {
        self.launches.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProcessRunner for MockProcessRunner {
    async fn run_process(
        &self,
        path: &str,
        args: &[String],
        timeout: Option<Duration>,
    ) -> Result<ProcessResult, SandboxError> {
        let launch = ProcessLaunch {
            path: path.to_string(),
            args: args.to_vec(),
            timeout,
        };
        self.launches.lock().unwrap().push(launch.clone());

        let next = self.steps.lock().unwrap().pop_front();
        match next {
            Some(Step::Run(simulated)) => simulated(&launch),
            Some(Step::Hang) => std::future::pending().await,
            None => Ok(ProcessResult::new(true, "Output")),
        }
    }
}

/// Local filesystem whose file writes always fail.
pub struct FailingFileSystem {
    inner: LocalFileSystem,
}

impl FailingFileSystem {
    pub fn new() -> Self {
        Self {
            inner: LocalFileSystem::new(),
        }
    }
}

#[async_trait]
impl FileSystem for FailingFileSystem {
    async fn create_folder(&self, path: &Path) -> Result<(), SandboxError> {
        self.inner.create_folder(path).await
    }

    async fn delete_folder(&self, path: &Path) -> Result<(), SandboxError> {
        self.inner.delete_folder(path).await
    }

    async fn write_file(&self, path: &Path, _contents: &str) -> Result<(), SandboxError> {
        Err(SandboxError::filesystem(
            "write_file",
            path,
            std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
        ))
    }

    async fn read_file(&self, path: &Path) -> Result<String, SandboxError> {
        self.inner.read_file(path).await
    }
}

/// Local filesystem whose first reads fail as if the file were not yet
/// visible through the mount. Counts every read.
pub struct LaggingFileSystem {
    inner: LocalFileSystem,
    failing_reads: AtomicUsize,
    reads: AtomicUsize,
}

impl LaggingFileSystem {
    pub fn new(failing_reads: usize) -> Self {
        Self {
            inner: LocalFileSystem::new(),
            failing_reads: AtomicUsize::new(failing_reads),
            reads: AtomicUsize::new(0),
        }
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FileSystem for LaggingFileSystem {
    async fn create_folder(&self, path: &Path) -> Result<(), SandboxError> {
        self.inner.create_folder(path).await
    }

    async fn delete_folder(&self, path: &Path) -> Result<(), SandboxError> {
        self.inner.delete_folder(path).await
    }

    async fn write_file(&self, path: &Path, contents: &str) -> Result<(), SandboxError> {
        self.inner.write_file(path, contents).await
    }

    async fn read_file(&self, path: &Path) -> Result<String, SandboxError> {
        self.reads.fetch_add(1, Ordering::SeqCst);

        let still_lagging = self
            .failing_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if still_lagging {
            return Err(SandboxError::filesystem(
                "read_file",
                path,
                std::io::Error::new(std::io::ErrorKind::NotFound, "not visible yet"),
            ));
        }

        self.inner.read_file(path).await
    }
}
