//! Launching the container engine CLI with an optional wall-clock deadline.

use crate::errors::SandboxError;
use crate::retry::run_with_timeout;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;

/// Only the tail of the output is logged.
const MAX_LOGGED_OUTPUT_CHARS: usize = 1000;

/// Captured output beyond this is dropped from the front.
pub const DEFAULT_MAX_CAPTURED_OUTPUT_BYTES: usize = 1024 * 1024;

/// Longer lines are split into several entries.
const MAX_LINE_BYTES: u64 = 64 * 1024;

/// Bound on draining stdout/stderr after the process is gone. A grandchild
/// holding the pipes open must not stall the caller.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessResult {
    /// Whether the process exited before the timeout.
    pub completed: bool,
    /// Combined stdout/stderr, one entry per line, in arrival order.
    pub output: String,
    /// Exit code, when the process exited on its own with one.
    pub exit_code: Option<i32>,
}

impl ProcessResult {
    pub fn new(completed: bool, output: impl Into<String>) -> Self {
        Self {
            completed,
            output: output.into(),
            exit_code: None,
        }
    }

    pub fn with_exit_code(mut self, exit_code: i32) -> Self {
        self.exit_code = Some(exit_code);
        self
    }

    /// Completed with a zero exit code, or with no exit code reported.
    pub fn succeeded(&self) -> bool {
        self.completed && self.exit_code.map_or(true, |code| code == 0)
    }
}

#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Runs `path` with `args`. With a timeout, a process still running when
    /// it elapses is killed and reported as not completed.
    async fn run_process(
        &self,
        path: &str,
        args: &[String],
        timeout: Option<Duration>,
    ) -> Result<ProcessResult, SandboxError>;
}

/// Tail of the combined output, bounded in bytes.
#[derive(Debug)]
struct CapturedOutput {
    lines: VecDeque<String>,
    bytes: usize,
    max_bytes: usize,
    dropped_lines: usize,
}

impl CapturedOutput {
    fn new(max_bytes: usize) -> Self {
        Self {
            lines: VecDeque::new(),
            bytes: 0,
            max_bytes,
            dropped_lines: 0,
        }
    }

    fn push(&mut self, line: String) {
        self.bytes += line.len();
        self.lines.push_back(line);

        while self.bytes > self.max_bytes {
            match self.lines.pop_front() {
                Some(dropped) => {
                    self.bytes -= dropped.len();
                    self.dropped_lines += 1;
                }
                None => break,
            }
        }
    }

    fn joined(&self) -> String {
        self.lines.iter().map(String::as_str).collect::<Vec<_>>().join("\n")
    }
}

/// Runs real OS processes through tokio.
#[derive(Debug, Clone)]
pub struct TokioProcessRunner {
    max_captured_output_bytes: usize,
}

impl Default for TokioProcessRunner {
    fn default() -> Self {
        Self {
            max_captured_output_bytes: DEFAULT_MAX_CAPTURED_OUTPUT_BYTES,
        }
    }
}

impl TokioProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output_limit(mut self, max_bytes: usize) -> Self {
        self.max_captured_output_bytes = max_bytes;
        self
    }

    /// Reads until EOF whatever the bytes are. Stopping early would close the
    /// pipe and kill the child with SIGPIPE.
    fn collect_lines<R>(reader: R, sink: Arc<Mutex<CapturedOutput>>) -> JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        tokio::spawn(async move {
            let mut reader = BufReader::new(reader);
            let mut buffer = Vec::new();
            loop {
                buffer.clear();
                let read = (&mut reader)
                    .take(MAX_LINE_BYTES)
                    .read_until(b'\n', &mut buffer)
                    .await;
                match read {
                    Ok(0) => break,
                    Ok(_) => {
                        if buffer.last() == Some(&b'\n') {
                            buffer.pop();
                            if buffer.last() == Some(&b'\r') {
                                buffer.pop();
                            }
                        }
                        let line = String::from_utf8_lossy(&buffer).into_owned();
                        if let Ok(mut output) = sink.lock() {
                            output.push(line);
                        }
                    }
                    Err(e) => {
                        log::debug!("Stopped reading process output: {}", e);
                        break;
                    }
                }
            }
        })
    }
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run_process(
        &self,
        path: &str,
        args: &[String],
        timeout: Option<Duration>,
    ) -> Result<ProcessResult, SandboxError> {
        let arguments = args.join(" ");
        log::info!("Starting process {} with arguments {}.", path, arguments);

        let mut child = Command::new(path)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SandboxError::ProcessLaunch {
                path: path.to_string(),
                message: e.to_string(),
            })?;

        let output = Arc::new(Mutex::new(CapturedOutput::new(
            self.max_captured_output_bytes,
        )));
        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(Self::collect_lines(stdout, output.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(Self::collect_lines(stderr, output.clone()));
        }

        let wait_result = match timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait()).await.ok(),
            None => Some(child.wait().await),
        };

        let (completed, exit_code) = match wait_result {
            Some(Ok(status)) => (true, status.code()),
            Some(Err(e)) => {
                return Err(SandboxError::ProcessLaunch {
                    path: path.to_string(),
                    message: format!("failed waiting for process: {}", e),
                })
            }
            None => {
                if let Err(e) = child.kill().await {
                    log::warn!("Failed to kill timed out process {}: {}", path, e);
                }
                (false, None)
            }
        };

        for reader in readers {
            if !run_with_timeout(reader, OUTPUT_DRAIN_TIMEOUT).await {
                log::debug!("Gave up draining output of process {}", path);
            }
        }

        let (output_str, dropped_lines) = output
            .lock()
            .map(|captured| (captured.joined(), captured.dropped_lines))
            .unwrap_or_default();

        if dropped_lines > 0 {
            log::warn!(
                "Process {} produced more than {} bytes of output, dropped the first {} line(s)",
                path,
                self.max_captured_output_bytes,
                dropped_lines
            );
        }

        log::info!(
            "Process {} with arguments {} finished with status {}. Output: \n {}",
            path,
            arguments,
            if completed { "Completed" } else { "Timeout" },
            tail_chars(&output_str, MAX_LOGGED_OUTPUT_CHARS)
        );

        Ok(ProcessResult {
            completed,
            output: output_str,
            exit_code,
        })
    }
}

fn tail_chars(text: &str, max_chars: usize) -> &str {
    let char_count = text.chars().count();
    if char_count <= max_chars {
        return text;
    }
    match text.char_indices().nth(char_count - max_chars) {
        Some((index, _)) => &text[index..],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tail_chars() {
        assert_eq!(tail_chars("short", 10), "short");
        assert_eq!(tail_chars("abcdef", 3), "def");
        assert_eq!(tail_chars("ééééé", 2), "éé");
    }

    #[test]
    fn test_succeeded() {
        assert!(ProcessResult::new(true, "").succeeded());
        assert!(ProcessResult::new(true, "").with_exit_code(0).succeeded());
        assert!(!ProcessResult::new(true, "").with_exit_code(1).succeeded());
        assert!(!ProcessResult::new(false, "").succeeded());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_captures_stdout_and_stderr() {
        let runner = TokioProcessRunner::new();
        let result = runner
            .run_process(
                "sh",
                &["-c".to_string(), "echo out; echo err 1>&2".to_string()],
                Some(Duration::from_secs(10)),
            )
            .await
            .unwrap();

        assert!(result.completed);
        assert_eq!(result.exit_code, Some(0));
        assert!(result.output.contains("out"));
        assert!(result.output.contains("err"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_arguments_are_not_shell_split() {
        let runner = TokioProcessRunner::new();
        let result = runner
            .run_process(
                "printf",
                &["%s".to_string(), "A=has spaces \"and quotes\"".to_string()],
                None,
            )
            .await
            .unwrap();

        assert!(result.completed);
        assert_eq!(result.output, "A=has spaces \"and quotes\"");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_kills_process() {
        let runner = TokioProcessRunner::new();
        let started = std::time::Instant::now();
        let result = runner
            .run_process(
                "sleep",
                &["30".to_string()],
                Some(Duration::from_millis(200)),
            )
            .await
            .unwrap();

        assert!(!result.completed);
        assert!(result.exit_code.is_none());
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_invalid_utf8_does_not_stop_capture_or_timeout() {
        let runner = TokioProcessRunner::new();
        let started = std::time::Instant::now();
        let result = runner
            .run_process(
                "sh",
                &[
                    "-c".to_string(),
                    "printf 'caf\\351\\n'; sleep 0.2; echo still running; exec sleep 30".to_string(),
                ],
                Some(Duration::from_secs(1)),
            )
            .await
            .unwrap();

        assert!(!result.completed);
        assert!(started.elapsed() >= Duration::from_secs(1));
        assert!(result.output.contains("caf\u{FFFD}"));
        assert!(result.output.contains("still running"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_output_after_invalid_utf8_is_kept() {
        let runner = TokioProcessRunner::new();
        let result = runner
            .run_process(
                "sh",
                &[
                    "-c".to_string(),
                    "printf 'bad \\377 byte\\n'; i=0; while [ $i -lt 2000 ]; do echo line $i; i=$((i+1)); done; echo done".to_string(),
                ],
                Some(Duration::from_secs(10)),
            )
            .await
            .unwrap();

        assert!(result.completed);
        assert_eq!(result.exit_code, Some(0));
        assert!(result.output.starts_with("bad \u{FFFD} byte"));
        assert!(result.output.contains("line 1999"));
        assert!(result.output.ends_with("done"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_captured_output_keeps_the_tail() {
        let runner = TokioProcessRunner::new().with_output_limit(1000);
        let result = runner
            .run_process(
                "sh",
                &[
                    "-c".to_string(),
                    "i=0; while [ $i -lt 5000 ]; do echo line $i; i=$((i+1)); done".to_string(),
                ],
                Some(Duration::from_secs(10)),
            )
            .await
            .unwrap();

        assert!(result.completed);
        assert!(result.output.len() <= 1000 + 200);
        assert!(result.output.ends_with("line 4999"));
        assert!(!result.output.contains("line 0\n"));
    }

    #[test]
    fn test_captured_output_drops_oldest_lines() {
        let mut captured = CapturedOutput::new(10);
        captured.push("aaaa".to_string());
        captured.push("bbbb".to_string());
        captured.push("cccc".to_string());

        assert_eq!(captured.joined(), "bbbb\ncccc");
        assert_eq!(captured.dropped_lines, 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_is_still_completed() {
        let runner = TokioProcessRunner::new();
        let result = runner
            .run_process("sh", &["-c".to_string(), "exit 3".to_string()], None)
            .await
            .unwrap();

        assert!(result.completed);
        assert_eq!(result.exit_code, Some(3));
        assert!(!result.succeeded());
    }

    #[tokio::test]
    async fn test_missing_binary_is_launch_error() {
        let runner = TokioProcessRunner::new();
        let err = runner
            .run_process("/nonexistent/engine-binary", &[], None)
            .await
            .unwrap_err();

        assert!(matches!(err, SandboxError::ProcessLaunch { .. }));
        assert!(err.is_environment_fault());
    }
}
