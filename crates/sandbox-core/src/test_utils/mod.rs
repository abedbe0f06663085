pub mod mock_process_runner;

pub use mock_process_runner::{FailingFileSystem, LaggingFileSystem, MockProcessRunner, ProcessLaunch};
