//! Operating-system collaborators: process launching and the shared
//! exchange storage.

pub mod filesystem;
pub mod process;

pub use filesystem::{FileSystem, LocalFileSystem};
pub use process::{ProcessResult, ProcessRunner, TokioProcessRunner};
