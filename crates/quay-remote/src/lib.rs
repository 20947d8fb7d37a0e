//! File transfer to remote Quay hosts.
//!
//! A remote target runs its containers on another machine, so bind-mount sources
//! must exist there before the runtime starts anything. This crate provides the
//! `RemoteCopy` channel trait, an `ssh`/`scp` implementation, a recording double
//! for tests, and the JSON connection config.

pub mod config;
pub mod mock;
pub mod scp;

pub use config::RemoteConfig;
pub use mock::{CopyRecord, RecordingChannel};
pub use scp::ScpChannel;

use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("remote I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("`{command}` failed ({status}): {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },
    #[error("local path is not absolute: {}", .0.display())]
    RelativePath(PathBuf),
    #[error("local path does not exist: {}", .0.display())]
    NotFound(PathBuf),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("remote config error: {0}")]
    Config(String),
    #[error("transfer rejected: {0}")]
    Rejected(String),
}

/// One-way copy channel to a remote host.
///
/// Implementations copy `local` (file or directory, recursively) to the same
/// absolute path on the remote side, creating missing parent directories. The
/// channel is shared and long-lived; callers never close it.
pub trait RemoteCopy: Send + Sync {
    fn copy_to_remote(&self, local: &Path) -> Result<(), RemoteError>;

    /// Human readable destination, for logs.
    fn describe(&self) -> String;
}
