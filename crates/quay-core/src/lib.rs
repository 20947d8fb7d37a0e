//! Stack orchestration engine for Quay.
//!
//! This crate ties together project loading, the runtime client, and the remote
//! copy channel into the `Engine`: the API for bringing stacks up, stopping,
//! removing, restarting, pulling and updating them, and for listing their
//! containers and stats. It also provides bind-mount sync for remote hosts, the
//! filter that keeps Quay from stopping its own container, image-digest change
//! detection, and per-stack locking.

pub mod concurrency;
pub mod config;
pub mod engine;
pub mod exclusion;
pub mod introspect;
pub mod sync;
pub mod update;

pub use concurrency::{install_signal_handler, StackLock};
pub use config::EngineConfig;
pub use engine::{Engine, StackRef};
pub use exclusion::{is_self_service, without_self};
pub use introspect::StackSnapshot;
pub use sync::{sync_bind_mounts, SyncReport};
pub use update::{snapshot_images, ImageDigestSnapshot, UpdateOutcome};

pub use quay_runtime::CancelToken;

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("failed to load stack {}: {source}", path.display())]
    Load {
        path: PathBuf,
        #[source]
        source: quay_schema::SchemaError,
    },
    #[error(
        "sync of service '{service}' in project '{project}' failed for {}: {source}",
        path.display()
    )]
    Sync {
        project: String,
        service: String,
        path: PathBuf,
        #[source]
        source: quay_remote::RemoteError,
    },
    #[error("{op} failed for project '{project}': {source}")]
    Operation {
        op: &'static str,
        project: String,
        #[source]
        source: quay_runtime::RuntimeError,
    },
    #[error("failed to inspect project '{project}': {source}")]
    Introspection {
        project: String,
        #[source]
        source: quay_runtime::RuntimeError,
    },
    #[error("{op} cancelled for project '{project}'")]
    Cancelled { op: &'static str, project: String },
    #[error("stack lock error: {0}")]
    Lock(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Wrap a runtime failure for `op`, keeping cancellation distinct.
    pub(crate) fn operation(
        op: &'static str,
        project: &str,
        source: quay_runtime::RuntimeError,
    ) -> Self {
        match source {
            quay_runtime::RuntimeError::Cancelled => Self::Cancelled {
                op,
                project: project.to_owned(),
            },
            source => Self::Operation {
                op,
                project: project.to_owned(),
                source,
            },
        }
    }

    pub(crate) fn introspection(project: &str, source: quay_runtime::RuntimeError) -> Self {
        match source {
            quay_runtime::RuntimeError::Cancelled => Self::Cancelled {
                op: "inspect",
                project: project.to_owned(),
            },
            source => Self::Introspection {
                project: project.to_owned(),
                source,
            },
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}
