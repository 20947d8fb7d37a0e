//! Container runtime clients for Quay stacks.
//!
//! This crate implements the execution seam: the `RuntimeClient` trait with
//! project-scoped lifecycle calls (up, down, stop, restart, pull), label-filtered
//! container listing and stats, and image inspection; a `DockerCli` client driving
//! the `docker` / `docker compose` CLI; a recording `MockRuntime`; cooperative
//! cancellation via `CancelToken`; and prerequisite checks.

pub mod backend;
pub mod cancel;
pub mod docker;
pub mod mock;
pub mod prereq;

pub use backend::{
    ContainerFilter, ContainerStats, ContainerSummary, DownOptions, ImageInspect, PullOptions,
    RecreatePolicy, RestartOptions, RuntimeClient, StopOptions, UpOptions,
};
pub use cancel::CancelToken;
pub use docker::DockerCli;
pub use mock::{MockCall, MockOp, MockRuntime};
pub use prereq::{check_docker_prereqs, check_sync_prereqs, format_missing, MissingPrereq};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("runtime '{0}' is not available on this system")]
    Unavailable(String),
    #[error("`{command}` failed ({status}): {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },
    #[error("failed to parse runtime output: {0}")]
    Parse(String),
    #[error("image not found: {0}")]
    ImageNotFound(String),
    #[error("operation cancelled")]
    Cancelled,
    #[error("project error: {0}")]
    Project(#[from] quay_schema::SchemaError),
    #[error("runtime execution failed: {0}")]
    ExecFailed(String),
}
