//! Compose definition loading and project normalization for Quay.
//!
//! This crate defines the schema layer: the `Project` / `Service` / `VolumeMount`
//! model, a pluggable `DefinitionLoader` with a YAML-backed `ComposeLoader`
//! (variable interpolation, layered environment, multi-file merge, absolute path
//! resolution), and `normalize`, which stamps identifying labels, resolves each
//! service's environment, and drops resources the runtime does not need.

pub mod environment;
pub mod image;
pub mod labels;
pub mod loader;
pub mod normalize;
pub mod project;
pub mod volume;

pub use environment::{interpolate, parse_env_str, read_env_file, EnvEntry, EnvMap};
pub use image::{image_repository, same_repository};
pub use labels::{identifying_labels, project_filter};
pub use loader::{ComposeLoader, DefinitionLoader, LoadOptions};
pub use normalize::normalize;
pub use project::{EnvFileRef, Project, Service};
pub use volume::{MountKind, VolumeMount};

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {}: {source}", path.display())]
    ParseYaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("failed to render project: {0}")]
    Render(#[from] serde_yaml::Error),
    #[error("invalid definition: {0}")]
    InvalidDefinition(String),
    #[error("invalid project name '{0}': must contain at least one of [a-z0-9]")]
    InvalidProjectName(String),
    #[error("required variable '{name}' is missing a value: {message}")]
    MissingVariable { name: String, message: String },
    #[error("invalid interpolation format in '{0}'")]
    InvalidInterpolation(String),
    #[error("invalid volume for service '{service}': {reason}")]
    InvalidVolume { service: String, reason: String },
    #[error("{}:{line}: {reason}", path.display())]
    EnvFile {
        path: PathBuf,
        line: usize,
        reason: String,
    },
}
