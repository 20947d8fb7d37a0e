use crate::cancel::CancelToken;
use crate::RuntimeError;
use quay_schema::labels::SERVICE_LABEL;
use quay_schema::Project;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// When existing containers are replaced on `up`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecreatePolicy {
    /// Only when the configuration or image changed.
    #[default]
    Diverged,
    Force,
    Never,
}

/// An empty `services` list means every service in every option struct below.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UpOptions {
    pub services: Vec<String>,
    pub recreate: RecreatePolicy,
    pub recreate_dependencies: RecreatePolicy,
    pub remove_orphans: bool,
}

impl UpOptions {
    /// Recreate exactly `services`, leaving their dependencies to the runtime.
    pub fn force_recreate(services: Vec<String>) -> Self {
        Self {
            services,
            recreate: RecreatePolicy::Force,
            recreate_dependencies: RecreatePolicy::Never,
            remove_orphans: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DownOptions {
    pub services: Vec<String>,
    pub remove_orphans: bool,
    pub remove_volumes: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StopOptions {
    pub services: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RestartOptions {
    pub services: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PullOptions {
    pub services: Vec<String>,
    pub ignore_failures: bool,
}

/// Label-scoped container query.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContainerFilter {
    /// `key=value` pairs; a container must carry all of them.
    pub labels: Vec<String>,
    /// Include stopped containers.
    pub all: bool,
}

impl ContainerFilter {
    pub fn label(label: impl Into<String>, all: bool) -> Self {
        Self {
            labels: vec![label.into()],
            all,
        }
    }

    pub fn matches(&self, container: &ContainerSummary) -> bool {
        if !self.all && !container.is_running() {
            return false;
        }
        self.labels.iter().all(|filter| match filter.split_once('=') {
            Some((k, v)) => container.labels.get(k).is_some_and(|actual| actual == v),
            None => container.labels.contains_key(filter.as_str()),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ContainerSummary {
    pub id: String,
    pub names: Vec<String>,
    pub image: String,
    /// Lifecycle state, e.g. `running`, `exited`, `created`.
    pub state: String,
    /// Human readable status, e.g. `Up 3 minutes`.
    pub status: String,
    pub labels: BTreeMap<String, String>,
}

impl ContainerSummary {
    pub fn is_running(&self) -> bool {
        self.state.eq_ignore_ascii_case("running")
    }

    pub fn name(&self) -> &str {
        self.names
            .first()
            .map_or(self.id.as_str(), |n| n.trim_start_matches('/'))
    }

    pub fn service(&self) -> Option<&str> {
        self.labels.get(SERVICE_LABEL).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ContainerStats {
    pub id: String,
    pub name: String,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    /// `used / limit`, as reported by the runtime.
    pub memory_usage: String,
    pub network_io: String,
    pub block_io: String,
    pub pids: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ImageInspect {
    pub id: String,
    pub repo_digests: Vec<String>,
}

impl ImageInspect {
    /// Registry digest when the image has one, otherwise the local image id.
    pub fn identity(&self) -> &str {
        self.repo_digests
            .first()
            .map_or(self.id.as_str(), String::as_str)
    }
}

/// Project-scoped access to a container engine.
///
/// Every call takes the shared `CancelToken`; implementations stop waiting and
/// return `RuntimeError::Cancelled` once it fires. Handles are long-lived and
/// shared; callers never close them.
pub trait RuntimeClient: Send + Sync {
    fn name(&self) -> &str;

    fn up(
        &self,
        project: &Project,
        options: &UpOptions,
        cancel: &CancelToken,
    ) -> Result<(), RuntimeError>;

    /// Stop and remove containers.
    fn down(
        &self,
        project: &Project,
        options: &DownOptions,
        cancel: &CancelToken,
    ) -> Result<(), RuntimeError>;

    fn stop(
        &self,
        project: &Project,
        options: &StopOptions,
        cancel: &CancelToken,
    ) -> Result<(), RuntimeError>;

    fn restart(
        &self,
        project: &Project,
        options: &RestartOptions,
        cancel: &CancelToken,
    ) -> Result<(), RuntimeError>;

    fn pull(
        &self,
        project: &Project,
        options: &PullOptions,
        cancel: &CancelToken,
    ) -> Result<(), RuntimeError>;

    fn list_containers(
        &self,
        filter: &ContainerFilter,
        cancel: &CancelToken,
    ) -> Result<Vec<ContainerSummary>, RuntimeError>;

    fn container_stats(
        &self,
        containers: &[ContainerSummary],
        cancel: &CancelToken,
    ) -> Result<Vec<ContainerStats>, RuntimeError>;

    /// Fails with `RuntimeError::ImageNotFound` when the image is not present locally.
    fn inspect_image(
        &self,
        reference: &str,
        cancel: &CancelToken,
    ) -> Result<ImageInspect, RuntimeError>;
}
