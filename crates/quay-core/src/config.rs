use crate::CoreError;
use quay_remote::RemoteConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_SELF_IMAGE: &str = "ghcr.io/quay-dev/quay";

fn default_self_image() -> String {
    DEFAULT_SELF_IMAGE.to_owned()
}

/// Engine settings, stored as TOML.
///
/// ```toml
/// compose_root = "/srv/stacks"
/// self_image = "ghcr.io/quay-dev/quay"
///
/// [remote]
/// host = "edge-01"
/// user = "deploy"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Directory every stack lives under; bind mounts outside it are never synced.
    pub compose_root: PathBuf,
    /// Repository of Quay's own image, used to keep Quay out of bulk operations.
    #[serde(default = "default_self_image")]
    pub self_image: String,
    /// Defaults to `<compose_root>/.quay/locks`.
    #[serde(default)]
    pub lock_dir: Option<PathBuf>,
    /// Passed to the runtime client as `DOCKER_HOST`.
    #[serde(default)]
    pub docker_host: Option<String>,
    /// Present when the stacks run on a remote host.
    #[serde(default)]
    pub remote: Option<RemoteConfig>,
}

impl EngineConfig {
    pub fn new(compose_root: impl Into<PathBuf>) -> Self {
        Self {
            compose_root: compose_root.into(),
            self_image: default_self_image(),
            lock_dir: None,
            docker_host: None,
            remote: None,
        }
    }

    #[must_use]
    pub fn with_self_image(mut self, image: impl Into<String>) -> Self {
        self.self_image = image.into();
        self
    }

    #[must_use]
    pub fn with_lock_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.lock_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn with_remote(mut self, remote: RemoteConfig) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn lock_dir(&self) -> PathBuf {
        self.lock_dir
            .clone()
            .unwrap_or_else(|| self.compose_root.join(".quay").join("locks"))
    }

    pub fn is_remote(&self) -> bool {
        self.remote.is_some()
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if !self.compose_root.is_absolute() {
            return Err(CoreError::Config(format!(
                "compose_root must be absolute: {}",
                self.compose_root.display()
            )));
        }
        if self.self_image.trim().is_empty() {
            return Err(CoreError::Config("self_image is empty".to_owned()));
        }
        if let Some(remote) = &self.remote {
            remote
                .validate()
                .map_err(|e| CoreError::Config(e.to_string()))?;
        }
        Ok(())
    }

    /// Load config from `~/.config/quay/config.toml`.
    pub fn load_default() -> Result<Self, CoreError> {
        Self::load(&default_config_path()?)
    }

    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, CoreError> {
        let config: Self = toml::from_str(content)
            .map_err(|e| CoreError::Config(format!("invalid engine config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), CoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| CoreError::Config(format!("failed to serialize engine config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

fn default_config_path() -> Result<PathBuf, CoreError> {
    let home = std::env::var("HOME").map_err(|_| CoreError::Config("HOME not set".to_owned()))?;
    Ok(PathBuf::from(home).join(".config/quay/config.toml"))
}
