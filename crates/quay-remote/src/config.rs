use crate::RemoteError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

fn default_port() -> u16 {
    22
}

/// Connection details for a remote host. Authentication material is referenced,
/// never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub host: String,
    pub user: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub identity_file: Option<PathBuf>,
}

impl RemoteConfig {
    pub fn new(host: &str, user: &str) -> Self {
        Self {
            host: host.trim().to_owned(),
            user: user.trim().to_owned(),
            port: default_port(),
            identity_file: None,
        }
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn with_identity(mut self, identity_file: impl Into<PathBuf>) -> Self {
        self.identity_file = Some(identity_file.into());
        self
    }

    /// `user@host`, as ssh and scp expect it.
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    pub fn validate(&self) -> Result<(), RemoteError> {
        if self.host.is_empty() {
            return Err(RemoteError::Config("remote host is empty".to_owned()));
        }
        if self.user.is_empty() {
            return Err(RemoteError::Config("remote user is empty".to_owned()));
        }
        if self.port == 0 {
            return Err(RemoteError::Config("remote port must be non-zero".to_owned()));
        }
        Ok(())
    }

    /// Load config from `~/.config/quay/remote.json`.
    pub fn load_default() -> Result<Self, RemoteError> {
        let path = default_config_path()?;
        Self::load(&path)
    }

    pub fn load(path: &Path) -> Result<Self, RemoteError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| RemoteError::Config(format!("invalid remote config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), RemoteError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| RemoteError::Serialization(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

fn default_config_path() -> Result<PathBuf, RemoteError> {
    let home = std::env::var("HOME").map_err(|_| RemoteError::Config("HOME not set".to_owned()))?;
    Ok(PathBuf::from(home).join(".config/quay/remote.json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/remote.json");

        let config = RemoteConfig::new("edge-01.lan", "deploy")
            .with_port(2222)
            .with_identity("/home/deploy/.ssh/id_ed25519");
        config.save(&path).unwrap();

        let loaded = RemoteConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.destination(), "deploy@edge-01.lan");
    }

    #[test]
    fn port_defaults_to_ssh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("remote.json");
        std::fs::write(&path, r#"{"host":"edge","user":"ops"}"#).unwrap();

        let loaded = RemoteConfig::load(&path).unwrap();
        assert_eq!(loaded.port, 22);
        assert!(loaded.identity_file.is_none());
    }

    #[test]
    fn empty_host_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("remote.json");
        std::fs::write(&path, r#"{"host":"","user":"ops"}"#).unwrap();
        assert!(matches!(
            RemoteConfig::load(&path),
            Err(RemoteError::Config(_))
        ));
    }

    #[test]
    fn invalid_json_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("remote.json");
        std::fs::write(&path, "host = edge").unwrap();
        assert!(matches!(
            RemoteConfig::load(&path),
            Err(RemoteError::Config(_))
        ));
    }
}
