use crate::config::RemoteConfig;
use crate::{RemoteCopy, RemoteError};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::debug;

/// Copies files with the system `ssh` and `scp` clients.
///
/// Host keys and agent setup are left to the user's ssh configuration; the
/// channel runs in batch mode so it never prompts.
pub struct ScpChannel {
    config: RemoteConfig,
    ssh: PathBuf,
    scp: PathBuf,
}

impl ScpChannel {
    pub fn new(config: RemoteConfig) -> Result<Self, RemoteError> {
        config.validate()?;
        Ok(Self {
            config,
            ssh: PathBuf::from("ssh"),
            scp: PathBuf::from("scp"),
        })
    }

    #[must_use]
    pub fn with_binaries(mut self, ssh: impl Into<PathBuf>, scp: impl Into<PathBuf>) -> Self {
        self.ssh = ssh.into();
        self.scp = scp.into();
        self
    }

    pub fn config(&self) -> &RemoteConfig {
        &self.config
    }

    fn common_options(&self, port_flag: &str) -> Vec<String> {
        let mut args = vec![
            "-o".to_owned(),
            "BatchMode=yes".to_owned(),
            port_flag.to_owned(),
            self.config.port.to_string(),
        ];
        if let Some(identity) = &self.config.identity_file {
            args.push("-i".to_owned());
            args.push(identity.to_string_lossy().into_owned());
        }
        args
    }

    pub(crate) fn mkdir_args(&self, remote_dir: &Path) -> Vec<String> {
        let mut args = self.common_options("-p");
        args.push(self.config.destination());
        args.push("mkdir".to_owned());
        args.push("-p".to_owned());
        args.push(shell_quote(&remote_dir.to_string_lossy()));
        args
    }

    /// The legacy protocol (`-O`) always hands the remote path to a shell, so it
    /// is quoted the same way as for `mkdir`.
    pub(crate) fn scp_args(&self, local: &Path, remote_dir: &Path) -> Vec<String> {
        let mut args = vec!["-O".to_owned(), "-r".to_owned(), "-p".to_owned()];
        args.extend(self.common_options("-P"));
        args.push(local.to_string_lossy().into_owned());
        let dir = format!("{}/", remote_dir.to_string_lossy().trim_end_matches('/'));
        args.push(format!("{}:{}", self.config.destination(), shell_quote(&dir)));
        args
    }
}

/// Single-quote `raw` for the remote shell.
fn shell_quote(raw: &str) -> String {
    format!("'{}'", raw.replace('\'', r"'\''"))
}

fn run(program: &Path, args: &[String]) -> Result<(), RemoteError> {
    debug!("running {} {}", program.display(), args.join(" "));
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()?;
    if output.status.success() {
        return Ok(());
    }
    Err(RemoteError::CommandFailed {
        command: format!("{} {}", program.display(), args.join(" ")),
        status: output
            .status
            .code()
            .map_or_else(|| "terminated by signal".to_owned(), |c| format!("exit code {c}")),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
    })
}

impl RemoteCopy for ScpChannel {
    fn copy_to_remote(&self, local: &Path) -> Result<(), RemoteError> {
        if !local.is_absolute() {
            return Err(RemoteError::RelativePath(local.to_path_buf()));
        }
        if !local.exists() {
            return Err(RemoteError::NotFound(local.to_path_buf()));
        }
        let remote_dir = local.parent().unwrap_or_else(|| Path::new("/"));

        run(&self.ssh, &self.mkdir_args(remote_dir))?;
        run(&self.scp, &self.scp_args(local, remote_dir))?;
        debug!("copied {} to {}", local.display(), self.describe());
        Ok(())
    }

    fn describe(&self) -> String {
        format!("{}:{}", self.config.destination(), self.config.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> ScpChannel {
        ScpChannel::new(
            RemoteConfig::new("edge", "ops")
                .with_port(2222)
                .with_identity("/keys/id"),
        )
        .unwrap()
    }

    #[test]
    fn mkdir_targets_parent_directory() {
        let args = channel().mkdir_args(Path::new("/stacks/web/config"));
        assert_eq!(
            args,
            vec![
                "-o",
                "BatchMode=yes",
                "-p",
                "2222",
                "-i",
                "/keys/id",
                "ops@edge",
                "mkdir",
                "-p",
                "'/stacks/web/config'",
            ]
        );
    }

    #[test]
    fn scp_copies_into_identical_parent() {
        let args = channel().scp_args(Path::new("/stacks/web/config"), Path::new("/stacks/web"));
        assert_eq!(args[..3], ["-O", "-r", "-p"]);
        assert!(args.windows(2).any(|w| w == ["-P", "2222"]));
        assert_eq!(args[args.len() - 2], "/stacks/web/config");
        assert_eq!(args[args.len() - 1], "ops@edge:'/stacks/web/'");
    }

    #[test]
    fn scp_destination_with_spaces_is_quoted() {
        let args = channel().scp_args(
            Path::new("/srv/my stacks/web/config"),
            Path::new("/srv/my stacks/web"),
        );
        assert_eq!(args[args.len() - 2], "/srv/my stacks/web/config");
        assert_eq!(args[args.len() - 1], "ops@edge:'/srv/my stacks/web/'");
    }

    #[test]
    fn quoting_escapes_single_quotes() {
        assert_eq!(shell_quote("/srv/it's"), r"'/srv/it'\''s'");
    }

    #[test]
    fn relative_and_missing_paths_are_rejected() {
        let c = channel();
        assert!(matches!(
            c.copy_to_remote(Path::new("relative/dir")),
            Err(RemoteError::RelativePath(_))
        ));
        assert!(matches!(
            c.copy_to_remote(Path::new("/nonexistent/quay/src")),
            Err(RemoteError::NotFound(_))
        ));
    }

    #[test]
    fn invalid_config_is_rejected() {
        assert!(ScpChannel::new(RemoteConfig::new("", "ops")).is_err());
    }
}
