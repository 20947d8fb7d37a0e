use std::fmt;
use std::process::{Command, Stdio};

/// A missing host tool, with a hint for installing it.
#[derive(Debug)]
pub struct MissingPrereq {
    pub name: &'static str,
    pub purpose: &'static str,
    pub install_hint: &'static str,
}

impl fmt::Display for MissingPrereq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "  - {}: {} (install: {})",
            self.name, self.purpose, self.install_hint
        )
    }
}

fn succeeds(program: &str, args: &[&str]) -> bool {
    Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok_and(|s| s.success())
}

fn command_exists(name: &str) -> bool {
    succeeds("which", &[name])
}

/// Tools needed to run stacks through `DockerCli`. Empty means ready.
pub fn check_docker_prereqs() -> Vec<MissingPrereq> {
    let mut missing = Vec::new();

    if !command_exists("docker") {
        missing.push(MissingPrereq {
            name: "docker",
            purpose: "container engine client",
            install_hint: "https://docs.docker.com/engine/install/ | apt install docker.io | dnf install moby-engine",
        });
    } else if !succeeds("docker", &["compose", "version"]) {
        missing.push(MissingPrereq {
            name: "docker compose",
            purpose: "compose project lifecycle",
            install_hint: "apt install docker-compose-plugin | dnf install docker-compose-plugin",
        });
    }

    missing
}

/// Tools needed to copy bind mounts to a remote host.
pub fn check_sync_prereqs() -> Vec<MissingPrereq> {
    let mut missing = Vec::new();

    for (name, purpose) in [
        ("ssh", "creating directories on the remote host"),
        ("scp", "copying bind-mount sources to the remote host"),
    ] {
        if !command_exists(name) {
            missing.push(MissingPrereq {
                name,
                purpose,
                install_hint: "apt install openssh-client | dnf install openssh-clients | pacman -S openssh",
            });
        }
    }

    missing
}

pub fn format_missing(missing: &[MissingPrereq]) -> String {
    use std::fmt::Write as _;
    let mut msg = String::from("missing prerequisites:\n");
    for m in missing {
        let _ = writeln!(msg, "{m}");
    }
    msg.push_str("\nQuay needs these tools to manage stacks on this host.");
    msg
}
