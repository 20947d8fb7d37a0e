use crate::backend::{
    ContainerFilter, ContainerStats, ContainerSummary, DownOptions, ImageInspect, PullOptions,
    RecreatePolicy, RestartOptions, RuntimeClient, StopOptions, UpOptions,
};
use crate::cancel::CancelToken;
use crate::RuntimeError;
use quay_schema::Project;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::Duration;
use tracing::debug;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Runtime client backed by the `docker` CLI and its `compose` plugin.
///
/// Compose commands receive the normalized project rendered to a temporary file,
/// so labels and resolved environment reach the engine exactly as loaded. A
/// remote engine is addressed through `DOCKER_HOST`.
pub struct DockerCli {
    binary: PathBuf,
    host: Option<String>,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("docker"),
            host: None,
        }
    }
}

impl DockerCli {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    #[must_use]
    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        if let Some(host) = &self.host {
            cmd.env("DOCKER_HOST", host);
        }
        cmd
    }

    fn compose(
        &self,
        project: &Project,
        args: &[String],
        cancel: &CancelToken,
    ) -> Result<(), RuntimeError> {
        cancel.check()?;
        let mut rendered = tempfile::Builder::new()
            .prefix(&format!("quay-{}-", project.name))
            .suffix(".yaml")
            .tempfile()?;
        rendered.write_all(project.to_compose_yaml()?.as_bytes())?;
        rendered.flush()?;

        let mut cmd = self.command();
        cmd.args(compose_prefix(project, rendered.path()));
        cmd.args(args);
        run_checked(cmd, cancel)?;
        Ok(())
    }
}

fn compose_prefix(project: &Project, file: &Path) -> Vec<String> {
    vec![
        "compose".to_owned(),
        "--project-name".to_owned(),
        project.name.clone(),
        "--project-directory".to_owned(),
        project.working_dir.to_string_lossy().into_owned(),
        "--file".to_owned(),
        file.to_string_lossy().into_owned(),
    ]
}

pub(crate) fn up_args(options: &UpOptions) -> Vec<String> {
    let mut args = vec!["up".to_owned(), "--detach".to_owned()];
    match options.recreate {
        RecreatePolicy::Force => args.push("--force-recreate".to_owned()),
        RecreatePolicy::Never => args.push("--no-recreate".to_owned()),
        RecreatePolicy::Diverged => {}
    }
    if options.recreate_dependencies == RecreatePolicy::Force {
        args.push("--always-recreate-deps".to_owned());
    }
    if options.remove_orphans {
        args.push("--remove-orphans".to_owned());
    }
    args.extend(options.services.iter().cloned());
    args
}

pub(crate) fn down_args(options: &DownOptions) -> Vec<String> {
    let mut args = vec!["down".to_owned()];
    if options.remove_orphans {
        args.push("--remove-orphans".to_owned());
    }
    if options.remove_volumes {
        args.push("--volumes".to_owned());
    }
    args.extend(options.services.iter().cloned());
    args
}

pub(crate) fn pull_args(options: &PullOptions) -> Vec<String> {
    let mut args = vec!["pull".to_owned(), "--quiet".to_owned()];
    if options.ignore_failures {
        args.push("--ignore-pull-failures".to_owned());
    }
    args.extend(options.services.iter().cloned());
    args
}

fn verb_args(verb: &str, services: &[String]) -> Vec<String> {
    let mut args = vec![verb.to_owned()];
    args.extend(services.iter().cloned());
    args
}

fn describe(cmd: &Command) -> String {
    let mut parts = vec![cmd.get_program().to_string_lossy().into_owned()];
    parts.extend(cmd.get_args().map(|a| a.to_string_lossy().into_owned()));
    parts.join(" ")
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    })
}

fn kill(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

struct Finished {
    success: bool,
    status: String,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

/// Run `cmd`, polling `cancel` while it executes. A cancelled child is killed.
fn run(mut cmd: Command, cancel: &CancelToken) -> Result<Finished, RuntimeError> {
    cancel.check()?;
    debug!("running {}", describe(&cmd));
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let status = loop {
        if cancel.is_cancelled() {
            kill(&mut child);
            return Err(RuntimeError::Cancelled);
        }
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(e) => {
                kill(&mut child);
                return Err(e.into());
            }
        }
    };

    let join = |handle: thread::JoinHandle<Vec<u8>>| {
        handle
            .join()
            .map_err(|_| RuntimeError::ExecFailed("output reader panicked".to_owned()))
    };

    Ok(Finished {
        success: status.success(),
        status: status
            .code()
            .map_or_else(|| "terminated by signal".to_owned(), |c| format!("exit code {c}")),
        stdout: join(stdout)?,
        stderr: join(stderr)?,
    })
}

fn run_checked(cmd: Command, cancel: &CancelToken) -> Result<Vec<u8>, RuntimeError> {
    let command = describe(&cmd);
    let finished = run(cmd, cancel)?;
    if finished.success {
        Ok(finished.stdout)
    } else {
        Err(RuntimeError::CommandFailed {
            command,
            status: finished.status,
            stderr: String::from_utf8_lossy(&finished.stderr).trim().to_owned(),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PsLine {
    #[serde(rename = "ID")]
    id: String,
    #[serde(default)]
    image: String,
    #[serde(default)]
    names: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    labels: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StatsLine {
    #[serde(rename = "ID", default)]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    #[serde(rename = "CPUPerc")]
    cpu_perc: String,
    #[serde(default)]
    mem_perc: String,
    #[serde(default)]
    mem_usage: String,
    #[serde(rename = "NetIO", default)]
    net_io: String,
    #[serde(rename = "BlockIO", default)]
    block_io: String,
    #[serde(rename = "PIDs", default)]
    pids: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ImageLine {
    id: String,
    #[serde(default)]
    repo_digests: Option<Vec<String>>,
}

fn json_lines<'a, T: Deserialize<'a>>(output: &'a str) -> Result<Vec<T>, RuntimeError> {
    output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|l| serde_json::from_str(l).map_err(|e| RuntimeError::Parse(format!("{e}: {l}"))))
        .collect()
}

/// `docker ps` prints labels as `k=v,k=v`. Values may themselves contain commas
/// (the config-files label does), so a segment without `=` continues the
/// previous value.
pub(crate) fn parse_label_list(raw: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    let mut last: Option<String> = None;
    for segment in raw.split(',') {
        if segment.is_empty() {
            continue;
        }
        match segment.split_once('=') {
            Some((k, v)) if !k.contains('/') => {
                labels.insert(k.to_owned(), v.to_owned());
                last = Some(k.to_owned());
            }
            _ => {
                if let Some(key) = &last {
                    if let Some(value) = labels.get_mut(key) {
                        value.push(',');
                        value.push_str(segment);
                    }
                }
            }
        }
    }
    labels
}

pub(crate) fn parse_ps_output(output: &str) -> Result<Vec<ContainerSummary>, RuntimeError> {
    Ok(json_lines::<PsLine>(output)?
        .into_iter()
        .map(|line| ContainerSummary {
            id: line.id,
            names: line
                .names
                .split(',')
                .filter(|n| !n.is_empty())
                .map(str::to_owned)
                .collect(),
            image: line.image,
            state: line.state,
            status: line.status,
            labels: parse_label_list(&line.labels),
        })
        .collect())
}

fn parse_percent(raw: &str) -> f64 {
    raw.trim().trim_end_matches('%').parse().unwrap_or(0.0)
}

pub(crate) fn parse_stats_output(output: &str) -> Result<Vec<ContainerStats>, RuntimeError> {
    Ok(json_lines::<StatsLine>(output)?
        .into_iter()
        .map(|line| ContainerStats {
            id: line.id,
            name: line.name,
            cpu_percent: parse_percent(&line.cpu_perc),
            memory_percent: parse_percent(&line.mem_perc),
            memory_usage: line.mem_usage,
            network_io: line.net_io,
            block_io: line.block_io,
            pids: line.pids.trim().parse().unwrap_or(0),
        })
        .collect())
}

pub(crate) fn parse_image_output(output: &str) -> Result<ImageInspect, RuntimeError> {
    let mut lines = json_lines::<ImageLine>(output)?;
    if lines.is_empty() {
        return Err(RuntimeError::Parse("empty image inspect output".to_owned()));
    }
    let line = lines.swap_remove(0);
    Ok(ImageInspect {
        id: line.id,
        repo_digests: line.repo_digests.unwrap_or_default(),
    })
}

impl RuntimeClient for DockerCli {
    fn name(&self) -> &str {
        "docker"
    }

    fn up(
        &self,
        project: &Project,
        options: &UpOptions,
        cancel: &CancelToken,
    ) -> Result<(), RuntimeError> {
        self.compose(project, &up_args(options), cancel)
    }

    fn down(
        &self,
        project: &Project,
        options: &DownOptions,
        cancel: &CancelToken,
    ) -> Result<(), RuntimeError> {
        self.compose(project, &down_args(options), cancel)
    }

    fn stop(
        &self,
        project: &Project,
        options: &StopOptions,
        cancel: &CancelToken,
    ) -> Result<(), RuntimeError> {
        self.compose(project, &verb_args("stop", &options.services), cancel)
    }

    fn restart(
        &self,
        project: &Project,
        options: &RestartOptions,
        cancel: &CancelToken,
    ) -> Result<(), RuntimeError> {
        self.compose(project, &verb_args("restart", &options.services), cancel)
    }

    fn pull(
        &self,
        project: &Project,
        options: &PullOptions,
        cancel: &CancelToken,
    ) -> Result<(), RuntimeError> {
        self.compose(project, &pull_args(options), cancel)
    }

    fn list_containers(
        &self,
        filter: &ContainerFilter,
        cancel: &CancelToken,
    ) -> Result<Vec<ContainerSummary>, RuntimeError> {
        let mut cmd = self.command();
        cmd.args(["ps", "--no-trunc", "--format", "{{json .}}"]);
        if filter.all {
            cmd.arg("--all");
        }
        for label in &filter.labels {
            cmd.args(["--filter", &format!("label={label}")]);
        }
        let stdout = run_checked(cmd, cancel)?;
        parse_ps_output(&String::from_utf8_lossy(&stdout))
    }

    fn container_stats(
        &self,
        containers: &[ContainerSummary],
        cancel: &CancelToken,
    ) -> Result<Vec<ContainerStats>, RuntimeError> {
        if containers.is_empty() {
            return Ok(Vec::new());
        }
        let mut cmd = self.command();
        cmd.args(["stats", "--no-stream", "--no-trunc", "--format", "{{json .}}"]);
        cmd.args(containers.iter().map(|c| c.id.as_str()));
        let stdout = run_checked(cmd, cancel)?;
        parse_stats_output(&String::from_utf8_lossy(&stdout))
    }

    fn inspect_image(
        &self,
        reference: &str,
        cancel: &CancelToken,
    ) -> Result<ImageInspect, RuntimeError> {
        let mut cmd = self.command();
        cmd.args(["image", "inspect", "--format", "{{json .}}", reference]);
        let finished = run(cmd, cancel)?;
        if !finished.success {
            let stderr = String::from_utf8_lossy(&finished.stderr);
            if stderr.contains("No such image") || stderr.contains("not found") {
                return Err(RuntimeError::ImageNotFound(reference.to_owned()));
            }
            return Err(RuntimeError::CommandFailed {
                command: format!("docker image inspect {reference}"),
                status: finished.status,
                stderr: stderr.trim().to_owned(),
            });
        }
        parse_image_output(&String::from_utf8_lossy(&finished.stdout))
    }
}
