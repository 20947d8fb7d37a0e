use crate::concurrency::StackLock;
use crate::config::EngineConfig;
use crate::exclusion::{is_self_service, without_self};
use crate::introspect::{self, StackSnapshot};
use crate::sync::{sync_bind_mounts, SyncReport};
use crate::update::{snapshot_images, UpdateOutcome};
use crate::CoreError;
use quay_remote::{RemoteCopy, ScpChannel};
use quay_runtime::{
    CancelToken, ContainerStats, ContainerSummary, DockerCli, DownOptions, PullOptions,
    RestartOptions, RuntimeClient, StopOptions, UpOptions,
};
use quay_schema::{normalize, ComposeLoader, DefinitionLoader, LoadOptions, Project};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Which stack an operation targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackRef {
    /// Definition file, relative to the compose root or absolute.
    pub file: PathBuf,
    /// Overrides the name derived from the definition.
    pub project_name: Option<String>,
}

impl StackRef {
    pub fn new(file: impl Into<PathBuf>) -> Self {
        Self {
            file: file.into(),
            project_name: None,
        }
    }

    #[must_use]
    pub fn with_project_name(mut self, name: impl Into<String>) -> Self {
        self.project_name = Some(name.into());
        self
    }
}

/// Drives stack lifecycle against one container engine.
///
/// Mutating operations load and normalize the stack, take its lock, drop Quay's
/// own services from the request when the engine is local, copy bind mounts when
/// it is remote, and then call the runtime. Listing and stats go straight to the
/// runtime with a project label filter.
pub struct Engine {
    config: EngineConfig,
    loader: Box<dyn DefinitionLoader>,
    load_options: LoadOptions,
    runtime: Arc<dyn RuntimeClient>,
    remote: Option<Arc<dyn RemoteCopy>>,
    cancel: CancelToken,
}

impl Engine {
    /// Engine for a local runtime, loading definitions with `ComposeLoader`.
    pub fn new(config: EngineConfig, runtime: Arc<dyn RuntimeClient>) -> Self {
        Self {
            config,
            loader: Box::new(ComposeLoader::new()),
            load_options: LoadOptions::default(),
            runtime,
            remote: None,
            cancel: CancelToken::new(),
        }
    }

    /// Engine backed by the docker CLI, plus an scp channel when `config.remote`
    /// is set.
    pub fn from_config(config: EngineConfig) -> Result<Self, CoreError> {
        config.validate()?;
        let mut docker = DockerCli::new();
        if let Some(host) = &config.docker_host {
            docker = docker.with_host(host.clone());
        }
        let remote: Option<Arc<dyn RemoteCopy>> = match &config.remote {
            Some(remote) => Some(Arc::new(
                ScpChannel::new(remote.clone()).map_err(|e| CoreError::Config(e.to_string()))?,
            )),
            None => None,
        };
        let mut engine = Self::new(config, Arc::new(docker));
        engine.remote = remote;
        Ok(engine)
    }

    /// Treat the target as remote, syncing bind mounts through `channel`.
    #[must_use]
    pub fn with_remote(mut self, channel: Arc<dyn RemoteCopy>) -> Self {
        self.remote = Some(channel);
        self
    }

    #[must_use]
    pub fn with_loader(mut self, loader: Box<dyn DefinitionLoader>) -> Self {
        self.loader = loader;
        self
    }

    #[must_use]
    pub fn with_load_options(mut self, options: LoadOptions) -> Self {
        self.load_options = options;
        self
    }

    #[must_use]
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn is_remote(&self) -> bool {
        self.remote.is_some()
    }

    /// Load and normalize a stack.
    pub fn load(&self, stack: &StackRef) -> Result<Project, CoreError> {
        let mut options = self.load_options.clone();
        if let Some(name) = &stack.project_name {
            options.project_name = Some(name.clone());
        }
        let load_err = |source| CoreError::Load {
            path: stack.file.clone(),
            source,
        };
        let project = self
            .loader
            .load(&self.config.compose_root, &[stack.file.clone()], &options)
            .map_err(load_err)?;
        let project = normalize(project).map_err(load_err)?;
        debug!(
            "loaded project {} with services {:?}",
            project.name,
            project.service_names()
        );
        Ok(project)
    }

    fn lock(&self, project: &Project) -> Result<StackLock, CoreError> {
        StackLock::acquire(&self.config.lock_dir(), &project.name)
    }

    /// Apply self-exclusion. `None` means nothing is left to act on.
    fn select(&self, project: &Project, services: &[String]) -> Option<Vec<String>> {
        let selected = without_self(project, services, &self.config.self_image, self.is_remote());
        if !selected.is_empty() {
            return Some(selected);
        }
        let has_self = !self.is_remote()
            && project
                .services
                .values()
                .any(|s| is_self_service(s, &self.config.self_image));
        if services.is_empty() && !has_self {
            Some(selected)
        } else {
            info!("no services of {} left to act on after excluding quay itself", project.name);
            None
        }
    }

    fn sync_project(&self, project: &Project) -> Result<SyncReport, CoreError> {
        match &self.remote {
            Some(channel) => sync_bind_mounts(project, channel.as_ref(), &self.cancel),
            None => Ok(SyncReport::default()),
        }
    }

    fn deploy(&self, project: &Project, services: Vec<String>) -> Result<(), CoreError> {
        self.sync_project(project)?;
        self.runtime
            .up(project, &UpOptions::force_recreate(services), &self.cancel)
            .map_err(|e| CoreError::operation("up", &project.name, e))
    }

    /// Copy the stack's bind-mount sources to the remote host. Local engines copy
    /// nothing and return an empty report.
    pub fn sync(&self, stack: &StackRef) -> Result<SyncReport, CoreError> {
        let project = self.load(stack)?;
        let _lock = self.lock(&project)?;
        self.sync_project(&project)
    }

    /// Recreate `services` (empty = all), leaving dependencies and orphans alone.
    pub fn up(&self, stack: &StackRef, services: &[String]) -> Result<(), CoreError> {
        let project = self.load(stack)?;
        let _lock = self.lock(&project)?;
        info!("starting {} services {services:?}", project.name);
        let Some(services) = self.select(&project, services) else {
            return Ok(());
        };
        self.deploy(&project, services)
    }

    pub fn stop(&self, stack: &StackRef, services: &[String]) -> Result<(), CoreError> {
        let project = self.load(stack)?;
        let _lock = self.lock(&project)?;
        info!("stopping {} services {services:?}", project.name);
        let Some(services) = self.select(&project, services) else {
            return Ok(());
        };
        self.runtime
            .stop(&project, &StopOptions { services }, &self.cancel)
            .map_err(|e| CoreError::operation("stop", &project.name, e))
    }

    /// Stop and remove containers. Orphans and volumes are kept.
    pub fn down(&self, stack: &StackRef, services: &[String]) -> Result<(), CoreError> {
        let project = self.load(stack)?;
        let _lock = self.lock(&project)?;
        info!("removing {} services {services:?}", project.name);
        let Some(services) = self.select(&project, services) else {
            return Ok(());
        };
        let options = DownOptions {
            services,
            remove_orphans: false,
            remove_volumes: false,
        };
        self.runtime
            .down(&project, &options, &self.cancel)
            .map_err(|e| CoreError::operation("down", &project.name, e))
    }

    pub fn restart(&self, stack: &StackRef, services: &[String]) -> Result<(), CoreError> {
        let project = self.load(stack)?;
        let _lock = self.lock(&project)?;
        info!("restarting {} services {services:?}", project.name);
        let Some(services) = self.select(&project, services) else {
            return Ok(());
        };
        self.sync_project(&project)?;
        self.runtime
            .restart(&project, &RestartOptions { services }, &self.cancel)
            .map_err(|e| CoreError::operation("restart", &project.name, e))
    }

    /// Pull images for every service of the stack.
    pub fn pull(&self, stack: &StackRef) -> Result<(), CoreError> {
        let project = self.load(stack)?;
        let _lock = self.lock(&project)?;
        info!("pulling images for {}", project.name);
        self.pull_project(&project)
    }

    fn pull_project(&self, project: &Project) -> Result<(), CoreError> {
        self.runtime
            .pull(project, &PullOptions::default(), &self.cancel)
            .map_err(|e| CoreError::operation("pull", &project.name, e))
    }

    /// Pull, and redeploy `services` only if some image actually changed.
    ///
    /// Images are always pulled. When only Quay itself was requested, changes are
    /// reported as `Pulled` and nothing is restarted.
    pub fn update(
        &self,
        stack: &StackRef,
        services: &[String],
    ) -> Result<UpdateOutcome, CoreError> {
        let project = self.load(stack)?;
        let _lock = self.lock(&project)?;
        info!("updating {} services {services:?}", project.name);
        let selected = self.select(&project, services);

        let before = snapshot_images(&project, self.runtime.as_ref(), &self.cancel)?;
        self.pull_project(&project)?;
        let after = snapshot_images(&project, self.runtime.as_ref(), &self.cancel)?;

        if before == after {
            info!("images of {} already up to date", project.name);
            return Ok(UpdateOutcome::AlreadyCurrent);
        }

        let changed = before.changed_services(&after);
        let Some(services) = selected else {
            info!("new images for {}: {changed:?}, nothing to redeploy", project.name);
            return Ok(UpdateOutcome::Pulled { changed });
        };
        info!("new images for {}: {changed:?}, redeploying", project.name);
        self.deploy(&project, services)?;
        Ok(UpdateOutcome::Redeployed { changed })
    }

    /// Containers of `project`; stopped ones too when `all` is set.
    pub fn list(&self, project: &str, all: bool) -> Result<Vec<ContainerSummary>, CoreError> {
        introspect::list_containers(self.runtime.as_ref(), project, all, &self.cancel)
    }

    /// Resource usage of the running containers of `project`.
    pub fn stats(&self, project: &str) -> Result<Vec<ContainerStats>, CoreError> {
        introspect::container_stats(self.runtime.as_ref(), project, &self.cancel)
    }

    pub fn snapshot(&self, project: &str, all: bool) -> Result<StackSnapshot, CoreError> {
        introspect::capture(self.runtime.as_ref(), project, all, &self.cancel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quay_remote::RemoteConfig;
    use quay_runtime::{MockOp, MockRuntime, RecreatePolicy};
    use quay_schema::EnvMap;

    const DEFINITION: &str = r"
services:
  api:
    image: registry/app:1.0
  quay:
    image: ghcr.io/quay-dev/quay:0.4
";

    fn setup() -> (tempfile::TempDir, Arc<MockRuntime>, Engine) {
        let dir = tempfile::tempdir().unwrap();
        let stack_dir = dir.path().join("ops");
        std::fs::create_dir_all(&stack_dir).unwrap();
        std::fs::write(stack_dir.join("compose.yaml"), DEFINITION).unwrap();

        let runtime = Arc::new(MockRuntime::new());
        let engine = Engine::new(EngineConfig::new(dir.path()), runtime.clone())
            .with_load_options(LoadOptions {
                process_env: Some(EnvMap::new()),
                ..LoadOptions::default()
            });
        (dir, runtime, engine)
    }

    fn stack() -> StackRef {
        StackRef::new("ops/compose.yaml")
    }

    #[test]
    fn load_names_project_after_directory() {
        let (_dir, _runtime, engine) = setup();
        let project = engine.load(&stack()).unwrap();
        assert_eq!(project.name, "ops");
        let renamed = engine.load(&stack().with_project_name("infra")).unwrap();
        assert_eq!(renamed.name, "infra");
    }

    #[test]
    fn relative_root_fails_to_load() {
        let runtime = Arc::new(MockRuntime::new());
        let engine = Engine::new(EngineConfig::new("stacks"), runtime.clone());
        let err = engine.up(&stack(), &[]).unwrap_err();
        assert!(matches!(
            err,
            CoreError::Load {
                source: quay_schema::SchemaError::InvalidDefinition(_),
                ..
            }
        ));
        assert!(runtime.calls().is_empty());
    }

    #[test]
    fn stop_all_spares_self() {
        let (_dir, runtime, engine) = setup();
        engine.stop(&stack(), &[]).unwrap();
        let calls = runtime.calls_of(MockOp::Stop);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].services, vec!["api".to_owned()]);
    }

    #[test]
    fn only_self_requested_skips_runtime() {
        let (_dir, runtime, engine) = setup();
        engine.down(&stack(), &["quay".to_owned()]).unwrap();
        assert!(runtime.calls().is_empty());
    }

    #[test]
    fn up_forces_named_services_only() {
        let (_dir, runtime, engine) = setup();
        engine.up(&stack(), &["api".to_owned()]).unwrap();
        let up = runtime.up_calls()[0].up.clone().unwrap();
        assert_eq!(up.services, vec!["api".to_owned()]);
        assert_eq!(up.recreate, RecreatePolicy::Force);
        assert_eq!(up.recreate_dependencies, RecreatePolicy::Never);
        assert!(!up.remove_orphans);
    }

    #[test]
    fn runtime_errors_carry_operation_and_project() {
        let (_dir, runtime, engine) = setup();
        runtime.fail_on(MockOp::Restart, "engine down");
        let err = engine.restart(&stack(), &[]).unwrap_err();
        assert!(matches!(
            err,
            CoreError::Operation { op: "restart", ref project, .. } if project == "ops"
        ));
    }

    #[test]
    fn cancelled_engine_reports_cancellation() {
        let (_dir, _runtime, engine) = setup();
        engine.cancel_token().cancel();
        let err = engine.pull(&stack()).unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn from_config_wires_remote_channel() {
        let local = Engine::from_config(EngineConfig::new("/srv/stacks")).unwrap();
        assert!(!local.is_remote());

        let remote = Engine::from_config(
            EngineConfig::new("/srv/stacks").with_remote(RemoteConfig::new("edge", "ops")),
        )
        .unwrap();
        assert!(remote.is_remote());
    }
}
