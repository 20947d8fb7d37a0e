use crate::backend::{
    ContainerFilter, ContainerStats, ContainerSummary, DownOptions, ImageInspect, PullOptions,
    RecreatePolicy, RestartOptions, RuntimeClient, StopOptions, UpOptions,
};
use crate::cancel::CancelToken;
use crate::RuntimeError;
use quay_schema::{image_repository, Project};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    Up,
    Down,
    Stop,
    Restart,
    Pull,
    List,
    Stats,
    Inspect,
}

/// One recorded call against the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCall {
    pub op: MockOp,
    /// Project name, or the image reference for `Inspect`.
    pub target: String,
    pub services: Vec<String>,
    /// Present on `Up` calls.
    pub up: Option<UpOptions>,
}

#[derive(Default)]
struct State {
    calls: Vec<MockCall>,
    /// Images present locally.
    images: HashMap<String, ImageInspect>,
    /// Digests the registry will hand out on the next pull.
    registry: HashMap<String, String>,
    containers: BTreeMap<String, ContainerSummary>,
    failures: HashMap<MockOp, String>,
    published: u64,
}

/// In-memory runtime that simulates containers and a registry.
///
/// `pull` copies staged registry digests into the local image table, `up` creates
/// or replaces containers labelled like the real runtime would, and every call is
/// recorded for assertions.
#[derive(Default)]
pub struct MockRuntime {
    state: Mutex<State>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, RuntimeError> {
        self.state
            .lock()
            .map_err(|e| RuntimeError::ExecFailed(format!("mutex poisoned: {e}")))
    }

    fn guard(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Make `reference` present locally with the given registry digest.
    pub fn set_image(&self, reference: &str, digest: &str) {
        self.guard()
            .images
            .insert(reference.to_owned(), image_with_digest(reference, digest));
    }

    /// Make `reference` present locally without a registry digest.
    pub fn set_local_image(&self, reference: &str, id: &str) {
        self.guard().images.insert(
            reference.to_owned(),
            ImageInspect {
                id: id.to_owned(),
                repo_digests: Vec::new(),
            },
        );
    }

    /// The next pull of `reference` yields `digest`.
    pub fn stage_pull(&self, reference: &str, digest: &str) {
        self.guard()
            .registry
            .insert(reference.to_owned(), digest.to_owned());
    }

    /// Publish a fresh digest for `reference` in the registry and return it.
    pub fn publish(&self, reference: &str) -> String {
        let mut state = self.guard();
        state.published += 1;
        let digest = format!(
            "sha256:{}",
            blake3::hash(format!("{reference}#{}", state.published).as_bytes()).to_hex()
        );
        state.registry.insert(reference.to_owned(), digest.clone());
        digest
    }

    /// Make every subsequent call of `op` fail with `message`.
    pub fn fail_on(&self, op: MockOp, message: &str) {
        self.guard().failures.insert(op, message.to_owned());
    }

    pub fn clear_failure(&self, op: MockOp) {
        self.guard().failures.remove(&op);
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.guard().calls.clone()
    }

    pub fn calls_of(&self, op: MockOp) -> Vec<MockCall> {
        self.guard()
            .calls
            .iter()
            .filter(|c| c.op == op)
            .cloned()
            .collect()
    }

    pub fn up_calls(&self) -> Vec<MockCall> {
        self.calls_of(MockOp::Up)
    }

    /// All simulated containers, running or not.
    pub fn containers(&self) -> Vec<ContainerSummary> {
        self.guard().containers.values().cloned().collect()
    }

    /// Record the call and return the injected failure for `op`, if any.
    fn enter(
        state: &mut State,
        op: MockOp,
        target: &str,
        services: &[String],
        up: Option<&UpOptions>,
    ) -> Result<(), RuntimeError> {
        state.calls.push(MockCall {
            op,
            target: target.to_owned(),
            services: services.to_vec(),
            up: up.cloned(),
        });
        match state.failures.get(&op) {
            Some(message) => Err(RuntimeError::ExecFailed(message.clone())),
            None => Ok(()),
        }
    }
}

fn image_with_digest(reference: &str, digest: &str) -> ImageInspect {
    ImageInspect {
        id: format!("sha256:{}", blake3::hash(digest.as_bytes()).to_hex()),
        repo_digests: vec![format!("{}@{digest}", image_repository(reference))],
    }
}

fn container_id(project: &str, service: &str) -> String {
    format!("{project}-{service}-1")
}

/// Resolve the service selection: empty means all; unknown names are rejected.
fn targets(project: &Project, services: &[String]) -> Result<Vec<String>, RuntimeError> {
    if services.is_empty() {
        return Ok(project.service_names());
    }
    for name in services {
        if project.service(name).is_none() {
            return Err(RuntimeError::ExecFailed(format!(
                "no such service: {name} in project {}",
                project.name
            )));
        }
    }
    Ok(services.to_vec())
}

fn set_state(state: &mut State, project: &Project, services: &[String], running: bool) {
    for service in services {
        if let Some(container) = state
            .containers
            .get_mut(&container_id(&project.name, service))
        {
            if running {
                "running".clone_into(&mut container.state);
                "Up Less than a second".clone_into(&mut container.status);
            } else {
                "exited".clone_into(&mut container.state);
                "Exited (0)".clone_into(&mut container.status);
            }
        }
    }
}

impl RuntimeClient for MockRuntime {
    fn name(&self) -> &str {
        "mock"
    }

    fn up(
        &self,
        project: &Project,
        options: &UpOptions,
        cancel: &CancelToken,
    ) -> Result<(), RuntimeError> {
        cancel.check()?;
        let mut state = self.lock()?;
        Self::enter(&mut state, MockOp::Up, &project.name, &options.services, Some(options))?;

        for name in targets(project, &options.services)? {
            let Some(service) = project.service(&name) else {
                continue;
            };
            let id = container_id(&project.name, &name);
            let keep = state.containers.get(&id).is_some_and(|c| {
                c.is_running()
                    && c.image == service.image
                    && options.recreate != RecreatePolicy::Force
            });
            if keep {
                continue;
            }
            if options.recreate == RecreatePolicy::Never && state.containers.contains_key(&id) {
                set_state(&mut state, project, std::slice::from_ref(&name), true);
                continue;
            }
            state.containers.insert(
                id.clone(),
                ContainerSummary {
                    id: id.clone(),
                    names: vec![id],
                    image: service.image.clone(),
                    state: "running".to_owned(),
                    status: "Up Less than a second".to_owned(),
                    labels: service.effective_labels(),
                },
            );
        }
        Ok(())
    }

    fn down(
        &self,
        project: &Project,
        options: &DownOptions,
        cancel: &CancelToken,
    ) -> Result<(), RuntimeError> {
        cancel.check()?;
        let mut state = self.lock()?;
        Self::enter(&mut state, MockOp::Down, &project.name, &options.services, None)?;
        for name in targets(project, &options.services)? {
            state.containers.remove(&container_id(&project.name, &name));
        }
        Ok(())
    }

    fn stop(
        &self,
        project: &Project,
        options: &StopOptions,
        cancel: &CancelToken,
    ) -> Result<(), RuntimeError> {
        cancel.check()?;
        let mut state = self.lock()?;
        Self::enter(&mut state, MockOp::Stop, &project.name, &options.services, None)?;
        let services = targets(project, &options.services)?;
        set_state(&mut state, project, &services, false);
        Ok(())
    }

    fn restart(
        &self,
        project: &Project,
        options: &RestartOptions,
        cancel: &CancelToken,
    ) -> Result<(), RuntimeError> {
        cancel.check()?;
        let mut state = self.lock()?;
        Self::enter(&mut state, MockOp::Restart, &project.name, &options.services, None)?;
        let services = targets(project, &options.services)?;
        set_state(&mut state, project, &services, true);
        Ok(())
    }

    fn pull(
        &self,
        project: &Project,
        options: &PullOptions,
        cancel: &CancelToken,
    ) -> Result<(), RuntimeError> {
        cancel.check()?;
        let mut state = self.lock()?;
        Self::enter(&mut state, MockOp::Pull, &project.name, &options.services, None)?;

        for name in targets(project, &options.services)? {
            let Some(service) = project.service(&name) else {
                continue;
            };
            if !service.has_image() {
                continue;
            }
            let reference = service.image.clone();
            if let Some(digest) = state.registry.get(&reference).cloned() {
                state
                    .images
                    .insert(reference.clone(), image_with_digest(&reference, &digest));
            } else if !state.images.contains_key(&reference) {
                let digest = format!(
                    "sha256:{}",
                    blake3::hash(reference.as_bytes()).to_hex()
                );
                state
                    .images
                    .insert(reference.clone(), image_with_digest(&reference, &digest));
            }
        }
        Ok(())
    }

    fn list_containers(
        &self,
        filter: &ContainerFilter,
        cancel: &CancelToken,
    ) -> Result<Vec<ContainerSummary>, RuntimeError> {
        cancel.check()?;
        let mut state = self.lock()?;
        Self::enter(&mut state, MockOp::List, "", &filter.labels, None)?;
        Ok(state
            .containers
            .values()
            .filter(|c| filter.matches(c))
            .cloned()
            .collect())
    }

    fn container_stats(
        &self,
        containers: &[ContainerSummary],
        cancel: &CancelToken,
    ) -> Result<Vec<ContainerStats>, RuntimeError> {
        cancel.check()?;
        let mut state = self.lock()?;
        let ids: Vec<String> = containers.iter().map(|c| c.id.clone()).collect();
        Self::enter(&mut state, MockOp::Stats, "", &ids, None)?;
        Ok(containers
            .iter()
            .filter(|c| state.containers.contains_key(&c.id))
            .map(|c| ContainerStats {
                id: c.id.clone(),
                name: c.name().to_owned(),
                cpu_percent: 0.5,
                memory_percent: 1.0,
                memory_usage: "16MiB / 1.5GiB".to_owned(),
                network_io: "0B / 0B".to_owned(),
                block_io: "0B / 0B".to_owned(),
                pids: 1,
            })
            .collect())
    }

    fn inspect_image(
        &self,
        reference: &str,
        cancel: &CancelToken,
    ) -> Result<ImageInspect, RuntimeError> {
        cancel.check()?;
        let mut state = self.lock()?;
        Self::enter(&mut state, MockOp::Inspect, reference, &[], None)?;
        state
            .images
            .get(reference)
            .cloned()
            .ok_or_else(|| RuntimeError::ImageNotFound(reference.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quay_schema::labels::{PROJECT_LABEL, SERVICE_LABEL};
    use quay_schema::{normalize, project_filter, Service};

    fn project() -> Project {
        normalize(
            Project::new("web", "/stacks")
                .with_service(Service::new("api", "registry/app:1.0"))
                .with_service(Service::new("db", "postgres:16")),
        )
        .unwrap()
    }

    #[test]
    fn up_creates_labelled_containers() {
        let mock = MockRuntime::new();
        let p = project();
        mock.up(&p, &UpOptions::default(), &CancelToken::new())
            .unwrap();

        let listed = mock
            .list_containers(
                &ContainerFilter::label(project_filter("web"), false),
                &CancelToken::new(),
            )
            .unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().all(|c| c.labels[PROJECT_LABEL] == "web"));
        assert!(listed.iter().any(|c| c.labels[SERVICE_LABEL] == "db"));
    }

    #[test]
    fn stop_hides_from_running_listing() {
        let mock = MockRuntime::new();
        let p = project();
        let cancel = CancelToken::new();
        mock.up(&p, &UpOptions::default(), &cancel).unwrap();
        mock.stop(
            &p,
            &StopOptions {
                services: vec!["api".to_owned()],
            },
            &cancel,
        )
        .unwrap();

        let running = mock
            .list_containers(&ContainerFilter::label(project_filter("web"), false), &cancel)
            .unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].service(), Some("db"));

        mock.down(&p, &DownOptions::default(), &cancel).unwrap();
        assert!(mock.containers().is_empty());
    }

    #[test]
    fn pull_applies_staged_digest() {
        let mock = MockRuntime::new();
        let p = project();
        let cancel = CancelToken::new();
        mock.set_image("registry/app:1.0", "sha256:old");
        let before = mock.inspect_image("registry/app:1.0", &cancel).unwrap();

        mock.pull(&p, &PullOptions::default(), &cancel).unwrap();
        let unchanged = mock.inspect_image("registry/app:1.0", &cancel).unwrap();
        assert_eq!(before, unchanged);

        let digest = mock.publish("registry/app:1.0");
        mock.pull(&p, &PullOptions::default(), &cancel).unwrap();
        let after = mock.inspect_image("registry/app:1.0", &cancel).unwrap();
        assert_eq!(after.identity(), format!("registry/app@{digest}"));
    }

    #[test]
    fn missing_image_is_not_found() {
        let mock = MockRuntime::new();
        assert!(matches!(
            mock.inspect_image("nope:latest", &CancelToken::new()),
            Err(RuntimeError::ImageNotFound(_))
        ));
    }

    #[test]
    fn injected_failure_is_recorded_and_returned() {
        let mock = MockRuntime::new();
        mock.fail_on(MockOp::Up, "engine down");
        let err = mock
            .up(&project(), &UpOptions::default(), &CancelToken::new())
            .unwrap_err();
        assert!(err.to_string().contains("engine down"));
        assert_eq!(mock.up_calls().len(), 1);
        assert!(mock.containers().is_empty());
    }

    #[test]
    fn unknown_service_is_rejected() {
        let mock = MockRuntime::new();
        let err = mock
            .restart(
                &project(),
                &RestartOptions {
                    services: vec!["ghost".to_owned()],
                },
                &CancelToken::new(),
            )
            .unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn cancelled_token_records_nothing() {
        let mock = MockRuntime::new();
        let cancel = CancelToken::new();
        cancel.cancel();
        assert!(matches!(
            mock.up(&project(), &UpOptions::default(), &cancel),
            Err(RuntimeError::Cancelled)
        ));
        assert!(mock.calls().is_empty());
    }
}
