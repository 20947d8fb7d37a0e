use crate::CoreError;
use quay_runtime::{CancelToken, ContainerFilter, ContainerStats, ContainerSummary, RuntimeClient};
use quay_schema::project_filter;
use serde::Serialize;

/// Containers and resource usage of one project at a point in time.
#[derive(Debug, Clone, Serialize)]
pub struct StackSnapshot {
    pub project: String,
    /// RFC 3339 capture time.
    pub captured_at: String,
    pub containers: Vec<ContainerSummary>,
    /// Running containers only.
    pub stats: Vec<ContainerStats>,
}

impl StackSnapshot {
    pub fn running(&self) -> impl Iterator<Item = &ContainerSummary> {
        self.containers.iter().filter(|c| c.is_running())
    }

    pub fn total_cpu_percent(&self) -> f64 {
        self.stats.iter().map(|s| s.cpu_percent).sum()
    }

    pub fn total_memory_percent(&self) -> f64 {
        self.stats.iter().map(|s| s.memory_percent).sum()
    }
}

pub fn list_containers(
    runtime: &dyn RuntimeClient,
    project: &str,
    all: bool,
    cancel: &CancelToken,
) -> Result<Vec<ContainerSummary>, CoreError> {
    runtime
        .list_containers(&ContainerFilter::label(project_filter(project), all), cancel)
        .map_err(|e| CoreError::introspection(project, e))
}

pub fn container_stats(
    runtime: &dyn RuntimeClient,
    project: &str,
    cancel: &CancelToken,
) -> Result<Vec<ContainerStats>, CoreError> {
    let running = list_containers(runtime, project, false, cancel)?;
    runtime
        .container_stats(&running, cancel)
        .map_err(|e| CoreError::introspection(project, e))
}

pub fn capture(
    runtime: &dyn RuntimeClient,
    project: &str,
    all: bool,
    cancel: &CancelToken,
) -> Result<StackSnapshot, CoreError> {
    let containers = list_containers(runtime, project, all, cancel)?;
    let running: Vec<ContainerSummary> = containers
        .iter()
        .filter(|c| c.is_running())
        .cloned()
        .collect();
    let stats = runtime
        .container_stats(&running, cancel)
        .map_err(|e| CoreError::introspection(project, e))?;

    Ok(StackSnapshot {
        project: project.to_owned(),
        captured_at: chrono::Utc::now().to_rfc3339(),
        containers,
        stats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use quay_runtime::{MockOp, MockRuntime, StopOptions, UpOptions};
    use quay_schema::{normalize, Project, Service};

    fn running_stack(runtime: &MockRuntime) {
        let project = normalize(
            Project::new("web", "/stacks")
                .with_service(Service::new("api", "registry/app:1.0"))
                .with_service(Service::new("db", "postgres:16")),
        )
        .unwrap();
        let other = normalize(
            Project::new("other", "/stacks").with_service(Service::new("cache", "redis:7")),
        )
        .unwrap();
        let cancel = CancelToken::new();
        runtime.up(&project, &UpOptions::default(), &cancel).unwrap();
        runtime.up(&other, &UpOptions::default(), &cancel).unwrap();
        runtime
            .stop(
                &project,
                &StopOptions {
                    services: vec!["db".to_owned()],
                },
                &cancel,
            )
            .unwrap();
    }

    #[test]
    fn listing_is_scoped_to_project() {
        let runtime = MockRuntime::new();
        running_stack(&runtime);
        let cancel = CancelToken::new();

        let running = list_containers(&runtime, "web", false, &cancel).unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].service(), Some("api"));

        let all = list_containers(&runtime, "web", true, &cancel).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn stats_cover_running_containers_only() {
        let runtime = MockRuntime::new();
        running_stack(&runtime);
        let stats = container_stats(&runtime, "web", &CancelToken::new()).unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].name, "web-api-1");
    }

    #[test]
    fn snapshot_combines_listing_and_stats() {
        let runtime = MockRuntime::new();
        running_stack(&runtime);
        let snapshot = capture(&runtime, "web", true, &CancelToken::new()).unwrap();
        assert_eq!(snapshot.project, "web");
        assert_eq!(snapshot.containers.len(), 2);
        assert_eq!(snapshot.running().count(), 1);
        assert_eq!(snapshot.stats.len(), 1);
        assert!(snapshot.total_cpu_percent() > 0.0);
        assert!(chrono::DateTime::parse_from_rfc3339(&snapshot.captured_at).is_ok());
    }

    #[test]
    fn runtime_failure_is_wrapped_with_project() {
        let runtime = MockRuntime::new();
        runtime.fail_on(MockOp::List, "daemon unreachable");
        let err = list_containers(&runtime, "web", false, &CancelToken::new()).unwrap_err();
        assert!(matches!(err, CoreError::Introspection { ref project, .. } if project == "web"));
    }
}
