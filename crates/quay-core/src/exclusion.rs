use quay_schema::labels::SELF_MARKER_LABEL;
use quay_schema::{same_repository, Project, Service};
use tracing::debug;

/// Whether `service` runs Quay itself: its image is `self_image` under any tag or
/// digest, or it carries `io.quay.self=true`.
pub fn is_self_service(service: &Service, self_image: &str) -> bool {
    let marked = service
        .labels
        .get(SELF_MARKER_LABEL)
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"));
    marked || (service.has_image() && same_repository(&service.image, self_image))
}

/// Remove Quay's own services from a bulk request against a local engine.
///
/// An empty `services` list means "all"; when the project contains a self service
/// it is expanded to every other service name, in sorted order. Explicit lists
/// only lose the self names. Without a self service the request passes through
/// unchanged, and remote targets are never filtered.
pub fn without_self(
    project: &Project,
    services: &[String],
    self_image: &str,
    is_remote: bool,
) -> Vec<String> {
    if is_remote {
        return services.to_vec();
    }

    let self_names: Vec<&str> = project
        .services
        .values()
        .filter(|s| is_self_service(s, self_image))
        .map(|s| s.name.as_str())
        .collect();
    if self_names.is_empty() {
        return services.to_vec();
    }
    debug!(
        "excluding self services {self_names:?} from project {}",
        project.name
    );

    if services.is_empty() {
        project
            .service_names()
            .into_iter()
            .filter(|name| !self_names.contains(&name.as_str()))
            .collect()
    } else {
        services
            .iter()
            .filter(|name| !self_names.contains(&name.as_str()))
            .cloned()
            .collect()
    }
}
