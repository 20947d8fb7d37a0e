//! Identifying labels stamped on every service so containers can be found again
//! by label filter.

use std::collections::BTreeMap;
use std::path::PathBuf;

pub const PROJECT_LABEL: &str = "com.docker.compose.project";
pub const SERVICE_LABEL: &str = "com.docker.compose.service";
pub const VERSION_LABEL: &str = "com.docker.compose.version";
pub const WORKING_DIR_LABEL: &str = "com.docker.compose.project.working_dir";
pub const CONFIG_FILES_LABEL: &str = "com.docker.compose.project.config_files";
pub const ONEOFF_LABEL: &str = "com.docker.compose.oneoff";

/// Compose version recorded in `VERSION_LABEL`.
pub const COMPOSE_VERSION: &str = "2.29.7";

/// Explicit marker for the service running the orchestrator itself.
pub const SELF_MARKER_LABEL: &str = "io.quay.self";

pub fn identifying_labels(
    project_name: &str,
    service_name: &str,
    compose_files: &[PathBuf],
) -> BTreeMap<String, String> {
    let files = compose_files
        .iter()
        .map(|f| f.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(",");

    BTreeMap::from([
        (PROJECT_LABEL.to_owned(), project_name.to_owned()),
        (SERVICE_LABEL.to_owned(), service_name.to_owned()),
        (VERSION_LABEL.to_owned(), COMPOSE_VERSION.to_owned()),
        (WORKING_DIR_LABEL.to_owned(), "/".to_owned()),
        (CONFIG_FILES_LABEL.to_owned(), files),
        // `run` overrides this for one-off containers
        (ONEOFF_LABEL.to_owned(), "False".to_owned()),
    ])
}

/// `label=value` filter selecting every container of a project.
pub fn project_filter(project_name: &str) -> String {
    format!("{PROJECT_LABEL}={project_name}")
}
