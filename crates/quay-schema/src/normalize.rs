use crate::environment::{read_env_file, EnvMap};
use crate::labels::identifying_labels;
use crate::project::{Project, Service};
use crate::volume::MountKind;
use crate::SchemaError;
use serde_yaml::Value;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Canonicalize a freshly loaded project for the runtime.
///
/// Services outside the active profiles are dropped, every remaining service is
/// stamped with its identifying labels, service environments are resolved from
/// env files and the project environment, and top-level volumes, networks,
/// secrets and configs that no service references are removed.
///
/// Running this twice yields the same project.
pub fn normalize(mut project: Project) -> Result<Project, SchemaError> {
    drop_inactive_services(&mut project);
    stamp_labels(&mut project);
    resolve_service_environment(&mut project)?;
    drop_unused_resources(&mut project);
    Ok(project)
}

fn drop_inactive_services(project: &mut Project) {
    let active = project.profiles.clone();
    project.services.retain(|name, service| {
        let enabled = service.is_enabled(&active);
        if !enabled {
            debug!("service {name} disabled: profiles {:?} not active", service.profiles);
        }
        enabled
    });
}

fn stamp_labels(project: &mut Project) {
    for (name, service) in &mut project.services {
        service.custom_labels = identifying_labels(&project.name, name, &project.compose_files);
    }
}

fn resolve_service_environment(project: &mut Project) -> Result<(), SchemaError> {
    for service in project.services.values_mut() {
        service.environment = resolved_environment(service, &project.environment)?;
    }
    Ok(())
}

fn resolved_environment(
    service: &Service,
    project_env: &EnvMap,
) -> Result<BTreeMap<String, Option<String>>, SchemaError> {
    let mut resolved: BTreeMap<String, Option<String>> = BTreeMap::new();

    for env_file in &service.env_files {
        if !env_file.path.is_file() {
            if env_file.required {
                return Err(SchemaError::Io {
                    path: env_file.path.clone(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        format!("env_file of service '{}' not found", service.name),
                    ),
                });
            }
            debug!("optional env_file {} not found", env_file.path.display());
            continue;
        }
        for (key, value) in read_env_file(&env_file.path)? {
            let value = value.or_else(|| project_env.get(&key).cloned());
            resolved.insert(key, value);
        }
    }

    for (key, value) in &service.environment {
        let value = value.clone().or_else(|| project_env.get(key).cloned());
        resolved.insert(key.clone(), value);
    }

    Ok(resolved)
}

fn drop_unused_resources(project: &mut Project) {
    let mut volumes = BTreeSet::new();
    let mut networks = BTreeSet::new();
    let mut secrets = BTreeSet::new();
    let mut configs = BTreeSet::new();

    for service in project.services.values() {
        for mount in &service.volumes {
            if mount.kind == MountKind::Volume && !mount.source.is_empty() {
                volumes.insert(mount.source.clone());
            }
        }

        match service.extra.get("networks") {
            Some(value) => networks.extend(referenced_names(value)),
            None if !service.extra.contains_key("network_mode") => {
                networks.insert("default".to_owned());
            }
            None => {}
        }
        if let Some(value) = service.extra.get("secrets") {
            secrets.extend(referenced_names(value));
        }
        if let Some(value) = service.extra.get("configs") {
            configs.extend(referenced_names(value));
        }
    }

    project.volumes.retain(|name, _| volumes.contains(name));
    project.networks.retain(|name, _| networks.contains(name));
    project.secrets.retain(|name, _| secrets.contains(name));
    project.configs.retain(|name, _| configs.contains(name));
}

/// Names referenced by a `networks`/`secrets`/`configs` service key, which may be
/// a list of names, a list of `{source: name}` mappings, or a mapping keyed by name.
fn referenced_names(value: &Value) -> Vec<String> {
    match value {
        Value::Sequence(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(name) => Some(name.clone()),
                Value::Mapping(map) => map.get("source").and_then(Value::as_str).map(str::to_owned),
                _ => None,
            })
            .collect(),
        Value::Mapping(map) => map
            .keys()
            .filter_map(Value::as_str)
            .map(str::to_owned)
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::{CONFIG_FILES_LABEL, PROJECT_LABEL, SERVICE_LABEL};
    use crate::project::EnvFileRef;
    use crate::volume::VolumeMount;
    use std::path::PathBuf;

    fn project() -> Project {
        let mut project = Project::new("web", "/stacks");
        project.compose_files = vec![PathBuf::from("/stacks/web/compose.yaml")];
        project
            .with_service(Service::new("api", "registry/app:1.0"))
            .with_service(Service::new("worker", "registry/app:1.0"))
    }

    #[test]
    fn stamps_identifying_labels() {
        let normalized = normalize(project()).unwrap();
        let api = normalized.service("api").unwrap();
        assert_eq!(api.custom_labels[PROJECT_LABEL], "web");
        assert_eq!(api.custom_labels[SERVICE_LABEL], "api");
        assert_eq!(api.custom_labels[CONFIG_FILES_LABEL], "/stacks/web/compose.yaml");
    }

    #[test]
    fn normalization_is_idempotent() {
        let once = normalize(project()).unwrap();
        let twice = normalize(once.clone()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn value_less_entries_resolve_from_project_env() {
        let mut p = project();
        p.environment.insert("TOKEN".to_owned(), "s3cret".to_owned());
        let api = p.services.get_mut("api").unwrap();
        api.environment.insert("TOKEN".to_owned(), None);
        api.environment.insert("ABSENT".to_owned(), None);
        api.environment.insert("MODE".to_owned(), Some("prod".to_owned()));

        let normalized = normalize(p).unwrap();
        let env = &normalized.service("api").unwrap().environment;
        assert_eq!(env["TOKEN"], Some("s3cret".to_owned()));
        assert_eq!(env["ABSENT"], None);
        assert_eq!(env["MODE"], Some("prod".to_owned()));
    }

    #[test]
    fn environment_block_overrides_env_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("api.env");
        std::fs::write(&file, "MODE=dev\nREGION=eu\n").unwrap();

        let mut p = project();
        let api = p.services.get_mut("api").unwrap();
        api.env_files.push(EnvFileRef {
            path: file,
            required: true,
        });
        api.environment.insert("MODE".to_owned(), Some("prod".to_owned()));

        let normalized = normalize(p).unwrap();
        let env = &normalized.service("api").unwrap().environment;
        assert_eq!(env["MODE"], Some("prod".to_owned()));
        assert_eq!(env["REGION"], Some("eu".to_owned()));
    }

    #[test]
    fn missing_required_env_file_fails_optional_is_skipped() {
        let mut p = project();
        p.services.get_mut("api").unwrap().env_files.push(EnvFileRef {
            path: PathBuf::from("/nonexistent/optional.env"),
            required: false,
        });
        assert!(normalize(p.clone()).is_ok());

        p.services.get_mut("api").unwrap().env_files.push(EnvFileRef {
            path: PathBuf::from("/nonexistent/required.env"),
            required: true,
        });
        assert!(normalize(p).is_err());
    }

    #[test]
    fn drops_inactive_profiles_and_unused_resources() {
        let mut p = project();
        let mut debug = Service::new("debug", "busybox");
        debug.profiles = vec!["tools".to_owned()];
        debug.volumes.push(VolumeMount {
            kind: MountKind::Volume,
            source: "scratch".to_owned(),
            target: "/scratch".to_owned(),
            read_only: false,
            options: BTreeMap::new(),
        });
        p = p.with_service(debug);
        p.services.get_mut("api").unwrap().volumes.push(VolumeMount {
            kind: MountKind::Volume,
            source: "data".to_owned(),
            target: "/data".to_owned(),
            read_only: false,
            options: BTreeMap::new(),
        });
        p.volumes.insert("data".to_owned(), Value::Null);
        p.volumes.insert("scratch".to_owned(), Value::Null);
        p.networks.insert("default".to_owned(), Value::Null);
        p.networks.insert("unused".to_owned(), Value::Null);

        let normalized = normalize(p).unwrap();
        assert!(normalized.service("debug").is_none());
        assert_eq!(normalized.volumes.keys().collect::<Vec<_>>(), vec!["data"]);
        assert_eq!(normalized.networks.keys().collect::<Vec<_>>(), vec!["default"]);
    }

    #[test]
    fn referenced_names_accepts_all_forms() {
        let list: Value = serde_yaml::from_str("[front, {source: back}]").unwrap();
        assert_eq!(referenced_names(&list), vec!["front", "back"]);
        let map: Value = serde_yaml::from_str("{front: {aliases: [a]}, back: null}").unwrap();
        let mut names = referenced_names(&map);
        names.sort();
        assert_eq!(names, vec!["back", "front"]);
    }
}
