use crate::environment::{interpolate_value, EnvMap, EnvironmentBuilder};
use crate::project::{EnvFileRef, Project, Service};
use crate::volume::{parse_volume, resolve_host_path};
use crate::SchemaError;
use serde::Deserialize;
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Turns definition files into a `Project`.
///
/// Implementations resolve the environment, interpolate variables and make every
/// path reference absolute. Labeling and service environment resolution happen
/// afterwards in [`crate::normalize`].
pub trait DefinitionLoader: Send + Sync {
    fn load(
        &self,
        root: &Path,
        files: &[PathBuf],
        options: &LoadOptions,
    ) -> Result<Project, SchemaError>;
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Overrides the `name:` key, `COMPOSE_PROJECT_NAME`, and the directory name.
    pub project_name: Option<String>,
    /// Extra env files layered after the root `.env`, relative to the root.
    pub env_files: Vec<PathBuf>,
    /// Profiles enabled in addition to `COMPOSE_PROFILES`.
    pub profiles: Vec<String>,
    /// Process environment to layer. `None` reads the real process environment.
    pub process_env: Option<EnvMap>,
}

/// YAML definition loader.
///
/// Environment precedence, lowest first: `<root>/.env`, explicit env files, the
/// process environment, then `<working_dir>/.env`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ComposeLoader;

impl ComposeLoader {
    pub fn new() -> Self {
        Self
    }
}

#[derive(Debug, Deserialize)]
struct RawDefinition {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    services: BTreeMap<String, RawService>,
    #[serde(default)]
    volumes: BTreeMap<String, Value>,
    #[serde(default)]
    networks: BTreeMap<String, Value>,
    #[serde(default)]
    secrets: BTreeMap<String, Value>,
    #[serde(default)]
    configs: BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct RawService {
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    volumes: Vec<Value>,
    #[serde(default)]
    labels: Option<Value>,
    #[serde(default)]
    environment: Option<Value>,
    #[serde(default)]
    env_file: Option<Value>,
    #[serde(default)]
    profiles: Vec<String>,
    #[serde(flatten)]
    extra: BTreeMap<String, Value>,
}

impl DefinitionLoader for ComposeLoader {
    fn load(
        &self,
        root: &Path,
        files: &[PathBuf],
        options: &LoadOptions,
    ) -> Result<Project, SchemaError> {
        let Some(first) = files.first() else {
            return Err(SchemaError::InvalidDefinition(
                "no definition files given".to_owned(),
            ));
        };

        let raw_root = root.to_string_lossy();
        if !root.is_absolute() && !raw_root.starts_with('~') {
            return Err(SchemaError::InvalidDefinition(format!(
                "compose root must be absolute: {raw_root}"
            )));
        }
        let root = resolve_host_path(&raw_root, Path::new("/"), None);
        let compose_files: Vec<PathBuf> = files
            .iter()
            .map(|f| resolve_host_path(&f.to_string_lossy(), &root, None))
            .collect();
        let first = resolve_host_path(&first.to_string_lossy(), &root, None);
        let working_dir = first.parent().unwrap_or(&root).to_path_buf();
        debug!(
            "loading project from {} (working dir {})",
            first.display(),
            working_dir.display()
        );

        let environment = build_environment(&root, &working_dir, options)?;
        let home = environment.get("HOME").map(PathBuf::from);

        let mut merged = Value::Mapping(serde_yaml::Mapping::new());
        for path in &compose_files {
            let content = std::fs::read_to_string(path).map_err(|source| SchemaError::Io {
                path: path.clone(),
                source,
            })?;
            let mut doc: Value =
                serde_yaml::from_str(&content).map_err(|source| SchemaError::ParseYaml {
                    path: path.clone(),
                    source,
                })?;
            if doc.is_null() {
                continue;
            }
            interpolate_value(&mut doc, &environment)?;
            merge_values(&mut merged, doc);
        }

        let raw: RawDefinition =
            serde_yaml::from_value(merged).map_err(|source| SchemaError::ParseYaml {
                path: first.clone(),
                source,
            })?;

        let name = resolve_project_name(options, raw.name.as_deref(), &environment, &working_dir)?;

        let mut services = BTreeMap::new();
        for (service_name, raw_service) in raw.services {
            let service =
                build_service(&service_name, raw_service, &working_dir, home.as_deref())?;
            services.insert(service_name, service);
        }

        let profiles = active_profiles(&environment, &options.profiles);

        Ok(Project {
            name,
            root_dir: root,
            working_dir,
            compose_files,
            services,
            environment,
            profiles,
            volumes: raw.volumes,
            networks: raw.networks,
            secrets: raw.secrets,
            configs: raw.configs,
        })
    }
}

fn build_environment(
    root: &Path,
    working_dir: &Path,
    options: &LoadOptions,
) -> Result<EnvMap, SchemaError> {
    let mut builder = EnvironmentBuilder::new();

    let defaults = root.join(".env");
    if defaults.is_file() {
        builder.layer_file(&defaults)?;
    }
    for file in &options.env_files {
        builder.layer_file(&resolve_host_path(&file.to_string_lossy(), root, None))?;
    }
    match &options.process_env {
        Some(vars) => builder.layer_vars(vars.clone()),
        None => builder.layer_vars(std::env::vars()),
    };
    let local = working_dir.join(".env");
    if local != defaults && local.is_file() {
        builder.layer_file(&local)?;
    }

    Ok(builder.build())
}

fn active_profiles(environment: &EnvMap, extra: &[String]) -> Vec<String> {
    let mut profiles: Vec<String> = Vec::new();
    let from_env = environment
        .get("COMPOSE_PROFILES")
        .map(String::as_str)
        .unwrap_or_default()
        .split(',');
    for profile in from_env.chain(extra.iter().map(String::as_str)) {
        let profile = profile.trim();
        if !profile.is_empty() && !profiles.iter().any(|p| p == profile) {
            profiles.push(profile.to_owned());
        }
    }
    profiles
}

fn resolve_project_name(
    options: &LoadOptions,
    declared: Option<&str>,
    environment: &EnvMap,
    working_dir: &Path,
) -> Result<String, SchemaError> {
    let dir_name = working_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let raw = options
        .project_name
        .as_deref()
        .or(declared)
        .or_else(|| environment.get("COMPOSE_PROJECT_NAME").map(String::as_str))
        .filter(|n| !n.trim().is_empty())
        .unwrap_or(dir_name.as_str());
    normalize_project_name(raw)
}

/// Lowercase and keep `[a-z0-9_-]`, with no leading `_` or `-`.
pub fn normalize_project_name(raw: &str) -> Result<String, SchemaError> {
    let filtered: String = raw
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-'))
        .collect();
    let trimmed = filtered.trim_start_matches(['_', '-']);
    if trimmed.is_empty() {
        return Err(SchemaError::InvalidProjectName(raw.to_owned()));
    }
    Ok(trimmed.to_owned())
}

fn build_service(
    name: &str,
    raw: RawService,
    working_dir: &Path,
    home: Option<&Path>,
) -> Result<Service, SchemaError> {
    let volumes = raw
        .volumes
        .iter()
        .map(|v| parse_volume(v, working_dir, home, name))
        .collect::<Result<Vec<_>, _>>()?;

    let env_files = match raw.env_file {
        Some(value) => parse_env_files(&value, working_dir, name)?,
        None => Vec::new(),
    };

    Ok(Service {
        name: name.to_owned(),
        image: raw.image.unwrap_or_default(),
        volumes,
        labels: raw.labels.as_ref().map(parse_labels).unwrap_or_default(),
        custom_labels: BTreeMap::new(),
        environment: raw
            .environment
            .as_ref()
            .map(parse_environment)
            .unwrap_or_default(),
        env_files,
        profiles: raw.profiles,
        extra: raw.extra,
    })
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn parse_labels(value: &Value) -> BTreeMap<String, String> {
    match value {
        Value::Mapping(map) => map
            .iter()
            .filter_map(|(k, v)| Some((scalar(k)?, scalar(v).unwrap_or_default())))
            .collect(),
        Value::Sequence(seq) => seq
            .iter()
            .filter_map(|item| {
                let entry = scalar(item)?;
                Some(match entry.split_once('=') {
                    Some((k, v)) => (k.to_owned(), v.to_owned()),
                    None => (entry, String::new()),
                })
            })
            .collect(),
        _ => BTreeMap::new(),
    }
}

fn parse_environment(value: &Value) -> BTreeMap<String, Option<String>> {
    match value {
        Value::Mapping(map) => map
            .iter()
            .filter_map(|(k, v)| Some((scalar(k)?, scalar(v))))
            .collect(),
        Value::Sequence(seq) => seq
            .iter()
            .filter_map(|item| {
                let entry = scalar(item)?;
                Some(match entry.split_once('=') {
                    Some((k, v)) => (k.to_owned(), Some(v.to_owned())),
                    None => (entry, None),
                })
            })
            .collect(),
        _ => BTreeMap::new(),
    }
}

fn parse_env_files(
    value: &Value,
    working_dir: &Path,
    service: &str,
) -> Result<Vec<EnvFileRef>, SchemaError> {
    let to_ref = |path: &str, required: bool| EnvFileRef {
        path: resolve_host_path(path, working_dir, None),
        required,
    };
    let invalid = || {
        SchemaError::InvalidDefinition(format!("service '{service}': invalid env_file entry"))
    };

    match value {
        Value::String(path) => Ok(vec![to_ref(path, true)]),
        Value::Sequence(items) => items
            .iter()
            .map(|item| match item {
                Value::String(path) => Ok(to_ref(path, true)),
                Value::Mapping(map) => {
                    let path = map.get("path").and_then(Value::as_str).ok_or_else(invalid)?;
                    let required = map.get("required").and_then(Value::as_bool).unwrap_or(true);
                    Ok(to_ref(path, required))
                }
                _ => Err(invalid()),
            })
            .collect(),
        _ => Err(invalid()),
    }
}

/// Mappings merge recursively; anything else in `overlay` replaces `base`.
fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, other) => *slot = other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::MountKind;

    fn opts(env: &[(&str, &str)]) -> LoadOptions {
        LoadOptions {
            process_env: Some(
                env.iter()
                    .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
                    .collect(),
            ),
            ..LoadOptions::default()
        }
    }

    fn write(path: &Path, content: &str) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn loads_services_with_absolute_bind_sources() {
        let root = tempfile::tempdir().unwrap();
        let file = root.path().join("web/compose.yaml");
        write(
            &file,
            r"
services:
  api:
    image: registry/app:1.0
    volumes:
      - ./conf:/etc/app:ro
      - cache:/cache
    ports:
      - 8080:80
  builder:
    build: .
volumes:
  cache:
",
        );

        let project = ComposeLoader
            .load(root.path(), &[PathBuf::from("web/compose.yaml")], &opts(&[]))
            .unwrap();

        assert_eq!(project.name, "web");
        assert_eq!(project.working_dir, root.path().join("web"));
        let api = project.service("api").unwrap();
        assert_eq!(api.volumes[0].kind, MountKind::Bind);
        assert_eq!(
            PathBuf::from(&api.volumes[0].source),
            root.path().join("web/conf")
        );
        assert_eq!(api.volumes[1].kind, MountKind::Volume);
        assert!(api.extra.contains_key("ports"));
        assert!(!project.service("builder").unwrap().has_image());
    }

    #[test]
    fn environment_precedence_and_interpolation() {
        let root = tempfile::tempdir().unwrap();
        write(&root.path().join(".env"), "TAG=root\nREGISTRY=ghcr.io\n");
        write(&root.path().join("shared.env"), "TAG=shared\nLEVEL=info\n");
        write(&root.path().join("web/.env"), "LEVEL=debug\n");
        write(
            &root.path().join("web/compose.yaml"),
            r"
services:
  api:
    image: ${REGISTRY}/app:${TAG}
    environment:
      LOG_LEVEL: $LEVEL
",
        );

        let mut options = opts(&[("TAG", "process")]);
        options.env_files = vec![PathBuf::from("shared.env")];
        let project = ComposeLoader
            .load(root.path(), &[PathBuf::from("web/compose.yaml")], &options)
            .unwrap();

        let api = project.service("api").unwrap();
        // process env beats explicit env files; the stack-local .env beats both
        assert_eq!(api.image, "ghcr.io/app:process");
        assert_eq!(api.environment["LOG_LEVEL"], Some("debug".to_owned()));
    }

    #[test]
    fn project_name_sources() {
        let root = tempfile::tempdir().unwrap();
        write(&root.path().join("My Stack/compose.yaml"), "services: {}\n");
        let files = [PathBuf::from("My Stack/compose.yaml")];

        let from_dir = ComposeLoader.load(root.path(), &files, &opts(&[])).unwrap();
        assert_eq!(from_dir.name, "mystack");

        let from_env = ComposeLoader
            .load(root.path(), &files, &opts(&[("COMPOSE_PROJECT_NAME", "envname")]))
            .unwrap();
        assert_eq!(from_env.name, "envname");

        let mut explicit = opts(&[("COMPOSE_PROJECT_NAME", "envname")]);
        explicit.project_name = Some("Override".to_owned());
        let from_option = ComposeLoader.load(root.path(), &files, &explicit).unwrap();
        assert_eq!(from_option.name, "override");
    }

    #[test]
    fn later_files_override_earlier() {
        let root = tempfile::tempdir().unwrap();
        write(
            &root.path().join("web/compose.yaml"),
            "name: web\nservices:\n  api:\n    image: app:1\n    labels:\n      tier: front\n",
        );
        write(
            &root.path().join("web/compose.prod.yaml"),
            "services:\n  api:\n    image: app:2\n    labels:\n      env: prod\n",
        );

        let project = ComposeLoader
            .load(
                root.path(),
                &[
                    PathBuf::from("web/compose.yaml"),
                    PathBuf::from("web/compose.prod.yaml"),
                ],
                &opts(&[]),
            )
            .unwrap();

        let api = project.service("api").unwrap();
        assert_eq!(api.image, "app:2");
        assert_eq!(api.labels["tier"], "front");
        assert_eq!(api.labels["env"], "prod");
        assert_eq!(project.compose_files.len(), 2);
    }

    #[test]
    fn profiles_come_from_env_and_options() {
        let root = tempfile::tempdir().unwrap();
        write(&root.path().join("web/compose.yaml"), "services: {}\n");
        let mut options = opts(&[("COMPOSE_PROFILES", "debug, tools")]);
        options.profiles = vec!["tools".to_owned(), "metrics".to_owned()];

        let project = ComposeLoader
            .load(root.path(), &[PathBuf::from("web/compose.yaml")], &options)
            .unwrap();
        assert_eq!(project.profiles, vec!["debug", "tools", "metrics"]);
    }

    #[test]
    fn missing_file_is_an_error() {
        let root = tempfile::tempdir().unwrap();
        let err = ComposeLoader
            .load(root.path(), &[PathBuf::from("nope/compose.yaml")], &opts(&[]))
            .unwrap_err();
        assert!(matches!(err, SchemaError::Io { .. }));
    }

    #[test]
    fn relative_root_is_rejected() {
        let err = ComposeLoader
            .load(Path::new("stacks"), &[PathBuf::from("web/compose.yaml")], &opts(&[]))
            .unwrap_err();
        assert!(matches!(err, SchemaError::InvalidDefinition(ref msg) if msg.contains("stacks")));
    }

    #[test]
    fn env_file_forms() {
        let value: Value = serde_yaml::from_str(
            "- app.env\n- path: ./optional.env\n  required: false\n",
        )
        .unwrap();
        let refs = parse_env_files(&value, Path::new("/stacks/web"), "api").unwrap();
        assert_eq!(refs[0].path, PathBuf::from("/stacks/web/app.env"));
        assert!(refs[0].required);
        assert_eq!(refs[1].path, PathBuf::from("/stacks/web/optional.env"));
        assert!(!refs[1].required);
    }

    #[test]
    fn rejects_unusable_project_names() {
        assert!(normalize_project_name("__").is_err());
        assert_eq!(normalize_project_name("-Web_1").unwrap(), "web_1");
    }
}
