use crate::environment::EnvMap;
use crate::volume::VolumeMount;
use crate::SchemaError;
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// A loaded stack definition.
///
/// Built fresh for every operation that needs it; nothing here is persisted.
/// Services are keyed by name in a `BTreeMap` so every walk over them is
/// deterministic.
#[derive(Debug, Clone, PartialEq)]
pub struct Project {
    pub name: String,
    /// Directory all stacks live under. Bind sources below it are synced to
    /// remote hosts.
    pub root_dir: PathBuf,
    /// Parent directory of the first definition file.
    pub working_dir: PathBuf,
    pub compose_files: Vec<PathBuf>,
    pub services: BTreeMap<String, Service>,
    pub environment: EnvMap,
    /// Profiles enabled for this load.
    pub profiles: Vec<String>,
    pub volumes: BTreeMap<String, Value>,
    pub networks: BTreeMap<String, Value>,
    pub secrets: BTreeMap<String, Value>,
    pub configs: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Service {
    pub name: String,
    /// Empty for build-only services.
    pub image: String,
    pub volumes: Vec<VolumeMount>,
    /// Labels declared in the definition.
    pub labels: BTreeMap<String, String>,
    /// Identifying labels stamped during normalization. These win over `labels`.
    pub custom_labels: BTreeMap<String, String>,
    /// `None` means declared without a value and not (yet) resolved.
    pub environment: BTreeMap<String, Option<String>>,
    pub env_files: Vec<EnvFileRef>,
    pub profiles: Vec<String>,
    /// Every other key of the service definition, passed through to the runtime.
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvFileRef {
    pub path: PathBuf,
    pub required: bool,
}

impl Service {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            volumes: Vec::new(),
            labels: BTreeMap::new(),
            custom_labels: BTreeMap::new(),
            environment: BTreeMap::new(),
            env_files: Vec::new(),
            profiles: Vec::new(),
            extra: BTreeMap::new(),
        }
    }

    pub fn has_image(&self) -> bool {
        !self.image.trim().is_empty()
    }

    /// Services without profiles are always enabled.
    pub fn is_enabled(&self, active_profiles: &[String]) -> bool {
        self.profiles.is_empty()
            || active_profiles.iter().any(|p| p == "*")
            || self.profiles.iter().any(|p| active_profiles.contains(p))
    }

    pub fn effective_labels(&self) -> BTreeMap<String, String> {
        let mut labels = self.labels.clone();
        labels.extend(
            self.custom_labels
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        labels
    }

    pub fn bind_mounts(&self) -> impl Iterator<Item = &VolumeMount> {
        self.volumes.iter().filter(|v| v.is_bind())
    }

    fn to_yaml(&self) -> Value {
        let mut map = Mapping::new();
        for (k, v) in &self.extra {
            map.insert(k.clone().into(), v.clone());
        }
        if self.has_image() {
            map.insert("image".into(), self.image.clone().into());
        }
        if !self.volumes.is_empty() {
            let volumes = self.volumes.iter().map(VolumeMount::to_yaml).collect();
            map.insert("volumes".into(), Value::Sequence(volumes));
        }
        let labels = self.effective_labels();
        if !labels.is_empty() {
            map.insert("labels".into(), string_map(&labels));
        }
        let environment: BTreeMap<String, String> = self
            .environment
            .iter()
            .filter_map(|(k, v)| v.as_ref().map(|v| (k.clone(), v.clone())))
            .collect();
        if !environment.is_empty() {
            map.insert("environment".into(), string_map(&environment));
        }
        Value::Mapping(map)
    }
}

impl Project {
    pub fn new(name: impl Into<String>, root_dir: impl Into<PathBuf>) -> Self {
        let root_dir = root_dir.into();
        Self {
            name: name.into(),
            working_dir: root_dir.clone(),
            root_dir,
            compose_files: Vec::new(),
            services: BTreeMap::new(),
            environment: EnvMap::new(),
            profiles: Vec::new(),
            volumes: BTreeMap::new(),
            networks: BTreeMap::new(),
            secrets: BTreeMap::new(),
            configs: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_service(mut self, service: Service) -> Self {
        self.services.insert(service.name.clone(), service);
        self
    }

    /// Service names in sorted order.
    pub fn service_names(&self) -> Vec<String> {
        self.services.keys().cloned().collect()
    }

    pub fn service(&self, name: &str) -> Option<&Service> {
        self.services.get(name)
    }

    pub fn contains_path(&self, path: &Path) -> bool {
        path.starts_with(&self.root_dir)
    }

    /// Render the project as a compose document the runtime can consume.
    ///
    /// Environment files and profiles are already folded in at this point, so
    /// neither is emitted.
    pub fn to_compose_yaml(&self) -> Result<String, SchemaError> {
        let mut root = Mapping::new();
        root.insert("name".into(), self.name.clone().into());

        let mut services = Mapping::new();
        for (name, service) in &self.services {
            services.insert(name.clone().into(), service.to_yaml());
        }
        root.insert("services".into(), Value::Mapping(services));

        for (key, section) in [
            ("volumes", &self.volumes),
            ("networks", &self.networks),
            ("secrets", &self.secrets),
            ("configs", &self.configs),
        ] {
            if section.is_empty() {
                continue;
            }
            let mut map = Mapping::new();
            for (k, v) in section {
                map.insert(k.clone().into(), v.clone());
            }
            root.insert(key.into(), Value::Mapping(map));
        }

        Ok(serde_yaml::to_string(&Value::Mapping(root))?)
    }
}

fn string_map(values: &BTreeMap<String, String>) -> Value {
    let mut map = Mapping::new();
    for (k, v) in values {
        map.insert(k.clone().into(), v.clone().into());
    }
    Value::Mapping(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::MountKind;

    #[test]
    fn service_names_are_sorted() {
        let project = Project::new("web", "/stacks")
            .with_service(Service::new("worker", "app:1"))
            .with_service(Service::new("api", "app:1"));
        assert_eq!(project.service_names(), vec!["api", "worker"]);
    }

    #[test]
    fn profiles_gate_services() {
        let mut debug = Service::new("debug", "busybox");
        debug.profiles = vec!["tools".to_owned()];
        assert!(!debug.is_enabled(&[]));
        assert!(debug.is_enabled(&["tools".to_owned()]));
        assert!(debug.is_enabled(&["*".to_owned()]));
        assert!(Service::new("api", "app").is_enabled(&[]));
    }

    #[test]
    fn custom_labels_override_declared() {
        let mut svc = Service::new("api", "app");
        svc.labels.insert("com.docker.compose.project".to_owned(), "spoofed".to_owned());
        svc.labels.insert("team".to_owned(), "core".to_owned());
        svc.custom_labels
            .insert("com.docker.compose.project".to_owned(), "web".to_owned());
        let labels = svc.effective_labels();
        assert_eq!(labels["com.docker.compose.project"], "web");
        assert_eq!(labels["team"], "core");
    }

    #[test]
    fn renders_compose_document() {
        let mut api = Service::new("api", "registry/app:1.0");
        api.volumes.push(VolumeMount {
            kind: MountKind::Bind,
            source: "/stacks/web/conf".to_owned(),
            target: "/etc/app".to_owned(),
            read_only: true,
            options: BTreeMap::new(),
        });
        api.environment.insert("MODE".to_owned(), Some("prod".to_owned()));
        api.environment.insert("UNSET".to_owned(), None);
        api.extra
            .insert("ports".to_owned(), serde_yaml::from_str("[\"8080:80\"]").unwrap());

        let project = Project::new("web", "/stacks").with_service(api);
        let rendered: Value = serde_yaml::from_str(&project.to_compose_yaml().unwrap()).unwrap();

        let svc = &rendered["services"]["api"];
        assert_eq!(rendered["name"], Value::from("web"));
        assert_eq!(svc["image"], Value::from("registry/app:1.0"));
        assert_eq!(svc["environment"]["MODE"], Value::from("prod"));
        assert!(svc["environment"].get("UNSET").is_none());
        assert_eq!(svc["volumes"][0]["source"], Value::from("/stacks/web/conf"));
        assert_eq!(svc["ports"][0], Value::from("8080:80"));
    }
}
