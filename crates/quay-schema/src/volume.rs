use crate::SchemaError;
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MountKind {
    Bind,
    Volume,
    Tmpfs,
    Npipe,
    Cluster,
    Image,
}

impl MountKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MountKind::Bind => "bind",
            MountKind::Volume => "volume",
            MountKind::Tmpfs => "tmpfs",
            MountKind::Npipe => "npipe",
            MountKind::Cluster => "cluster",
            MountKind::Image => "image",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "bind" => Some(MountKind::Bind),
            "volume" => Some(MountKind::Volume),
            "tmpfs" => Some(MountKind::Tmpfs),
            "npipe" => Some(MountKind::Npipe),
            "cluster" => Some(MountKind::Cluster),
            "image" => Some(MountKind::Image),
            _ => None,
        }
    }
}

impl fmt::Display for MountKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A service volume in long form.
///
/// For binds `source` is an absolute, lexically normalized host path once the
/// loader has run. For named volumes it is the volume name, and it is empty for
/// anonymous volumes and tmpfs mounts.
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeMount {
    pub kind: MountKind,
    pub source: String,
    pub target: String,
    pub read_only: bool,
    /// Type-specific keys (`bind`, `volume`, `tmpfs`, `consistency`) carried as-is.
    pub options: BTreeMap<String, Value>,
}

impl VolumeMount {
    pub fn is_bind(&self) -> bool {
        self.kind == MountKind::Bind
    }

    /// Host path of a bind mount.
    pub fn host_path(&self) -> Option<&Path> {
        if self.is_bind() && !self.source.is_empty() {
            Some(Path::new(&self.source))
        } else {
            None
        }
    }

    pub fn to_yaml(&self) -> Value {
        let mut map = serde_yaml::Mapping::new();
        map.insert("type".into(), self.kind.as_str().into());
        if !self.source.is_empty() {
            map.insert("source".into(), self.source.clone().into());
        }
        map.insert("target".into(), self.target.clone().into());
        if self.read_only {
            map.insert("read_only".into(), true.into());
        }
        for (k, v) in &self.options {
            map.insert(k.clone().into(), v.clone());
        }
        Value::Mapping(map)
    }
}

/// Parse one entry of a service's `volumes:` list, in short (`src:dst[:mode]`)
/// or long (mapping) syntax, resolving bind sources against `working_dir`.
pub fn parse_volume(
    value: &Value,
    working_dir: &Path,
    home: Option<&Path>,
    service: &str,
) -> Result<VolumeMount, SchemaError> {
    let invalid = |reason: String| SchemaError::InvalidVolume {
        service: service.to_owned(),
        reason,
    };

    let mut mount = match value {
        Value::String(spec) => parse_short(spec).ok_or_else(|| invalid(format!("'{spec}'")))?,
        Value::Mapping(map) => {
            let mut kind = MountKind::Volume;
            let mut source = String::new();
            let mut target = String::new();
            let mut read_only = false;
            let mut options = BTreeMap::new();

            for (k, v) in map {
                let Some(key) = k.as_str() else {
                    return Err(invalid("non-string key in long syntax".to_owned()));
                };
                match key {
                    "type" => {
                        let raw = v.as_str().unwrap_or_default();
                        kind = MountKind::parse(raw)
                            .ok_or_else(|| invalid(format!("unknown mount type '{raw}'")))?;
                    }
                    "source" => source = scalar_to_string(v).unwrap_or_default(),
                    "target" => target = scalar_to_string(v).unwrap_or_default(),
                    "read_only" => read_only = v.as_bool().unwrap_or(false),
                    other => {
                        options.insert(other.to_owned(), v.clone());
                    }
                }
            }

            if kind == MountKind::Bind && source.is_empty() {
                return Err(invalid("bind mount without a source".to_owned()));
            }
            VolumeMount {
                kind,
                source,
                target,
                read_only,
                options,
            }
        }
        other => return Err(invalid(format!("unsupported volume entry {other:?}"))),
    };

    if mount.target.trim().is_empty() {
        return Err(invalid("missing target".to_owned()));
    }

    if mount.is_bind() {
        mount.source = resolve_host_path(&mount.source, working_dir, home)
            .to_string_lossy()
            .into_owned();
    }
    Ok(mount)
}

fn parse_short(spec: &str) -> Option<VolumeMount> {
    let parts: Vec<&str> = spec.splitn(3, ':').collect();
    let (source, target, mode) = match parts.as_slice() {
        [target] => ("", *target, ""),
        [source, target] => (*source, *target, ""),
        [source, target, mode] => (*source, *target, *mode),
        _ => return None,
    };
    if target.is_empty() {
        return None;
    }

    let kind = if source.starts_with(['.', '/', '~']) {
        MountKind::Bind
    } else {
        MountKind::Volume
    };
    let read_only = mode.split(',').any(|m| m.trim() == "ro");

    Some(VolumeMount {
        kind,
        source: source.to_owned(),
        target: target.to_owned(),
        read_only,
        options: BTreeMap::new(),
    })
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Resolve a host path reference to absolute form: `~` expands to `home`,
/// relative paths are joined onto `base`, and `.` / `..` are folded lexically.
pub fn resolve_host_path(raw: &str, base: &Path, home: Option<&Path>) -> PathBuf {
    let expanded = match (raw.strip_prefix('~'), home) {
        (Some(""), Some(home)) => home.to_path_buf(),
        (Some(rest), Some(home)) if rest.starts_with('/') => {
            home.join(rest.trim_start_matches('/'))
        }
        _ => PathBuf::from(raw),
    };
    let joined = if expanded.is_absolute() {
        expanded
    } else {
        base.join(expanded)
    };
    normalize_lexically(&joined)
}

pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}
