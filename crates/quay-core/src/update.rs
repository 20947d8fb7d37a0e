use crate::CoreError;
use quay_runtime::{CancelToken, RuntimeClient, RuntimeError};
use quay_schema::Project;
use std::collections::BTreeMap;
use tracing::debug;

/// Image identity per service at one point in time.
///
/// Values are the first repo digest, else the local image id, else empty when the
/// image is not present. Services without an image reference are absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageDigestSnapshot(BTreeMap<String, String>);

impl ImageDigestSnapshot {
    pub fn get(&self, service: &str) -> Option<&str> {
        self.0.get(service).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Services whose identity differs between `self` and `other`, including
    /// services present in only one of them.
    pub fn changed_services(&self, other: &Self) -> Vec<String> {
        let mut changed: Vec<String> = self
            .0
            .iter()
            .filter(|(name, digest)| other.0.get(*name) != Some(*digest))
            .map(|(name, _)| name.clone())
            .collect();
        changed.extend(
            other
                .0
                .keys()
                .filter(|name| !self.0.contains_key(*name))
                .cloned(),
        );
        changed.sort();
        changed
    }
}

impl FromIterator<(String, String)> for ImageDigestSnapshot {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Result of an update run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Pulling produced no new image for any service; nothing was restarted.
    AlreadyCurrent,
    /// At least one image changed and the requested services were brought up.
    Redeployed { changed: Vec<String> },
    /// Images changed, but every requested service was Quay itself, so nothing
    /// was restarted.
    Pulled { changed: Vec<String> },
}

impl UpdateOutcome {
    pub fn redeployed(&self) -> bool {
        matches!(self, Self::Redeployed { .. })
    }

    /// Services whose image changed during the pull.
    pub fn changed(&self) -> &[String] {
        match self {
            Self::AlreadyCurrent => &[],
            Self::Redeployed { changed } | Self::Pulled { changed } => changed,
        }
    }
}

/// Inspect the local image of every service that names one.
///
/// An image that cannot be inspected yields an empty identity rather than an
/// error, so a first pull compares as a change.
pub fn snapshot_images(
    project: &Project,
    runtime: &dyn RuntimeClient,
    cancel: &CancelToken,
) -> Result<ImageDigestSnapshot, CoreError> {
    let mut snapshot = BTreeMap::new();
    for (name, service) in &project.services {
        if !service.has_image() {
            continue;
        }
        let identity = match runtime.inspect_image(&service.image, cancel) {
            Ok(image) => image.identity().to_owned(),
            Err(RuntimeError::Cancelled) => {
                return Err(CoreError::Cancelled {
                    op: "update",
                    project: project.name.clone(),
                });
            }
            Err(e) => {
                debug!("no local image for {name} ({}): {e}", service.image);
                String::new()
            }
        };
        snapshot.insert(name.clone(), identity);
    }
    Ok(ImageDigestSnapshot(snapshot))
}
