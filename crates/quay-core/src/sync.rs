use crate::CoreError;
use quay_remote::RemoteCopy;
use quay_runtime::CancelToken;
use quay_schema::Project;
use std::path::PathBuf;
use tracing::{debug, info};

/// What a bind-mount sync did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub copied: Vec<PathBuf>,
    pub skipped_outside_root: Vec<PathBuf>,
    pub skipped_missing: Vec<PathBuf>,
}

impl SyncReport {
    pub fn is_empty(&self) -> bool {
        self.copied.is_empty()
            && self.skipped_outside_root.is_empty()
            && self.skipped_missing.is_empty()
    }
}

/// Copy every bind-mount source under the project root to the same path on the
/// remote host.
///
/// Named volumes, tmpfs and other non-bind mounts are ignored. Sources outside
/// `project.root_dir` or missing locally are skipped. The first failed copy
/// aborts the sync.
pub fn sync_bind_mounts(
    project: &Project,
    channel: &dyn RemoteCopy,
    cancel: &CancelToken,
) -> Result<SyncReport, CoreError> {
    let mut report = SyncReport::default();

    for (name, service) in &project.services {
        for mount in service.bind_mounts() {
            let Some(source) = mount.host_path() else {
                continue;
            };
            if !project.contains_path(source) {
                debug!(
                    "skipping bind {} of {name}: outside {}",
                    source.display(),
                    project.root_dir.display()
                );
                report.skipped_outside_root.push(source.to_path_buf());
                continue;
            }
            if !source.exists() {
                debug!("skipping bind {} of {name}: not found locally", source.display());
                report.skipped_missing.push(source.to_path_buf());
                continue;
            }
            if cancel.is_cancelled() {
                return Err(CoreError::Cancelled {
                    op: "sync",
                    project: project.name.clone(),
                });
            }

            channel
                .copy_to_remote(source)
                .map_err(|source_err| CoreError::Sync {
                    project: project.name.clone(),
                    service: name.clone(),
                    path: source.to_path_buf(),
                    source: source_err,
                })?;
            debug!("synced {} to {}", source.display(), channel.describe());
            report.copied.push(source.to_path_buf());
        }
    }

    if !report.copied.is_empty() {
        info!(
            "synced {} bind mount(s) of {} to {}",
            report.copied.len(),
            project.name,
            channel.describe()
        );
    }
    Ok(report)
}
