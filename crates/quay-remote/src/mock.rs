use crate::{RemoteCopy, RemoteError};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyRecord {
    pub local: PathBuf,
    /// Always equal to `local`: copies land on the identical path.
    pub remote: PathBuf,
}

#[derive(Default)]
struct State {
    copies: Vec<CopyRecord>,
    fail_on: Option<(PathBuf, String)>,
}

/// Channel double that records copies instead of transferring anything.
#[derive(Default)]
pub struct RecordingChannel {
    state: Mutex<State>,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fail the copy of `path` (and anything below it) with `message`.
    pub fn fail_on(&self, path: impl Into<PathBuf>, message: &str) {
        self.guard().fail_on = Some((path.into(), message.to_owned()));
    }

    pub fn copies(&self) -> Vec<CopyRecord> {
        self.guard().copies.clone()
    }

    pub fn copied_paths(&self) -> Vec<PathBuf> {
        self.guard().copies.iter().map(|c| c.local.clone()).collect()
    }
}

impl RemoteCopy for RecordingChannel {
    fn copy_to_remote(&self, local: &Path) -> Result<(), RemoteError> {
        let mut state = self.guard();
        if let Some((path, message)) = &state.fail_on {
            if local.starts_with(path) {
                return Err(RemoteError::Rejected(message.clone()));
            }
        }
        state.copies.push(CopyRecord {
            local: local.to_path_buf(),
            remote: local.to_path_buf(),
        });
        Ok(())
    }

    fn describe(&self) -> String {
        "recording".to_owned()
    }
}
