use crate::CoreError;
use fs2::FileExt;
use quay_runtime::CancelToken;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Exclusive advisory lock serializing mutating operations on one stack.
///
/// Held across threads and processes; released when dropped.
pub struct StackLock {
    lock_file: File,
    path: PathBuf,
}

impl StackLock {
    pub fn path_for(lock_dir: &Path, project: &str) -> PathBuf {
        lock_dir.join(format!("{project}.lock"))
    }

    fn open(lock_path: &Path) -> Result<File, CoreError> {
        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(lock_path)?)
    }

    /// Block until the lock for `project` is held.
    pub fn acquire(lock_dir: &Path, project: &str) -> Result<Self, CoreError> {
        let path = Self::path_for(lock_dir, project);
        let file = Self::open(&path)?;
        file.lock_exclusive().map_err(|e| {
            CoreError::Lock(format!("failed to lock {}: {e}", path.display()))
        })?;
        Ok(Self {
            lock_file: file,
            path,
        })
    }

    /// `None` when another holder has the lock.
    pub fn try_acquire(lock_dir: &Path, project: &str) -> Result<Option<Self>, CoreError> {
        let path = Self::path_for(lock_dir, project);
        let file = Self::open(&path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self {
                lock_file: file,
                path,
            })),
            Err(_) => Ok(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StackLock {
    fn drop(&mut self) {
        let _ = self.lock_file.unlock();
    }
}

/// Cancel `token` on SIGINT/SIGTERM. A second signal exits the process.
///
/// Only one handler can be installed per process; later calls return an error.
pub fn install_signal_handler(token: CancelToken) -> Result<(), CoreError> {
    let signalled = Arc::new(AtomicBool::new(false));
    ctrlc::set_handler(move || {
        if signalled.swap(true, Ordering::SeqCst) {
            std::process::exit(130);
        }
        token.cancel();
        eprintln!("\ncancellation requested, stopping current operation...");
    })
    .map_err(|e| CoreError::Config(format!("failed to install signal handler: {e}")))
}
