//! Single-writer lock artifact
//!
//! A recorder claims its output path by creating `<output>.lock` with
//! create-new semantics. The file's existence is the lock: a second recorder
//! targeting the same output fails to create it and refuses to start.

use crate::error::{ReelError, Result};
use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Lock file path guarding `output`
pub fn lock_path_for(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_os_string();
    name.push(".lock");
    PathBuf::from(name)
}

/// Held lock on a recording path; removed on [`release`](Self::release) or drop
#[derive(Debug)]
pub struct RecordingLock {
    path: PathBuf,
    released: bool,
}

impl RecordingLock {
    /// Claim the lock guarding `output`
    ///
    /// # Errors
    ///
    /// - [`ReelError::RecordingLocked`] if the lock file already exists
    pub fn acquire(output: &Path) -> Result<Self> {
        let path = lock_path_for(output);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => {
                debug!("Acquired recording lock {:?}", path);
                Ok(Self {
                    path,
                    released: false,
                })
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(ReelError::RecordingLocked(path)),
            Err(e) => Err(e.into()),
        }
    }

    /// Path of the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the lock file
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        fs::remove_file(&self.path)?;
        debug!("Released recording lock {:?}", self.path);
        Ok(())
    }
}

impl Drop for RecordingLock {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = fs::remove_file(&self.path) {
                warn!("Failed to remove lock file {:?}: {}", self.path, e);
            }
        }
    }
}
