use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::Path;

use tracing::debug;

use crate::error::{HuddleError, Result};

/// Exclusive writer lock. Released when dropped.
#[derive(Debug)]
pub struct WriterLock {
    file: File,
}

impl WriterLock {
    /// Try to take the lock without waiting; contention is reported as `Locked`.
    pub fn acquire(path: &Path) -> Result<Self> {
        Ok(Self {
            file: acquire_lock(path)?,
        })
    }

    pub fn release(self) -> Result<()> {
        release_lock(self.file)
    }
}

/// Acquire an exclusive lock on a file, returning the locked File handle.
/// The lock is released when the File is dropped.
pub fn acquire_lock(path: &Path) -> Result<File> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?;

    file.try_lock_exclusive().map_err(|_| {
        debug!(path = %path.display(), "writer lock is held elsewhere");
        HuddleError::Locked(path.display().to_string())
    })?;

    Ok(file)
}

/// Release lock explicitly (normally handled by Drop).
pub fn release_lock(file: File) -> Result<()> {
    FileExt::unlock(&file)?;
    Ok(())
}
