//! OS-level exclusive lock on the archive directory: a second process (or a
//! second `Archive::open` in this process) attempting to open the same
//! directory must fail (P9).

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::error::ArchiveError;

pub struct DirLock {
    file: File,
    path: PathBuf,
}

impl DirLock {
    pub fn acquire(dir: &Path) -> Result<Self, ArchiveError> {
        let path = dir.join("lock");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;
        file.try_lock_exclusive()
            .map_err(|_| ArchiveError::AlreadyOpen(dir.display().to_string()))?;
        Ok(Self { file, path })
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
        let _ = &self.path;
    }
}

/// The `dirty` sentinel: present iff the directory was opened and not
/// cleanly closed, or a restore is mid-flight. A dirty open fails unless the
/// caller explicitly invokes recovery.
pub struct DirtySentinel {
    path: PathBuf,
}

impl DirtySentinel {
    pub fn path(dir: &Path) -> PathBuf {
        dir.join("dirty")
    }

    pub fn is_set(dir: &Path) -> bool {
        Self::path(dir).exists()
    }

    pub fn set(dir: &Path) -> Result<Self, ArchiveError> {
        let path = Self::path(dir);
        std::fs::write(&path, b"")?;
        Ok(Self { path })
    }

    pub fn clear(self) -> Result<(), ArchiveError> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}
