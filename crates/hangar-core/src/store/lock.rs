use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::Context;
use fs4::FileExt;

/// Exclusive cross-process lock on an installation root.
///
/// Released when dropped.
#[derive(Debug)]
pub struct StoreLock {
    file: File,
    path: PathBuf,
}

impl StoreLock {
    /// Block until the lock at `path` is ours.
    pub fn acquire(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .with_context(|| format!("Failed to open lock file {}", path.display()))?;
        file.lock_exclusive()
            .with_context(|| format!("Failed to lock {}", path.display()))?;
        tracing::debug!(path = %path.display(), "acquired installation lock");
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Err(err) = self.file.unlock() {
            tracing::warn!(path = %self.path.display(), "failed to release lock: {err}");
        } else {
            tracing::debug!(path = %self.path.display(), "released installation lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_lock_is_exclusive_until_dropped() {
        let tmp = TempDir::new().expect("tempdir should succeed");
        let path = tmp.path().join("lock");

        let lock = StoreLock::acquire(&path).expect("lock should succeed");
        let probe = File::open(&path).expect("open should succeed");
        assert!(probe.try_lock_exclusive().is_err());

        drop(lock);
        probe
            .try_lock_exclusive()
            .expect("lock should be free after drop");
        probe.unlock().expect("unlock should succeed");
    }
}
