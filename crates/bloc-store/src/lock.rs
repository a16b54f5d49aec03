use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::StoreError;

/// Exclusive advisory lock for one repository's memory. Held across
/// multi-step writes issued by a single pipeline run; released on drop.
#[derive(Debug)]
pub struct RepoLock {
    file: File,
    path: PathBuf,
}

impl RepoLock {
    pub fn acquire(lock_dir: impl AsRef<Path>, repo_id: &str) -> Result<Self, StoreError> {
        let lock_dir = lock_dir.as_ref();
        fs::create_dir_all(lock_dir)?;

        let path = lock_dir.join(format!("{repo_id}.lock"));
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;
        file.lock_exclusive()?;

        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RepoLock {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            tracing::warn!(error = %err, path = %self.path.display(), "failed to release repo lock");
        }
    }
}
