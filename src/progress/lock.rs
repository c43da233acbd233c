//! Per-scenario advisory lock on `.glyph/progress/<name>.lock`.
//!
//! Two `glyph build` processes on the same project serialize per scenario;
//! different scenarios proceed in parallel.
use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

/// Held for the duration of one scenario build; released on drop.
#[derive(Debug)]
pub struct ScenarioLock {
    file: File,
    path: PathBuf,
}

impl ScenarioLock {
    /// Block until the exclusive lock on `path` is held.
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .with_context(|| format!("open lock {}", path.display()))?;
        lock_exclusive(&file).with_context(|| format!("lock {}", path.display()))?;
        tracing::debug!(path = %path.display(), "acquired scenario lock");
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScenarioLock {
    fn drop(&mut self) {
        // Closing the file releases the lock too.
        if let Err(err) = self.file.unlock() {
            tracing::debug!(path = %self.path.display(), error = %err, "unlock failed");
        }
    }
}

fn lock_exclusive(file: &File) -> std::io::Result<()> {
    loop {
        match file.lock() {
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            result => return result,
        }
    }
}
