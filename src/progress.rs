//! Build progress store.
//!
//! One JSON record per scenario under `.glyph/progress/`. Records are only
//! ever replaced through a temp file and a rename, and a record that fails to
//! parse or is internally inconsistent is treated as absent.
use crate::error::BuildError;
use crate::paths::ProjectPaths;
use crate::util::{now_epoch_ms, write_json_atomic};
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

mod lock;

pub use lock::ScenarioLock;

pub const PROGRESS_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressStep {
    pub index: usize,
    pub description: String,
    /// Empty when the step was satisfied by earlier code.
    pub fragment: String,
    pub accepted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub schema_version: u32,
    pub scenario: String,
    pub scenario_hash: String,
    pub steps: Vec<ProgressStep>,
    pub updated_at_epoch_ms: u128,
}

impl Progress {
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Accepted fragments in step order.
    pub fn fragments(&self) -> Vec<String> {
        self.steps.iter().map(|step| step.fragment.clone()).collect()
    }

    fn check_consistency(&self, scenario: &str) -> Result<(), String> {
        if self.schema_version != PROGRESS_SCHEMA_VERSION {
            return Err(format!("unsupported schema_version {}", self.schema_version));
        }
        if self.scenario != scenario {
            return Err(format!("record belongs to {:?}", self.scenario));
        }
        for (position, step) in self.steps.iter().enumerate() {
            if step.index != position {
                return Err(format!(
                    "step at position {position} has index {}",
                    step.index
                ));
            }
            if !step.accepted {
                return Err(format!("step {position} is not accepted"));
            }
        }
        Ok(())
    }
}

/// Handle on the progress records of one project.
///
/// The handle holds no per-scenario state; isolation between concurrent
/// builds comes from [`ProgressStore::lock`].
#[derive(Debug, Clone)]
pub struct ProgressStore {
    paths: ProjectPaths,
}

impl ProgressStore {
    pub fn open(paths: &ProjectPaths) -> Result<Self> {
        let dir = paths.progress_dir();
        fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
        Ok(Self {
            paths: paths.clone(),
        })
    }

    pub fn load(&self, scenario: &str) -> Result<Option<Progress>> {
        let path = self.paths.progress_path(scenario);
        if !path.is_file() {
            return Ok(None);
        }
        match read_record(&path, scenario) {
            Ok(progress) => Ok(Some(progress)),
            Err(err) => {
                tracing::warn!(scenario, error = %err, "discarding build progress");
                Ok(None)
            }
        }
    }

    /// Record `fragment` as the accepted code for step `index`.
    ///
    /// Writing the same index again overwrites it and drops any later steps,
    /// which were built on top of the replaced fragment. A record for a
    /// different scenario hash is replaced wholesale.
    pub fn append_step(
        &self,
        scenario: &str,
        scenario_hash: &str,
        index: usize,
        description: &str,
        fragment: &str,
    ) -> Result<Progress> {
        let mut progress = match self.load(scenario)? {
            Some(progress) if progress.scenario_hash == scenario_hash => progress,
            _ => Progress {
                schema_version: PROGRESS_SCHEMA_VERSION,
                scenario: scenario.to_string(),
                scenario_hash: scenario_hash.to_string(),
                steps: Vec::new(),
                updated_at_epoch_ms: 0,
            },
        };
        if index > progress.steps.len() {
            return Err(anyhow!(
                "cannot record step {} of {scenario}: only {} step(s) accepted",
                index + 1,
                progress.steps.len()
            ));
        }
        progress.steps.truncate(index);
        progress.steps.push(ProgressStep {
            index,
            description: description.to_string(),
            fragment: fragment.to_string(),
            accepted: true,
        });
        progress.updated_at_epoch_ms = now_epoch_ms()?;
        write_json_atomic(&self.paths.progress_path(scenario), &progress)?;
        tracing::debug!(scenario, step = index + 1, "recorded accepted step");
        Ok(progress)
    }

    pub fn invalidate(&self, scenario: &str) -> Result<()> {
        remove_if_exists(&self.paths.progress_path(scenario))
    }

    /// Delete every progress record, guide and artifact. Returns the number of
    /// files removed.
    pub fn purge_all(&self) -> Result<usize> {
        let mut removed = 0;
        for dir in [
            self.paths.progress_dir(),
            self.paths.guides_dir(),
            self.paths.tests_dir(),
            self.paths.sandbox_dir(),
        ] {
            if !dir.exists() {
                continue;
            }
            removed += count_files(&dir)?;
            fs::remove_dir_all(&dir).with_context(|| format!("remove {}", dir.display()))?;
        }
        fs::create_dir_all(self.paths.progress_dir())
            .with_context(|| format!("create {}", self.paths.progress_dir().display()))?;
        Ok(removed)
    }

    /// Take the advisory lock guarding `scenario`'s record.
    pub fn lock(&self, scenario: &str) -> Result<ScenarioLock> {
        ScenarioLock::acquire(&self.paths.progress_lock_path(scenario))
    }
}

fn read_record(path: &Path, scenario: &str) -> Result<Progress, BuildError> {
    let corruption = |detail: String| BuildError::CacheCorruption {
        path: path.to_path_buf(),
        detail,
    };
    let bytes = fs::read(path).map_err(|err| corruption(err.to_string()))?;
    let progress: Progress =
        serde_json::from_slice(&bytes).map_err(|err| corruption(err.to_string()))?;
    progress.check_consistency(scenario).map_err(corruption)?;
    Ok(progress)
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("remove {}", path.display())),
    }
}

fn count_files(dir: &Path) -> Result<usize> {
    let mut count = 0;
    for entry in fs::read_dir(dir).with_context(|| format!("read {}", dir.display()))? {
        let entry = entry.with_context(|| format!("read entry in {}", dir.display()))?;
        let path = entry.path();
        if path.is_dir() {
            count += count_files(&path)?;
        } else if path.extension().and_then(|ext| ext.to_str()) != Some("lock") {
            count += 1;
        }
    }
    Ok(count)
}
