//! Typed paths into a project layout.
//!
//! Centralizing path construction keeps file access consistent across the
//! commands and prevents drift when the `.glyph/` layout evolves.
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "glyph.config.yml";
pub const SCENARIO_EXTENSION: &str = "glyph";

/// Convenience wrapper for locating project inputs and generated state.
#[derive(Debug, Clone)]
pub struct ProjectPaths {
    root: PathBuf,
}

impl ProjectPaths {
    /// Create a new path helper rooted at the project root.
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Return the project root used for path derivation.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Return the `glyph.config.yml` path.
    pub fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    /// Resolve the configured scenarios directory against the project root.
    pub fn scenarios_dir(&self, configured: &str) -> PathBuf {
        let configured = Path::new(configured);
        if configured.is_absolute() {
            configured.to_path_buf()
        } else {
            self.root.join(configured)
        }
    }

    /// Return the `.glyph/` state directory.
    pub fn state_dir(&self) -> PathBuf {
        self.root.join(".glyph")
    }

    pub fn guides_dir(&self) -> PathBuf {
        self.state_dir().join("guides")
    }

    pub fn guide_path(&self, scenario: &str) -> PathBuf {
        self.guides_dir().join(format!("{scenario}.guide.json"))
    }

    pub fn progress_dir(&self) -> PathBuf {
        self.state_dir().join("progress")
    }

    pub fn progress_path(&self, scenario: &str) -> PathBuf {
        self.progress_dir().join(format!("{scenario}.json"))
    }

    pub fn progress_lock_path(&self, scenario: &str) -> PathBuf {
        self.progress_dir().join(format!("{scenario}.lock"))
    }

    /// Return the `.glyph/tests/` directory holding final artifacts.
    pub fn tests_dir(&self) -> PathBuf {
        self.state_dir().join("tests")
    }

    pub fn artifact_path(&self, scenario: &str) -> PathBuf {
        self.tests_dir().join(format!("{scenario}.spec.js"))
    }

    pub fn artifact_manifest_path(&self, scenario: &str) -> PathBuf {
        self.tests_dir().join(format!("{scenario}.manifest.json"))
    }

    /// Return the scratch root for sandbox executions.
    pub fn sandbox_dir(&self) -> PathBuf {
        self.state_dir().join("sandbox")
    }

    pub fn playwright_config_path(&self) -> PathBuf {
        self.state_dir().join("playwright.config.js")
    }

    pub fn package_json_path(&self) -> PathBuf {
        self.state_dir().join("package.json")
    }

    /// Return the `.glyph/lm_log.jsonl` path.
    pub fn lm_log_path(&self) -> PathBuf {
        self.state_dir().join("lm_log.jsonl")
    }
}

/// Derive the scenario name used for records and references from its file path.
pub fn scenario_name(path: &Path) -> Option<String> {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .filter(|stem| !stem.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_are_keyed_by_scenario_name() {
        let paths = ProjectPaths::new(PathBuf::from("/proj"));
        assert_eq!(
            paths.progress_path("login"),
            PathBuf::from("/proj/.glyph/progress/login.json")
        );
        assert_eq!(
            paths.artifact_path("login"),
            PathBuf::from("/proj/.glyph/tests/login.spec.js")
        );
        assert_eq!(
            paths.scenarios_dir("scenarios"),
            PathBuf::from("/proj/scenarios")
        );
        assert_eq!(
            scenario_name(Path::new("/proj/scenarios/login.glyph")).as_deref(),
            Some("login")
        );
    }
}
