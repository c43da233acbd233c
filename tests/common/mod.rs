//! Shared fixture for CLI integration tests.
//!
//! A project is a temp directory with a config pointing the LM command and
//! the test runner at shell stubs. The LM stub picks its reply from
//! `replies/` by matching the prompt; the runner stub prints a page snapshot
//! and fails any probe that contains `FAIL`.
#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

const LM_STUB: &str = r#"#!/bin/sh
prompt=$(cat)
echo call >> "{dir}/lm_calls"
case "$prompt" in
  *"Code So Far"*)
    case "$prompt" in
      *"missing button"*) cat "{dir}/replies/broken_step.txt" ;;
      *) cat "{dir}/replies/login_step.txt" ;;
    esac ;;
  *"missing button"*) cat "{dir}/replies/broken_guide.txt" ;;
  *) cat "{dir}/replies/login_guide.txt" ;;
esac
"#;

const RUNNER_STUB: &str = r#"#!/bin/sh
echo "$1" >> "{dir}/runner_calls"
if grep -q FAIL "$1"; then
  echo "Error: locator.click: Timeout 5000ms exceeded"
  exit 1
fi
echo 'GLYPH_OBSERVATION {"url":"http://localhost:3000/login","title":"Login","buttons":["Sign in"]}'
echo '1 passed (0.4s)'
"#;

pub struct Project {
    dir: TempDir,
}

impl Project {
    pub fn setup() -> Self {
        let dir = TempDir::new().expect("tempdir");
        let root = dir.path();
        fs::create_dir_all(root.join("scenarios")).expect("mkdir scenarios");
        fs::create_dir_all(root.join("replies")).expect("mkdir replies");
        let fixture = root.join("fixture");
        fs::create_dir_all(&fixture).expect("mkdir fixture");
        let lm = write_script(&fixture, "lm.sh", LM_STUB, root);
        let runner = write_script(&fixture, "runner.sh", RUNNER_STUB, root);
        fs::write(
            root.join("glyph.config.yml"),
            format!(
                "connection:\n  url: http://localhost:3000\n\
                 llm:\n  command: {}\n\
                 sandbox:\n  command: {}\n  timeout_seconds: 20\n  syntax_check: null\n\
                 build:\n  max_step_attempts: 2\n  workers: 1\n",
                lm.display(),
                runner.display()
            ),
        )
        .expect("write config");
        Self { dir }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn scenario(&self, name: &str, text: &str) {
        fs::write(self.root().join(format!("scenarios/{name}.glyph")), text)
            .expect("write scenario");
    }

    pub fn reply(&self, file: &str, text: &str) {
        fs::write(self.root().join("replies").join(file), text).expect("write reply");
    }

    pub fn artifact(&self, name: &str) -> PathBuf {
        self.root().join(format!(".glyph/tests/{name}.spec.js"))
    }

    pub fn lm_calls(&self) -> usize {
        count_lines(&self.root().join("lm_calls"))
    }

    pub fn runner_calls(&self) -> usize {
        count_lines(&self.root().join("runner_calls"))
    }

    pub fn glyph(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_glyph"))
            .args(args)
            .arg("--project")
            .arg(self.root())
            .env_remove("GLYPH_LM_COMMAND")
            .env("GLYPH_LOG", "warn")
            .output()
            .expect("run glyph")
    }
}

fn write_script(dir: &Path, name: &str, template: &str, root: &Path) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, template.replace("{dir}", &root.display().to_string()))
        .expect("write script");
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod");
    path
}

fn count_lines(path: &Path) -> usize {
    fs::read_to_string(path)
        .map(|text| text.lines().count())
        .unwrap_or(0)
}

pub fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}
