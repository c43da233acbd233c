//! Execution sandbox: runs accumulated fragments against the live application
//! and reports the resulting page state.
//!
//! Every execution gets a fresh scratch directory under `.glyph/sandbox/` and
//! a fresh runner process, so a rejected candidate cannot leak browser state
//! into the next attempt.
use crate::config::Config;
use crate::error::{ExecutionFailure, FailureKind};
use crate::paths::ProjectPaths;
use crate::process::{BoundedCommand, ProcessRun};
use crate::templates::{PACKAGE_JSON, PLAYWRIGHT_CONFIG_JS, PROBE_SPEC_JS};
use crate::util::{display_path, tail_string, write_atomic};
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

mod observation;

pub use observation::Observation;
use observation::OBSERVATION_MARKER;

const FAILURE_DETAIL_BYTES: usize = 2000;
const SYNTAX_CHECK_TIMEOUT: Duration = Duration::from_secs(20);
const FRAGMENT_INDENT: &str = "    ";

/// Result of one sandbox execution.
#[derive(Debug, Clone)]
pub struct Execution {
    /// Absent when the runner died before the capture could print.
    pub observation: Option<Observation>,
    pub failure: Option<ExecutionFailure>,
    pub duration: Duration,
}

/// Result of running an assembled artifact.
#[derive(Debug, Clone)]
pub struct TestOutcome {
    pub passed: bool,
    pub timed_out: bool,
    pub duration: Duration,
    pub output: String,
}

pub trait Sandbox: Send + Sync {
    /// Execute fragments in order inside a fresh browser context.
    ///
    /// `Err` is reserved for infrastructure problems (the runner cannot be
    /// started); a failing fragment is reported through `Execution::failure`.
    fn execute(&self, fragments: &[String]) -> Result<Execution>;

    /// Run a finished artifact for the `test` command.
    fn run_artifact(&self, artifact: &Path) -> Result<TestOutcome>;
}

/// Sandbox backed by the Playwright test runner.
#[derive(Debug, Clone)]
pub struct PlaywrightSandbox {
    paths: ProjectPaths,
    command: String,
    base_url: String,
    timeout: Duration,
    test_timeout: Duration,
    syntax_check: Option<String>,
    /// Set once the syntax check command turns out not to be runnable.
    syntax_check_unavailable: Arc<AtomicBool>,
}

impl PlaywrightSandbox {
    pub fn new(
        paths: ProjectPaths,
        command: String,
        base_url: String,
        timeout: Duration,
        test_timeout: Duration,
    ) -> Self {
        Self {
            paths,
            command,
            base_url,
            timeout,
            test_timeout,
            syntax_check: None,
            syntax_check_unavailable: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Parse each probe with `command` (given the probe path) before running it.
    pub fn with_syntax_check(mut self, command: Option<String>) -> Self {
        self.syntax_check = command;
        self
    }

    pub fn from_config(paths: ProjectPaths, config: &Config) -> Self {
        Self::new(
            paths,
            config.sandbox.command.clone(),
            config.connection.url.clone(),
            config.sandbox.timeout(),
            config.sandbox.test_timeout(),
        )
        .with_syntax_check(config.sandbox.syntax_check())
    }

    /// Write the runner config and package manifest into `.glyph/`.
    ///
    /// The config is rewritten whenever the base URL changes; an existing
    /// package manifest is left alone so users can pin versions.
    pub fn ensure_environment(&self) -> Result<()> {
        let state_dir = self.paths.state_dir();
        fs::create_dir_all(self.paths.tests_dir())
            .with_context(|| format!("create {}", self.paths.tests_dir().display()))?;
        fs::create_dir_all(self.paths.sandbox_dir())
            .with_context(|| format!("create {}", self.paths.sandbox_dir().display()))?;

        let expected = PLAYWRIGHT_CONFIG_JS.replace("{base_url}", &self.base_url);
        let config_path = self.paths.playwright_config_path();
        let current = fs::read_to_string(&config_path).ok();
        if current.as_deref() != Some(expected.as_str()) {
            write_atomic(&config_path, expected.as_bytes())?;
            tracing::info!(
                path = %display_path(&config_path, Some(state_dir.as_path())),
                "wrote runner config"
            );
        }

        let package_path = self.paths.package_json_path();
        if !package_path.is_file() {
            write_atomic(&package_path, PACKAGE_JSON.as_bytes())?;
        }
        Ok(())
    }

    fn relative_to_state(&self, path: &Path) -> PathBuf {
        path.strip_prefix(self.paths.state_dir())
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| path.to_path_buf())
    }

    /// Runner arguments for one spec; results stay inside the scratch directory.
    fn runner_args(&self, spec: &Path, scratch: &Path) -> Vec<String> {
        vec![
            self.relative_to_state(spec).display().to_string(),
            "--reporter=line".to_string(),
            "--output".to_string(),
            self.relative_to_state(&scratch.join("results"))
                .display()
                .to_string(),
        ]
    }

    fn run_runner(&self, args: &[String], scratch: &Path, timeout: Duration) -> Result<ProcessRun> {
        let state_dir = self.paths.state_dir();
        BoundedCommand {
            label: "runner",
            command: &self.command,
            extra_args: args,
            cwd: Some(state_dir.as_path()),
            stdin: None,
            timeout,
        }
        .run(scratch)
    }

    /// Parse the probe without running it. `None` means it parsed, or that no
    /// usable checker is available.
    fn syntax_failure(&self, spec: &Path, scratch: &Path) -> Option<ExecutionFailure> {
        let command = self.syntax_check.as_deref()?;
        if self.syntax_check_unavailable.load(Ordering::Relaxed) {
            return None;
        }
        let check_dir = scratch.join("syntax");
        let args = [spec.display().to_string()];
        let checker = BoundedCommand {
            label: "syntax check",
            command,
            extra_args: &args,
            cwd: None,
            stdin: None,
            timeout: SYNTAX_CHECK_TIMEOUT,
        };
        let run = fs::create_dir_all(&check_dir)
            .with_context(|| format!("create {}", check_dir.display()))
            .and_then(|()| checker.run(&check_dir));
        let run = match run {
            Ok(run) => run,
            Err(err) => {
                if !self.syntax_check_unavailable.swap(true, Ordering::Relaxed) {
                    tracing::warn!(
                        command,
                        error = %format!("{err:#}"),
                        "syntax check unavailable; probes run unchecked"
                    );
                }
                return None;
            }
        };
        if run.timed_out {
            tracing::warn!(command, "syntax check timed out; running probe unchecked");
            return None;
        }
        if run.succeeded() {
            return None;
        }
        let output = run.combined_output();
        Some(ExecutionFailure::new(
            FailureKind::MalformedFragment,
            format!(
                "syntax error\n{}",
                tail_string(output.trim(), FAILURE_DETAIL_BYTES)
            ),
        ))
    }
}

impl Sandbox for PlaywrightSandbox {
    fn execute(&self, fragments: &[String]) -> Result<Execution> {
        self.ensure_environment()?;
        let scratch = tempfile::Builder::new()
            .prefix("probe-")
            .tempdir_in(self.paths.sandbox_dir())
            .context("create sandbox scratch directory")?;
        let spec_path = scratch.path().join("probe.spec.js");
        fs::write(&spec_path, probe_source(fragments))
            .with_context(|| format!("write {}", spec_path.display()))?;

        let started = std::time::Instant::now();
        if let Some(failure) = self.syntax_failure(&spec_path, scratch.path()) {
            tracing::debug!(fragments = fragments.len(), "probe rejected by syntax check");
            return Ok(Execution {
                observation: None,
                failure: Some(failure),
                duration: started.elapsed(),
            });
        }

        let args = self.runner_args(&spec_path, scratch.path());
        let run = self.run_runner(&args, scratch.path(), self.timeout)?;

        let output = run.combined_output();
        let observation = Observation::from_output(&output);
        let failure = classify(&run, &output, self.timeout);
        tracing::debug!(
            fragments = fragments.len(),
            elapsed_ms = run.duration.as_millis(),
            failed = failure.is_some(),
            "sandbox execution complete"
        );
        Ok(Execution {
            observation,
            failure,
            duration: run.duration,
        })
    }

    fn run_artifact(&self, artifact: &Path) -> Result<TestOutcome> {
        self.ensure_environment()?;
        let scratch = tempfile::Builder::new()
            .prefix("test-")
            .tempdir_in(self.paths.sandbox_dir())
            .context("create sandbox scratch directory")?;
        let args = self.runner_args(artifact, scratch.path());
        let run = self.run_runner(&args, scratch.path(), self.test_timeout)?;
        Ok(TestOutcome {
            passed: run.succeeded(),
            timed_out: run.timed_out,
            duration: run.duration,
            output: run.combined_output(),
        })
    }
}

/// Wrap fragments in the probe harness.
pub fn probe_source(fragments: &[String]) -> String {
    let body = fragments
        .iter()
        .filter(|fragment| !fragment.trim().is_empty())
        .map(|fragment| indent(fragment, FRAGMENT_INDENT))
        .collect::<Vec<_>>()
        .join("\n");
    PROBE_SPEC_JS.replace("{fragments}", &body)
}

pub(crate) fn indent(code: &str, prefix: &str) -> String {
    code.lines()
        .map(|line| {
            if line.trim().is_empty() {
                String::new()
            } else {
                format!("{prefix}{line}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn classify(run: &ProcessRun, output: &str, timeout: Duration) -> Option<ExecutionFailure> {
    if run.timed_out {
        return Some(ExecutionFailure::new(
            FailureKind::Timeout,
            format!("execution exceeded {}s", timeout.as_secs_f32()),
        ));
    }
    if run.succeeded() {
        return None;
    }
    let status = run
        .status
        .and_then(|status| status.code())
        .map(|code| format!("runner exited with status {code}"))
        .unwrap_or_else(|| "runner terminated by signal".to_string());
    let detail = strip_observation_lines(output);
    Some(ExecutionFailure::new(
        FailureKind::RuntimeError,
        format!("{status}\n{}", tail_string(detail.trim(), FAILURE_DETAIL_BYTES)),
    ))
}

fn strip_observation_lines(output: &str) -> String {
    output
        .lines()
        .filter(|line| !line.contains(OBSERVATION_MARKER))
        .collect::<Vec<_>>()
        .join("\n")
}
